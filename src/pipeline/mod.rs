//! Staged ingestion pipeline for one storage card directory.
//!
//! Sequences the run: scan and route every raw file, move valid files into
//! per-site staging directories, convert each site in the worker pool, split
//! oversized outputs, standardize the rest, then restore every staged file
//! to where it was found. Stages are strict barriers; restoration runs on
//! every path out of [`PipelineCoordinator::run`].

pub mod discovery;
pub mod pool;
pub mod snapshot;
pub mod staging;
pub mod tasks;

#[cfg(test)]
pub mod tests;

use self::discovery::FileProfiler;
use self::pool::{PoolReport, WorkerPool};
use self::snapshot::{DirectorySnapshot, OutputFile};
use self::staging::{StagedBatch, StagingArea};
use self::tasks::{ConvertTask, SplitLedger, SplitTask, Tracked};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::header::MetadataExtractor;
use crate::logging::RunLogger;
use crate::models::{RoutingTable, RunOutcome, RunReport, SiteBatch};
use crate::sites::SiteTable;
use crate::transform::{
    ConversionRequest, Converter, FileSplitter, LineSplitter, Standardizer, Toa5Standardizer,
};

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::Instant;
use tokio::task;
use tokio_util::sync::CancellationToken;

/// Stage names used in logs and abort reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Staging,
    Convert,
    Split,
    Standardize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Staging => "staging",
            Stage::Convert => "convert",
            Stage::Split => "split",
            Stage::Standardize => "standardize",
        };
        f.write_str(name)
    }
}

type StageResult<T> = std::result::Result<T, (Stage, PipelineError)>;

/// A site's destination directory with its pre-conversion listing
struct SiteOutputs {
    site: String,
    before: DirectorySnapshot,
    new_files: Vec<OutputFile>,
}

/// State owned by one run: the site batches, the staging ledger and the
/// per-destination output tally, plus the report being filled in
struct PipelineRun {
    batches: Vec<SiteBatch>,
    staging: StagingArea,
    staged: Vec<StagedBatch>,
    outputs: Vec<SiteOutputs>,
    report: RunReport,
}

impl PipelineRun {
    fn new(batches: Vec<SiteBatch>, staging: StagingArea, mut report: RunReport) -> Self {
        report.sites = batches
            .iter()
            .map(|batch| batch.site.label().to_string())
            .collect();

        Self {
            batches,
            staging,
            staged: Vec::new(),
            outputs: Vec::new(),
            report,
        }
    }

    /// Files produced since each destination's snapshot
    fn new_outputs(&self) -> impl Iterator<Item = &OutputFile> {
        self.outputs.iter().flat_map(|site| site.new_files.iter())
    }

    /// Put every staged file back and hand over the report
    fn finish(mut self) -> RunReport {
        self.report.files_staged = self.staging.ledger().len();
        let restored = self.staging.restore();
        self.report.files_restored = restored.restored;
        self.report.restore_failures = restored.failed.len();
        self.report
    }
}

/// Drives one card directory through the ingestion stages
pub struct PipelineCoordinator<C: Converter> {
    config: Arc<PipelineConfig>,
    profiler: FileProfiler,
    converter: Arc<C>,
    splitter: Arc<dyn FileSplitter>,
    standardizer: Arc<dyn Standardizer>,
    logger: Arc<dyn RunLogger>,
    cancel: CancellationToken,
    show_progress: bool,
}

impl<C: Converter> PipelineCoordinator<C> {
    /// Validate `config` and wire the default splitter and standardizer
    pub fn new(
        config: PipelineConfig,
        sites: SiteTable,
        converter: C,
        logger: Arc<dyn RunLogger>,
    ) -> Result<Self> {
        config.validate()?;

        let extractor = MetadataExtractor::new(Arc::new(sites), config.unknown_sources);
        let profiler = FileProfiler::new(extractor, config.raw_extension.clone(), logger.clone());
        let splitter: Arc<dyn FileSplitter> = Arc::new(LineSplitter::from_config(&config.split));
        let standardizer: Arc<dyn Standardizer> =
            Arc::new(Toa5Standardizer::new(config.standardized_template.clone()));

        Ok(Self {
            config: Arc::new(config),
            profiler,
            converter: Arc::new(converter),
            splitter,
            standardizer,
            logger,
            cancel: CancellationToken::new(),
            show_progress: false,
        })
    }

    pub fn with_splitter(mut self, splitter: Arc<dyn FileSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_standardizer(mut self, standardizer: Arc<dyn Standardizer>) -> Self {
        self.standardizer = standardizer;
        self
    }

    /// Stop before the next stage once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Draw progress bars on stderr
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Route every raw file in `source_dir` without touching anything
    pub async fn scan(&self, source_dir: &Path) -> Result<RoutingTable> {
        self.profiler.profile(source_dir).await
    }

    /// Run every stage for `source_dir`
    ///
    /// Only errors before anything is staged are returned; later failures
    /// end up in the report as [`RunOutcome::Aborted`] after restoration.
    pub async fn run(&self, source_dir: &Path) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::new(source_dir.to_path_buf());

        let table = self.scan(source_dir).await.inspect_err(|e| {
            self.logger
                .error(&format!("Scan of {} failed: {}", source_dir.display(), e));
        })?;
        report.files_scanned = table.len();
        report.files_valid = table.valid_count();
        report.files_invalid = table.invalid_count();

        let batches = table.site_batches();
        if batches.is_empty() {
            self.logger.info(&format!(
                "No valid raw files in {}, nothing to do",
                source_dir.display()
            ));
            report.outcome = RunOutcome::NoOp;
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        let staging = StagingArea::new(
            source_dir,
            self.config.staging_prefix.clone(),
            self.logger.clone(),
        );
        let mut state = PipelineRun::new(batches, staging, report);

        let result = self.run_stages(&mut state).await;
        let mut report = state.finish();

        if let Err((stage, e)) = result {
            self.logger.error(&format!(
                "Run aborted during {} stage: {}",
                stage, e
            ));
            report.outcome = RunOutcome::Aborted {
                stage: stage.to_string(),
                reason: e.to_string(),
            };
        }

        report.elapsed = started.elapsed();
        self.logger.info(&format!(
            "Run finished in {:.1}s: {} staged, {} restored, {} converted outputs",
            report.elapsed.as_secs_f64(),
            report.files_staged,
            report.files_restored,
            report.converted_outputs.len()
        ));
        Ok(report)
    }

    async fn run_stages(&self, run: &mut PipelineRun) -> StageResult<()> {
        self.checkpoint(Stage::Staging)?;
        run.staged = run
            .staging
            .stage_all(&run.batches)
            .map_err(|e| (Stage::Staging, e))?;

        self.checkpoint(Stage::Convert)?;
        self.convert(run).await?;
        run.report.converted_outputs = run.new_outputs().map(|file| file.path.clone()).collect();

        if self.config.split_enabled {
            self.checkpoint(Stage::Split)?;
            self.split(run).await?;
        }

        if self.config.standardize_enabled {
            self.checkpoint(Stage::Standardize)?;
            self.standardize(run).await;
        }

        Ok(())
    }

    fn checkpoint(&self, next: Stage) -> StageResult<()> {
        if self.cancel.is_cancelled() {
            return Err((
                next,
                PipelineError::Interrupted {
                    reason: format!("cancellation requested before {} stage", next),
                },
            ));
        }
        Ok(())
    }

    /// Create a site's destination directory and list what it already holds
    async fn prepare_destination(&self, site: &str, target_dir: &Path) -> Result<DirectorySnapshot> {
        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| PipelineError::Destination {
                site: site.to_string(),
                path: target_dir.to_path_buf(),
                reason: e.to_string(),
            })?;
        DirectorySnapshot::capture_async(target_dir.to_path_buf()).await
    }

    /// One conversion task per site with a usable destination
    ///
    /// A site whose destination cannot be prepared is counted as a failed
    /// task and skipped; its files stay staged until restoration.
    async fn convert(&self, run: &mut PipelineRun) -> StageResult<()> {
        let mut requests = Vec::with_capacity(run.staged.len());

        for batch in &run.staged {
            let site = batch.site.label().to_string();
            let target_dir = self.config.destination_dir(&site);

            let before = match self.prepare_destination(&site, &target_dir).await {
                Ok(before) => before,
                Err(e) => {
                    self.logger.error(&format!("Skipping conversion: {}", e));
                    run.report.task_failures += 1;
                    continue;
                }
            };

            run.outputs.push(SiteOutputs {
                site: site.clone(),
                before,
                new_files: Vec::new(),
            });
            requests.push(ConversionRequest {
                site,
                source_dir: batch.staging_dir.clone(),
                target_dir,
            });
        }

        self.logger.info(&format!(
            "Converting {} sites with {}",
            requests.len(),
            self.converter.name()
        ));

        let progress = self.stage_bar(requests.len(), "Converting");
        let tasks = requests.into_iter().map(|request| {
            Tracked::new(
                ConvertTask::new(self.converter.clone(), request),
                progress.clone(),
            )
        });
        let pool = WorkerPool::run_stage("convert", self.config.workers, tasks, self.logger.clone())
            .await
            .map_err(|e| (Stage::Convert, e))?;
        progress.finish_and_clear();
        run.report.task_failures += pool.failed + pool.panicked;

        self.refresh_outputs(run).await;
        Ok(())
    }

    /// Re-list every destination directory against its pre-conversion snapshot
    async fn refresh_outputs(&self, run: &mut PipelineRun) {
        for site in &mut run.outputs {
            match site.before.diff_async().await {
                Ok((_, added)) => {
                    self.logger.info(&format!(
                        "{} new files for site {}",
                        added.len(),
                        site.site
                    ));
                    site.new_files = added;
                }
                Err(e) => {
                    self.logger.error(&format!(
                        "Could not list outputs for site {}: {}",
                        site.site, e
                    ));
                    site.new_files.clear();
                    run.report.task_failures += 1;
                }
            }
        }
    }

    /// Split every new file above the threshold, then re-list the outputs
    async fn split(&self, run: &mut PipelineRun) -> StageResult<()> {
        let threshold = self.config.split_threshold_bytes;
        let oversized: Vec<PathBuf> = run
            .new_outputs()
            .filter(|file| file.size_bytes > threshold)
            .map(|file| file.path.clone())
            .collect();

        if oversized.is_empty() {
            self.logger.info(&format!(
                "No converted files above {} bytes, skipping split",
                threshold
            ));
            return Ok(());
        }

        self.logger
            .info(&format!("Splitting {} oversized files", oversized.len()));

        let parts: SplitLedger = Arc::default();
        let progress = self.stage_bar(oversized.len(), "Splitting");
        let tasks = oversized.into_iter().map(|file| {
            Tracked::new(
                SplitTask::new(self.splitter.clone(), file, parts.clone()),
                progress.clone(),
            )
        });
        let pool: PoolReport =
            WorkerPool::run_stage("split", self.config.workers, tasks, self.logger.clone())
                .await
                .map_err(|e| (Stage::Split, e))?;
        progress.finish_and_clear();

        run.report.transform_failures += pool.failed;
        run.report.task_failures += pool.panicked;
        run.report.split_parts = parts.lock().unwrap_or_else(PoisonError::into_inner).len();

        self.refresh_outputs(run).await;
        Ok(())
    }

    /// Sequential pass over the new files at or under the split threshold
    async fn standardize(&self, run: &mut PipelineRun) {
        let threshold = self.config.split_threshold_bytes;
        let progress = self.stage_bar(run.new_outputs().count(), "Standardizing");
        let report = &mut run.report;
        let mut failed = 0;

        for site in &run.outputs {
            for file in &site.new_files {
                progress.inc(1);

                if file.size_bytes > threshold {
                    self.logger.warn(&format!(
                        "Skipping standardization of {} ({} bytes exceeds {})",
                        file.path.display(),
                        file.size_bytes,
                        threshold
                    ));
                    report.oversized_skipped += 1;
                    continue;
                }

                let standardizer = self.standardizer.clone();
                let path = file.path.clone();
                let site_code = site.site.clone();
                let outcome = task::spawn_blocking(move || standardizer.standardize(&path, &site_code))
                    .await
                    .unwrap_or_else(|e| {
                        Err(PipelineError::TaskPanicked {
                            task: format!("standardize {}", file.path.display()),
                            message: e.to_string(),
                        })
                    });

                match outcome {
                    Ok(written) => {
                        self.logger.debug(&format!(
                            "Standardized {} into {} files",
                            file.path.display(),
                            written.len()
                        ));
                        report.standardized_files += 1;
                    }
                    Err(e) => {
                        self.logger.error(&format!(
                            "Standardize failed for {}: {}",
                            file.path.display(),
                            e
                        ));
                        failed += 1;
                    }
                }
            }
        }

        progress.finish_and_clear();
        report.transform_failures += failed;
        self.logger.info(&format!(
            "Standardized {} files ({} failed, {} oversized)",
            report.standardized_files, failed, report.oversized_skipped
        ));
    }

    fn stage_bar(&self, len: usize, message: &'static str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(message);
        bar
    }
}
