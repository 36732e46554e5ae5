//! Staging area: per-site working directories with guaranteed restoration.
//!
//! Every valid file is renamed into a fresh directory inside the source
//! directory (same volume, so a rename never becomes a copy) under its
//! destination name. Each move is recorded in the ledger before the next
//! one starts; the ledger is what [`StagingArea::restore`] replays in
//! reverse. Dropping an unrestored area restores it as well, so panics and
//! early returns cannot leave files behind in a staging directory.

use crate::error::{PipelineError, Result};
use crate::logging::RunLogger;
use crate::models::{SiteBatch, SiteId};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAX_STAGING_DIR_ATTEMPTS: u32 = 1000;

/// One relocated file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub staged: PathBuf,
    pub original: PathBuf,
}

/// A site batch after staging
#[derive(Debug, Clone)]
pub struct StagedBatch {
    pub site: SiteId,
    pub staging_dir: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Outcome of a restoration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: Vec<PathBuf>,
    pub dirs_removed: usize,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the staging directories and the rename ledger for one run
pub struct StagingArea {
    source_dir: PathBuf,
    prefix: String,
    ledger: Vec<LedgerEntry>,
    staging_dirs: Vec<PathBuf>,
    restored: bool,
    logger: Arc<dyn RunLogger>,
}

impl StagingArea {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        logger: Arc<dyn RunLogger>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            prefix: prefix.into(),
            ledger: Vec::new(),
            staging_dirs: Vec::new(),
            restored: false,
            logger,
        }
    }

    pub fn ledger(&self) -> &[LedgerEntry] {
        &self.ledger
    }

    pub fn staging_dirs(&self) -> &[PathBuf] {
        &self.staging_dirs
    }

    /// Move every batch into its own staging directory
    ///
    /// Stops at the first failed rename. Files already moved stay in the
    /// ledger and are put back by [`StagingArea::restore`].
    pub fn stage_all(&mut self, batches: &[SiteBatch]) -> Result<Vec<StagedBatch>> {
        let mut staged = Vec::with_capacity(batches.len());
        for batch in batches {
            staged.push(self.stage_batch(batch)?);
        }
        Ok(staged)
    }

    /// Move one site's files into a fresh staging directory
    pub fn stage_batch(&mut self, batch: &SiteBatch) -> Result<StagedBatch> {
        let staging_dir = self.create_staging_dir(batch.site.label())?;
        let mut files = Vec::with_capacity(batch.len());

        for record in &batch.records {
            let Some(name) = record.destination_name() else {
                // Invalid records never reach a batch
                continue;
            };

            let target = unique_target(&staging_dir, name);
            fs::rename(&record.source_path, &target).map_err(|e| {
                PipelineError::staging(
                    &record.source_path,
                    format!("rename into {} failed: {}", staging_dir.display(), e),
                )
            })?;

            self.ledger.push(LedgerEntry {
                staged: target.clone(),
                original: record.source_path.clone(),
            });
            files.push(target);
        }

        self.logger.info(&format!(
            "Staged {} files for site {} in {}",
            files.len(),
            batch.site,
            staging_dir.display()
        ));

        Ok(StagedBatch {
            site: batch.site.clone(),
            staging_dir,
            files,
        })
    }

    /// Create a uniquely named directory inside the source directory
    fn create_staging_dir(&mut self, site: &str) -> Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        let pid = std::process::id();

        for attempt in 0..MAX_STAGING_DIR_ATTEMPTS {
            let candidate = self
                .source_dir
                .join(format!("{}-{}-{}-{}-{}", self.prefix, site, stamp, pid, attempt));

            match fs::create_dir(&candidate) {
                Ok(()) => {
                    self.staging_dirs.push(candidate.clone());
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(PipelineError::staging(
                        &candidate,
                        format!("could not create staging directory: {}", e),
                    ));
                }
            }
        }

        Err(PipelineError::staging(
            &self.source_dir,
            format!(
                "no free staging directory name for site {} after {} attempts",
                site, MAX_STAGING_DIR_ATTEMPTS
            ),
        ))
    }

    /// Put every ledger entry back and remove emptied staging directories
    ///
    /// Individual failures are logged and skipped so one stuck file never
    /// blocks the rest. Calling it again retries only what is left.
    pub fn restore(&mut self) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut remaining = Vec::new();

        for entry in self.ledger.drain(..).rev() {
            if entry.original.exists() {
                self.logger.error(&format!(
                    "Cannot restore {}: {} already exists",
                    entry.staged.display(),
                    entry.original.display()
                ));
                report.failed.push(entry.original.clone());
                remaining.push(entry);
                continue;
            }

            match fs::rename(&entry.staged, &entry.original) {
                Ok(()) => report.restored += 1,
                Err(e) => {
                    self.logger.error(&format!(
                        "Failed to restore {} to {}: {}",
                        entry.staged.display(),
                        entry.original.display(),
                        e
                    ));
                    report.failed.push(entry.original.clone());
                    remaining.push(entry);
                }
            }
        }
        remaining.reverse();
        self.ledger = remaining;

        let mut kept_dirs = Vec::new();
        for dir in self.staging_dirs.drain(..) {
            match fs::remove_dir(&dir) {
                Ok(()) => report.dirs_removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => report.dirs_removed += 1,
                Err(e) => {
                    self.logger.warn(&format!(
                        "Leaving staging directory {} in place: {}",
                        dir.display(),
                        e
                    ));
                    kept_dirs.push(dir);
                }
            }
        }
        self.staging_dirs = kept_dirs;
        self.restored = true;

        if report.is_complete() {
            self.logger.info(&format!(
                "Restored {} files to {}",
                report.restored,
                self.source_dir.display()
            ));
        } else {
            self.logger.error(&format!(
                "Restoration incomplete: {} restored, {} still staged",
                report.restored,
                report.failed.len()
            ));
        }

        report
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if !self.restored || !self.ledger.is_empty() {
            if !self.ledger.is_empty() {
                self.logger
                    .warn("Staging area dropped before restoration, restoring now");
            }
            self.restore();
        }
    }
}

/// `dir/name`, or `dir/stem_N.ext` when the name is already taken
fn unique_target(dir: &Path, name: &str) -> PathBuf {
    let target = dir.join(name);
    if !target.exists() {
        return target;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    (1u32..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
            None => dir.join(format!("{}_{}", stem, n)),
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::RecordingLogger;
    use crate::models::{HeaderMetadata, RawFileRecord};
    use chrono::NaiveDate;
    use tempfile::TempDir;
    use tracing::Level;

    fn record(dir: &Path, file: &str, site: &str, table: &str) -> RawFileRecord {
        let path = dir.join(file);
        fs::write(&path, file.as_bytes()).unwrap();
        let header = HeaderMetadata {
            serial: "1".to_string(),
            site: SiteId::Resolved(site.to_string()),
            table: table.to_string(),
            timestamp: "2024-01-02 03:04:05".to_string(),
            captured_at: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(3, 4, 5)
                .unwrap(),
        };
        let name = header.destination_name("dat");
        RawFileRecord::valid(path, file.len() as u64, header, name)
    }

    fn batch(site: &str, records: Vec<RawFileRecord>) -> SiteBatch {
        SiteBatch {
            site: SiteId::Resolved(site.to_string()),
            records,
        }
    }

    #[test]
    fn test_stage_and_restore_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let alpha = batch("ALPHA", vec![record(dir, "a.dat", "ALPHA", "T1")]);
        let beta = batch(
            "BETA",
            vec![record(dir, "b.dat", "BETA", "T1"), record(dir, "c.dat", "BETA", "T2")],
        );

        let logger = RecordingLogger::new();
        let mut area = StagingArea::new(dir, ".staging", logger.clone());
        let staged = area.stage_all(&[alpha, beta]).unwrap();

        assert_eq!(staged.len(), 2);
        assert_eq!(area.ledger().len(), 3);
        assert_ne!(staged[0].staging_dir, staged[1].staging_dir);
        for batch in &staged {
            assert!(batch.staging_dir.starts_with(dir));
            for file in &batch.files {
                assert!(file.exists());
            }
        }
        assert!(!dir.join("a.dat").exists());
        assert!(staged[0].files[0].ends_with("ALPHA_20240102.0304_T1.dat"));

        let report = area.restore();
        assert_eq!(report.restored, 3);
        assert_eq!(report.dirs_removed, 2);
        assert!(report.is_complete());

        for name in ["a.dat", "b.dat", "c.dat"] {
            assert!(dir.join(name).exists());
        }
        for batch in &staged {
            assert!(!batch.staging_dir.exists());
        }
    }

    #[test]
    fn test_colliding_names_are_suffixed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let twins = batch(
            "ALPHA",
            vec![record(dir, "x.dat", "ALPHA", "T1"), record(dir, "y.dat", "ALPHA", "T1")],
        );

        let mut area = StagingArea::new(dir, ".staging", RecordingLogger::new());
        let staged = area.stage_batch(&twins).unwrap();

        assert_eq!(staged.files.len(), 2);
        assert!(staged.files[0].ends_with("ALPHA_20240102.0304_T1.dat"));
        assert!(staged.files[1].ends_with("ALPHA_20240102.0304_T1_1.dat"));

        area.restore();
        assert_eq!(fs::read(dir.join("x.dat")).unwrap(), b"x.dat");
        assert_eq!(fs::read(dir.join("y.dat")).unwrap(), b"y.dat");
    }

    #[test]
    fn test_failed_rename_keeps_earlier_moves_in_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let first = record(dir, "first.dat", "ALPHA", "T1");
        let mut vanished = record(dir, "gone.dat", "ALPHA", "T2");
        fs::remove_file(&vanished.source_path).unwrap();
        vanished.size_bytes = 0;

        let mut area = StagingArea::new(dir, ".staging", RecordingLogger::new());
        let err = area
            .stage_batch(&batch("ALPHA", vec![first, vanished]))
            .unwrap_err();

        assert!(matches!(err, PipelineError::Staging { .. }));
        assert_eq!(area.ledger().len(), 1);
        assert!(!dir.join("first.dat").exists());

        let report = area.restore();
        assert_eq!(report.restored, 1);
        assert!(dir.join("first.dat").exists());
        assert!(area.staging_dirs().is_empty());
    }

    #[test]
    fn test_restore_continues_past_blocked_entries() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let logger = RecordingLogger::new();
        let mut area = StagingArea::new(dir, ".staging", logger.clone());
        area.stage_batch(&batch(
            "ALPHA",
            vec![record(dir, "a.dat", "ALPHA", "T1"), record(dir, "b.dat", "ALPHA", "T2")],
        ))
        .unwrap();

        // Something reappears at an original path while staged
        fs::write(dir.join("a.dat"), b"intruder").unwrap();

        let report = area.restore();
        assert_eq!(report.restored, 1);
        assert_eq!(report.failed, vec![dir.join("a.dat")]);
        assert!(dir.join("b.dat").exists());
        assert_eq!(area.ledger().len(), 1);
        assert!(logger.contains(Level::ERROR, "already exists"));
        assert_eq!(area.staging_dirs().len(), 1);

        // Retrying after the conflict clears only restores what is left
        fs::remove_file(dir.join("a.dat")).unwrap();
        let retry = area.restore();
        assert_eq!(retry.restored, 1);
        assert!(retry.is_complete());
        assert_eq!(fs::read(dir.join("a.dat")).unwrap(), b"a.dat");
    }

    #[test]
    fn test_drop_restores_unrestored_area() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let staging_dir;
        {
            let mut area = StagingArea::new(dir, ".staging", RecordingLogger::new());
            let staged = area
                .stage_batch(&batch("ALPHA", vec![record(dir, "a.dat", "ALPHA", "T1")]))
                .unwrap();
            staging_dir = staged.staging_dir;
            assert!(!dir.join("a.dat").exists());
        }
        assert!(dir.join("a.dat").exists());
        assert!(!staging_dir.exists());
    }

    #[test]
    fn test_restore_after_panic() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let record = record(&dir, "a.dat", "ALPHA", "T1");

        let result = std::panic::catch_unwind(move || {
            let mut area = StagingArea::new(&dir, ".staging", RecordingLogger::new());
            area.stage_batch(&batch("ALPHA", vec![record])).unwrap();
            panic!("stage blew up");
        });

        assert!(result.is_err());
        assert!(temp_dir.path().join("a.dat").exists());
    }

    #[test]
    fn test_unique_target_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("name"), b"").unwrap();
        assert_eq!(
            unique_target(temp_dir.path(), "name"),
            temp_dir.path().join("name_1")
        );
    }
}
