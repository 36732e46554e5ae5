//! Pool tasks for the convert and split stages.

use super::pool::PipelineTask;
use crate::error::{PipelineError, Result};
use crate::transform::{ConversionRequest, Converter, FileSplitter};
use indicatif::ProgressBar;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task;

/// Convert one site's staging directory into its destination directory
pub struct ConvertTask<C: Converter> {
    converter: Arc<C>,
    request: ConversionRequest,
}

impl<C: Converter> ConvertTask<C> {
    pub fn new(converter: Arc<C>, request: ConversionRequest) -> Self {
        Self { converter, request }
    }
}

impl<C: Converter> PipelineTask for ConvertTask<C> {
    fn label(&self) -> String {
        format!("convert {}", self.request.site)
    }

    fn run(self) -> impl Future<Output = Result<()>> + Send {
        async move { self.converter.convert(&self.request).await }
    }
}

/// Parts written by the split stage, shared by its tasks
pub type SplitLedger = Arc<Mutex<Vec<PathBuf>>>;

/// Split one oversized converted file
pub struct SplitTask {
    splitter: Arc<dyn FileSplitter>,
    file: PathBuf,
    parts: SplitLedger,
}

impl SplitTask {
    pub fn new(splitter: Arc<dyn FileSplitter>, file: PathBuf, parts: SplitLedger) -> Self {
        Self {
            splitter,
            file,
            parts,
        }
    }
}

impl PipelineTask for SplitTask {
    fn label(&self) -> String {
        format!("split {}", self.file.display())
    }

    fn run(self) -> impl Future<Output = Result<()>> + Send {
        async move {
            let Self {
                splitter,
                file,
                parts,
            } = self;
            let label = format!("split {}", file.display());

            let written = task::spawn_blocking(move || splitter.split(&file))
                .await
                .map_err(|e| PipelineError::TaskPanicked {
                    task: label,
                    message: e.to_string(),
                })??;

            parts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(written);
            Ok(())
        }
    }
}

/// Advances a progress bar when the wrapped task finishes
pub struct Tracked<T> {
    inner: T,
    progress: ProgressBar,
}

impl<T: PipelineTask> Tracked<T> {
    pub fn new(inner: T, progress: ProgressBar) -> Self {
        Self { inner, progress }
    }
}

impl<T: PipelineTask> PipelineTask for Tracked<T> {
    fn label(&self) -> String {
        self.inner.label()
    }

    fn run(self) -> impl Future<Output = Result<()>> + Send {
        async move {
            let result = self.inner.run().await;
            self.progress.inc(1);
            result
        }
    }
}
