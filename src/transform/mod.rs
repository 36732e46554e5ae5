//! Black-box collaborators driven by the pipeline.
//!
//! The pipeline only knows these contracts: a converter turns a directory
//! of raw files into text files in a target directory, a splitter breaks
//! one oversized file into parts, a standardizer rewrites one converted
//! file into the canonical output layout.

pub mod converter;
pub mod split;
pub mod standardize;

pub use converter::{ConversionRequest, ExternalConverter};
pub use split::LineSplitter;
pub use standardize::Toa5Standardizer;

use crate::error::Result;
use std::future::Future;
use std::path::{Path, PathBuf};

/// Binary-to-text conversion of a whole staging directory
pub trait Converter: Send + Sync + 'static {
    /// Short tool name for log lines
    fn name(&self) -> String;

    /// Convert every raw file in `request.source_dir` into `request.target_dir`
    ///
    /// An error means the conversion failed for this site only.
    fn convert(&self, request: &ConversionRequest) -> impl Future<Output = Result<()>> + Send;
}

/// Splits one oversized text file, returning the parts it wrote
pub trait FileSplitter: Send + Sync {
    fn split(&self, file: &Path) -> Result<Vec<PathBuf>>;
}

/// Rewrites one converted file into the canonical layout
pub trait Standardizer: Send + Sync {
    /// Returns the files written or updated
    fn standardize(&self, file: &Path, site: &str) -> Result<Vec<PathBuf>>;
}
