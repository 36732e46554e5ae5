//! Error handling for card ingestion operations.
//!
//! Structural header failures are kept apart from business-rule
//! rejections. Staging failures abort a run; per-site and per-file
//! failures are logged and isolated.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source directory not found: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("Invalid raw file header in {path} - {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("Unrecognized logger serial number '{serial}' in {path}")]
    UnrecognizedSource { path: PathBuf, serial: String },

    #[error("Staging failed for {path} - {reason}")]
    Staging { path: PathBuf, reason: String },

    #[error("External tool '{tool}' failed for site {site}: {reason}")]
    ExternalTool {
        tool: String,
        site: String,
        reason: String,
    },

    #[error("Destination directory {path} for site {site} unusable: {reason}")]
    Destination {
        site: String,
        path: PathBuf,
        reason: String,
    },

    #[error("{operation} failed for file: {path} - {reason}")]
    Transform {
        operation: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Task '{task}' panicked: {message}")]
    TaskPanicked { task: String, message: String },

    #[error("Processing interrupted: {reason}")]
    Interrupted { reason: String },
}

impl PipelineError {
    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn staging(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Staging {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn transform(
        operation: &'static str,
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Transform {
            operation,
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
