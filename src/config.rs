//! Configuration management and validation.
//!
//! Provides the configuration for one pipeline run: worker count, stage
//! toggles and limits, converter invocation settings and the destination
//! directory templates.

use crate::constants::{
    CONVERTER_RUNFILE_EXTENSION, DEFAULT_CONVERTER_OPTIONS, DEFAULT_CONVERTER_PROGRAM,
    DEFAULT_SPLIT_HEADER_LINES, DEFAULT_SPLIT_MAX_LINES, DEFAULT_SPLIT_THRESHOLD_BYTES,
    DEFAULT_WORKERS, MAX_WORKERS, RAW_FILE_EXTENSION, SITE_PLACEHOLDER, STAGING_DIR_PREFIX,
    TABLE_PLACEHOLDER,
};
use crate::error::{PipelineError, Result};
use crate::header::UnknownSourcePolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// External binary-to-text converter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Converter executable
    pub program: PathBuf,

    /// Fixed formatting options written into every run file
    pub options: BTreeMap<String, String>,

    /// Extension of the generated run file
    pub runfile_extension: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_CONVERTER_PROGRAM),
            options: DEFAULT_CONVERTER_OPTIONS
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            runfile_extension: CONVERTER_RUNFILE_EXTENSION.to_string(),
        }
    }
}

/// Limits handed to the oversized-file splitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Data lines per output part
    pub max_lines: usize,

    /// Header lines repeated at the top of every part
    pub header_lines: usize,

    /// Delete the oversized file once every part has been written
    pub remove_source: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_SPLIT_MAX_LINES,
            header_lines: DEFAULT_SPLIT_HEADER_LINES,
            remove_source: true,
        }
    }
}

/// Configuration for a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of worker tasks per pooled stage
    pub workers: usize,

    /// Extension of raw files to pick up from the source directory
    pub raw_extension: String,

    /// Treatment of headers whose serial number has no site
    pub unknown_sources: UnknownSourcePolicy,

    /// Converter output directory; must contain the `{site}` placeholder
    pub destination_template: String,

    /// Split converted files above the threshold
    pub split_enabled: bool,

    /// Size above which converted files are split (bytes)
    pub split_threshold_bytes: u64,

    pub split: SplitConfig,

    /// Run the sequential standardize pass
    pub standardize_enabled: bool,

    /// Standardized output directory; may use `{site}` and `{table}`
    pub standardized_template: String,

    /// Prefix of per-site staging directory names
    pub staging_prefix: String,

    pub converter: ConverterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            raw_extension: RAW_FILE_EXTENSION.to_string(),
            unknown_sources: UnknownSourcePolicy::Reject,
            destination_template: format!("converted/{}", SITE_PLACEHOLDER),
            split_enabled: true,
            split_threshold_bytes: DEFAULT_SPLIT_THRESHOLD_BYTES,
            split: SplitConfig::default(),
            standardize_enabled: true,
            standardized_template: format!("standardized/{}/{}", SITE_PLACEHOLDER, TABLE_PLACEHOLDER),
            staging_prefix: STAGING_DIR_PREFIX.to_string(),
            converter: ConverterConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create configuration with custom worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the converter output directory template
    pub fn with_destination_template(mut self, template: impl Into<String>) -> Self {
        self.destination_template = template.into();
        self
    }

    /// Set the standardized output directory template
    pub fn with_standardized_template(mut self, template: impl Into<String>) -> Self {
        self.standardized_template = template.into();
        self
    }

    /// Set the split threshold in bytes
    pub fn with_split_threshold(mut self, bytes: u64) -> Self {
        self.split_threshold_bytes = bytes;
        self
    }

    /// Configure splitter limits
    pub fn with_split_config(mut self, split: SplitConfig) -> Self {
        self.split = split;
        self
    }

    /// Disable the split stage
    pub fn without_split(mut self) -> Self {
        self.split_enabled = false;
        self
    }

    /// Disable the standardize pass
    pub fn without_standardize(mut self) -> Self {
        self.standardize_enabled = false;
        self
    }

    /// Accept files from loggers missing from the site table
    pub fn with_unknown_sources(mut self, policy: UnknownSourcePolicy) -> Self {
        self.unknown_sources = policy;
        self
    }

    /// Use a different converter executable
    pub fn with_converter_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.converter.program = program.into();
        self
    }

    /// Converter output directory for a site
    pub fn destination_dir(&self, site: &str) -> PathBuf {
        PathBuf::from(self.destination_template.replace(SITE_PLACEHOLDER, site))
    }

    /// Standardized output directory for a site and table
    pub fn standardized_dir(&self, site: &str, table: &str) -> PathBuf {
        PathBuf::from(
            self.standardized_template
                .replace(SITE_PLACEHOLDER, site)
                .replace(TABLE_PLACEHOLDER, table),
        )
    }

    /// Resolve relative templates against a base directory
    pub fn anchored_at(mut self, base: &Path) -> Self {
        if Path::new(&self.destination_template).is_relative() {
            self.destination_template = base
                .join(&self.destination_template)
                .to_string_lossy()
                .into_owned();
        }
        if Path::new(&self.standardized_template).is_relative() {
            self.standardized_template = base
                .join(&self.standardized_template)
                .to_string_lossy()
                .into_owned();
        }
        self
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::configuration(
                "Number of workers must be greater than 0",
            ));
        }

        if self.workers > MAX_WORKERS {
            return Err(PipelineError::configuration(format!(
                "Number of workers cannot exceed {}",
                MAX_WORKERS
            )));
        }

        if !self.destination_template.contains(SITE_PLACEHOLDER) {
            return Err(PipelineError::configuration(format!(
                "Destination template '{}' must contain {} so sites never share an output directory",
                self.destination_template, SITE_PLACEHOLDER
            )));
        }

        if self.raw_extension.is_empty() || self.raw_extension.starts_with('.') {
            return Err(PipelineError::configuration(format!(
                "Raw extension '{}' must be non-empty and given without a leading dot",
                self.raw_extension
            )));
        }

        if self.split_enabled {
            if self.split.max_lines == 0 {
                return Err(PipelineError::configuration(
                    "Split max lines must be greater than 0",
                ));
            }
            if self.split_threshold_bytes == 0 {
                return Err(PipelineError::configuration(
                    "Split threshold must be greater than 0 bytes",
                ));
            }
        }

        if self.staging_prefix.is_empty() || self.staging_prefix.contains(['/', '\\']) {
            return Err(PipelineError::configuration(format!(
                "Staging prefix '{}' must be a plain directory name",
                self.staging_prefix
            )));
        }

        Ok(())
    }
}
