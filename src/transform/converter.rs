//! External binary-to-text converter invocation.
//!
//! Each call writes a fresh, uniquely named run file (key=value pairs:
//! source directory, target directory, fixed formatting options), runs
//! `<tool> runfile="<path>"` and treats a non-zero exit status as a
//! failure for that site. The run file is removed afterwards; failing to
//! remove it is only a warning.

use super::Converter;
use crate::config::ConverterConfig;
use crate::error::{PipelineError, Result};
use crate::logging::RunLogger;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

/// One conversion: all raw files of a site's staging directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub site: String,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
}

/// Runs the configured converter program as a child process
pub struct ExternalConverter {
    config: ConverterConfig,
    logger: Arc<dyn RunLogger>,
}

impl ExternalConverter {
    pub fn new(config: ConverterConfig, logger: Arc<dyn RunLogger>) -> Self {
        Self { config, logger }
    }

    fn tool_name(&self) -> String {
        self.config
            .program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.program.display().to_string())
    }

    fn failure(&self, site: &str, reason: impl Into<String>) -> PipelineError {
        PipelineError::ExternalTool {
            tool: self.tool_name(),
            site: site.to_string(),
            reason: reason.into(),
        }
    }

    /// Write the run file for `request` to a unique temporary path
    fn write_runfile(&self, request: &ConversionRequest) -> Result<tempfile::TempPath> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("cardflow-{}-", request.site))
            .suffix(&self.config.runfile_extension)
            .tempfile()?;

        file.write_all(render_runfile(request, &self.config).as_bytes())?;
        file.flush()?;
        Ok(file.into_temp_path())
    }

    async fn invoke(&self, runfile: &Path, request: &ConversionRequest) -> Result<()> {
        let mut command = Command::new(&self.config.program);
        add_runfile_arg(&mut command, runfile);
        command.kill_on_drop(true);

        let output = command.output().await.map_err(|e| {
            self.failure(
                &request.site,
                format!("could not start {}: {}", self.config.program.display(), e),
            )
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            self.logger.debug(&format!(
                "{} stderr for {}: {}",
                self.tool_name(),
                request.site,
                stderr.trim()
            ));
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(self.failure(&request.site, format!("exited with {}", output.status)))
        }
    }
}

impl Converter for ExternalConverter {
    fn name(&self) -> String {
        self.tool_name()
    }

    async fn convert(&self, request: &ConversionRequest) -> Result<()> {
        let runfile = self
            .write_runfile(request)
            .map_err(|e| self.failure(&request.site, format!("could not write run file: {}", e)))?;

        self.logger.info(&format!(
            "Converting {} -> {} for site {}",
            request.source_dir.display(),
            request.target_dir.display(),
            request.site
        ));

        let result = self.invoke(&runfile, request).await;

        let runfile_path = runfile.to_path_buf();
        if let Err(e) = runfile.close() {
            self.logger.warn(&format!(
                "Could not remove run file {}: {}",
                runfile_path.display(),
                e
            ));
        }

        result
    }
}

#[cfg(windows)]
fn add_runfile_arg(command: &mut Command, runfile: &Path) {
    // The converter parses its own command line and expects literal quotes
    command.raw_arg(format!("runfile=\"{}\"", runfile.display()));
}

#[cfg(not(windows))]
fn add_runfile_arg(command: &mut Command, runfile: &Path) {
    command.arg(format!("runfile={}", runfile.display()));
}

/// Run file contents for one request
pub fn render_runfile(request: &ConversionRequest, config: &ConverterConfig) -> String {
    let mut contents = String::from("[main]\n");
    let _ = writeln!(contents, "SourceDir={}", with_trailing_separator(&request.source_dir));
    let _ = writeln!(contents, "TargetDir={}", with_trailing_separator(&request.target_dir));
    for (key, value) in &config.options {
        let _ = writeln!(contents, "{}={}", key, value);
    }
    contents
}

fn with_trailing_separator(dir: &Path) -> String {
    let mut text = dir.display().to_string();
    if !text.ends_with(MAIN_SEPARATOR) {
        text.push(MAIN_SEPARATOR);
    }
    text
}
