//! Oversized text file splitting.
//!
//! Writes a file as a series of parts named after the source plus a
//! two-digit counter (`name_01.dat`, `name_02.dat`, ...), each starting
//! with the source's header lines and holding at most `max_lines` data
//! lines. Parts are never overwritten; a failed split removes the parts it
//! wrote and leaves the source untouched.

use super::FileSplitter;
use crate::config::SplitConfig;
use crate::error::{PipelineError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const OPERATION: &str = "Split";

/// Line-based splitter with a repeated header
#[derive(Debug, Clone)]
pub struct LineSplitter {
    max_lines: usize,
    header_lines: usize,
    remove_source: bool,
}

impl LineSplitter {
    pub fn new(max_lines: usize, header_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            header_lines,
            remove_source: false,
        }
    }

    pub fn from_config(config: &SplitConfig) -> Self {
        Self::new(config.max_lines, config.header_lines).removing_source(config.remove_source)
    }

    /// Delete the source once all parts are written
    pub fn removing_source(mut self, remove: bool) -> Self {
        self.remove_source = remove;
        self
    }

    fn split_into_parts(&self, file: &Path, parts: &mut Vec<PathBuf>) -> Result<()> {
        let mut reader = BufReader::new(File::open(file)?);

        let mut header = Vec::new();
        for _ in 0..self.header_lines {
            if reader.read_until(b'\n', &mut header)? == 0 {
                break;
            }
        }

        let mut writer: Option<BufWriter<File>> = None;
        let mut lines_in_part = 0usize;
        let mut line = Vec::new();

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }

            if writer.is_none() {
                let part = part_path(file, parts.len() + 1);
                let created = OpenOptions::new().write(true).create_new(true).open(&part);
                let mut out = BufWriter::new(created.map_err(|e| {
                    PipelineError::transform(
                        OPERATION,
                        file,
                        format!("cannot create {}: {}", part.display(), e),
                    )
                })?);
                parts.push(part);
                out.write_all(&header)?;
                writer = Some(out);
            }

            if let Some(out) = writer.as_mut() {
                out.write_all(&line)?;
            }
            lines_in_part += 1;

            if lines_in_part == self.max_lines {
                if let Some(mut out) = writer.take() {
                    out.flush()?;
                }
                lines_in_part = 0;
            }
        }

        if let Some(mut out) = writer.take() {
            out.flush()?;
        }
        Ok(())
    }
}

impl FileSplitter for LineSplitter {
    fn split(&self, file: &Path) -> Result<Vec<PathBuf>> {
        let mut parts = Vec::new();

        if let Err(e) = self.split_into_parts(file, &mut parts) {
            for part in &parts {
                let _ = fs::remove_file(part);
            }
            return Err(match e {
                PipelineError::Io(io) => PipelineError::transform(OPERATION, file, io.to_string()),
                other => other,
            });
        }

        if self.remove_source && !parts.is_empty() {
            fs::remove_file(file).map_err(|e| {
                PipelineError::transform(
                    OPERATION,
                    file,
                    format!("parts written but source not removed: {}", e),
                )
            })?;
        }

        Ok(parts)
    }
}

/// `dir/stem_NN.ext` for part number `n` (1-based)
fn part_path(file: &Path, n: usize) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match file.extension() {
        Some(ext) => format!("{}_{:02}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}_{:02}", stem, n),
    };
    file.with_file_name(name)
}
