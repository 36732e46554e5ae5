//! Canonical layout for converted TOA5 text files.
//!
//! Every converted file is rewritten into one cumulative file per site and
//! table (`{site}_{table}.dat`) under the standardized directory template.
//! Rows are keyed by their timestamp; when the output already exists the
//! two are merged cell by cell and non-null values already on disk win.
//! An output whose column header differs is left untouched and the input
//! is reported as failed.

use super::Standardizer;
use crate::constants::{
    RAW_FILE_EXTENSION, SITE_PLACEHOLDER, STANDARD_NULL, TABLE_PLACEHOLDER, TOA5_FORMAT_TAG,
    TOA5_HEADER_LINES, TOA5_QUOTED_NULL,
};
use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const OPERATION: &str = "Standardize";

/// Writes converted files into `{site}_{table}.dat` under a directory template
#[derive(Debug, Clone)]
pub struct Toa5Standardizer {
    template: String,
}

impl Toa5Standardizer {
    /// `template` may use the `{site}` and `{table}` placeholders
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn output_path(&self, site: &str, table: &str) -> PathBuf {
        let dir = self
            .template
            .replace(SITE_PLACEHOLDER, site)
            .replace(TABLE_PLACEHOLDER, table);
        PathBuf::from(dir).join(format!("{}_{}.{}", site, table, RAW_FILE_EXTENSION))
    }
}

impl Standardizer for Toa5Standardizer {
    fn standardize(&self, file: &Path, site: &str) -> Result<Vec<PathBuf>> {
        let text = fs::read_to_string(file)
            .map_err(|e| PipelineError::transform(OPERATION, file, e.to_string()))?;
        let incoming = Toa5Table::parse(&text)
            .map_err(|reason| PipelineError::transform(OPERATION, file, reason))?;

        let target = self.output_path(site, &incoming.table);
        let merged = if target.exists() {
            let existing_text = fs::read_to_string(&target)
                .map_err(|e| PipelineError::transform(OPERATION, file, e.to_string()))?;
            let existing = Toa5Table::parse(&existing_text).map_err(|reason| {
                PipelineError::transform(
                    OPERATION,
                    file,
                    format!("existing output {} unreadable: {}", target.display(), reason),
                )
            })?;
            existing.merge(incoming).map_err(|reason| {
                PipelineError::transform(
                    OPERATION,
                    file,
                    format!("{} (output {} left unchanged)", reason, target.display()),
                )
            })?
        } else {
            incoming
        };

        write_atomically(&target, &merged.render())
            .map_err(|e| PipelineError::transform(OPERATION, file, e.to_string()))?;
        Ok(vec![target])
    }
}

/// A TOA5 file held as text: four header lines and rows keyed by timestamp
#[derive(Debug, Clone, PartialEq)]
struct Toa5Table {
    table: String,
    header: Vec<String>,
    rows: BTreeMap<String, Vec<String>>,
    line_ending: &'static str,
}

impl Toa5Table {
    fn parse(text: &str) -> std::result::Result<Self, String> {
        let line_ending = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let mut lines = text.lines().map(|line| line.trim_end_matches('\r'));

        let header: Vec<String> = lines
            .by_ref()
            .take(TOA5_HEADER_LINES)
            .map(str::to_string)
            .collect();
        if header.len() < TOA5_HEADER_LINES {
            return Err(format!(
                "expected {} header lines, found {}",
                TOA5_HEADER_LINES,
                header.len()
            ));
        }

        let environment = split_fields(&header[0]);
        if environment.first().map(|tag| unquote(tag)) != Some(TOA5_FORMAT_TAG) {
            return Err(format!("not a {} file", TOA5_FORMAT_TAG));
        }
        let table = environment
            .last()
            .map(|field| unquote(field).to_string())
            .filter(|table| !table.is_empty() && environment.len() > 1)
            .ok_or_else(|| "table name missing from first header line".to_string())?;

        let columns = split_fields(&header[1]).len();
        let mut rows = BTreeMap::new();
        for (index, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let cells: Vec<String> = split_fields(line)
                .into_iter()
                .map(|cell| {
                    if cell == TOA5_QUOTED_NULL {
                        STANDARD_NULL.to_string()
                    } else {
                        cell.to_string()
                    }
                })
                .collect();
            if cells.len() != columns {
                return Err(format!(
                    "data line {} has {} fields, header declares {}",
                    index + 1,
                    cells.len(),
                    columns
                ));
            }
            rows.insert(unquote(&cells[0]).to_string(), cells);
        }

        Ok(Self {
            table,
            header,
            rows,
            line_ending,
        })
    }

    /// Fold `incoming` into `self`; cells already present and non-null win
    fn merge(mut self, incoming: Toa5Table) -> std::result::Result<Self, String> {
        if self.header[1..] != incoming.header[1..] {
            return Err(format!("column header mismatch for table {}", self.table));
        }

        for (timestamp, cells) in incoming.rows {
            match self.rows.get_mut(&timestamp) {
                Some(existing) => {
                    for (current, candidate) in existing.iter_mut().zip(cells) {
                        if is_null(current) {
                            *current = candidate;
                        }
                    }
                }
                None => {
                    self.rows.insert(timestamp, cells);
                }
            }
        }
        Ok(self)
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str(line);
            out.push_str(self.line_ending);
        }
        for cells in self.rows.values() {
            out.push_str(&cells.join(","));
            out.push_str(self.line_ending);
        }
        out
    }
}

fn is_null(cell: &str) -> bool {
    cell.is_empty() || cell == STANDARD_NULL || cell == TOA5_QUOTED_NULL
}

fn unquote(field: &str) -> &str {
    field
        .strip_prefix('"')
        .and_then(|field| field.strip_suffix('"'))
        .unwrap_or(field)
}

/// Comma-separated fields, kept verbatim; commas inside quotes do not split
fn split_fields(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&line[start..]);
    fields
}

fn write_atomically(target: &Path, contents: &str) -> std::io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.flush()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
