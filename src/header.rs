//! Raw data file header parsing and routing metadata extraction.
//!
//! Binary table files start with two text lines; everything after them is
//! binary payload and is never read. Line 1 holds eight quoted fields
//! (format tag, station, model, serial number, OS, program, signature,
//! creation timestamp); line 2 starts with the data table name.

use crate::constants::{
    HEADER_FIELD_COUNT, HEADER_SERIAL_FIELD, HEADER_TIMESTAMP_FIELD, HEADER_TIMESTAMP_FORMAT,
    MAX_HEADER_LINE_BYTES, RAW_FORMAT_TAG,
};
use crate::error::{PipelineError, Result};
use crate::models::{HeaderMetadata, SiteId};
use crate::sites::SiteTable;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// What to do with a well-formed header whose serial number is unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnknownSourcePolicy {
    /// Reject the file as an unrecognized source
    #[default]
    Reject,
    /// Accept it under the unresolved site sentinel
    Accept,
}

/// Reads the two header lines of a raw file and resolves its site
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    sites: Arc<SiteTable>,
    policy: UnknownSourcePolicy,
}

impl MetadataExtractor {
    pub fn new(sites: Arc<SiteTable>, policy: UnknownSourcePolicy) -> Self {
        Self { sites, policy }
    }

    /// Extract `{site, table, timestamp}` from the file at `path`
    pub fn extract(&self, path: &Path) -> Result<HeaderMetadata> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let first = read_header_line(&mut reader)?
            .ok_or_else(|| PipelineError::format(path, "file is empty"))?;
        let second = read_header_line(&mut reader)?
            .ok_or_else(|| PipelineError::format(path, "missing table name line"))?;

        let metadata = self.parse_lines(path, &first, &second)?;
        debug!(
            "Parsed header for {}: site={}, table={}, timestamp={}",
            path.display(),
            metadata.site,
            metadata.table,
            metadata.timestamp
        );
        Ok(metadata)
    }

    /// Parse already-read header lines
    pub fn parse_lines(&self, path: &Path, first: &str, second: &str) -> Result<HeaderMetadata> {
        let fields = split_quoted(first);
        if fields.len() != HEADER_FIELD_COUNT {
            return Err(PipelineError::format(
                path,
                format!(
                    "expected {} header fields, found {}",
                    HEADER_FIELD_COUNT,
                    fields.len()
                ),
            ));
        }

        if fields[0] != RAW_FORMAT_TAG {
            return Err(PipelineError::format(
                path,
                format!(
                    "format tag '{}' is not '{}'",
                    fields[0], RAW_FORMAT_TAG
                ),
            ));
        }

        let table = split_quoted(second)
            .into_iter()
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| PipelineError::format(path, "empty table name"))?;

        let timestamp = fields[HEADER_TIMESTAMP_FIELD].clone();
        let captured_at = parse_timestamp(&timestamp).ok_or_else(|| {
            PipelineError::format(path, format!("unparseable timestamp '{}'", timestamp))
        })?;

        let serial = fields[HEADER_SERIAL_FIELD].clone();
        let site = match self.sites.lookup(&serial) {
            Some(code) => SiteId::Resolved(code.to_string()),
            None => match self.policy {
                UnknownSourcePolicy::Reject => {
                    return Err(PipelineError::UnrecognizedSource {
                        path: path.to_path_buf(),
                        serial,
                    });
                }
                UnknownSourcePolicy::Accept => SiteId::Unresolved {
                    serial: serial.clone(),
                },
            },
        };

        Ok(HeaderMetadata {
            serial,
            site,
            table,
            timestamp,
            captured_at,
        })
    }
}

/// Read one header line without ever pulling in more than the line limit
fn read_header_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_HEADER_LINE_BYTES)
        .read_until(b'\n', &mut buf)?;

    if read == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Split a comma-separated line and strip surrounding quotes from each field
fn split_quoted(line: &str) -> Vec<String> {
    line.split(',')
        .map(|field| field.trim().trim_matches('"').to_string())
        .collect()
}

/// Parse `YYYY-MM-DD HH:MM:SS` with optional fractional seconds
fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), HEADER_TIMESTAMP_FORMAT).ok()
}
