//! Core data structures for a pipeline run.
//!
//! Defines the per-file routing records produced by a scan, the per-site
//! batches built from them, and the statistics reported at the end of a run.

use crate::constants::{COMPACT_TIMESTAMP_FORMAT, UNRESOLVED_SITE_LABEL};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Station a file originated from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SiteId {
    /// Serial number found in the site table
    Resolved(String),
    /// Serial number unknown and rejection disabled
    Unresolved { serial: String },
}

impl SiteId {
    /// Label used in file and directory names
    pub fn label(&self) -> &str {
        match self {
            SiteId::Resolved(code) => code,
            SiteId::Unresolved { .. } => UNRESOLVED_SITE_LABEL,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, SiteId::Resolved(_))
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity and routing metadata extracted from a raw file header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMetadata {
    pub serial: String,
    pub site: SiteId,
    pub table: String,
    /// Timestamp exactly as written in the header
    pub timestamp: String,
    pub captured_at: NaiveDateTime,
}

impl HeaderMetadata {
    /// `{site}_{YYYYmmdd.HHMM}_{table}.{ext}`
    pub fn destination_name(&self, extension: &str) -> String {
        destination_name(self.site.label(), &self.captured_at, &self.table, extension)
    }
}

/// Derive a destination base name from a (site, timestamp, table) triple
pub fn destination_name(
    site: &str,
    captured_at: &NaiveDateTime,
    table: &str,
    extension: &str,
) -> String {
    let compacted = captured_at.format(COMPACT_TIMESTAMP_FORMAT);
    if extension.is_empty() {
        format!("{}_{}_{}", site, compacted, table)
    } else {
        format!("{}_{}_{}.{}", site, compacted, table, extension)
    }
}

/// Why a file was excluded from routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// Header does not have the expected structure
    Format,
    /// Header parsed but the serial number maps to no known site
    UnrecognizedSource,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Format => f.write_str("invalid header"),
            RejectReason::UnrecognizedSource => f.write_str("unrecognized source"),
        }
    }
}

/// Routing outcome of a scanned file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Routing {
    Valid {
        header: HeaderMetadata,
        destination_name: String,
    },
    Invalid {
        reason: RejectReason,
        detail: String,
    },
}

/// One candidate source file found during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFileRecord {
    pub source_path: PathBuf,
    pub size_bytes: u64,
    pub routing: Routing,
}

impl RawFileRecord {
    pub fn valid(
        source_path: PathBuf,
        size_bytes: u64,
        header: HeaderMetadata,
        destination_name: String,
    ) -> Self {
        Self {
            source_path,
            size_bytes,
            routing: Routing::Valid {
                header,
                destination_name,
            },
        }
    }

    pub fn invalid(
        source_path: PathBuf,
        size_bytes: u64,
        reason: RejectReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            source_path,
            size_bytes,
            routing: Routing::Invalid {
                reason,
                detail: detail.into(),
            },
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.routing, Routing::Valid { .. })
    }

    pub fn header(&self) -> Option<&HeaderMetadata> {
        match &self.routing {
            Routing::Valid { header, .. } => Some(header),
            Routing::Invalid { .. } => None,
        }
    }

    pub fn site(&self) -> Option<&SiteId> {
        self.header().map(|header| &header.site)
    }

    pub fn destination_name(&self) -> Option<&str> {
        match &self.routing {
            Routing::Valid {
                destination_name, ..
            } => Some(destination_name),
            Routing::Invalid { .. } => None,
        }
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match &self.routing {
            Routing::Valid { .. } => None,
            Routing::Invalid { reason, .. } => Some(*reason),
        }
    }
}

/// Result of scanning a source directory, ordered by source path
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    records: BTreeMap<PathBuf, RawFileRecord>,
}

impl RoutingTable {
    pub fn insert(&mut self, record: RawFileRecord) {
        self.records.insert(record.source_path.clone(), record);
    }

    pub fn get(&self, path: &Path) -> Option<&RawFileRecord> {
        self.records.get(path)
    }

    pub fn records(&self) -> impl Iterator<Item = &RawFileRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.records().filter(|record| record.is_valid()).count()
    }

    pub fn invalid_count(&self) -> usize {
        self.len() - self.valid_count()
    }

    /// Group valid records by site label; invalid records never enter a batch
    ///
    /// Unresolved serials share one label and therefore one batch, so no two
    /// batches ever target the same destination directory.
    pub fn site_batches(&self) -> Vec<SiteBatch> {
        let mut by_label: BTreeMap<&str, SiteBatch> = BTreeMap::new();
        for record in self.records() {
            if let Some(site) = record.site() {
                by_label
                    .entry(site.label())
                    .or_insert_with(|| SiteBatch {
                        site: site.clone(),
                        records: Vec::new(),
                    })
                    .records
                    .push(record.clone());
            }
        }

        by_label.into_values().collect()
    }
}

/// Valid records sharing one site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteBatch {
    pub site: SiteId,
    pub records: Vec<RawFileRecord>,
}

impl SiteBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|record| record.size_bytes).sum()
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every stage ran
    Completed,
    /// No valid files; nothing staged
    NoOp,
    /// A stage failed or cancellation was requested; restoration still ran
    Aborted { stage: String, reason: String },
}

/// Statistics for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub source_dir: PathBuf,
    pub outcome: RunOutcome,
    pub files_scanned: usize,
    pub files_valid: usize,
    pub files_invalid: usize,
    pub sites: Vec<String>,
    pub files_staged: usize,
    pub files_restored: usize,
    pub restore_failures: usize,
    pub converted_outputs: Vec<PathBuf>,
    pub split_parts: usize,
    pub standardized_files: usize,
    pub oversized_skipped: usize,
    pub task_failures: usize,
    pub transform_failures: usize,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(source_dir: PathBuf) -> Self {
        Self {
            source_dir,
            outcome: RunOutcome::Completed,
            files_scanned: 0,
            files_valid: 0,
            files_invalid: 0,
            sites: Vec::new(),
            files_staged: 0,
            files_restored: 0,
            restore_failures: 0,
            converted_outputs: Vec::new(),
            split_parts: 0,
            standardized_files: 0,
            oversized_skipped: 0,
            task_failures: 0,
            transform_failures: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }

    /// True when every staged file went back to its original location
    pub fn fully_restored(&self) -> bool {
        self.restore_failures == 0 && self.files_restored == self.files_staged
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
