//! File profiling for storage card directories
//!
//! Lists the raw data files in a source directory, extracts each header
//! and builds the routing table that drives staging. Nothing on disk is
//! modified here.

use crate::error::{PipelineError, Result};
use crate::header::MetadataExtractor;
use crate::logging::RunLogger;
use crate::models::{RawFileRecord, RejectReason, Routing, RoutingTable};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::task;

/// Concurrent header reads during a scan
const HEADER_READ_CONCURRENCY: usize = 4;

/// Scans a source directory and profiles every raw file in it
pub struct FileProfiler {
    extractor: MetadataExtractor,
    extension: String,
    logger: Arc<dyn RunLogger>,
}

impl FileProfiler {
    pub fn new(
        extractor: MetadataExtractor,
        extension: impl Into<String>,
        logger: Arc<dyn RunLogger>,
    ) -> Self {
        Self {
            extractor,
            extension: extension.into(),
            logger,
        }
    }

    /// Raw files directly inside `source_dir`, sorted by path
    pub async fn discover_raw_files(&self, source_dir: &Path) -> Result<Vec<PathBuf>> {
        if !fs::metadata(source_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Err(PipelineError::SourceNotFound {
                path: source_dir.to_path_buf(),
            });
        }

        let mut files = Vec::new();
        let mut dir = fs::read_dir(source_dir).await?;

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let is_file = match entry.file_type().await {
                Ok(file_type) => file_type.is_file(),
                Err(e) => {
                    self.logger
                        .warn(&format!("Skipping {}: {}", path.display(), e));
                    continue;
                }
            };

            if is_file && has_extension(&path, &self.extension) {
                files.push(path);
            }
        }

        files.sort();
        self.logger.debug(&format!(
            "Found {} .{} files in {}",
            files.len(),
            self.extension,
            source_dir.display()
        ));
        Ok(files)
    }

    /// Build the routing table for `source_dir`
    ///
    /// I/O failures drop the file from the table (logged); header
    /// rejections keep it as an invalid record so it stays visible.
    pub async fn profile(&self, source_dir: &Path) -> Result<RoutingTable> {
        let files = self.discover_raw_files(source_dir).await?;

        let results = stream::iter(files)
            .map(|path| {
                let extractor = self.extractor.clone();
                async move {
                    let task_path = path.clone();
                    let outcome = task::spawn_blocking(move || profile_file(&extractor, &task_path))
                        .await
                        .unwrap_or_else(|e| {
                            Err(PipelineError::TaskPanicked {
                                task: format!("profile {}", path.display()),
                                message: e.to_string(),
                            })
                        });
                    (path, outcome)
                }
            })
            .buffer_unordered(HEADER_READ_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let mut table = RoutingTable::default();
        for (path, outcome) in results {
            match outcome {
                Ok(record) => {
                    if let Some(reason) = record.reject_reason() {
                        self.logger.warn(&format!(
                            "Excluding {} ({}): {}",
                            path.display(),
                            reason,
                            describe_invalid(&record)
                        ));
                    }
                    table.insert(record);
                }
                Err(e) => {
                    self.logger
                        .warn(&format!("Could not read {}, skipping: {}", path.display(), e));
                }
            }
        }

        self.logger.info(&format!(
            "Profiled {} files in {}: {} valid, {} invalid",
            table.len(),
            source_dir.display(),
            table.valid_count(),
            table.invalid_count()
        ));

        Ok(table)
    }
}

/// Profile one file; only I/O-level failures are returned as errors
fn profile_file(extractor: &MetadataExtractor, path: &Path) -> Result<RawFileRecord> {
    let size_bytes = std::fs::metadata(path)?.len();

    match extractor.extract(path) {
        Ok(header) => {
            let name = header.destination_name(&extension_of(path));
            Ok(RawFileRecord::valid(
                path.to_path_buf(),
                size_bytes,
                header,
                name,
            ))
        }
        Err(PipelineError::Format { reason, .. }) => Ok(RawFileRecord::invalid(
            path.to_path_buf(),
            size_bytes,
            RejectReason::Format,
            reason,
        )),
        Err(PipelineError::UnrecognizedSource { serial, .. }) => Ok(RawFileRecord::invalid(
            path.to_path_buf(),
            size_bytes,
            RejectReason::UnrecognizedSource,
            format!("no site for serial number {}", serial),
        )),
        Err(e) => Err(e),
    }
}

fn describe_invalid(record: &RawFileRecord) -> &str {
    match &record.routing {
        Routing::Invalid { detail, .. } => detail,
        Routing::Valid { .. } => "",
    }
}

/// Case-insensitive extension match
fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Extension of the source file, kept as written
fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::UnknownSourcePolicy;
    use crate::logging::RecordingLogger;
    use crate::sites::SiteTable;
    use std::fs;
    use tempfile::TempDir;
    use tracing::Level;

    fn raw_header(serial: &str, timestamp: &str, table: &str) -> Vec<u8> {
        let mut bytes = format!(
            "\"TOB3\",\"Station\",\"CR3000\",\"{}\",\"CR3000.Std.11\",\"CPU:flux.CR3\",\"1\",\"{}\"\n\"{}\",\"30 MIN\"\n",
            serial, timestamp, table
        )
        .into_bytes();
        bytes.extend_from_slice(&[0, 1, 2, 3, 255, 254]);
        bytes
    }

    fn profiler(logger: Arc<RecordingLogger>) -> FileProfiler {
        let sites = Arc::new(SiteTable::from_pairs([("1234", "ALPHA"), ("5678", "BETA")]));
        FileProfiler::new(
            MetadataExtractor::new(sites, UnknownSourcePolicy::Reject),
            "dat",
            logger,
        )
    }

    #[tokio::test]
    async fn test_profile_mixed_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("b.dat"), raw_header("1234", "2024-01-02 03:04:05", "TABLE1")).unwrap();
        fs::write(dir.join("a.DAT"), raw_header("5678", "2024-02-03 10:20:30", "flux")).unwrap();
        fs::write(dir.join("c.dat"), raw_header("9999", "2024-01-02 03:04:05", "TABLE1")).unwrap();
        fs::write(dir.join("d.dat"), b"not a logger file\n").unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();
        fs::create_dir(dir.join("sub.dat")).unwrap();

        let logger = RecordingLogger::new();
        let table = profiler(logger.clone()).profile(dir).await.unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.valid_count(), 2);

        let b = table.get(&dir.join("b.dat")).unwrap();
        assert_eq!(b.destination_name(), Some("ALPHA_20240102.0304_TABLE1.dat"));

        let a = table.get(&dir.join("a.DAT")).unwrap();
        assert_eq!(a.destination_name(), Some("BETA_20240203.1020_flux.DAT"));

        let c = table.get(&dir.join("c.dat")).unwrap();
        assert_eq!(c.reject_reason(), Some(RejectReason::UnrecognizedSource));

        let d = table.get(&dir.join("d.dat")).unwrap();
        assert_eq!(d.reject_reason(), Some(RejectReason::Format));

        assert!(logger.contains(Level::WARN, "c.dat"));
        assert!(logger.contains(Level::WARN, "d.dat"));
    }

    #[tokio::test]
    async fn test_discovery_is_sorted() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["z.dat", "m.dat", "a.dat"] {
            fs::write(temp_dir.path().join(name), b"x").unwrap();
        }

        let files = profiler(RecordingLogger::new())
            .discover_raw_files(temp_dir.path())
            .await
            .unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.dat", "m.dat", "z.dat"]);
    }

    #[tokio::test]
    async fn test_missing_source_directory() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("card");

        let result = profiler(RecordingLogger::new()).profile(&missing).await;
        match result {
            Err(PipelineError::SourceNotFound { path }) => assert_eq!(path, missing),
            other => panic!("Expected SourceNotFound error, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension(Path::new("x.dat"), "dat"));
        assert!(has_extension(Path::new("/card/X.DAT"), "dat"));
        assert!(!has_extension(Path::new("x.dat.bak"), "dat"));
        assert!(!has_extension(Path::new("dat"), "dat"));
    }
}
