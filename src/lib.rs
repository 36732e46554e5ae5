//! Cardflow Library
//!
//! Safe ingestion of data-logger storage cards. Raw binary table files are
//! routed by the metadata in their headers, moved per site into temporary
//! staging directories, converted by an external tool, split when
//! oversized and merged into standardized per-table files. Every staged
//! file is put back where it was found, whatever happens during the run.
//!
//! This library provides tools for:
//! - Extracting logger serial, table name and timestamp from raw headers
//! - Profiling a card directory into a routing table of valid and rejected files
//! - Staging files with a rename ledger that is always replayed
//! - Running stage tasks on a bounded worker pool with strict barriers
//! - Driving the converter, splitter and standardizer as black boxes

pub mod config;
pub mod constants;
pub mod error;
pub mod header;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod sites;
pub mod transform;

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
}

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use header::{MetadataExtractor, UnknownSourcePolicy};
pub use logging::{RecordingLogger, RunLogger, TracingLogger};
pub use models::{HeaderMetadata, RawFileRecord, RoutingTable, RunOutcome, RunReport, SiteBatch, SiteId};
pub use pipeline::PipelineCoordinator;
pub use sites::SiteTable;
