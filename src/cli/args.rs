//! Command-line argument definitions for cardflow

use crate::constants::DEFAULT_WORKERS;
use crate::sites::parse_assignment;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// CLI arguments for the storage card ingestion pipeline
///
/// Routes the raw data files on a logger storage card by their headers,
/// converts them per site with the external converter, splits oversized
/// outputs and standardizes the rest. The card is always left exactly as
/// it was found.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cardflow",
    version,
    about = "Ingest data-logger storage cards: route, convert, split and standardize raw files",
    long_about = "Reads the header of every raw data file on a storage card, groups valid files \
                  by field site, converts each site with the external card converter, splits \
                  oversized outputs and merges the results into standardized per-table files. \
                  Raw files are moved into temporary staging directories during the run and are \
                  always restored to their original location afterwards."
)]
pub struct Args {
    /// Storage card directory holding the raw data files
    #[arg(value_name = "SOURCE_DIR", help = "Storage card directory to ingest")]
    pub source_dir: PathBuf,

    /// Converter output directory template
    ///
    /// Must contain {site}. Relative defaults are placed next to the card
    /// directory; an explicit relative template is taken from the working
    /// directory.
    #[arg(
        short = 'd',
        long = "dest",
        value_name = "TEMPLATE",
        help = "Converter output directory template, must contain {site}"
    )]
    pub dest: Option<String>,

    /// Standardized output directory template ({site} and {table} available)
    #[arg(
        long = "standardized",
        value_name = "TEMPLATE",
        help = "Standardized output directory template ({site}, {table})"
    )]
    pub standardized: Option<String>,

    /// Path to the converter executable
    #[arg(
        short = 'c',
        long = "converter",
        value_name = "PATH",
        help = "Converter executable"
    )]
    pub converter: Option<PathBuf>,

    /// Number of parallel workers per stage
    #[arg(
        short = 'j',
        long = "workers",
        value_name = "COUNT",
        default_value_t = DEFAULT_WORKERS,
        help = "Number of parallel workers per stage"
    )]
    pub workers: usize,

    /// Size above which converted files are split
    #[arg(
        long = "split-threshold-mb",
        value_name = "MB",
        help = "Split converted files larger than this many MiB"
    )]
    pub split_threshold_mb: Option<u64>,

    #[arg(long = "no-split", help = "Skip the split stage")]
    pub no_split: bool,

    #[arg(long = "no-standardize", help = "Skip the standardize pass")]
    pub no_standardize: bool,

    /// Extra or overriding serial number to site assignments
    #[arg(
        long = "site",
        value_name = "SERIAL=CODE",
        value_parser = parse_assignment,
        help = "Assign a logger serial number to a site code (repeatable)"
    )]
    pub sites: Vec<(String, String)>,

    /// Process files whose serial number has no site instead of excluding them
    #[arg(
        long = "allow-unknown-sites",
        help = "Process files from unknown loggers under an UNRESOLVED site"
    )]
    pub allow_unknown_sites: bool,

    /// Scan and print the routing table without moving anything
    #[arg(
        long = "dry-run",
        help = "Show how files would be routed without processing them"
    )]
    pub dry_run: bool,

    /// Logging verbosity level
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)"
    )]
    pub verbose: u8,

    /// Only show errors
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Suppress output except errors",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    #[arg(
        long = "format",
        value_enum,
        default_value = "human",
        help = "Output format for results"
    )]
    pub output_format: OutputFormat,
}

impl Args {
    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        }
    }

    /// Progress bars only for interactive human output
    pub fn show_progress(&self) -> bool {
        !self.quiet && matches!(self.output_format, OutputFormat::Human)
    }
}

/// Output format options for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON format for scripting
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_arguments() {
        let args = Args::try_parse_from(["cardflow", "/media/card"]).unwrap();
        assert_eq!(args.source_dir, PathBuf::from("/media/card"));
        assert_eq!(args.workers, DEFAULT_WORKERS);
        assert!(args.sites.is_empty());
        assert_eq!(args.output_format, OutputFormat::Human);
        assert_eq!(args.get_log_level(), "warn");
        assert!(args.show_progress());
    }

    #[test]
    fn test_site_assignments_and_flags() {
        let args = Args::try_parse_from([
            "cardflow",
            "/media/card",
            "--site",
            "1234=ALPHA",
            "--site",
            "5678=BRAVO",
            "-j",
            "2",
            "--no-split",
            "--format",
            "json",
            "-vv",
        ])
        .unwrap();

        assert_eq!(
            args.sites,
            vec![
                ("1234".to_string(), "ALPHA".to_string()),
                ("5678".to_string(), "BRAVO".to_string()),
            ]
        );
        assert_eq!(args.workers, 2);
        assert!(args.no_split);
        assert_eq!(args.get_log_level(), "debug");
        assert!(!args.show_progress());
    }

    #[test]
    fn test_malformed_site_rejected() {
        assert!(Args::try_parse_from(["cardflow", "/card", "--site", "1234"]).is_err());
        assert!(Args::try_parse_from(["cardflow", "/card", "--site", "=ALPHA"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Args::try_parse_from(["cardflow", "/card", "-q", "-v"]).is_err());
        let quiet = Args::try_parse_from(["cardflow", "/card", "-q"]).unwrap();
        assert_eq!(quiet.get_log_level(), "error");
    }
}
