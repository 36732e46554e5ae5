//! Application constants for cardflow
//!
//! Header layout, naming rules, default limits and the built-in station
//! list used throughout the pipeline.

// =============================================================================
// Raw File Header Layout
// =============================================================================

/// First header field of every binary table file written by the loggers
pub const RAW_FORMAT_TAG: &str = "TOB3";

/// Number of quoted fields on the first header line
pub const HEADER_FIELD_COUNT: usize = 8;

/// Position of the logger serial number on the first header line
pub const HEADER_SERIAL_FIELD: usize = 3;

/// Position of the file creation timestamp on the first header line
pub const HEADER_TIMESTAMP_FIELD: usize = 7;

/// Upper bound on bytes read per header line; anything longer is payload
pub const MAX_HEADER_LINE_BYTES: u64 = 4096;

/// Accepted header timestamp layout (fractional seconds optional)
pub const HEADER_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Compacted timestamp used in destination file names
pub const COMPACT_TIMESTAMP_FORMAT: &str = "%Y%m%d.%H%M";

// =============================================================================
// File Discovery
// =============================================================================

/// Extension of raw data files on a storage card (matched case-insensitively)
pub const RAW_FILE_EXTENSION: &str = "dat";

/// Prefix of per-site staging directories created inside the source directory
pub const STAGING_DIR_PREFIX: &str = ".cardflow-staging";

/// Placeholder substituted with the resolved site code in directory templates
pub const SITE_PLACEHOLDER: &str = "{site}";

/// Placeholder substituted with the data table name in directory templates
pub const TABLE_PLACEHOLDER: &str = "{table}";

// =============================================================================
// Worker Pool and Stage Limits
// =============================================================================

/// Default number of pipeline workers per stage
pub const DEFAULT_WORKERS: usize = 8;

/// Upper bound accepted for the worker count
pub const MAX_WORKERS: usize = 64;

pub const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Converted files larger than this are split before standardization (bytes)
pub const DEFAULT_SPLIT_THRESHOLD_BYTES: u64 = 200 * BYTES_PER_MIB;

/// Default number of data lines per split part
pub const DEFAULT_SPLIT_MAX_LINES: usize = 1_000_000;

/// Default number of header lines repeated in every split part (TOA5)
pub const DEFAULT_SPLIT_HEADER_LINES: usize = 4;

// =============================================================================
// External Converter
// =============================================================================

/// Default converter executable
pub const DEFAULT_CONVERTER_PROGRAM: &str = "CardConvert.exe";

/// Extension of the generated converter run files
pub const CONVERTER_RUNFILE_EXTENSION: &str = ".ccf";

/// Fixed conversion options written to every run file
pub const DEFAULT_CONVERTER_OPTIONS: &[(&str, &str)] = &[
    ("Format", "0"),
    ("FileMarks", "0"),
    ("RemoveMarks", "0"),
    ("RecNums", "1"),
    ("Timestamps", "1"),
    ("Surround", "1"),
    ("FrontPanel", "0"),
    ("AsciiHeader", "1"),
    ("TimeStampCustom", "0"),
    ("ConvertTob3", "1"),
];

// =============================================================================
// Standardized Output
// =============================================================================

/// First header field of a converted text table file
pub const TOA5_FORMAT_TAG: &str = "TOA5";

/// Number of header lines in a TOA5 text file
pub const TOA5_HEADER_LINES: usize = 4;

/// Null marker written by the converter
pub const TOA5_QUOTED_NULL: &str = "\"NAN\"";

/// Null marker in standardized output
pub const STANDARD_NULL: &str = "NAN";

// =============================================================================
// Sites
// =============================================================================

/// Field stations known without any additional configuration: (serial, code)
pub const BUILTIN_SITES: &[(&str, &str)] = &[
    ("6034", "CFNT"),
    ("6035", "LIND"),
    ("6503", "CFCT"),
    ("6506", "MMTN"),
    ("6505", "MSLK"),
    ("6504", "WINE"),
];

/// Site label used for files whose serial number is not in the site table
pub const UNRESOLVED_SITE_LABEL: &str = "UNRESOLVED";
