//! Scenario tests for the pipeline coordinator
//!
//! Runs whole cards through the coordinator with a scripted converter in
//! place of the external tool.

pub mod basic_processing;

use crate::config::{PipelineConfig, SplitConfig};
use crate::error::{PipelineError, Result};
use crate::logging::{RecordingLogger, RunLogger};
use crate::pipeline::PipelineCoordinator;
use crate::sites::SiteTable;
use crate::transform::{ConversionRequest, Converter, FileSplitter, Standardizer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const ALPHA_SERIAL: &str = "1234";
pub const BRAVO_SERIAL: &str = "5678";

pub fn test_sites() -> SiteTable {
    SiteTable::from_pairs([(ALPHA_SERIAL, "ALPHA"), (BRAVO_SERIAL, "BRAVO")])
}

/// Raw file bytes: two header lines followed by opaque binary frames
pub fn raw_file(serial: &str, timestamp: &str, table: &str) -> Vec<u8> {
    let mut bytes = format!(
        "\"TOB3\",\"Station\",\"CR3000\",\"{}\",\"CR3000.Std.11\",\"CPU:flux.CR3\",\"12345\",\"{}\"\r\n\"{}\",\"30 MIN\",\"100\"\r\n",
        serial, timestamp, table
    )
    .into_bytes();
    bytes.extend_from_slice(&[0u8, 0xff, 0x10, 0x80, 0x7f, 0x00]);
    bytes
}

pub fn write_raw(dir: &Path, name: &str, serial: &str, timestamp: &str, table: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, raw_file(serial, timestamp, table)).unwrap();
    path
}

/// Converted text file with `rows` data lines
pub fn toa5_output(site: &str, table: &str, rows: usize) -> String {
    let mut text = format!(
        "\"TOA5\",\"{}\",\"CR3000\",\"1234\",\"CR3000.Std.11\",\"CPU:flux.CR3\",\"12345\",\"{}\"\n\
\"TIMESTAMP\",\"RECORD\",\"Ts_Avg\"\n\
\"TS\",\"RN\",\"C\"\n\
\"\",\"\",\"Avg\"\n",
        site, table
    );
    for i in 0..rows {
        text.push_str(&format!(
            "\"2024-01-02 {:02}:{:02}:00\",{},{}.5\n",
            i / 60,
            i % 60,
            i,
            i
        ));
    }
    text
}

/// Regular files directly inside `dir`, by name, with their contents
pub fn file_contents(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).unwrap(),
            )
        })
        .collect()
}

/// Names of the directories directly inside `dir`
pub fn subdirectories(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect()
}

/// Config writing everything under `root`, with small split limits
pub fn config_in(root: &Path) -> PipelineConfig {
    PipelineConfig::default()
        .with_workers(4)
        .with_destination_template(root.join("converted").join("{site}").to_string_lossy())
        .with_standardized_template(
            root.join("standardized")
                .join("{site}")
                .join("{table}")
                .to_string_lossy(),
        )
        .with_split_threshold(1024)
        .with_split_config(SplitConfig {
            max_lines: 10,
            header_lines: 4,
            remove_source: true,
        })
}

/// What the converter saw when it was called for a site
#[derive(Debug, Clone)]
pub struct ObservedCall {
    pub site: String,
    pub staged_files: Vec<String>,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
}

/// Converter stand-in: writes scripted outputs or fails per site
#[derive(Clone, Default)]
pub struct ScriptedConverter {
    outputs: HashMap<String, Vec<(String, String)>>,
    failing: HashSet<String>,
    cancel_on_call: Option<CancellationToken>,
    calls: Arc<Mutex<Vec<ObservedCall>>>,
}

impl ScriptedConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, site: &str, name: &str, contents: String) -> Self {
        self.outputs
            .entry(site.to_string())
            .or_default()
            .push((name.to_string(), contents));
        self
    }

    pub fn failing_for(mut self, site: &str) -> Self {
        self.failing.insert(site.to_string());
        self
    }

    /// Cancel `token` from inside the convert stage
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn calls(&self) -> Vec<ObservedCall> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_by(|a, b| a.site.cmp(&b.site));
        calls
    }
}

impl Converter for ScriptedConverter {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    async fn convert(&self, request: &ConversionRequest) -> Result<()> {
        let mut staged_files: Vec<String> = file_contents(&request.source_dir).into_keys().collect();
        staged_files.sort();
        self.calls.lock().unwrap().push(ObservedCall {
            site: request.site.clone(),
            staged_files,
            source_dir: request.source_dir.clone(),
            target_dir: request.target_dir.clone(),
        });

        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }

        if self.failing.contains(&request.site) {
            return Err(PipelineError::ExternalTool {
                tool: "scripted".to_string(),
                site: request.site.clone(),
                reason: "exited with exit status: 1".to_string(),
            });
        }

        for (name, contents) in self.outputs.get(&request.site).into_iter().flatten() {
            fs::write(request.target_dir.join(name), contents)?;
        }
        Ok(())
    }
}

/// Splitter stand-in that only records which files it was given
#[derive(Default)]
pub struct RecordingSplitter {
    pub seen: Mutex<Vec<PathBuf>>,
}

impl FileSplitter for RecordingSplitter {
    fn split(&self, file: &Path) -> Result<Vec<PathBuf>> {
        self.seen.lock().unwrap().push(file.to_path_buf());
        Ok(Vec::new())
    }
}

/// Standardizer stand-in that records its inputs and their contents
#[derive(Default)]
pub struct RecordingStandardizer {
    pub seen: Mutex<Vec<(PathBuf, String, Vec<u8>)>>,
}

impl Standardizer for RecordingStandardizer {
    fn standardize(&self, file: &Path, site: &str) -> Result<Vec<PathBuf>> {
        let contents = fs::read(file)?;
        self.seen
            .lock()
            .unwrap()
            .push((file.to_path_buf(), site.to_string(), contents));
        Ok(vec![file.to_path_buf()])
    }
}

pub fn coordinator(
    config: PipelineConfig,
    converter: ScriptedConverter,
) -> (PipelineCoordinator<ScriptedConverter>, Arc<RecordingLogger>) {
    let logger = RecordingLogger::new();
    let shared: Arc<dyn RunLogger> = logger.clone();
    let coordinator = PipelineCoordinator::new(config, test_sites(), converter, shared).unwrap();
    (coordinator, logger)
}
