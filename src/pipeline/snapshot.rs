//! Output discovery by directory snapshot.
//!
//! The converter gives no machine-readable list of what it wrote, so each
//! destination directory is listed before the stage and again after it;
//! the files present only in the second listing are that stage's output.

use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::task;
use walkdir::WalkDir;

/// One converted or split file found after a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Recursive listing of the regular files under a directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    root: PathBuf,
    files: BTreeMap<PathBuf, u64>,
}

impl DirectorySnapshot {
    /// List `root`; a missing directory yields an empty snapshot
    pub fn capture(root: &Path) -> Self {
        let files = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let size = entry.metadata().ok()?.len();
                Some((entry.into_path(), size))
            })
            .collect();

        Self {
            root: root.to_path_buf(),
            files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Files in `after` that were not present in `self`, sorted by path
    pub fn new_files(&self, after: &DirectorySnapshot) -> Vec<OutputFile> {
        after
            .files
            .iter()
            .filter(|(path, _)| !self.files.contains_key(*path))
            .map(|(path, size)| OutputFile {
                path: path.clone(),
                size_bytes: *size,
            })
            .collect()
    }

    /// Re-list the same root and return what appeared since this snapshot
    pub fn diff_now(&self) -> (DirectorySnapshot, Vec<OutputFile>) {
        let after = Self::capture(&self.root);
        let added = self.new_files(&after);
        (after, added)
    }

    /// [`DirectorySnapshot::capture`] on the blocking thread pool
    pub async fn capture_async(root: PathBuf) -> Result<Self> {
        let label = format!("list {}", root.display());
        task::spawn_blocking(move || Self::capture(&root))
            .await
            .map_err(|e| PipelineError::TaskPanicked {
                task: label,
                message: e.to_string(),
            })
    }

    /// [`DirectorySnapshot::diff_now`] on the blocking thread pool
    pub async fn diff_async(&self) -> Result<(DirectorySnapshot, Vec<OutputFile>)> {
        let before = self.clone();
        task::spawn_blocking(move || before.diff_now())
            .await
            .map_err(|e| PipelineError::TaskPanicked {
                task: format!("list {}", self.root().display()),
                message: e.to_string(),
            })
    }
}
