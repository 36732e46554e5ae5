//! Run logging context passed explicitly to every pipeline component.
//!
//! Components never write to stdout directly; they log through a
//! [`RunLogger`]. The binary uses [`TracingLogger`], tests use
//! [`RecordingLogger`] to assert that failures are never silent.

use std::sync::{Arc, Mutex};
use tracing::Level;

/// Structured logging capability handed to pipeline components
pub trait RunLogger: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }
}

/// Forwards log lines to `tracing`, tagged with the emitting component
#[derive(Debug, Clone)]
pub struct TracingLogger {
    component: &'static str,
}

impl TracingLogger {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }

    pub fn shared(component: &'static str) -> Arc<dyn RunLogger> {
        Arc::new(Self::new(component))
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("pipeline")
    }
}

impl RunLogger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        let component = self.component;
        // tracing needs the level as a constant at each call site
        match level {
            Level::ERROR => tracing::error!(component, "{}", message),
            Level::WARN => tracing::warn!(component, "{}", message),
            Level::INFO => tracing::info!(component, "{}", message),
            Level::DEBUG => tracing::debug!(component, "{}", message),
            Level::TRACE => tracing::trace!(component, "{}", message),
        }
    }
}

/// A captured log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

/// In-memory logger used by tests
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Messages logged at exactly `level`
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.level == level)
            .map(|entry| entry.message)
            .collect()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages_at(level)
            .iter()
            .any(|message| message.contains(needle))
    }
}

impl RunLogger for RecordingLogger {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry {
                level,
                message: message.to_string(),
            });
        }
    }
}
