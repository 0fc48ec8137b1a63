//! Run logger: console events through `tracing`, plus an append-only JSONL file

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::Level;

use crate::error::EngineResult;

/// Structured logger bound to one run identity.
///
/// Each event is emitted as a `tracing` event and, when a JSONL sink is
/// attached, appended as one JSON object carrying `timestamp`, `level`,
/// `runId`, `message` and the metadata fields.
pub struct RunLogger {
    run_id: String,
    verbose: bool,
    sink: Option<Mutex<File>>,
    jsonl_path: Option<PathBuf>,
}

impl RunLogger {
    /// Console-only logger
    pub fn new(run_id: impl Into<String>, verbose: bool) -> Self {
        Self {
            run_id: run_id.into(),
            verbose,
            sink: None,
            jsonl_path: None,
        }
    }

    /// Logger that also appends to `path`, creating its directory
    pub fn with_jsonl(run_id: impl Into<String>, verbose: bool, path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            run_id: run_id.into(),
            verbose,
            sink: Some(Mutex::new(file)),
            jsonl_path: Some(path.to_path_buf()),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn jsonl_path(&self) -> Option<&Path> {
        self.jsonl_path.as_deref()
    }

    /// Suppressed unless the logger is verbose
    pub fn debug(&self, message: &str, meta: Value) {
        if self.verbose {
            self.write(Level::DEBUG, message, meta);
        }
    }

    pub fn info(&self, message: &str, meta: Value) {
        self.write(Level::INFO, message, meta);
    }

    pub fn warn(&self, message: &str, meta: Value) {
        self.write(Level::WARN, message, meta);
    }

    pub fn error(&self, message: &str, meta: Value) {
        self.write(Level::ERROR, message, meta);
    }

    fn write(&self, level: Level, message: &str, meta: Value) {
        let run_id = self.run_id.as_str();
        match level {
            Level::ERROR => tracing::error!(run_id, meta = %meta, "{}", message),
            Level::WARN => tracing::warn!(run_id, meta = %meta, "{}", message),
            Level::INFO => tracing::info!(run_id, meta = %meta, "{}", message),
            _ => tracing::debug!(run_id, meta = %meta, "{}", message),
        }

        let Some(sink) = &self.sink else {
            return;
        };

        let line = event_line(level, run_id, message, meta);
        let mut file = sink.lock();
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!("Failed to append run log: {}", e);
        }
    }
}

fn event_line(level: Level, run_id: &str, message: &str, meta: Value) -> Value {
    let mut event = match meta {
        Value::Object(fields) => fields,
        Value::Null => Map::new(),
        other => {
            let mut event = Map::new();
            event.insert("meta".to_string(), other);
            event
        }
    };

    // reserved fields win over metadata keys of the same name
    event.insert(
        "timestamp".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
    );
    event.insert(
        "level".to_string(),
        Value::String(level.as_str().to_lowercase()),
    );
    event.insert("runId".to_string(), Value::String(run_id.to_string()));
    event.insert("message".to_string(), Value::String(message.to_string()));

    Value::Object(event)
}
