//! Error types for the runner

use std::path::PathBuf;

use thiserror::Error;

use crate::surface::SurfaceError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Automation surface is required for non dry-run execution")]
    SurfaceRequired,

    #[error("Condition nesting exceeds {0} levels")]
    ConditionTooDeep(usize),

    #[error("{message} (after {timeout_ms} ms)")]
    Timeout { message: String, timeout_ms: u64 },

    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("Screenshot already exists: {0}")]
    ScreenshotExists(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("App launch failed: {0}")]
    AppLaunch(String),

    #[error("CDP connect failed: {0}")]
    CdpConnect(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Invariant violations abort the run and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::SurfaceRequired | EngineError::ConditionTooDeep(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
