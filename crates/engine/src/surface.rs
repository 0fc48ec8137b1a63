//! Automation surface: the driver that performs UI actions on the live target

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{MouseButton, WaitCondition};

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("{0} is not supported by this surface")]
    Unsupported(&'static str),

    #[error("{action} failed: {reason}")]
    Action { action: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SurfaceError {
    pub fn action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        SurfaceError::Action {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

pub type SurfaceResult<T> = Result<T, SurfaceError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickOptions {
    pub button: Option<MouseButton>,
    pub click_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputOptions {
    /// `Some(false)` types after a click instead of replacing the value
    pub clear: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenshotOptions {
    pub full_page: bool,
}

/// Optional capabilities a surface advertises beyond the five actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `content()` returns the rendered document
    pub content: bool,
    /// `evaluate_condition()` answers gating checks
    pub conditions: bool,
}

/// Capability set consumed by the step engine.
///
/// The five action methods are mandatory. `content`, `evaluate_condition` and
/// `close` are optional; a surface opts in through [`AutomationSurface::capabilities`]
/// and the engine never calls an optional method the surface did not advertise.
#[async_trait]
pub trait AutomationSurface: Send + Sync {
    async fn wait_for(&self, condition: &WaitCondition, timeout_ms: u64) -> SurfaceResult<()>;

    async fn click(&self, selector: &str, options: ClickOptions) -> SurfaceResult<()>;

    async fn input(&self, selector: &str, value: &str, options: InputOptions) -> SurfaceResult<()>;

    async fn key(&self, keys: &[String]) -> SurfaceResult<()>;

    async fn screenshot(&self, path: &Path, options: ScreenshotOptions) -> SurfaceResult<()>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn content(&self) -> SurfaceResult<String> {
        Err(SurfaceError::Unsupported("content"))
    }

    /// Whether anything matches `selector`
    async fn evaluate_condition(&self, _selector: &str) -> SurfaceResult<bool> {
        Err(SurfaceError::Unsupported("evaluate_condition"))
    }

    async fn close(&self) -> SurfaceResult<()> {
        Ok(())
    }
}
