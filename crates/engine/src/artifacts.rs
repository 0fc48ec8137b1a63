//! Run identity and output tree for one scenario run

use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde_json::json;

use crate::config::RunnerConfig;
use crate::error::EngineResult;
use crate::logger::RunLogger;
use crate::naming::resolve_template;
use crate::surface::{AutomationSurface, ScreenshotOptions, SurfaceError};

const RUN_SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const RUN_SUFFIX_LEN: usize = 6;

/// A screenshot path handed out by [`ArtifactManager::next_screenshot_path`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotSlot {
    pub path: PathBuf,
    pub file_name: String,
    pub index: u32,
}

/// Owns the output tree of a single run.
///
/// Layout, with `<out>` the screenshot directory:
///
/// ```text
/// <out>/                           screenshots, named by template
/// <out>/../artifacts/<run_id>/
///     run.jsonl                    structured run log
///     failed/<step_id>.png|.html   failure snapshots
/// ```
///
/// The screenshot counter lives here and is only advanced through `&mut self`,
/// so one manager must never be shared between runs.
#[derive(Debug)]
pub struct ArtifactManager {
    run_id: String,
    output_dir: PathBuf,
    run_dir: PathBuf,
    failed_dir: PathBuf,
    jsonl_path: PathBuf,
    file_name_template: String,
    overwrite: bool,
    screenshot_index: u32,
}

impl ArtifactManager {
    /// Create a manager with a fresh run identity and create its directories
    pub fn create(config: &RunnerConfig) -> EngineResult<Self> {
        Self::with_run_id(config, new_run_id())
    }

    /// Create a manager for an explicit run identity
    pub fn with_run_id(config: &RunnerConfig, run_id: impl Into<String>) -> EngineResult<Self> {
        let run_id = run_id.into();
        let output_dir = config.screenshot_dir().to_path_buf();
        let run_dir = output_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("artifacts")
            .join(&run_id);
        let failed_dir = run_dir.join("failed");
        let jsonl_path = run_dir.join("run.jsonl");

        std::fs::create_dir_all(&output_dir)?;
        std::fs::create_dir_all(&failed_dir)?;

        Ok(Self {
            run_id,
            output_dir,
            run_dir,
            failed_dir,
            jsonl_path,
            file_name_template: config.output.file_name_template.clone(),
            overwrite: config.output.overwrite,
            screenshot_index: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn failed_dir(&self) -> &Path {
        &self.failed_dir
    }

    pub fn jsonl_path(&self) -> &Path {
        &self.jsonl_path
    }

    /// Number of screenshot paths allocated so far
    pub fn screenshot_count(&self) -> u32 {
        self.screenshot_index
    }

    /// Allocate the next screenshot index and render its path. Does not touch
    /// the filesystem.
    pub fn next_screenshot_path(&mut self, name: &str) -> ScreenshotSlot {
        self.screenshot_index += 1;
        let file_name = resolve_template(&self.file_name_template, self.screenshot_index, name);
        ScreenshotSlot {
            path: self.output_dir.join(&file_name),
            file_name,
            index: self.screenshot_index,
        }
    }

    /// Whether a screenshot may be written to `path`
    pub fn may_write(&self, path: &Path) -> bool {
        self.overwrite || !path.exists()
    }

    /// Capture a full-page screenshot and, when the surface can dump it, the
    /// rendered content of a failed step. Never fails.
    pub async fn save_failure_artifacts(
        &self,
        step_id: &str,
        surface: Option<&dyn AutomationSurface>,
        logger: &RunLogger,
    ) {
        let Some(surface) = surface else {
            return;
        };

        let screenshot_path = self.failed_dir.join(format!("{}.png", step_id));
        best_effort(
            "failure screenshot",
            logger,
            surface.screenshot(&screenshot_path, ScreenshotOptions { full_page: true }),
        )
        .await;

        if surface.capabilities().content {
            let content_path = self.failed_dir.join(format!("{}.html", step_id));
            best_effort("failure content", logger, async {
                let html = surface.content().await?;
                tokio::fs::write(&content_path, html).await?;
                Ok::<_, SurfaceError>(())
            })
            .await;
        }
    }
}

/// Await `fut`, logging and discarding any error it produces
pub async fn best_effort<F, E>(label: &str, logger: &RunLogger, fut: F)
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    if let Err(e) = fut.await {
        logger.warn(
            "Best-effort capture failed",
            json!({ "what": label, "error": e.to_string() }),
        );
    }
}

/// `YYYYMMDD-HHMMSS-xxxxxx`: sortable, unique with high probability
pub fn new_run_id() -> String {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix: String = (0..RUN_SUFFIX_LEN)
        .map(|_| RUN_SUFFIX_CHARS[rng.gen_range(0..RUN_SUFFIX_CHARS.len())] as char)
        .collect();
    format!("{}-{}", stamp, suffix)
}
