//! Run Command

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use sar_engine::launcher::AppProcess;
use sar_engine::playwright::PlaywrightSurface;
use sar_engine::timeout::with_timeout;
use sar_engine::{
    run_scenario, ArtifactManager, AutomationSurface, RunLogger, RunnerConfig, ScenarioResult,
    StepResult, StepStatus,
};

use crate::commands::{load_validated, ConfigArgs};
use crate::exit::ExitCode;
use crate::output::{print_error, print_list, print_success, print_warning, OutputFormat, TableDisplay};

const GLOBAL_TIMEOUT_MESSAGE: &str = "global timeout";

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Directory a relative config path is resolved against; its
    /// node_modules provides playwright-core
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// Plan the run without launching or touching the app
    #[arg(long)]
    pub dry_run: bool,

    /// Output format for the step summary
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Step result display wrapper for serialization
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&StepResult> for ResultRow {
    fn from(result: &StepResult) -> Self {
        let detail = result.error.clone().or_else(|| {
            result
                .screenshot
                .as_ref()
                .map(|p| p.display().to_string())
        });
        Self {
            id: result.id.clone(),
            step_type: result.step_type.to_string(),
            status: result.status,
            duration_ms: result.duration_ms,
            detail,
        }
    }
}

impl TableDisplay for ResultRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Type", "Status", "Duration", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        let status = match self.status {
            StepStatus::Success => "✅ success",
            StepStatus::Failed => "❌ failed",
            StepStatus::Skipped => "⏭️  skipped",
        };
        vec![
            self.id.clone(),
            self.step_type.clone(),
            status.to_string(),
            format!("{}ms", self.duration_ms),
            self.detail.clone().unwrap_or_default(),
        ]
    }
}

/// Live resources of a non dry-run, torn down in reverse order
#[derive(Default)]
struct Session {
    app: Option<AppProcess>,
    surface: Option<PlaywrightSurface>,
}

impl Session {
    /// Close the surface, then stop the app. Both are attempted; the first
    /// error is returned.
    async fn teardown(&mut self) -> Result<()> {
        let closed = match self.surface.take() {
            Some(surface) => surface
                .close()
                .await
                .context("closing automation surface"),
            None => Ok(()),
        };
        let stopped = match self.app.as_mut() {
            Some(app) => app.stop().await.context("stopping app process"),
            None => Ok(()),
        };
        self.app = None;
        closed.and(stopped)
    }
}

pub async fn execute(args: RunArgs, verbose: bool) -> ExitCode {
    let config_path = resolve_config_path(&args.config.config, args.project_root.as_deref());
    let config = match load_validated(&config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let mut artifacts = match ArtifactManager::create(&config) {
        Ok(artifacts) => artifacts,
        Err(e) => {
            print_error(&format!("Failed to prepare output directories: {}", e));
            return ExitCode::from(&e);
        }
    };
    let logger = match RunLogger::with_jsonl(artifacts.run_id(), verbose, artifacts.jsonl_path()) {
        Ok(logger) => Arc::new(logger),
        Err(e) => {
            print_error(&format!("Failed to open run log: {}", e));
            return ExitCode::from(&e);
        }
    };
    logger.info(
        "Run started",
        json!({ "configPath": config_path, "dryRun": args.dry_run }),
    );

    let mut session = Session::default();
    let outcome = drive(&config, &args, &logger, &mut artifacts, &mut session).await;

    let code = match &outcome {
        Ok(result) => {
            print_list(
                &result.steps.iter().map(ResultRow::from).collect::<Vec<_>>(),
                args.format,
            );
            summarize(result, &artifacts, &logger)
        }
        Err(e) => {
            let code = ExitCode::for_error(e);
            logger.error(
                "Run failed",
                json!({ "error": format!("{:#}", e), "code": code.code() }),
            );
            print_error(&format!("{:#}", e));
            code
        }
    };

    if let Err(e) = session.teardown().await {
        logger.error("Cleanup failed", json!({ "error": format!("{:#}", e) }));
        print_error(&format!("Cleanup error: {:#}", e));
        return ExitCode::CleanupFailed;
    }
    code
}

async fn drive(
    config: &RunnerConfig,
    args: &RunArgs,
    logger: &Arc<RunLogger>,
    artifacts: &mut ArtifactManager,
    session: &mut Session,
) -> Result<ScenarioResult> {
    if args.dry_run {
        print_warning("Dry run: the app is not launched and no screenshots are written");
    } else {
        let app = AppProcess::launch(&config.launch, Arc::clone(logger))
            .await
            .context("launching target app")?;
        logger.info("App launched", json!({ "pid": app.pid() }));
        session.app = Some(app);

        let module_dir = args
            .project_root
            .as_ref()
            .map(|root| root.join("node_modules"))
            .filter(|dir| dir.is_dir());
        let surface = PlaywrightSurface::connect(&config.automation, module_dir)
            .await
            .context("connecting to CDP endpoint")?;
        logger.info("CDP connected", json!({ "endpoint": surface.endpoint() }));
        session.surface = Some(surface);
    }

    let surface = session
        .surface
        .as_ref()
        .map(|s| s as &dyn AutomationSurface);
    let global_timeout_ms = config.defaults.global_timeout_ms.unwrap_or(0);

    let result = with_timeout(
        run_scenario(
            &config.scenario,
            &config.defaults,
            logger,
            artifacts,
            surface,
            args.dry_run,
        ),
        global_timeout_ms,
        GLOBAL_TIMEOUT_MESSAGE,
    )
    .await
    .context("running scenario")?;

    Ok(result)
}

fn summarize(result: &ScenarioResult, artifacts: &ArtifactManager, logger: &RunLogger) -> ExitCode {
    let code = ExitCode::for_result(result);
    let counts = json!({
        "succeeded": result.count(StepStatus::Success),
        "failed": result.count(StepStatus::Failed),
        "skipped": result.count(StepStatus::Skipped),
        "screenshots": artifacts.screenshot_count(),
    });

    if code == ExitCode::Success {
        logger.info("Scenario completed", counts);
        print_success(&format!(
            "Scenario completed: {} step(s), run {}",
            result.steps.len(),
            artifacts.run_id()
        ));
    } else {
        logger.error("Scenario failed", counts);
        print_error(&format!(
            "Scenario failed, see {}",
            artifacts.run_dir().display()
        ));
    }
    info!(run_id = artifacts.run_id(), code = code.code(), "Run finished");
    code
}

/// A relative config path is taken from `project_root` when one is given
fn resolve_config_path(config: &Path, project_root: Option<&Path>) -> PathBuf {
    match project_root {
        Some(root) if config.is_relative() => root.join(config),
        _ => config.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::write_config;
    use std::time::Duration;

    #[test]
    fn test_resolve_config_path() {
        let root = Path::new("/work/app");
        assert_eq!(
            resolve_config_path(Path::new("sar.yaml"), Some(root)),
            PathBuf::from("/work/app/sar.yaml")
        );
        assert_eq!(
            resolve_config_path(Path::new("/etc/sar.yaml"), Some(root)),
            PathBuf::from("/etc/sar.yaml")
        );
        assert_eq!(
            resolve_config_path(Path::new("sar.yaml"), None),
            PathBuf::from("sar.yaml")
        );
    }

    #[test]
    fn test_result_row_detail() {
        let failed = StepResult {
            id: "play".to_string(),
            step_type: sar_engine::StepKind::Click,
            status: StepStatus::Failed,
            duration_ms: 12,
            error: Some("step timeout (after 50 ms)".to_string()),
            screenshot: None,
        };
        let row = ResultRow::from(&failed);
        assert_eq!(row.detail.as_deref(), Some("step timeout (after 50 ms)"));
        assert_eq!(row.row()[3], "12ms");

        let shot = StepResult {
            id: "shot".to_string(),
            step_type: sar_engine::StepKind::Screenshot,
            status: StepStatus::Success,
            duration_ms: 3,
            error: None,
            screenshot: Some(PathBuf::from("/out/01-main.png")),
        };
        assert_eq!(
            ResultRow::from(&shot).detail.as_deref(),
            Some("/out/01-main.png")
        );
    }

    #[tokio::test]
    async fn test_dry_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r##"    - { id: play, type: click, selector: "#play" }
    - { id: shot, type: screenshot, name: Main Menu }"##,
        );
        let args = RunArgs {
            config: ConfigArgs {
                config: PathBuf::from("sar.yaml"),
            },
            project_root: Some(dir.path().to_path_buf()),
            dry_run: true,
            format: OutputFormat::Json,
        };

        assert_eq!(execute(args, false).await, ExitCode::Success);

        // nothing captured, but the run log exists
        let shots = dir.path().join("screenshots");
        assert_eq!(std::fs::read_dir(&shots).unwrap().count(), 0);
        let runs: Vec<_> = std::fs::read_dir(dir.path().join("artifacts"))
            .unwrap()
            .collect();
        assert_eq!(runs.len(), 1);
        let run_dir = runs[0].as_ref().unwrap().path();
        let log = std::fs::read_to_string(run_dir.join("run.jsonl")).unwrap();
        assert!(log.contains("Dry-run screenshot planned"));
        assert!(log.contains("Scenario completed"));
    }

    #[tokio::test]
    async fn test_launch_failure_maps_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sar.yaml");
        let yaml = r##"version: 1
project: player
launch:
  type: binary
  executable: ./does-not-exist
automation:
  adapter: playwright-cdp
  cdpPort: 9222
  connectTimeoutMs: 100
  viewport: { width: 100, height: 100 }
output:
  dir: screenshots
  fileNameTemplate: "{index:02}-{name}.png"
  overwrite: true
scenario:
  name: smoke
  steps:
    - { id: play, type: click, selector: "#play" }
"##;
        std::fs::write(&path, yaml).unwrap();
        let args = RunArgs {
            config: ConfigArgs { config: path },
            project_root: None,
            dry_run: false,
            format: OutputFormat::Plain,
        };

        let code = tokio::time::timeout(Duration::from_secs(10), execute(args, false))
            .await
            .unwrap();
        assert_eq!(code, ExitCode::AppLaunchFailed);
    }
}
