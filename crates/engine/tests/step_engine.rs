//! Step engine integration tests
//!
//! Drives full scenarios against a recording surface and checks results,
//! screenshot files, failure snapshots and the JSONL run log.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;

use sar_engine::config::WaitCondition;
use sar_engine::surface::{ClickOptions, InputOptions, ScreenshotOptions};
use sar_engine::{
    run_scenario, ArtifactManager, AutomationSurface, Capabilities, EngineError, RunLogger,
    RunnerConfig, StepStatus, SurfaceError, SurfaceResult,
};

const RUN_ID: &str = "20240101-120000-test01";

/// Surface that records every call and fails on demand
#[derive(Default)]
struct RecordingSurface {
    calls: Mutex<Vec<String>>,
    failing_selectors: Vec<String>,
    slow_selectors: Vec<String>,
    /// Clicks that hang before the surface turns responsive
    slow_clicks: AtomicU32,
    failing_wait: bool,
    /// Screenshot attempts that fail before one succeeds
    screenshot_failures: AtomicU32,
    conditions: Option<HashMap<String, Option<bool>>>,
}

impl RecordingSurface {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl AutomationSurface for RecordingSurface {
    async fn wait_for(&self, condition: &WaitCondition, timeout_ms: u64) -> SurfaceResult<()> {
        self.record(format!("wait:{:?}:{}", condition, timeout_ms));
        if self.failing_wait {
            return Err(SurfaceError::action("wait", "window never appeared"));
        }
        if let WaitCondition::Timeout { ms } = condition {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        Ok(())
    }

    async fn click(&self, selector: &str, _options: ClickOptions) -> SurfaceResult<()> {
        self.record(format!("click:{}", selector));
        let hanging = self
            .slow_clicks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hanging || self.slow_selectors.iter().any(|s| s == selector) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if self.failing_selectors.iter().any(|s| s == selector) {
            return Err(SurfaceError::action("click", format!("{} not found", selector)));
        }
        Ok(())
    }

    async fn input(&self, selector: &str, value: &str, _options: InputOptions) -> SurfaceResult<()> {
        self.record(format!("input:{}={}", selector, value));
        Ok(())
    }

    async fn key(&self, keys: &[String]) -> SurfaceResult<()> {
        self.record(format!("key:{}", keys.join("+")));
        Ok(())
    }

    async fn screenshot(&self, path: &Path, options: ScreenshotOptions) -> SurfaceResult<()> {
        self.record(format!("screenshot:{}:{}", path.display(), options.full_page));
        let remaining = self.screenshot_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.screenshot_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SurfaceError::action("screenshot", "compositor busy"));
        }
        std::fs::write(path, b"\x89PNG")?;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            content: false,
            conditions: self.conditions.is_some(),
        }
    }

    async fn evaluate_condition(&self, selector: &str) -> SurfaceResult<bool> {
        self.record(format!("condition:{}", selector));
        match self.conditions.as_ref().and_then(|c| c.get(selector)) {
            Some(Some(answer)) => Ok(*answer),
            Some(None) => Err(SurfaceError::action("condition", "page navigated")),
            None => Ok(false),
        }
    }
}

struct Harness {
    dir: TempDir,
    config: RunnerConfig,
}

impl Harness {
    /// `steps` is the YAML sequence under `scenario.steps`
    fn new(overwrite: bool, extra_scenario: &str, steps: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            r##"
version: 1
project: player
launch:
  type: command
  command: "true"
automation:
  adapter: playwright-cdp
  cdpPort: 9222
  connectTimeoutMs: 1000
  viewport: {{ width: 800, height: 600 }}
output:
  dir: {out}
  fileNameTemplate: "{{index:02}}-{{name}}.png"
  overwrite: {overwrite}
defaults:
  stepTimeoutMs: 2000
scenario:
  name: smoke
{extra}
  steps:
{steps}
"##,
            out = dir.path().join("shots").display(),
            overwrite = overwrite,
            extra = extra_scenario,
            steps = steps,
        );
        let config = RunnerConfig::from_yaml(&yaml).unwrap();
        Self { dir, config }
    }

    fn shots(&self) -> std::path::PathBuf {
        self.dir.path().join("shots")
    }

    fn prepare(&self) -> (ArtifactManager, RunLogger) {
        let artifacts = ArtifactManager::with_run_id(&self.config, RUN_ID).unwrap();
        let logger = RunLogger::with_jsonl(RUN_ID, false, artifacts.jsonl_path()).unwrap();
        (artifacts, logger)
    }

    async fn run(
        &self,
        surface: Option<&dyn AutomationSurface>,
        dry_run: bool,
    ) -> (Result<sar_engine::ScenarioResult, EngineError>, ArtifactManager) {
        let (mut artifacts, logger) = self.prepare();
        let result = run_scenario(
            &self.config.scenario,
            &self.config.defaults,
            &logger,
            &mut artifacts,
            surface,
            dry_run,
        )
        .await;
        (result, artifacts)
    }
}

fn events(artifacts: &ArtifactManager) -> Vec<Value> {
    std::fs::read_to_string(artifacts.jsonl_path())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn messages(events: &[Value], message: &str) -> usize {
    events.iter().filter(|e| e["message"] == message).count()
}

const THREE_STEPS: &str = r##"
    - { id: a, type: wait, until: { kind: timeout, ms: 1 } }
    - { id: b, type: click, selector: "#play" }
    - { id: c, type: screenshot, name: main }
"##;

#[tokio::test]
async fn test_scenario_runs_in_order() {
    let harness = Harness::new(false, "", THREE_STEPS);
    let surface = RecordingSurface::default();

    let (result, artifacts) = harness.run(Some(&surface), false).await;
    let result = result.unwrap();

    assert!(result.success);
    let ids: Vec<&str> = result.steps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(result.steps.iter().all(|s| s.status == StepStatus::Success));

    let expected = harness.shots().join("01-main.png");
    assert!(expected.exists());
    assert_eq!(result.steps[2].screenshot.as_deref(), Some(expected.as_path()));

    let calls = surface.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], "wait:Timeout { ms: 1 }:2000");
    assert_eq!(calls[1], "click:#play");

    let events = events(&artifacts);
    assert_eq!(messages(&events, "Step succeeded"), 3);
    assert!(events.iter().all(|e| e["runId"] == RUN_ID));
}

#[tokio::test]
async fn test_unsatisfied_gate_skips_step() {
    let harness = Harness::new(
        false,
        "",
        r##"
    - { id: dismiss, type: click, selector: "#dialog-ok", when: { op: exists, selector: "#dialog" } }
    - { id: play, type: click, selector: "#play", when: { op: not, expr: { op: exists, selector: "#dialog" } } }
"##,
    );
    let surface = RecordingSurface {
        conditions: Some(HashMap::from([("#dialog".to_string(), Some(false))])),
        ..Default::default()
    };

    let (result, _) = harness.run(Some(&surface), false).await;
    let result = result.unwrap();

    assert!(result.success);
    assert_eq!(result.steps[0].status, StepStatus::Skipped);
    assert_eq!(result.steps[1].status, StepStatus::Success);
    assert_eq!(surface.count("click:#dialog-ok"), 0);
    assert_eq!(surface.count("click:#play"), 1);
}

#[tokio::test]
async fn test_gate_without_capability_runs_step() {
    let harness = Harness::new(
        false,
        "",
        r##"
    - { id: dismiss, type: click, selector: "#dialog-ok", when: { op: exists, selector: "#dialog" } }
"##,
    );
    let surface = RecordingSurface::default();

    let (result, _) = harness.run(Some(&surface), false).await;

    assert_eq!(result.unwrap().steps[0].status, StepStatus::Success);
    assert_eq!(surface.count("condition:"), 0);
    assert_eq!(surface.count("click:#dialog-ok"), 1);
}

#[tokio::test]
async fn test_condition_error_runs_step() {
    let harness = Harness::new(
        false,
        "",
        r##"
    - { id: dismiss, type: click, selector: "#dialog-ok", when: { op: textContains, text: Update, selector: "#banner" } }
"##,
    );
    let surface = RecordingSurface {
        conditions: Some(HashMap::from([("#banner >> text=Update".to_string(), None)])),
        ..Default::default()
    };

    let (result, artifacts) = harness.run(Some(&surface), false).await;

    assert_eq!(result.unwrap().steps[0].status, StepStatus::Success);
    assert_eq!(surface.count("condition:#banner >> text=Update"), 1);
    let events = events(&artifacts);
    assert_eq!(messages(&events, "Condition check failed, running step"), 1);
}

#[tokio::test]
async fn test_failing_step_retries_then_aborts() {
    let harness = Harness::new(
        false,
        "",
        r##"
    - { id: open, type: click, selector: "#menu" }
    - { id: broken, type: click, selector: "#missing", retry: { attempts: 3, intervalMs: 10 } }
    - { id: never, type: key, keys: [Enter] }
"##,
    );
    let surface = RecordingSurface {
        failing_selectors: vec!["#missing".to_string()],
        ..Default::default()
    };

    let (result, artifacts) = harness.run(Some(&surface), false).await;
    let result = result.unwrap();

    assert!(!result.success);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[1].status, StepStatus::Failed);
    assert!(result.steps[1]
        .error
        .as_deref()
        .unwrap()
        .contains("#missing not found"));
    assert_eq!(surface.count("click:#missing"), 3);
    assert_eq!(surface.count("key:"), 0);

    // one failure snapshot, full page
    assert_eq!(surface.count("screenshot:"), 1);
    assert!(surface.calls().last().unwrap().ends_with(":true"));
    assert!(artifacts.failed_dir().join("broken.png").exists());

    let events = events(&artifacts);
    assert_eq!(messages(&events, "Step failed"), 1);
    assert_eq!(messages(&events, "Scenario aborted"), 1);
}

#[tokio::test]
async fn test_continue_on_error() {
    let harness = Harness::new(
        false,
        "",
        r##"
    - { id: optional, type: click, selector: "#missing", onError: continue }
    - { id: search, type: input, selector: "#q", value: "lofi" }
"##,
    );
    let surface = RecordingSurface {
        failing_selectors: vec!["#missing".to_string()],
        ..Default::default()
    };

    let (result, _) = harness.run(Some(&surface), false).await;
    let result = result.unwrap();

    assert!(!result.success);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[0].status, StepStatus::Failed);
    assert_eq!(result.steps[1].status, StepStatus::Success);
    assert_eq!(surface.count("input:#q=lofi"), 1);
}

#[tokio::test]
async fn test_step_timeout_fails_step() {
    let harness = Harness::new(
        false,
        "",
        r##"
    - { id: hang, type: click, selector: "#spinner", timeoutMs: 50, onError: continue }
"##,
    );
    let surface = RecordingSurface {
        slow_selectors: vec!["#spinner".to_string()],
        ..Default::default()
    };

    let (result, _) = harness.run(Some(&surface), false).await;
    let step = &result.unwrap().steps[0];

    assert_eq!(step.status, StepStatus::Failed);
    assert!(step.error.as_deref().unwrap().contains("step timeout"));
    assert!(step.duration_ms < 5000);
}

#[tokio::test]
async fn test_timeout_applies_per_attempt() {
    let harness = Harness::new(
        false,
        "",
        r##"
    - { id: flaky, type: click, selector: "#play", timeoutMs: 100, retry: { attempts: 2, intervalMs: 0 } }
"##,
    );
    let surface = RecordingSurface {
        slow_clicks: AtomicU32::new(1),
        ..Default::default()
    };

    let (result, artifacts) = harness.run(Some(&surface), false).await;
    let result = result.unwrap();

    // the first attempt times out, the second gets a fresh window
    assert!(result.success);
    assert_eq!(result.steps[0].status, StepStatus::Success);
    assert_eq!(surface.count("click:#play"), 2);
    assert!(result.steps[0].duration_ms < 5000);

    assert_eq!(messages(&events(&artifacts), "Step failed"), 0);
}

#[tokio::test]
async fn test_retried_screenshot_keeps_one_index() {
    let harness = Harness::new(
        false,
        "",
        r##"
    - { id: first, type: screenshot, name: Main Menu, retry: { attempts: 3, intervalMs: 0 } }
    - { id: second, type: screenshot, name: settings }
"##,
    );
    let surface = RecordingSurface {
        screenshot_failures: AtomicU32::new(2),
        ..Default::default()
    };

    let (result, artifacts) = harness.run(Some(&surface), false).await;

    assert!(result.unwrap().success);
    assert!(harness.shots().join("01-main-menu.png").exists());
    assert!(harness.shots().join("02-settings.png").exists());
    assert_eq!(artifacts.screenshot_count(), 2);
}

#[tokio::test]
async fn test_existing_screenshot_is_not_overwritten() {
    let harness = Harness::new(
        false,
        "",
        r##"
    - { id: shot, type: screenshot, name: main }
"##,
    );
    std::fs::create_dir_all(harness.shots()).unwrap();
    std::fs::write(harness.shots().join("01-main.png"), b"keep").unwrap();
    let surface = RecordingSurface::default();

    let (result, _) = harness.run(Some(&surface), false).await;
    let result = result.unwrap();

    assert!(!result.success);
    assert!(result.steps[0]
        .error
        .as_deref()
        .unwrap()
        .contains("already exists"));
    assert_eq!(
        std::fs::read(harness.shots().join("01-main.png")).unwrap(),
        b"keep"
    );
}

#[tokio::test]
async fn test_overwrite_replaces_screenshot() {
    let harness = Harness::new(
        true,
        "",
        r##"
    - { id: shot, type: screenshot, name: main }
"##,
    );
    std::fs::create_dir_all(harness.shots()).unwrap();
    std::fs::write(harness.shots().join("01-main.png"), b"old").unwrap();
    let surface = RecordingSurface::default();

    let (result, _) = harness.run(Some(&surface), false).await;

    assert!(result.unwrap().success);
    assert_eq!(
        std::fs::read(harness.shots().join("01-main.png")).unwrap(),
        b"\x89PNG"
    );
}

#[tokio::test]
async fn test_dry_run_plans_screenshots() {
    let harness = Harness::new(
        false,
        r##"  startupWait:
    - { kind: windowTitle, contains: Player }"##,
        r##"
    - { id: a, type: screenshot, name: main }
    - { id: b, type: click, selector: "#play" }
    - { id: c, type: screenshot, name: playing }
"##,
    );

    let (result, artifacts) = harness.run(None, true).await;
    let result = result.unwrap();

    assert!(result.success);
    assert!(result.steps.iter().all(|s| s.status == StepStatus::Success));
    assert_eq!(artifacts.screenshot_count(), 2);
    assert_eq!(std::fs::read_dir(harness.shots()).unwrap().count(), 0);

    let events = events(&artifacts);
    assert_eq!(messages(&events, "Dry-run wait"), 1);
    assert_eq!(messages(&events, "Dry-run screenshot planned"), 2);
    let planned: Vec<&Value> = events
        .iter()
        .filter(|e| e["message"] == "Dry-run screenshot planned")
        .collect();
    assert_eq!(planned[1]["index"], 2);
    assert!(planned[1]["filePath"]
        .as_str()
        .unwrap()
        .ends_with("02-playing.png"));
}

#[tokio::test]
async fn test_startup_failure_propagates() {
    let harness = Harness::new(
        false,
        r##"  startupWait:
    - { kind: windowTitle, contains: Player }"##,
        THREE_STEPS,
    );
    let surface = RecordingSurface {
        failing_wait: true,
        ..Default::default()
    };

    let (result, _) = harness.run(Some(&surface), false).await;

    assert!(matches!(result, Err(EngineError::Surface(_))));
    // startup uses the default step timeout and no step ran
    assert_eq!(surface.calls().len(), 1);
    assert!(surface.calls()[0].ends_with(":2000"));
}

#[tokio::test]
async fn test_missing_surface_is_fatal() {
    let harness = Harness::new(false, "", THREE_STEPS);

    let (result, _) = harness.run(None, false).await;

    let err = result.unwrap_err();
    assert!(matches!(err, EngineError::SurfaceRequired));
    assert!(err.is_fatal());
}
