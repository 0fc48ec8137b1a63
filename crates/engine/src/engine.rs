//! Step engine: drives a scenario through gating, timeout, retry and the
//! abort-or-continue failure policy

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;

use crate::artifacts::{ArtifactManager, ScreenshotSlot};
use crate::config::{
    ConditionExpr, Defaults, OnError, Scenario, Step, StepAction, StepKind,
    DEFAULT_STARTUP_TIMEOUT_MS, MAX_CONDITION_DEPTH,
};
use crate::error::{EngineError, EngineResult};
use crate::executors::{
    execute_click, execute_input, execute_key, execute_screenshot, execute_wait,
};
use crate::logger::RunLogger;
use crate::retry::with_retry;
use crate::surface::AutomationSurface;
use crate::timeout::with_timeout;

const STEP_TIMEOUT_MESSAGE: &str = "step timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// Outcome of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepKind,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

/// Outcome of a scenario run, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub success: bool,
    pub steps: Vec<StepResult>,
}

impl ScenarioResult {
    /// Success is the absence of failed steps; skipped steps do not count
    pub fn from_steps(steps: Vec<StepResult>) -> Self {
        let success = steps.iter().all(|s| s.status != StepStatus::Failed);
        Self { success, steps }
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

/// Result of evaluating a step's gating condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// The step declares no condition
    Ungated,
    /// No surface, or the surface cannot evaluate conditions
    CapabilityAbsent,
    /// The check errored instead of answering
    CheckFailed,
    Satisfied,
    Unsatisfied,
}

impl Gate {
    fn allows_run(self) -> bool {
        self != Gate::Unsatisfied
    }
}

/// Orchestrates one scenario run.
///
/// Results are appended in declaration order. `run` only returns `Err` for
/// startup-condition failures and invariant violations; step failures are
/// recorded in the result.
pub struct StepEngine<'a> {
    scenario: &'a Scenario,
    defaults: &'a Defaults,
    logger: &'a RunLogger,
    artifacts: &'a mut ArtifactManager,
    surface: Option<&'a dyn AutomationSurface>,
    dry_run: bool,
}

impl<'a> StepEngine<'a> {
    pub fn new(
        scenario: &'a Scenario,
        defaults: &'a Defaults,
        logger: &'a RunLogger,
        artifacts: &'a mut ArtifactManager,
    ) -> Self {
        Self {
            scenario,
            defaults,
            logger,
            artifacts,
            surface: None,
            dry_run: false,
        }
    }

    pub fn with_surface(mut self, surface: Option<&'a dyn AutomationSurface>) -> Self {
        self.surface = surface;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn run(mut self) -> EngineResult<ScenarioResult> {
        let scenario = self.scenario;
        self.logger.info(
            "Scenario started",
            json!({
                "scenario": scenario.name,
                "steps": scenario.steps.len(),
                "dryRun": self.dry_run,
            }),
        );

        self.run_startup().await?;

        let mut results = Vec::with_capacity(scenario.steps.len());
        for step in &scenario.steps {
            let (result, abort) = self.execute_step(step).await?;
            results.push(result);
            if abort {
                self.logger.error(
                    "Scenario aborted",
                    json!({ "stepId": step.id, "completed": results.len() }),
                );
                return Ok(ScenarioResult {
                    success: false,
                    steps: results,
                });
            }
        }

        Ok(ScenarioResult::from_steps(results))
    }

    /// Startup conditions run in order with no gating, retry or isolation
    async fn run_startup(&self) -> EngineResult<()> {
        let timeout_ms = self
            .defaults
            .step_timeout_ms
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT_MS);

        for condition in &self.scenario.startup_wait {
            match self.surface {
                None => self
                    .logger
                    .info("Dry-run wait", json!({ "condition": condition })),
                Some(surface) => {
                    execute_wait(surface, condition, timeout_ms).await?;
                    self.logger
                        .info("Startup condition met", json!({ "condition": condition }));
                }
            }
        }
        Ok(())
    }

    async fn execute_step(&mut self, step: &Step) -> EngineResult<(StepResult, bool)> {
        let started = Instant::now();
        let kind = step.kind();

        let gate = self.evaluate_gate(step.when.as_ref()).await?;
        if !gate.allows_run() {
            let result = StepResult {
                id: step.id.clone(),
                step_type: kind,
                status: StepStatus::Skipped,
                duration_ms: elapsed_ms(started),
                error: None,
                screenshot: None,
            };
            self.logger.info(
                "Step skipped",
                json!({ "stepId": step.id, "type": kind, "durationMs": result.duration_ms }),
            );
            return Ok((result, false));
        }

        if self.dry_run {
            return Ok((self.dry_run_step(step, started), false));
        }

        let surface = self.surface.ok_or(EngineError::SurfaceRequired)?;
        let timeout_ms = step.effective_timeout_ms(self.defaults);
        let retry = step.effective_retry(self.defaults);

        // one index per step, shared by every attempt
        let slot = match &step.action {
            StepAction::Screenshot { name, .. } => Some(self.artifacts.next_screenshot_path(name)),
            _ => None,
        };

        let this = &*self;
        let slot_ref = slot.as_ref();
        let outcome = with_retry(&retry, move |attempt| async move {
            this.logger.debug(
                "Step attempt",
                json!({ "stepId": step.id, "attempt": attempt, "attempts": retry.attempts }),
            );
            with_timeout(
                this.dispatch(step, surface, slot_ref, timeout_ms),
                timeout_ms,
                STEP_TIMEOUT_MESSAGE,
            )
            .await
        })
        .await;

        match outcome {
            Ok(()) => {
                let screenshot = slot.map(|s| s.path);
                let result = StepResult {
                    id: step.id.clone(),
                    step_type: kind,
                    status: StepStatus::Success,
                    duration_ms: elapsed_ms(started),
                    error: None,
                    screenshot,
                };
                self.logger.info(
                    "Step succeeded",
                    json!({
                        "stepId": step.id,
                        "type": kind,
                        "durationMs": result.duration_ms,
                        "screenshot": result.screenshot,
                    }),
                );
                Ok((result, false))
            }
            Err(e) => {
                let message = e.to_string();
                self.logger.error(
                    "Step failed",
                    json!({ "stepId": step.id, "type": kind, "error": message }),
                );
                self.artifacts
                    .save_failure_artifacts(&step.id, Some(surface), self.logger)
                    .await;

                let result = StepResult {
                    id: step.id.clone(),
                    step_type: kind,
                    status: StepStatus::Failed,
                    duration_ms: elapsed_ms(started),
                    error: Some(message),
                    screenshot: None,
                };
                Ok((result, step.on_error() == OnError::Abort))
            }
        }
    }

    /// Log what would happen; screenshots still consume an index
    fn dry_run_step(&mut self, step: &Step, started: Instant) -> StepResult {
        let kind = step.kind();
        match &step.action {
            StepAction::Screenshot { name, .. } => {
                let slot = self.artifacts.next_screenshot_path(name);
                self.logger.info(
                    "Dry-run screenshot planned",
                    json!({ "stepId": step.id, "filePath": slot.path, "index": slot.index }),
                );
            }
            _ => self
                .logger
                .info("Dry-run step", json!({ "stepId": step.id, "type": kind })),
        }

        StepResult {
            id: step.id.clone(),
            step_type: kind,
            status: StepStatus::Success,
            duration_ms: elapsed_ms(started),
            error: None,
            screenshot: None,
        }
    }

    async fn dispatch(
        &self,
        step: &Step,
        surface: &dyn AutomationSurface,
        slot: Option<&ScreenshotSlot>,
        timeout_ms: u64,
    ) -> EngineResult<()> {
        match &step.action {
            StepAction::Wait { until } => execute_wait(surface, until, timeout_ms).await?,
            StepAction::Click {
                selector,
                button,
                click_count,
            } => execute_click(surface, selector, *button, *click_count).await?,
            StepAction::Input {
                selector,
                value,
                clear,
            } => execute_input(surface, selector, value, *clear).await?,
            StepAction::Key { keys } => execute_key(surface, keys).await?,
            StepAction::Screenshot { full_page, .. } => {
                let path = slot.map(|s| s.path.as_path()).ok_or_else(|| {
                    EngineError::InvalidConfig(format!(
                        "no screenshot path allocated for step {}",
                        step.id
                    ))
                })?;
                if !self.artifacts.may_write(path) {
                    return Err(EngineError::ScreenshotExists(path.to_path_buf()));
                }
                execute_screenshot(surface, path, *full_page).await?;
            }
        }
        Ok(())
    }

    /// Fail-open: only an explicit `false` from the surface skips the step
    async fn evaluate_gate(&self, expr: Option<&ConditionExpr>) -> EngineResult<Gate> {
        let Some(expr) = expr else {
            return Ok(Gate::Ungated);
        };
        let surface = match self.surface {
            Some(surface) if surface.capabilities().conditions => surface,
            _ => return Ok(Gate::CapabilityAbsent),
        };

        let (selector, negated) = condition_selector(expr)?;
        match surface.evaluate_condition(&selector).await {
            Ok(answer) if answer != negated => Ok(Gate::Satisfied),
            Ok(_) => Ok(Gate::Unsatisfied),
            Err(e) => {
                self.logger.warn(
                    "Condition check failed, running step",
                    json!({ "selector": selector, "error": e.to_string() }),
                );
                Ok(Gate::CheckFailed)
            }
        }
    }
}

/// Flatten a condition into the selector the surface checks and whether the
/// answer is negated.
fn condition_selector(expr: &ConditionExpr) -> EngineResult<(String, bool)> {
    let mut current = expr;
    let mut negated = false;
    let mut depth = 0;

    loop {
        match current {
            ConditionExpr::Not { expr } => {
                depth += 1;
                if depth > MAX_CONDITION_DEPTH {
                    return Err(EngineError::ConditionTooDeep(MAX_CONDITION_DEPTH));
                }
                negated = !negated;
                current = expr;
            }
            ConditionExpr::Exists { selector } => return Ok((selector.clone(), negated)),
            ConditionExpr::TextContains { text, selector } => {
                let target = match selector {
                    Some(selector) => format!("{} >> text={}", selector, text),
                    None => format!("text={}", text),
                };
                return Ok((target, negated));
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Run `scenario` and collect one result per executed step
pub async fn run_scenario(
    scenario: &Scenario,
    defaults: &Defaults,
    logger: &RunLogger,
    artifacts: &mut ArtifactManager,
    surface: Option<&dyn AutomationSurface>,
    dry_run: bool,
) -> EngineResult<ScenarioResult> {
    StepEngine::new(scenario, defaults, logger, artifacts)
        .with_surface(surface)
        .dry_run(dry_run)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not(expr: ConditionExpr) -> ConditionExpr {
        ConditionExpr::Not {
            expr: Box::new(expr),
        }
    }

    #[test]
    fn test_condition_selector_exists() {
        let expr = ConditionExpr::Exists {
            selector: "#play".to_string(),
        };
        assert_eq!(condition_selector(&expr).unwrap(), ("#play".to_string(), false));
    }

    #[test]
    fn test_condition_selector_text() {
        let bare = ConditionExpr::TextContains {
            text: "Ready".to_string(),
            selector: None,
        };
        assert_eq!(condition_selector(&bare).unwrap().0, "text=Ready");

        let scoped = ConditionExpr::TextContains {
            text: "Ready".to_string(),
            selector: Some("#status".to_string()),
        };
        assert_eq!(condition_selector(&scoped).unwrap().0, "#status >> text=Ready");
    }

    #[test]
    fn test_condition_selector_double_negation() {
        let expr = not(not(ConditionExpr::Exists {
            selector: "#x".to_string(),
        }));
        assert_eq!(condition_selector(&expr).unwrap(), ("#x".to_string(), false));
        assert!(condition_selector(&not(expr)).unwrap().1);
    }

    #[test]
    fn test_condition_selector_depth_guard() {
        let mut expr = ConditionExpr::Exists {
            selector: "#x".to_string(),
        };
        for _ in 0..=MAX_CONDITION_DEPTH {
            expr = not(expr);
        }
        assert!(matches!(
            condition_selector(&expr),
            Err(EngineError::ConditionTooDeep(_))
        ));
    }

    #[test]
    fn test_success_ignores_skipped() {
        let step = |status| StepResult {
            id: "s".to_string(),
            step_type: StepKind::Click,
            status,
            duration_ms: 0,
            error: None,
            screenshot: None,
        };
        let result = ScenarioResult::from_steps(vec![
            step(StepStatus::Success),
            step(StepStatus::Skipped),
        ]);
        assert!(result.success);
        assert_eq!(result.count(StepStatus::Skipped), 1);

        let result = ScenarioResult::from_steps(vec![step(StepStatus::Failed)]);
        assert!(!result.success);
    }
}
