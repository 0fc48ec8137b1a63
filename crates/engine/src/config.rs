//! Declarative runner configuration (YAML or JSON)

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Step timeout used when neither the step nor the defaults set one
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 10_000;

/// Timeout handed to startup conditions when the defaults do not set one
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;

/// Deepest `not` chain accepted in a gating condition
pub const MAX_CONDITION_DEPTH: usize = 32;

/// A complete runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Schema version, must be 1
    pub version: u32,

    /// Project label, informational only
    pub project: String,

    /// How to start the target application
    pub launch: LaunchConfig,

    /// How to attach to the running application
    pub automation: AutomationConfig,

    /// Where screenshots land and how they are named
    pub output: OutputConfig,

    /// Fallbacks for per-step policy
    #[serde(default)]
    pub defaults: Defaults,

    /// The scripted scenario
    pub scenario: Scenario,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LaunchConfig {
    /// Run a command line through a shell
    Command {
        command: String,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        shell: Option<Shell>,
    },

    /// Execute a binary directly
    Binary {
        executable: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    Bash,
    Powershell,
}

impl Shell {
    /// Platform shell used when the config does not name one
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Shell::Powershell
        } else {
            Shell::Bash
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    pub adapter: AdapterKind,
    pub cdp_port: u16,
    pub connect_timeout_ms: u64,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterKind {
    #[serde(rename = "playwright-cdp")]
    PlaywrightCdp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Screenshot directory
    pub dir: PathBuf,

    /// File name template, e.g. `{index:02}-{name}.png`
    pub file_name_template: String,

    /// Whether an existing screenshot may be replaced
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default)]
    pub step_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Upper bound for the whole scenario run
    #[serde(default)]
    pub global_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Conditions awaited before the first step, in order
    #[serde(default)]
    pub startup_wait: Vec<WaitCondition>,

    pub steps: Vec<Step>,

    /// Overrides `output.dir` for this scenario
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

/// A single scripted step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    /// Gating condition; the step is skipped when it evaluates false
    #[serde(default)]
    pub when: Option<ConditionExpr>,

    #[serde(default)]
    pub on_error: Option<OnError>,

    #[serde(flatten)]
    pub action: StepAction,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    pub fn effective_timeout_ms(&self, defaults: &Defaults) -> u64 {
        self.timeout_ms
            .or(defaults.step_timeout_ms)
            .unwrap_or(DEFAULT_STEP_TIMEOUT_MS)
    }

    pub fn effective_retry(&self, defaults: &Defaults) -> RetryPolicy {
        self.retry
            .or(defaults.retry)
            .unwrap_or_default()
    }

    pub fn on_error(&self) -> OnError {
        self.on_error.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StepAction {
    Wait {
        until: WaitCondition,
    },
    Click {
        selector: String,
        #[serde(default)]
        button: Option<MouseButton>,
        #[serde(default)]
        click_count: Option<u32>,
    },
    Input {
        selector: String,
        value: String,
        #[serde(default)]
        clear: Option<bool>,
    },
    Key {
        keys: Vec<String>,
    },
    Screenshot {
        name: String,
        #[serde(default)]
        full_page: Option<bool>,
    },
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::Wait { .. } => StepKind::Wait,
            StepAction::Click { .. } => StepKind::Click,
            StepAction::Input { .. } => StepKind::Input,
            StepAction::Key { .. } => StepKind::Key,
            StepAction::Screenshot { .. } => StepKind::Screenshot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Wait,
    Click,
    Input,
    Key,
    Screenshot,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Wait => "wait",
            StepKind::Click => "click",
            StepKind::Input => "input",
            StepKind::Key => "key",
            StepKind::Screenshot => "screenshot",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            interval_ms: 0,
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Delay inserted after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let multiplier = match self.backoff {
            Backoff::Fixed => 1,
            Backoff::Exponential => 1u64
                .checked_shl(attempt.saturating_sub(1))
                .unwrap_or(u64::MAX),
        };
        Duration::from_millis(self.interval_ms.saturating_mul(multiplier))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

/// Something to wait for, either as a step or at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WaitCondition {
    WindowTitle {
        contains: String,
    },
    Text {
        contains: String,
        #[serde(default)]
        selector: Option<String>,
    },
    Selector {
        selector: String,
        #[serde(default)]
        state: Option<SelectorState>,
    },
    Timeout {
        ms: u64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorState {
    Attached,
    #[default]
    Visible,
    Hidden,
    Detached,
}

impl SelectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorState::Attached => "attached",
            SelectorState::Visible => "visible",
            SelectorState::Hidden => "hidden",
            SelectorState::Detached => "detached",
        }
    }
}

/// Gating expression, answered by the automation surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ConditionExpr {
    Exists {
        selector: String,
    },
    TextContains {
        text: String,
        #[serde(default)]
        selector: Option<String>,
    },
    Not {
        expr: Box<ConditionExpr>,
    },
}

impl ConditionExpr {
    /// Number of `not` wrappers around the innermost predicate
    pub fn negation_depth(&self) -> usize {
        let mut current = self;
        let mut depth = 0;
        while let ConditionExpr::Not { expr } = current {
            depth += 1;
            current = expr;
        }
        depth
    }
}

/// A single problem found by [`RunnerConfig::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl RunnerConfig {
    /// Parse a config from YAML
    pub fn from_yaml(yaml: &str) -> EngineResult<Self> {
        serde_yaml::from_str(yaml).map_err(EngineError::from)
    }

    /// Parse a config from JSON
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(EngineError::from)
    }

    /// Load a config file, picking the format from its extension, and resolve
    /// relative paths against the file's directory
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidConfig(format!("read {} failed: {}", path.display(), e))
        })?;

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let config = match ext.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content)?,
            "json" => Self::from_json(&content)?,
            other => {
                return Err(EngineError::InvalidConfig(format!(
                    "unsupported config extension: {:?}",
                    other
                )))
            }
        };

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let base_dir = absolute.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.resolve_paths(base_dir))
    }

    /// Make relative paths absolute against `base_dir`
    pub fn resolve_paths(mut self, base_dir: &Path) -> Self {
        self.output.dir = resolve_against(base_dir, &self.output.dir);
        if let Some(dir) = self.scenario.output_dir.take() {
            self.scenario.output_dir = Some(resolve_against(base_dir, &dir));
        }
        match &mut self.launch {
            LaunchConfig::Command { cwd, .. } => {
                *cwd = cwd.as_deref().map(|c| resolve_against(base_dir, c));
            }
            LaunchConfig::Binary {
                executable, cwd, ..
            } => {
                *cwd = cwd.as_deref().map(|c| resolve_against(base_dir, c));
                *executable = resolve_against(base_dir, executable.as_path());
            }
        }
        self
    }

    /// Directory screenshots are written to
    pub fn screenshot_dir(&self) -> &Path {
        self.scenario
            .output_dir
            .as_deref()
            .unwrap_or(&self.output.dir)
    }

    /// Semantic checks serde cannot express
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.version != 1 {
            issues.push(ValidationIssue::new("version", "version must be 1"));
        }
        if is_blank(&self.project) {
            issues.push(ValidationIssue::new("project", "project is required"));
        }

        match &self.launch {
            LaunchConfig::Command { command, .. } if is_blank(command) => {
                issues.push(ValidationIssue::new("launch.command", "command is required"));
            }
            LaunchConfig::Binary { executable, .. } if executable.as_os_str().is_empty() => {
                issues.push(ValidationIssue::new(
                    "launch.executable",
                    "executable is required",
                ));
            }
            _ => {}
        }

        if self.output.dir.as_os_str().is_empty() {
            issues.push(ValidationIssue::new("output.dir", "output.dir is required"));
        }
        if is_blank(&self.output.file_name_template) {
            issues.push(ValidationIssue::new(
                "output.fileNameTemplate",
                "output.fileNameTemplate is required",
            ));
        }

        if let Some(retry) = &self.defaults.retry {
            check_retry(retry, "defaults.retry", &mut issues);
        }

        if is_blank(&self.scenario.name) {
            issues.push(ValidationIssue::new("scenario.name", "scenario.name is required"));
        }
        for (i, condition) in self.scenario.startup_wait.iter().enumerate() {
            check_wait(condition, &format!("scenario.startupWait[{}]", i), &mut issues);
        }
        if self.scenario.steps.is_empty() {
            issues.push(ValidationIssue::new(
                "scenario.steps",
                "scenario.steps must be non-empty array",
            ));
        }
        for (i, step) in self.scenario.steps.iter().enumerate() {
            check_step(step, &format!("scenario.steps[{}]", i), &mut issues);
        }

        issues
    }
}

fn resolve_against(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn check_retry(retry: &RetryPolicy, path: &str, issues: &mut Vec<ValidationIssue>) {
    if retry.attempts < 1 {
        issues.push(ValidationIssue::new(path, "retry.attempts must be >= 1"));
    }
}

fn check_wait(condition: &WaitCondition, path: &str, issues: &mut Vec<ValidationIssue>) {
    let ok = match condition {
        WaitCondition::WindowTitle { contains } | WaitCondition::Text { contains, .. } => {
            !is_blank(contains)
        }
        WaitCondition::Selector { selector, .. } => !is_blank(selector),
        WaitCondition::Timeout { .. } => true,
    };
    if !ok {
        issues.push(ValidationIssue::new(path, "invalid wait condition"));
    }
}

fn check_step(step: &Step, path: &str, issues: &mut Vec<ValidationIssue>) {
    if is_blank(&step.id) {
        issues.push(ValidationIssue::new(format!("{}.id", path), "id is required"));
    }

    match &step.action {
        StepAction::Wait { until } => check_wait(until, &format!("{}.until", path), issues),
        StepAction::Click { selector, .. } | StepAction::Input { selector, .. } => {
            if is_blank(selector) {
                issues.push(ValidationIssue::new(
                    format!("{}.selector", path),
                    "selector is required",
                ));
            }
        }
        StepAction::Key { keys } => {
            if keys.is_empty() || keys.iter().any(|k| is_blank(k)) {
                issues.push(ValidationIssue::new(
                    format!("{}.keys", path),
                    "keys must be a non-empty string array",
                ));
            }
        }
        StepAction::Screenshot { name, .. } => {
            if is_blank(name) {
                issues.push(ValidationIssue::new(format!("{}.name", path), "name is required"));
            }
        }
    }

    if let Some(when) = &step.when {
        if when.negation_depth() > MAX_CONDITION_DEPTH {
            issues.push(ValidationIssue::new(
                format!("{}.when", path),
                format!("condition nests more than {} levels", MAX_CONDITION_DEPTH),
            ));
        }
    }

    if let Some(retry) = &step.retry {
        check_retry(retry, &format!("{}.retry", path), issues);
    }
}
