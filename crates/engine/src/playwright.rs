//! Playwright over CDP: drives an already running Chromium-based app

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{AutomationConfig, MouseButton, Viewport, WaitCondition};
use crate::error::{EngineError, EngineResult};
use crate::surface::{
    AutomationSurface, Capabilities, ClickOptions, InputOptions, ScreenshotOptions, SurfaceError,
    SurfaceResult,
};

/// Delay between CDP readiness checks
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound for a single readiness check
const POLL_TIMEOUT: Duration = Duration::from_secs(3);

/// Automation surface backed by `playwright-core`.
///
/// Every action renders a short Node script that attaches to the CDP
/// endpoint, targets the first page of the first browser context, performs
/// the action and prints a single JSON outcome line.
pub struct PlaywrightSurface {
    endpoint: String,
    viewport: Viewport,
    node: PathBuf,
    module_dir: Option<PathBuf>,
    closed: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl PlaywrightSurface {
    fn new(config: &AutomationConfig) -> Self {
        Self {
            endpoint: format!("http://127.0.0.1:{}", config.cdp_port),
            viewport: config.viewport,
            node: PathBuf::from("node"),
            module_dir: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Wait for the CDP endpoint to answer, then apply the configured viewport.
    ///
    /// `module_dir` is the `node_modules` directory that provides
    /// `playwright-core`; `None` leaves module resolution to `NODE_PATH`.
    pub async fn connect(
        config: &AutomationConfig,
        module_dir: Option<PathBuf>,
    ) -> EngineResult<Self> {
        let mut surface = Self::new(config);
        surface.module_dir = module_dir;

        surface
            .await_endpoint(Duration::from_millis(config.connect_timeout_ms))
            .await?;

        let viewport = surface.viewport;
        surface
            .run_script("connect", &set_viewport_js(&viewport))
            .await
            .map_err(|e| EngineError::CdpConnect(e.to_string()))?;

        info!(
            endpoint = %surface.endpoint,
            width = viewport.width,
            height = viewport.height,
            "CDP connected"
        );
        Ok(surface)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn await_endpoint(&self, connect_timeout: Duration) -> EngineResult<()> {
        let client = reqwest::Client::new();
        let url = format!("{}/json/version", self.endpoint);
        let deadline = Instant::now() + connect_timeout;
        let mut last_error = String::from("endpoint never polled");

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EngineError::CdpConnect(format!(
                    "{} not reachable: {}",
                    self.endpoint, last_error
                )));
            }

            match client
                .get(&url)
                .timeout(remaining.min(POLL_TIMEOUT))
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => last_error = format!("HTTP {}", resp.status()),
                Err(e) => last_error = e.to_string(),
            }

            debug!(endpoint = %self.endpoint, error = %last_error, "CDP not ready yet");
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }

    /// Render the full script around an action body
    fn build_script(&self, body: &str) -> String {
        format!(
            r#"const {{ chromium }} = require('playwright-core');

(async () => {{
  let browser;
  try {{
    browser = await chromium.connectOverCDP({endpoint});
    const context = browser.contexts()[0] ?? (await browser.newContext({{ viewport: {viewport} }}));
    const page = context.pages()[0] ?? (await context.newPage());
    const result = await (async () => {{
{body}
    }})();
    console.log(JSON.stringify({{ ok: true, result: result ?? null }}));
  }} catch (error) {{
    console.log(JSON.stringify({{ ok: false, error: String((error && error.message) || error) }}));
    process.exitCode = 1;
  }} finally {{
    if (browser) {{
      await browser.close().catch(() => {{}});
    }}
  }}
}})();
"#,
            endpoint = js_str(&self.endpoint),
            viewport = viewport_js(&self.viewport),
            body = body,
        )
    }

    /// Execute a rendered action and decode its outcome line
    async fn run_script(&self, action: &str, body: &str) -> SurfaceResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SurfaceError::action(action, "surface is closed"));
        }

        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join(format!("{}.cjs", action));
        tokio::fs::write(&script_path, self.build_script(body)).await?;

        debug!(action, script = %script_path.display(), "Running Playwright script");

        let mut cmd = Command::new(&self.node);
        cmd.arg(&script_path)
            .current_dir(temp_dir.path())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.module_dir {
            cmd.env("NODE_PATH", dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| SurfaceError::action(action, format!("failed to start node: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_outcome(&stdout) {
            Some(outcome) if outcome.ok => Ok(outcome.result),
            Some(outcome) => Err(SurfaceError::action(
                action,
                outcome.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            None => Err(SurfaceError::action(
                action,
                format!(
                    "script exited with {} without an outcome: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )),
        }
    }
}

#[async_trait]
impl AutomationSurface for PlaywrightSurface {
    async fn wait_for(&self, condition: &WaitCondition, timeout_ms: u64) -> SurfaceResult<()> {
        if let WaitCondition::Timeout { ms } = condition {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            return Ok(());
        }
        self.run_script("wait", &wait_js(condition, timeout_ms))
            .await
            .map(|_| ())
    }

    async fn click(&self, selector: &str, options: ClickOptions) -> SurfaceResult<()> {
        self.run_script("click", &click_js(selector, options))
            .await
            .map(|_| ())
    }

    async fn input(&self, selector: &str, value: &str, options: InputOptions) -> SurfaceResult<()> {
        self.run_script("input", &input_js(selector, value, options))
            .await
            .map(|_| ())
    }

    async fn key(&self, keys: &[String]) -> SurfaceResult<()> {
        let Some(body) = key_js(keys) else {
            return Ok(());
        };
        self.run_script("key", &body).await.map(|_| ())
    }

    async fn screenshot(&self, path: &Path, options: ScreenshotOptions) -> SurfaceResult<()> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.run_script("screenshot", &screenshot_js(&path, options))
            .await
            .map(|_| ())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            content: true,
            conditions: true,
        }
    }

    async fn content(&self) -> SurfaceResult<String> {
        match self.run_script("content", "      return await page.content();").await? {
            Value::String(html) => Ok(html),
            other => Err(SurfaceError::action(
                "content",
                format!("expected a string, got {}", other),
            )),
        }
    }

    async fn evaluate_condition(&self, selector: &str) -> SurfaceResult<bool> {
        let body = format!(
            "      return (await page.locator({}).count()) > 0;",
            js_str(selector)
        );
        match self.run_script("condition", &body).await? {
            Value::Bool(found) => Ok(found),
            other => Err(SurfaceError::action(
                "condition",
                format!("expected a boolean, got {}", other),
            )),
        }
    }

    async fn close(&self) -> SurfaceResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(endpoint = %self.endpoint, "CDP disconnected");
        }
        Ok(())
    }
}

/// JavaScript string literal for `value`
fn js_str(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn viewport_js(viewport: &Viewport) -> String {
    format!(
        "{{ width: {}, height: {} }}",
        viewport.width, viewport.height
    )
}

fn set_viewport_js(viewport: &Viewport) -> String {
    // some CDP targets refuse a viewport change
    format!(
        "      await page.setViewportSize({}).catch(() => {{}});",
        viewport_js(viewport)
    )
}

fn wait_js(condition: &WaitCondition, timeout_ms: u64) -> String {
    match condition {
        WaitCondition::WindowTitle { contains } => format!(
            "      await page.waitForFunction((contains) => document.title.includes(contains), {}, {{ timeout: {} }});",
            js_str(contains),
            timeout_ms
        ),
        WaitCondition::Text {
            contains,
            selector: Some(selector),
        } => format!(
            "      await page.locator({}).filter({{ hasText: {} }}).first().waitFor({{ state: 'visible', timeout: {} }});",
            js_str(selector),
            js_str(contains),
            timeout_ms
        ),
        WaitCondition::Text {
            contains,
            selector: None,
        } => format!(
            "      await page.getByText({}, {{ exact: false }}).first().waitFor({{ state: 'visible', timeout: {} }});",
            js_str(contains),
            timeout_ms
        ),
        WaitCondition::Selector { selector, state } => format!(
            "      await page.locator({}).first().waitFor({{ state: {}, timeout: {} }});",
            js_str(selector),
            js_str(state.unwrap_or_default().as_str()),
            timeout_ms
        ),
        WaitCondition::Timeout { ms } => format!("      await page.waitForTimeout({});", ms),
    }
}

fn click_js(selector: &str, options: ClickOptions) -> String {
    let mut opts = Map::new();
    if let Some(button) = options.button {
        let button = match button {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
        };
        opts.insert("button".to_string(), Value::from(button));
    }
    if let Some(count) = options.click_count {
        opts.insert("clickCount".to_string(), Value::from(count));
    }
    format!(
        "      await page.locator({}).first().click({});",
        js_str(selector),
        Value::Object(opts)
    )
}

fn input_js(selector: &str, value: &str, options: InputOptions) -> String {
    let target = format!("page.locator({}).first()", js_str(selector));
    if options.clear == Some(false) {
        format!(
            "      const target = {};\n      await target.click();\n      await target.pressSequentially({});",
            target,
            js_str(value)
        )
    } else {
        format!("      await {}.fill({});", target, js_str(value))
    }
}

/// `None` when there is nothing to press
fn key_js(keys: &[String]) -> Option<String> {
    if keys.is_empty() {
        return None;
    }
    Some(format!(
        "      await page.keyboard.press({});",
        js_str(&keys.join("+"))
    ))
}

fn screenshot_js(path: &Path, options: ScreenshotOptions) -> String {
    format!(
        "      await page.screenshot({{ path: {}, fullPage: {} }});",
        js_str(&path.to_string_lossy()),
        options.full_page
    )
}

/// The last JSON line on stdout is the outcome
fn parse_outcome(stdout: &str) -> Option<ScriptOutcome> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}
