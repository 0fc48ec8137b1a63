//! Step executors: one forwarder per step type

use std::path::Path;

use crate::config::{MouseButton, WaitCondition};
use crate::surface::{
    AutomationSurface, ClickOptions, InputOptions, ScreenshotOptions, SurfaceResult,
};

pub async fn execute_wait(
    surface: &dyn AutomationSurface,
    condition: &WaitCondition,
    timeout_ms: u64,
) -> SurfaceResult<()> {
    surface.wait_for(condition, timeout_ms).await
}

pub async fn execute_click(
    surface: &dyn AutomationSurface,
    selector: &str,
    button: Option<MouseButton>,
    click_count: Option<u32>,
) -> SurfaceResult<()> {
    surface
        .click(selector, ClickOptions { button, click_count })
        .await
}

pub async fn execute_input(
    surface: &dyn AutomationSurface,
    selector: &str,
    value: &str,
    clear: Option<bool>,
) -> SurfaceResult<()> {
    surface.input(selector, value, InputOptions { clear }).await
}

pub async fn execute_key(surface: &dyn AutomationSurface, keys: &[String]) -> SurfaceResult<()> {
    surface.key(keys).await
}

pub async fn execute_screenshot(
    surface: &dyn AutomationSurface,
    path: &Path,
    full_page: Option<bool>,
) -> SurfaceResult<()> {
    surface
        .screenshot(
            path,
            ScreenshotOptions {
                full_page: full_page.unwrap_or(false),
            },
        )
        .await
}
