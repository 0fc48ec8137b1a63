//! SAR engine: scripted screenshot automation
//!
//! This crate runs a declarative scenario against a launched application and
//! writes numbered screenshots plus a JSONL run log:
//! - Parses YAML/JSON runner configs into typed scenarios
//! - Gates, times out and retries every step against an automation surface
//! - Allocates screenshot paths and captures failure snapshots per run
//! - Launches the target app and drives it through Playwright over CDP
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        StepEngine                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run()                                                       │
//! │    ├── startup_wait: [WaitCondition]   (fatal on failure)    │
//! │    └── for step in steps                                     │
//! │          ├── gate      when: ConditionExpr  -> skipped?      │
//! │          ├── retry     attempts, intervalMs, backoff         │
//! │          │     └── timeout   timeoutMs per attempt           │
//! │          │           └── executor -> AutomationSurface       │
//! │          └── record    StepResult, abort | continue          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ArtifactManager                                             │
//! │    ├── run_id        YYYYMMDD-HHMMSS-xxxxxx                  │
//! │    ├── next_screenshot_path(name) -> {index:02}-{name}.png   │
//! │    └── save_failure_artifacts(step_id) -> failed/<id>.*      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifacts;
pub mod config;
pub mod engine;
pub mod error;
pub mod executors;
pub mod launcher;
pub mod logger;
pub mod naming;
pub mod playwright;
pub mod retry;
pub mod surface;
pub mod timeout;

pub use artifacts::{ArtifactManager, ScreenshotSlot};
pub use config::{RunnerConfig, Scenario, Step, StepAction, StepKind};
pub use engine::{run_scenario, ScenarioResult, StepEngine, StepResult, StepStatus};
pub use error::{EngineError, EngineResult};
pub use logger::RunLogger;
pub use surface::{AutomationSurface, Capabilities, SurfaceError, SurfaceResult};
