//! Process exit codes

use sar_engine::{EngineError, ScenarioResult, StepKind, StepStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    InvalidConfig,
    AppLaunchFailed,
    CdpConnectFailed,
    WaitTimeout,
    StepExecutionFailed,
    ScreenshotSaveFailed,
    CleanupFailed,
    Unexpected,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::InvalidConfig => 10,
            ExitCode::AppLaunchFailed => 20,
            ExitCode::CdpConnectFailed => 21,
            ExitCode::WaitTimeout => 30,
            ExitCode::StepExecutionFailed => 31,
            ExitCode::ScreenshotSaveFailed => 32,
            ExitCode::CleanupFailed => 40,
            ExitCode::Unexpected => 50,
        }
    }

    /// Exit code for a scenario that ran to completion or abort.
    ///
    /// A failed screenshot step reports 32, any other failure 31.
    pub fn for_result(result: &ScenarioResult) -> Self {
        match result.steps.iter().find(|s| s.status == StepStatus::Failed) {
            None if result.success => ExitCode::Success,
            Some(step) if step.step_type == StepKind::Screenshot => ExitCode::ScreenshotSaveFailed,
            _ => ExitCode::StepExecutionFailed,
        }
    }

    /// Map an error chain to an exit code by its first engine error
    pub fn for_error(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<EngineError>())
            .map(ExitCode::from)
            .unwrap_or(ExitCode::Unexpected)
    }
}

impl From<&EngineError> for ExitCode {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::InvalidConfig(_)
            | EngineError::Yaml(_)
            | EngineError::Json(_)
            | EngineError::ConditionTooDeep(_) => ExitCode::InvalidConfig,
            EngineError::AppLaunch(_) => ExitCode::AppLaunchFailed,
            EngineError::CdpConnect(_) => ExitCode::CdpConnectFailed,
            // only startup waits and the global deadline escape the engine
            EngineError::Timeout { .. } | EngineError::Surface(_) => ExitCode::WaitTimeout,
            EngineError::ScreenshotExists(_) => ExitCode::ScreenshotSaveFailed,
            EngineError::Cleanup(_) => ExitCode::CleanupFailed,
            EngineError::SurfaceRequired | EngineError::Io(_) => ExitCode::Unexpected,
        }
    }
}
