//! Timeout guard for a single step attempt

use std::future::Future;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Race `action` against a `timeout_ms` timer.
///
/// A timeout of 0 disables the guard and the action's own outcome is returned
/// however long it takes. When the timer wins the action future is dropped;
/// work it already handed to the external surface is not recalled and may
/// still land.
pub async fn with_timeout<T, F>(action: F, timeout_ms: u64, message: &str) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    if timeout_ms == 0 {
        return action.await;
    }

    match tokio::time::timeout(Duration::from_millis(timeout_ms), action).await {
        Ok(outcome) => outcome,
        Err(_) => Err(EngineError::Timeout {
            message: message.to_string(),
            timeout_ms,
        }),
    }
}
