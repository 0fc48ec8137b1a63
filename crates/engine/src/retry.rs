//! Retry driver with fixed or exponential backoff

use std::fmt::Display;
use std::future::Future;

use tracing::debug;

use crate::config::RetryPolicy;

/// Run `action` up to `policy.attempts` times (at least once).
///
/// `action` receives the 1-based attempt number. The first success is
/// returned; once attempts are exhausted the most recent error is. The backoff
/// delay only separates attempts and never follows the last one.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut action: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match action(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_after(attempt);
                debug!(
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
