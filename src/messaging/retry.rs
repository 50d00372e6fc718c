//! Bounded retry for store and broker calls.
//!
//! The same policy drives the consumer's recording attempts and the
//! post-commit event publish.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::AppError;
use crate::messaging::RetryPolicy;

/// Run `op` until it succeeds, up to `policy.attempts` times, sleeping
/// `policy.delay` between tries.
///
/// Stops early with the error when it is permanent. Cancelling `cancel`
/// drops the attempt in flight (rolling back any open store transaction) or
/// cuts the delay short, and yields [`AppError::Cancelled`].
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            result = op() => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_permanent() || attempt >= attempts => return Err(err),
            Err(err) => {
                warn!(attempt, attempts, error = %err, "attempt failed, retrying");
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            _ = tokio::time::sleep(policy.delay) => {}
        }
        attempt += 1;
    }
}
