//! Restart policy for channels that terminate.
//!
//! The channels themselves never reconnect. [`supervise`] runs one and
//! either hands its termination straight back (the default, so the process
//! exits and its manager restarts it) or restarts it with exponential backoff.

use crate::config::SupervisorConfig;
use crate::error::RelayResult;
use crate::transport::Termination;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Largest backoff exponent: delays stop growing after `backoff * 8`.
const MAX_BACKOFF_EXPONENT: u32 = 3;

pub async fn supervise<F, Fut>(
    component: &'static str,
    policy: &SupervisorConfig,
    shutdown: &CancellationToken,
    mut start: F,
) -> RelayResult<Termination>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RelayResult<Termination>>,
{
    let mut restarts = 0u32;
    loop {
        let outcome = start().await;
        match &outcome {
            Ok(Termination::Shutdown) => return outcome,
            Ok(termination) => warn!(component, reason = %termination, "Channel terminated"),
            Err(e) => error!(component, error = %e, "Channel failed"),
        }

        if !policy.restart || shutdown.is_cancelled() {
            return outcome;
        }
        if restarts >= policy.max_restarts {
            error!(component, restarts, "Giving up after maximum restarts");
            return outcome;
        }

        restarts += 1;
        let backoff = backoff_delay(policy.backoff_ms, restarts);
        info!(component, attempt = restarts, max = policy.max_restarts, ?backoff, "Restarting channel");
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(Termination::Shutdown),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    Duration::from_millis(base_ms.saturating_mul(2u64.pow(exponent)))
}
