//! Named retry policies built on `backon`.
//!
//! | Policy | Min Delay | Max Delay | Retries | Use Case |
//! |--------|-----------|-----------|---------|----------|
//! | `reconnect_policy` | configured | configured | configured | Device session reconnects |
//! | `initial_state_policy` | 50ms | 5s | configured | Topology snapshot on promotion |
//!
//! Reconnects are driven by the node manager as an iterator of delays
//! ([`reconnect_schedule`]) so each pending timer is a message it can drop on
//! demotion. The initial-state fetch uses `Retryable` directly.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder, Retryable};

use super::config::ReconnectConfig;
use super::error::{TopologyError, TopologyResult};
use super::metrics;

/// Policy for re-establishing lost device sessions.
pub fn reconnect_policy(config: &ReconnectConfig) -> ExponentialBuilder {
    let builder = ExponentialBuilder::default()
        .with_min_delay(config.min_delay)
        .with_max_delay(config.max_delay)
        .with_max_times(config.max_attempts);
    if config.jitter {
        builder.with_jitter()
    } else {
        builder
    }
}

/// The reconnect delays, one per allowed attempt.
pub fn reconnect_schedule(config: &ReconnectConfig) -> ExponentialBackoff {
    reconnect_policy(config).build()
}

/// Policy for fetching a topology's initial state.
pub fn initial_state_policy(max_times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(max_times)
        .with_jitter()
}

/// Run `operation`, retrying errors that report themselves retriable.
pub async fn with_initial_state_policy<F, Fut, T>(
    operation: F,
    max_times: usize,
) -> TopologyResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TopologyResult<T>>,
{
    let result = operation
        .retry(initial_state_policy(max_times))
        .when(TopologyError::is_retriable)
        .notify(|e: &TopologyError, delay: Duration| {
            record_retry_attempt("initial_state");
            tracing::debug!(error = %e, ?delay, "Retrying initial state fetch");
        })
        .await;
    match &result {
        Ok(_) => record_retry_success("initial_state"),
        Err(e) if e.is_retriable() => record_retry_exhausted("initial_state"),
        Err(_) => {}
    }
    result
}

pub fn record_retry_attempt(policy_name: &str) {
    metrics::RETRY_ATTEMPTS
        .with_label_values(&[policy_name, "attempt"])
        .inc();
}

pub fn record_retry_exhausted(policy_name: &str) {
    metrics::RETRY_ATTEMPTS
        .with_label_values(&[policy_name, "exhausted"])
        .inc();

    tracing::warn!(policy = policy_name, "Retry policy exhausted");
}

pub fn record_retry_success(policy_name: &str) {
    metrics::RETRY_ATTEMPTS
        .with_label_values(&[policy_name, "success"])
        .inc();
}
