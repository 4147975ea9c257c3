//! Named retry policies built on `backon`.
//!
//! | Policy                | Min Delay | Max Delay | Retries | Use Case                         |
//! |-----------------------|-----------|-----------|---------|----------------------------------|
//! | `coordination_policy` | 20ms      | 1s        | 5       | coordination reads and writes    |
//! | `network_policy`      | 100ms     | 5s        | 5       | establishing member connections  |
//! | `fast_policy`         | 5ms       | 100ms     | 5       | read-modify-write version races  |
//!
//! All policies include jitter.
//!
//! ```rust,no_run
//! use clusterq::cluster::retry;
//! use backon::Retryable;
//!
//! async fn example() -> Result<(), clusterq::error::Error> {
//!     (|| async { Ok::<_, clusterq::error::Error>(()) })
//!         .retry(retry::coordination_policy())
//!         .when(|e| e.is_retriable())
//!         .await
//! }
//! ```

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::error::Error;

/// Policy for coordination store operations.
pub fn coordination_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(20))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(5)
        .with_jitter()
}

/// Policy for connecting to nodes, journals and the coordinator.
pub fn network_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(5)
        .with_jitter()
}

/// Policy for retrying optimistic updates that lost a version race.
pub fn fast_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(100))
        .with_max_times(5)
        .with_jitter()
}

/// Run `operation` with the coordination policy, retrying while `condition` holds.
pub async fn with_coordination_policy<F, Fut, T, C>(operation: F, condition: C) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
    C: FnMut(&Error) -> bool,
{
    operation
        .retry(coordination_policy())
        .when(condition)
        .notify(|e: &Error, delay: Duration| record_retry_attempt("coordination", e, delay))
        .await
}

/// Run `operation` with the network policy, retrying while `condition` holds.
pub async fn with_network_policy<F, Fut, T, C>(operation: F, condition: C) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
    C: FnMut(&Error) -> bool,
{
    operation
        .retry(network_policy())
        .when(condition)
        .notify(|e: &Error, delay: Duration| record_retry_attempt("network", e, delay))
        .await
}

/// Run `operation` with the fast policy, retrying while `condition` holds.
pub async fn with_fast_policy<F, Fut, T, C>(operation: F, condition: C) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
    C: FnMut(&Error) -> bool,
{
    operation
        .retry(fast_policy())
        .when(condition)
        .notify(|e: &Error, delay: Duration| record_retry_attempt("fast", e, delay))
        .await
}

fn record_retry_attempt(policy: &str, error: &Error, delay: Duration) {
    super::metrics::RETRY_ATTEMPTS
        .with_label_values(&[policy, error.kind().as_metric_label()])
        .inc();
    tracing::debug!(policy, error = %error, delay_ms = delay.as_millis() as u64, "Retry attempt");
}
