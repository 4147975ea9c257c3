//! Prometheus metrics for nodes, journals, the router and the orchestrator.
//!
//! Metrics cover:
//! - RPC serving (connections, requests and latency per service)
//! - Queue traffic (messages posted, delivered, acked, failed per topic)
//! - Routing (failover retries, journal replication failures)
//! - Orchestration (ticks, overruns, status transitions, replayed messages)
//! - Retry policies and expiry sweeps
//!
//! All metrics are registered to a custom registry with the "clusterq" prefix.
//! Registration errors are logged and an unregistered metric is returned
//! instead of panicking. Exposing [`gather_text`] is up to the embedding
//! process.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
    Registry, TextEncoder, opts,
};
use tracing::warn;

use crate::error::{Error, Result};

/// Custom Prometheus registry for clusterq metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("clusterq".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// Each macro expands to a Lazy static with safe registration:
//
//   define_gauge_vec!(MY_GAUGE, "my_metric", "Description", ["label1"]);
//   define_counter_vec!(MY_COUNTER, "my_metric", "Description", ["label1"]);

macro_rules! define_gauge_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntGaugeVec> = Lazy::new(|| {
            register_int_gauge_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// RPC metrics
// =============================================================================

define_gauge_vec!(
    ACTIVE_CONNECTIONS,
    "active_connections",
    "Number of open RPC connections",
    ["service"]
);
define_counter_vec!(
    REQUEST_COUNT,
    "requests_total",
    "Total number of RPC requests served",
    ["service", "status"]
);
define_histogram_vec!(
    REQUEST_DURATION,
    "request_duration_seconds",
    "RPC request processing duration in seconds",
    ["service"],
    [0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
);

// =============================================================================
// Queue metrics
// =============================================================================

define_counter_vec!(
    MESSAGES_POSTED,
    "messages_posted_total",
    "Messages accepted by a node",
    ["topic"]
);
define_counter_vec!(
    MESSAGES_DELIVERED,
    "messages_delivered_total",
    "Messages handed to consumers",
    ["topic", "redelivery"]
);
define_counter_vec!(
    MESSAGES_ACKED,
    "messages_acked_total",
    "Messages acknowledged by consumers",
    ["topic"]
);
define_counter_vec!(
    MESSAGES_FAILED,
    "messages_failed_total",
    "Messages moved to the fail list by consumers",
    ["topic"]
);
define_counter_vec!(
    MESSAGES_PURGED,
    "messages_purged_total",
    "Expired records deleted by the expiry sweep",
    ["store"]
);

// =============================================================================
// Router metrics
// =============================================================================

define_counter_vec!(
    ROUTER_RETRIES,
    "router_retries_total",
    "Requests retried on another node after a failure",
    ["operation"]
);
define_counter!(
    REPLICATION_FAILURES,
    "replication_failures_total",
    "Posts written to a node but not replicated to all of its journals"
);
define_gauge_vec!(
    ROUTER_MEMBERS,
    "router_members",
    "Members known to the router",
    ["kind"]
);

// =============================================================================
// Orchestrator metrics
// =============================================================================

define_counter!(
    ORCHESTRATOR_TICKS,
    "orchestrator_ticks_total",
    "Completed orchestrator ticks"
);
define_counter!(
    ORCHESTRATOR_OVERRUNS,
    "orchestrator_overruns_total",
    "Ticks skipped because the previous tick was still running"
);
define_counter_vec!(
    STATUS_TRANSITIONS,
    "status_transitions_total",
    "Status changes written by the orchestrator",
    ["kind", "status"]
);
define_counter_vec!(
    REPLAYED_MESSAGES,
    "replayed_messages_total",
    "Messages restored on a node from its journal",
    ["node"]
);
define_counter_vec!(
    REPAIRS,
    "structural_repairs_total",
    "Topics and consumer groups created on a node during repair",
    ["kind"]
);

// =============================================================================
// Retry metrics
// =============================================================================

define_counter_vec!(
    RETRY_ATTEMPTS,
    "retry_attempts_total",
    "Retries performed by named retry policies",
    ["policy", "error_kind"]
);

// =============================================================================
// Safe registration helpers
// =============================================================================

fn register_int_gauge_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntGaugeVec {
    let gauge = IntGaugeVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGaugeVec metric, using unregistered fallback");
            gauge
        }
    }
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounter metric, using unregistered fallback");
            counter
        }
    }
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("histogram opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Render every registered metric in the Prometheus text exposition format.
pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Protocol(format!("encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| Error::Protocol(format!("metrics are not utf-8: {}", e)))
}

/// Record one served RPC request.
pub fn record_request(service: &str, ok: bool, duration_secs: f64) {
    let status = if ok { "ok" } else { "error" };
    REQUEST_COUNT.with_label_values(&[service, status]).inc();
    REQUEST_DURATION
        .with_label_values(&[service])
        .observe(duration_secs);
}

pub fn record_status_transition(kind: &str, status: &str) {
    STATUS_TRANSITIONS.with_label_values(&[kind, status]).inc();
}

pub fn record_replayed(node_id: &str, count: u64) {
    if count > 0 {
        REPLAYED_MESSAGES.with_label_values(&[node_id]).inc_by(count);
    }
}
