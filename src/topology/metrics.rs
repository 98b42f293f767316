//! Prometheus metrics for topology coordination.
//!
//! Metrics cover:
//! - Role transitions per scope kind (topology, node)
//! - Managed node counts and node connection states
//! - RPC dispatch (count, latency, outcome)
//! - Schema repository lookups and provider fetches
//! - Device reconnect attempts and exhaustion
//!
//! All metrics are registered to a custom registry with the "topokeeper" prefix to
//! avoid name collisions with other libraries using the default Prometheus registry.
//! Registration errors are handled gracefully: a metric that fails to register
//! is still returned, it just won't show up in [`gather_metrics`].

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Registry, TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for topokeeper metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("topokeeper".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

/// Declare an IntGauge metric.
macro_rules! define_gauge {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntGauge> =
            Lazy::new(|| register_int_gauge_safe(&REGISTRY, $metric_name, $help));
    };
}

/// Declare an IntGaugeVec metric with labels.
macro_rules! define_gauge_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntGaugeVec> = Lazy::new(|| {
            register_int_gauge_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare an IntCounter metric (no labels).
macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

/// Declare a HistogramVec metric with labels and buckets.
macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Role metrics
// =============================================================================

define_counter_vec!(
    ROLE_TRANSITIONS,
    "role_transitions_total",
    "Role changes applied by managers",
    ["scope", "role"]
);
define_counter!(
    ELECTIONS,
    "elections_total",
    "Leadership elections completed by the local coordinator"
);

// =============================================================================
// Node metrics
// =============================================================================

define_gauge!(
    MANAGED_NODES,
    "managed_nodes",
    "Number of node managers owned by topology managers in this process"
);
define_gauge_vec!(
    NODE_STATES,
    "node_states",
    "Number of node managers per connection state",
    ["state"]
);
define_counter_vec!(
    NODE_LIFECYCLE,
    "node_lifecycle_total",
    "Node create/update/delete operations applied",
    ["operation"]
);
define_counter_vec!(
    RECONCILIATIONS,
    "reconciliations_total",
    "Topology reconciliations against the initial state",
    ["status"]
);

// =============================================================================
// RPC metrics
// =============================================================================

define_counter_vec!(
    RPC_REQUESTS,
    "rpc_requests_total",
    "RPC requests dispatched to device backends",
    ["outcome"]
);
define_histogram_vec!(
    RPC_DURATION,
    "rpc_duration_seconds",
    "RPC dispatch duration in seconds",
    ["outcome"],
    [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
);

// =============================================================================
// Schema metrics
// =============================================================================

define_counter_vec!(
    SCHEMA_LOOKUPS,
    "schema_lookups_total",
    "Schema repository cache lookups",
    ["result"]
);
define_counter_vec!(
    SCHEMA_FETCHES,
    "schema_fetches_total",
    "Schema source fetches from providers",
    ["status"]
);

// =============================================================================
// Reconnect metrics
// =============================================================================

define_counter!(
    RECONNECT_ATTEMPTS,
    "reconnect_attempts_total",
    "Device reconnect attempts scheduled"
);
define_counter!(
    RECONNECT_EXHAUSTED,
    "reconnect_exhausted_total",
    "Times a node manager exhausted its reconnect schedule"
);
define_counter_vec!(
    RETRY_ATTEMPTS,
    "retry_attempts_total",
    "Retry policy outcomes",
    ["policy", "outcome"]
);

// =============================================================================
// Registration helpers
// =============================================================================

fn register_int_gauge_safe(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGauge metric, using unregistered fallback");
            gauge
        }
    }
}

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
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Force registration of every metric so they show up before first use.
pub fn init_metrics() {
    let _ = &*ROLE_TRANSITIONS;
    let _ = &*ELECTIONS;
    let _ = &*MANAGED_NODES;
    let _ = &*NODE_STATES;
    let _ = &*NODE_LIFECYCLE;
    let _ = &*RECONCILIATIONS;
    let _ = &*RPC_REQUESTS;
    let _ = &*RPC_DURATION;
    let _ = &*SCHEMA_LOOKUPS;
    let _ = &*SCHEMA_FETCHES;
    let _ = &*RECONNECT_ATTEMPTS;
    let _ = &*RECONNECT_EXHAUSTED;
    let _ = &*RETRY_ATTEMPTS;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Gather all metric families from the registry.
pub fn gather_metrics() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

// =============================================================================
// Recording helpers
// =============================================================================

/// Record a role change applied by a manager. `scope` is "topology" or "node".
pub fn record_role_transition(scope: &str, role: &str) {
    ROLE_TRANSITIONS.with_label_values(&[scope, role]).inc();
}

pub fn record_election() {
    ELECTIONS.inc();
}

/// Move one node manager from one connection state to another.
pub fn record_node_state_change(from: Option<&str>, to: Option<&str>) {
    if let Some(from) = from {
        NODE_STATES.with_label_values(&[from]).dec();
    }
    if let Some(to) = to {
        NODE_STATES.with_label_values(&[to]).inc();
    }
}

pub fn record_node_lifecycle(operation: &str) {
    NODE_LIFECYCLE.with_label_values(&[operation]).inc();
}

pub fn set_managed_nodes_delta(delta: i64) {
    MANAGED_NODES.add(delta);
}

pub fn record_reconciliation(status: &str) {
    RECONCILIATIONS.with_label_values(&[status]).inc();
}

/// Record a dispatched RPC. `outcome` is "ok", "data", or an error tag.
pub fn record_rpc(outcome: &str, duration_secs: f64) {
    RPC_REQUESTS.with_label_values(&[outcome]).inc();
    RPC_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

/// Record a schema cache lookup ("hit" or "miss").
pub fn record_schema_lookup(result: &str) {
    SCHEMA_LOOKUPS.with_label_values(&[result]).inc();
}

/// Record a provider fetch outcome ("success", "error", "not_found").
pub fn record_schema_fetch(status: &str) {
    SCHEMA_FETCHES.with_label_values(&[status]).inc();
}

pub fn record_reconnect_attempt() {
    RECONNECT_ATTEMPTS.inc();
}

pub fn record_reconnect_exhausted() {
    RECONNECT_EXHAUSTED.inc();
}
