//! Tests for the metrics module.
//!
//! Metrics are process-global and tests run in parallel, so assertions compare
//! against a reading taken before the operation instead of exact values.

mod common;

use std::sync::Arc;

use common::{CountingSchemaProvider, MODULE_JSON, ScriptedRpcService, request, rpc_test_id};
use topokeeper::rpc::{RpcDispatcher, RpcService};
use topokeeper::schema::{SchemaRepository, SchemaSourceProvider};
use topokeeper::topology::metrics;
use topokeeper::types::SessionId;

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_init_metrics_registers_all_families() {
    metrics::init_metrics();
    metrics::record_reconnect_attempt();
    metrics::record_reconnect_exhausted();

    let names: Vec<String> = metrics::gather_metrics()
        .iter()
        .map(|family| family.get_name().to_string())
        .collect();
    for expected in [
        "topokeeper_managed_nodes",
        "topokeeper_reconnect_attempts_total",
        "topokeeper_reconnect_exhausted_total",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }
}

#[test]
fn test_encode_metrics_is_text_exposition() {
    metrics::record_node_lifecycle("create");
    let text = metrics::encode_metrics().unwrap();
    assert!(text.contains("# TYPE topokeeper_node_lifecycle_total counter"));
    assert!(text.contains("operation=\"create\""));
}

#[test]
fn test_node_state_gauge_moves_between_labels() {
    let connecting = metrics::NODE_STATES.with_label_values(&["metrics-test-from"]);
    let active = metrics::NODE_STATES.with_label_values(&["metrics-test-to"]);

    metrics::record_node_state_change(None, Some("metrics-test-from"));
    assert_eq!(connecting.get(), 1);

    metrics::record_node_state_change(Some("metrics-test-from"), Some("metrics-test-to"));
    assert_eq!(connecting.get(), 0);
    assert_eq!(active.get(), 1);

    metrics::record_node_state_change(Some("metrics-test-to"), None);
    assert_eq!(active.get(), 0);
}

// ============================================================================
// Recorded by operations
// ============================================================================

#[tokio::test]
async fn test_schema_resolution_records_lookups() {
    let hits = metrics::SCHEMA_LOOKUPS.with_label_values(&["hit"]);
    let misses = metrics::SCHEMA_LOOKUPS.with_label_values(&["miss"]);
    let (hits_before, misses_before) = (hits.get(), misses.get());

    let provider = Arc::new(CountingSchemaProvider::new().with_source(rpc_test_id(), MODULE_JSON));
    let repository = SchemaRepository::new("metrics", provider as Arc<dyn SchemaSourceProvider>);
    repository.resolve(&rpc_test_id()).await.unwrap();
    repository.resolve(&rpc_test_id()).await.unwrap();

    assert!(misses.get() > misses_before);
    assert!(hits.get() > hits_before);
}

#[tokio::test]
async fn test_dispatch_records_outcome() {
    let ok = metrics::RPC_REQUESTS.with_label_values(&["ok"]);
    let bad_element = metrics::RPC_REQUESTS.with_label_values(&["bad-element"]);
    let (ok_before, bad_before) = (ok.get(), bad_element.get());

    let dispatcher = RpcDispatcher::new(
        SessionId::new("metrics-session"),
        common::test_context(),
        Arc::new(ScriptedRpcService::returning(None)) as Arc<dyn RpcService>,
    );
    dispatcher
        .dispatch(&request("1", "void-output", vec![]))
        .await
        .unwrap();
    let _ = dispatcher.dispatch(&request("2", "reboot", vec![])).await;

    assert!(ok.get() > ok_before);
    assert!(bad_element.get() > bad_before);
    assert!(
        metrics::RPC_DURATION
            .with_label_values(&["ok"])
            .get_sample_count()
            > 0
    );
}
