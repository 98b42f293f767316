//! Integration tests for TopologyManager.
//!
//! Reconciliation on promotion, leader-only administration, and node routing.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use common::{
    MockConnector, ScriptedRpcService, SessionLedger, request, test_config, test_repository,
    wait_for_state,
};
use topokeeper::error::ErrorTag;
use topokeeper::rpc::{RpcReply, RpcService};
use topokeeper::topology::{
    ConnectorNodeCallback, DeviceConnector, ElectionState, LifecycleEvent, LocalRoleCoordinator,
    NodeConfig, NodeConfigStore, NodeStateKind, Role, RoleCoordinator, ScopeKey,
    StaticTopologyCallback, TopologyCallback, TopologyCallbackFactory, TopologyError,
    TopologyHandle, TopologyManager, TopologyResult, TopologyServices,
};
use topokeeper::types::{MemberId, NodeId, TopologyId};

fn topology_id() -> TopologyId {
    TopologyId::new("topology-netconf")
}

fn node(id: &str) -> NodeId {
    NodeId::new(id)
}

fn config(host: &str) -> NodeConfig {
    NodeConfig::new(host, 830)
}

struct Fixture {
    store: NodeConfigStore,
    ledger: Arc<SessionLedger>,
    connector: Arc<MockConnector>,
}

impl Fixture {
    fn new() -> Self {
        let ledger = SessionLedger::new();
        let backend = Arc::new(ScriptedRpcService::returning(None)) as Arc<dyn RpcService>;
        Self {
            store: NodeConfigStore::new(),
            connector: Arc::new(MockConnector::new(Arc::clone(&ledger), backend)),
            ledger,
        }
    }

    fn services(
        &self,
        coordinator: Arc<dyn RoleCoordinator>,
        topology_callbacks: TopologyCallbackFactory,
    ) -> TopologyServices {
        let (repository, _provider) = test_repository();
        TopologyServices {
            coordinator,
            repository,
            topology_callbacks,
            node_callbacks: ConnectorNodeCallback::factory(
                Arc::clone(&self.connector) as Arc<dyn DeviceConnector>
            ),
        }
    }

    async fn spawn_single_node(&self) -> TopologyHandle {
        let coordinator = Arc::new(LocalRoleCoordinator::single_node(MemberId::new("member-1")));
        let services = self.services(coordinator, StaticTopologyCallback::factory(self.store.clone()));
        TopologyManager::spawn(topology_id(), test_config(), services).await
    }

    async fn spawn_member(&self, state: &Arc<ElectionState>) -> (TopologyHandle, LocalRoleCoordinator) {
        let coordinator = LocalRoleCoordinator::new(MemberId::new("member-1"), Arc::clone(state));
        let services = self.services(
            Arc::new(coordinator.clone()),
            StaticTopologyCallback::factory(self.store.clone()),
        );
        (
            TopologyManager::spawn(topology_id(), test_config(), services).await,
            coordinator,
        )
    }
}

async fn wait_for_nodes(topology: &TopologyHandle, expected: &[&str]) {
    let expected: Vec<NodeId> = expected.iter().map(|id| node(id)).collect();
    tokio::time::timeout(Duration::from_secs(5), async {
        while topology.node_ids().await.unwrap() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("node set did not converge");
}

async fn next_reconciliation(rx: &mut broadcast::Receiver<LifecycleEvent>) -> (usize, usize, usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let LifecycleEvent::ReconciliationCompleted {
                created,
                removed,
                updated,
                ..
            } = rx.recv().await.unwrap()
            {
                return (created, removed, updated);
            }
        }
    })
    .await
    .expect("reconciliation did not complete")
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_promotion_creates_nodes_from_initial_state() {
    let fixture = Fixture::new();
    fixture.store.put(&topology_id(), &node("a"), config("10.0.0.1"));
    fixture.store.put(&topology_id(), &node("b"), config("10.0.0.2"));

    let topology = fixture.spawn_single_node().await;
    wait_for_nodes(&topology, &["a", "b"]).await;
    assert_eq!(topology.role().await.unwrap(), Role::Leader);

    // Single-node deployments also lead every node scope.
    let a = topology.get_node(&node("a")).await.unwrap();
    wait_for_state(&a, NodeStateKind::Active).await;
    assert_eq!(fixture.ledger.active(&node("a")), 1);

    topology.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_repromotion_reconciles_against_snapshot() {
    let fixture = Fixture::new();
    let state = ElectionState::new();
    let scope = ScopeKey::topology(&topology_id());
    fixture.store.put(&topology_id(), &node("a"), config("10.0.0.1"));
    fixture.store.put(&topology_id(), &node("b"), config("10.0.0.2"));

    let (topology, coordinator) = fixture.spawn_member(&state).await;
    let mut events = topology.subscribe();
    assert!(topology.node_ids().await.unwrap().is_empty());

    coordinator.acquire(&scope).await;
    assert_eq!(next_reconciliation(&mut events).await, (2, 0, 0));
    assert_eq!(topology.node_ids().await.unwrap(), vec![node("a"), node("b")]);

    let a_before = topology.get_node(&node("a")).await.unwrap();
    let b_before = topology.get_node(&node("b")).await.unwrap().record().await.unwrap();

    state.step_down(&scope).await;
    assert_eq!(topology.role().await.unwrap(), Role::Follower);
    fixture.store.remove(&topology_id(), &node("a"));
    fixture.store.put(&topology_id(), &node("c"), config("10.0.0.3"));

    coordinator.acquire(&scope).await;
    assert_eq!(next_reconciliation(&mut events).await, (1, 1, 0));
    assert_eq!(topology.node_ids().await.unwrap(), vec![node("b"), node("c")]);

    let b_after = topology.get_node(&node("b")).await.unwrap().record().await.unwrap();
    assert_eq!(b_after, b_before);
    assert!(a_before.is_closed() || a_before.record().await.is_err());

    topology.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_changed_config_is_applied_on_reconciliation() {
    let fixture = Fixture::new();
    let state = ElectionState::new();
    let scope = ScopeKey::topology(&topology_id());
    fixture.store.put(&topology_id(), &node("a"), config("10.0.0.1"));

    let (topology, coordinator) = fixture.spawn_member(&state).await;
    let mut events = topology.subscribe();
    coordinator.acquire(&scope).await;
    next_reconciliation(&mut events).await;

    state.step_down(&scope).await;
    fixture.store.put(&topology_id(), &node("a"), config("10.9.9.9"));
    coordinator.acquire(&scope).await;
    assert_eq!(next_reconciliation(&mut events).await, (0, 0, 1));

    let record = topology.get_node(&node("a")).await.unwrap().record().await.unwrap();
    assert_eq!(record.config, Some(config("10.9.9.9")));

    topology.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_demotion_keeps_node_managers() {
    let fixture = Fixture::new();
    let state = ElectionState::new();
    let scope = ScopeKey::topology(&topology_id());
    fixture.store.put(&topology_id(), &node("a"), config("10.0.0.1"));

    let (topology, coordinator) = fixture.spawn_member(&state).await;
    let mut events = topology.subscribe();
    coordinator.acquire(&scope).await;
    next_reconciliation(&mut events).await;

    state.step_down(&scope).await;
    assert_eq!(topology.role().await.unwrap(), Role::Follower);
    assert_eq!(topology.node_ids().await.unwrap(), vec![node("a")]);
    assert!(!topology.get_node(&node("a")).await.unwrap().is_closed());

    topology.shutdown().await.unwrap();
}

struct FlakyCallback {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TopologyCallback for FlakyCallback {
    async fn initial_state(&self, _topology_id: &TopologyId) -> TopologyResult<Vec<(NodeId, NodeConfig)>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(TopologyError::Unavailable("datastore warming up".to_string()));
        }
        Ok(vec![(node("a"), config("10.0.0.1"))])
    }
}

#[tokio::test]
async fn test_initial_state_is_retried() {
    let fixture = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let factory: TopologyCallbackFactory = {
        let calls = Arc::clone(&calls);
        Arc::new(move |_topology_id: &TopologyId| {
            Arc::new(FlakyCallback {
                calls: Arc::clone(&calls),
            }) as Arc<dyn TopologyCallback>
        })
    };
    let coordinator = Arc::new(LocalRoleCoordinator::single_node(MemberId::new("member-1")));
    let topology =
        TopologyManager::spawn(topology_id(), test_config(), fixture.services(coordinator, factory)).await;

    wait_for_nodes(&topology, &["a"]).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    topology.shutdown().await.unwrap();
}

// ============================================================================
// Administration
// ============================================================================

#[tokio::test]
async fn test_non_leader_rejects_admin_changes() {
    let fixture = Fixture::new();
    let state = ElectionState::new();
    let (topology, _coordinator) = fixture.spawn_member(&state).await;
    assert_eq!(topology.role().await.unwrap(), Role::Candidate);

    let err = topology
        .on_node_created(node("a"), config("10.0.0.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::NotLeader { .. }));
    assert!(err.is_redirect());
    assert_eq!(err.to_rpc_error().tag, ErrorTag::ResourceDenied);

    assert!(matches!(
        topology.on_node_deleted(node("a")).await,
        Err(TopologyError::NotLeader { .. })
    ));
    assert!(topology.node_ids().await.unwrap().is_empty());

    topology.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_leader_adds_routes_and_removes_nodes() {
    let fixture = Fixture::new();
    let topology = fixture.spawn_single_node().await;
    let mut events = topology.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while topology.role().await.unwrap() != Role::Leader {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    topology
        .on_node_created(node("edge-1"), config("192.0.2.1"))
        .await
        .unwrap();
    let handle = topology.get_node(&node("edge-1")).await.unwrap();
    wait_for_state(&handle, NodeStateKind::Active).await;

    let reply = topology
        .handle(&node("edge-1"), request("1", "void-output", vec![]))
        .await
        .unwrap();
    assert_eq!(reply, RpcReply::Ok);

    topology.on_node_deleted(node("edge-1")).await.unwrap();
    assert_eq!(fixture.ledger.active(&node("edge-1")), 0);

    let err = topology.get_node(&node("edge-1")).await.unwrap_err();
    assert!(matches!(err, TopologyError::UnknownNode { .. }));
    let fault = err.to_rpc_error();
    assert_eq!(fault.tag, ErrorTag::DataMissing);
    assert_eq!(fault.info.get("node-id").map(String::as_str), Some("edge-1"));

    let mut added = false;
    let mut removed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            LifecycleEvent::NodeAdded { node_id, .. } if node_id == node("edge-1") => added = true,
            LifecycleEvent::NodeRemoved { node_id, .. } if node_id == node("edge-1") => removed = true,
            _ => {}
        }
    }
    assert!(added && removed);

    topology.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_update_of_unknown_node_fails() {
    let fixture = Fixture::new();
    let topology = fixture.spawn_single_node().await;
    wait_for_nodes(&topology, &[]).await;

    let err = topology
        .on_node_updated(node("ghost"), config("10.0.0.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::UnknownNode { .. }));

    topology.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_releases_sessions() {
    let fixture = Fixture::new();
    fixture.store.put(&topology_id(), &node("a"), config("10.0.0.1"));
    let topology = fixture.spawn_single_node().await;
    wait_for_nodes(&topology, &["a"]).await;
    let a = topology.get_node(&node("a")).await.unwrap();
    wait_for_state(&a, NodeStateKind::Active).await;

    topology.shutdown().await.unwrap();
    assert_eq!(fixture.ledger.active(&node("a")), 0);
    assert!(matches!(
        topology.node_ids().await,
        Err(TopologyError::MailboxClosed(_))
    ));
    topology.shutdown().await.unwrap();
}
