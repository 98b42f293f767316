//! Topology callback backed by an in-memory configuration store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::callback::{TopologyCallback, TopologyCallbackFactory};
use super::error::TopologyResult;
use super::node_state::NodeConfig;
use super::role::Role;
use crate::types::{NodeId, TopologyId};

/// Configured nodes per topology.
///
/// Stands in for the persisted configuration a topology leader reads its
/// initial state from. Cheap to clone; clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct NodeConfigStore {
    nodes: Arc<DashMap<(TopologyId, NodeId), NodeConfig>>,
}

impl NodeConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, topology_id: &TopologyId, node_id: &NodeId, config: NodeConfig) {
        self.nodes
            .insert((topology_id.clone(), node_id.clone()), config);
    }

    pub fn remove(&self, topology_id: &TopologyId, node_id: &NodeId) -> Option<NodeConfig> {
        self.nodes
            .remove(&(topology_id.clone(), node_id.clone()))
            .map(|(_, config)| config)
    }

    pub fn get(&self, topology_id: &TopologyId, node_id: &NodeId) -> Option<NodeConfig> {
        self.nodes
            .get(&(topology_id.clone(), node_id.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Nodes of one topology, ordered by id.
    pub fn snapshot(&self, topology_id: &TopologyId) -> Vec<(NodeId, NodeConfig)> {
        let mut nodes: Vec<(NodeId, NodeConfig)> = self
            .nodes
            .iter()
            .filter(|entry| &entry.key().0 == topology_id)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        nodes
    }
}

/// Reads the initial state from a [`NodeConfigStore`].
#[derive(Debug, Clone)]
pub struct StaticTopologyCallback {
    store: NodeConfigStore,
}

impl StaticTopologyCallback {
    pub fn new(store: NodeConfigStore) -> Self {
        Self { store }
    }

    pub fn factory(store: NodeConfigStore) -> TopologyCallbackFactory {
        Arc::new(move |_topology_id: &TopologyId| {
            Arc::new(StaticTopologyCallback::new(store.clone())) as Arc<dyn TopologyCallback>
        })
    }
}

#[async_trait]
impl TopologyCallback for StaticTopologyCallback {
    async fn initial_state(&self, topology_id: &TopologyId) -> TopologyResult<Vec<(NodeId, NodeConfig)>> {
        let nodes = self.store.snapshot(topology_id);
        debug!(topology_id = %topology_id, nodes = nodes.len(), "Read initial state");
        Ok(nodes)
    }

    async fn on_role_changed(&self, topology_id: &TopologyId, role: Role) {
        debug!(topology_id = %topology_id, role = %role, "Topology role changed");
    }
}
