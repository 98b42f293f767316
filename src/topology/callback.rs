//! Extension points of the managers.
//!
//! A manager never embeds protocol-specific behavior. Everything a deployment
//! wants to customize goes through one callback per manager, built by a
//! factory exactly once when the manager is constructed:
//!
//! - [`TopologyCallback`]: the authoritative node set and topology-level hooks
//! - [`NodeCallback`]: device session establishment and node-level hooks
//!
//! [`ConnectorNodeCallback`] is the stock node callback for deployments that
//! only need to plug in a [`DeviceConnector`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::error::{TopologyError, TopologyResult};
use super::node::DeviceEvents;
use super::node_state::{NodeConfig, NodeStatus};
use super::role::Role;
use crate::rpc::RpcService;
use crate::schema::SourceIdentifier;
use crate::types::{NodeId, SessionId, TopologyId};

/// Negotiated parameters of a device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPreferences {
    pub session_id: SessionId,
    /// Schema sources the device advertises; resolved into the session's schema context.
    pub capabilities: Vec<SourceIdentifier>,
}

/// Tears down a device session.
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Close the session; returns once the device connection is released.
    async fn close(&self);
}

/// An established device session.
pub struct DeviceSession {
    pub preferences: SessionPreferences,
    pub rpc: Arc<dyn RpcService>,
    pub control: Arc<dyn SessionControl>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("preferences", &self.preferences)
            .finish_non_exhaustive()
    }
}

/// Pending session establishment.
///
/// Owned by the node manager and polled outside its mailbox path.
pub type ConnectFuture = Pin<Box<dyn Future<Output = TopologyResult<DeviceSession>> + Send>>;

/// Node-level strategy.
#[async_trait]
pub trait NodeCallback: Send + Sync {
    /// Status published when the node is first seen.
    fn initial_status(&self, _node_id: &NodeId, _config: &NodeConfig) -> NodeStatus {
        NodeStatus::connecting()
    }

    /// Status published when a node operation failed.
    fn failed_status(&self, _node_id: &NodeId, error: &TopologyError) -> NodeStatus {
        NodeStatus::unable_to_connect(error.to_string())
    }

    async fn on_node_created(&self, node_id: &NodeId, config: &NodeConfig) -> TopologyResult<NodeStatus> {
        Ok(self.initial_status(node_id, config))
    }

    async fn on_node_updated(&self, node_id: &NodeId, config: &NodeConfig) -> TopologyResult<NodeStatus> {
        Ok(self.initial_status(node_id, config))
    }

    async fn on_node_deleted(&self, _node_id: &NodeId) -> TopologyResult<()> {
        Ok(())
    }

    async fn on_role_changed(&self, _node_id: &NodeId, _role: Role) {}

    /// Start establishing a session with the device.
    ///
    /// `events` reports later disconnects and session updates back to the manager.
    fn connect(&self, node_id: &NodeId, config: &NodeConfig, events: DeviceEvents) -> ConnectFuture;

    fn on_device_connected(&self, _node_id: &NodeId, preferences: &SessionPreferences) -> NodeStatus {
        NodeStatus::connected(preferences.capabilities.clone())
    }

    fn on_device_disconnected(&self, _node_id: &NodeId) -> NodeStatus {
        NodeStatus::disconnected()
    }

    fn on_device_failed(&self, node_id: &NodeId, error: &TopologyError) -> NodeStatus {
        self.failed_status(node_id, error)
    }

    fn on_session_updated(&self, _node_id: &NodeId, preferences: &SessionPreferences) -> NodeStatus {
        NodeStatus::connected(preferences.capabilities.clone())
    }
}

/// Topology-level strategy.
#[async_trait]
pub trait TopologyCallback: Send + Sync {
    /// The nodes this topology should manage, read on every promotion.
    async fn initial_state(&self, topology_id: &TopologyId) -> TopologyResult<Vec<(NodeId, NodeConfig)>>;

    async fn on_role_changed(&self, _topology_id: &TopologyId, _role: Role) {}

    async fn on_node_created(&self, _node_id: &NodeId, _config: &NodeConfig) {}

    async fn on_node_updated(&self, _node_id: &NodeId, _config: &NodeConfig) {}

    async fn on_node_deleted(&self, _node_id: &NodeId) {}
}

/// Builds the callback of a topology manager.
pub type TopologyCallbackFactory =
    Arc<dyn Fn(&TopologyId) -> Arc<dyn TopologyCallback> + Send + Sync>;

/// Builds the callback of a node manager.
pub type NodeCallbackFactory =
    Arc<dyn Fn(&TopologyId, &NodeId) -> Arc<dyn NodeCallback> + Send + Sync>;

/// Opens device sessions.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(
        &self,
        node_id: &NodeId,
        config: &NodeConfig,
        events: DeviceEvents,
    ) -> TopologyResult<DeviceSession>;
}

/// Node callback that delegates session establishment to a [`DeviceConnector`]
/// and logs the remaining hooks.
pub struct ConnectorNodeCallback {
    topology_id: TopologyId,
    connector: Arc<dyn DeviceConnector>,
}

impl ConnectorNodeCallback {
    pub fn new(topology_id: TopologyId, connector: Arc<dyn DeviceConnector>) -> Self {
        Self {
            topology_id,
            connector,
        }
    }

    /// Factory producing one callback per node, all sharing `connector`.
    pub fn factory(connector: Arc<dyn DeviceConnector>) -> NodeCallbackFactory {
        Arc::new(move |topology_id: &TopologyId, _node_id: &NodeId| {
            Arc::new(ConnectorNodeCallback::new(
                topology_id.clone(),
                Arc::clone(&connector),
            )) as Arc<dyn NodeCallback>
        })
    }
}

#[async_trait]
impl NodeCallback for ConnectorNodeCallback {
    async fn on_role_changed(&self, node_id: &NodeId, role: Role) {
        info!(topology_id = %self.topology_id, node_id = %node_id, role = %role, "Node role changed");
    }

    fn connect(&self, node_id: &NodeId, config: &NodeConfig, events: DeviceEvents) -> ConnectFuture {
        let connector = Arc::clone(&self.connector);
        let node_id = node_id.clone();
        let config = config.clone();
        Box::pin(async move { connector.connect(&node_id, &config, events).await })
    }

    fn on_device_connected(&self, node_id: &NodeId, preferences: &SessionPreferences) -> NodeStatus {
        info!(
            topology_id = %self.topology_id,
            node_id = %node_id,
            session_id = %preferences.session_id,
            capabilities = preferences.capabilities.len(),
            "Device connected"
        );
        NodeStatus::connected(preferences.capabilities.clone())
    }

    fn on_device_disconnected(&self, node_id: &NodeId) -> NodeStatus {
        debug!(topology_id = %self.topology_id, node_id = %node_id, "Device disconnected");
        NodeStatus::disconnected()
    }

    fn on_device_failed(&self, node_id: &NodeId, error: &TopologyError) -> NodeStatus {
        warn!(topology_id = %self.topology_id, node_id = %node_id, error = %error, "Device connection failed");
        self.failed_status(node_id, error)
    }
}
