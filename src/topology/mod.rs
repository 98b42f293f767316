//! Topology and node lifecycle coordination.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────────┐
//!              │ Role Coordinator │  topology scope + one scope per node
//!              └───┬──────────┬───┘
//!                  │          │ role changes
//!                  ▼          ▼
//!        ┌──────────────┐   ┌──────────────┐
//!        │  Topology    │──▶│ Node Manager │ ─ ─ ▶ device session
//!        │  Manager     │   │  (per node)  │
//!        └──────┬───────┘   └──────┬───────┘
//!               │ initial state    │ RPC
//!               ▼                  ▼
//!        TopologyCallback    RpcDispatcher ──▶ SchemaRepository
//! ```
//!
//! Both managers are tasks with an ordered mailbox. Cross-manager interaction
//! is message passing; the schema repository is the only shared state.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use topokeeper::schema::{SchemaRepository, SchemaSourceProvider};
//! use topokeeper::topology::{
//!     ConnectorNodeCallback, DeviceConnector, LocalRoleCoordinator, NodeConfigStore,
//!     StaticTopologyCallback, TopologyConfig, TopologyManager, TopologyServices,
//! };
//! use topokeeper::types::{MemberId, TopologyId};
//!
//! async fn run(
//!     connector: Arc<dyn DeviceConnector>,
//!     provider: Arc<dyn SchemaSourceProvider>,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TopologyConfig::from_env()?;
//!     let store = NodeConfigStore::new();
//!     let services = TopologyServices {
//!         coordinator: Arc::new(LocalRoleCoordinator::single_node(MemberId::new("member-1"))),
//!         repository: Arc::new(SchemaRepository::new("shared", provider)),
//!         topology_callbacks: StaticTopologyCallback::factory(store),
//!         node_callbacks: ConnectorNodeCallback::factory(connector),
//!     };
//!     let topology = TopologyManager::spawn(TopologyId::new("topology-netconf"), config, services).await;
//!     topology.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod callback;
mod config;
mod error;
mod events;
mod local_coordinator;
mod manager;
pub mod metrics;
mod node;
mod node_state;
pub mod retry;
mod role;
mod static_callback;

pub use callback::{
    ConnectFuture, ConnectorNodeCallback, DeviceConnector, DeviceSession, NodeCallback,
    NodeCallbackFactory, SessionControl, SessionPreferences, TopologyCallback,
    TopologyCallbackFactory,
};
pub use config::{ReconnectConfig, TopologyConfig, TopologyProfile};
pub use error::{TopologyError, TopologyResult};
pub use events::{EventPublisher, LifecycleEvent};
pub use local_coordinator::{ElectionState, LocalRoleCoordinator};
pub use manager::{TopologyHandle, TopologyManager, TopologyServices};
pub use node::{DeviceEvent, DeviceEvents, NodeContext, NodeHandle, NodeManager};
pub use node_state::{
    ActiveSession, ConnectionStatus, NodeConfig, NodeRecord, NodeState, NodeStateKind, NodeStatus,
};
pub use role::{ListenerRegistration, Role, RoleChangeListener, RoleCoordinator, ScopeKey};
pub use static_callback::{NodeConfigStore, StaticTopologyCallback};
