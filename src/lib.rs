//! # Topokeeper
//! Leader-aware lifecycle management for topologies of managed network devices.
//!
//! A topology is a named set of devices (nodes). Every node has a management
//! session that exactly one cluster member owns at a time. This crate provides
//! the coordination engine around those sessions:
//!
//! - a [`TopologyManager`](topology::TopologyManager) per topology that keeps
//!   the node set in line with its authoritative source while it leads
//! - a [`NodeManager`](topology::NodeManager) per node that opens, tears down
//!   and re-establishes the device session as its node-level role changes
//! - an [`RpcDispatcher`](rpc::RpcDispatcher) that resolves RPCs against the
//!   session's schema context and renders deterministic replies
//! - a shared [`SchemaRepository`](schema::SchemaRepository) with single-flight fetches
//!
//! Leadership itself comes from a [`RoleCoordinator`](topology::RoleCoordinator);
//! [`LocalRoleCoordinator`](topology::LocalRoleCoordinator) covers single-process
//! deployments and simulated clusters.
//!
//! Deployment-specific behavior plugs in through
//! [`TopologyCallback`](topology::TopologyCallback) and
//! [`NodeCallback`](topology::NodeCallback), each built once per manager by a
//! factory.
//!
//! ## Getting started
//! ```toml
//! topokeeper = "0.1"
//! ```
//!
//! See the [`topology`] module for a complete setup.

#![forbid(unsafe_code)]

pub mod constants;
pub mod error;
pub mod rpc;
pub mod schema;
pub mod telemetry;
pub mod topology;
pub mod types;

pub mod prelude {
    //! Common imports for embedding the engine.
    pub use crate::error::{ErrorSeverity, ErrorTag, ErrorType, RpcError};
    pub use crate::rpc::{
        DataNode, HandlingPriority, RpcDispatcher, RpcReply, RpcRequest, RpcService,
        RpcServiceError, WireElement,
    };
    pub use crate::schema::{
        SchemaContext, SchemaError, SchemaRepository, SchemaSource, SchemaSourceProvider,
        SourceIdentifier,
    };
    pub use crate::topology::{
        DeviceConnector, DeviceEvents, DeviceSession, LocalRoleCoordinator, NodeCallback,
        NodeConfig, NodeHandle, Role, RoleCoordinator, ScopeKey, SessionControl,
        SessionPreferences, TopologyCallback, TopologyConfig, TopologyError, TopologyHandle,
        TopologyManager, TopologyResult, TopologyServices,
    };
    pub use crate::types::{MemberId, NodeId, QName, SessionId, TopologyId};

    pub use bytes;
}
