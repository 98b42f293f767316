//! Role coordination contract.
//!
//! Leadership election is an external facility. The managers only consume its
//! signal: each registers a [`RoleChangeListener`] for its scope at construction
//! and deregisters at teardown.
//!
//! # Delivery guarantees expected from a coordinator
//!
//! - Transitions for one scope are delivered in the order they were decided and
//!   are never coalesced.
//! - `role_changed` returns only after the listener has applied the transition.
//!   On demotion that means the previous owner has torn down its session, so a
//!   coordinator that awaits the old leader before promoting the new one never
//!   has two active owners for a scope.
//!
//! # Available Implementations
//!
//! - [`LocalRoleCoordinator`](super::LocalRoleCoordinator): in-process elections,
//!   single-member or simulated multi-member

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{NodeId, TopologyId};

/// A member's standing for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Registered, no election outcome seen yet.
    #[default]
    Candidate,
    Follower,
    Leader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Candidate => "candidate",
            Role::Follower => "follower",
            Role::Leader => "leader",
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a role applies to.
///
/// Topology-level and node-level roles are independent: one member may lead a
/// topology while another owns a node's live session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScopeKey {
    Topology(TopologyId),
    Node(TopologyId, NodeId),
}

impl ScopeKey {
    pub fn topology(topology_id: &TopologyId) -> Self {
        ScopeKey::Topology(topology_id.clone())
    }

    pub fn node(topology_id: &TopologyId, node_id: &NodeId) -> Self {
        ScopeKey::Node(topology_id.clone(), node_id.clone())
    }

    pub fn topology_id(&self) -> &TopologyId {
        match self {
            ScopeKey::Topology(topology_id) | ScopeKey::Node(topology_id, _) => topology_id,
        }
    }

    /// Metric label for the scope kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ScopeKey::Topology(_) => "topology",
            ScopeKey::Node(..) => "node",
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Topology(topology_id) => write!(f, "{topology_id}"),
            ScopeKey::Node(topology_id, node_id) => write!(f, "{topology_id}/{node_id}"),
        }
    }
}

/// Receives role transitions for a scope.
#[async_trait]
pub trait RoleChangeListener: Send + Sync {
    /// Apply the transition; return once it is in effect.
    async fn role_changed(&self, scope: &ScopeKey, role: Role);
}

/// Handle returned by [`RoleCoordinator::register`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerRegistration {
    pub scope: ScopeKey,
    pub id: u64,
}

/// Source of role-change notifications.
#[async_trait]
pub trait RoleCoordinator: Send + Sync {
    /// Register `listener` for `scope`.
    ///
    /// If this member already holds a decided role for the scope, the listener
    /// receives it once before `register` returns.
    async fn register(
        &self,
        scope: ScopeKey,
        listener: Arc<dyn RoleChangeListener>,
    ) -> ListenerRegistration;

    /// Stop delivering to a listener. A leader that deregisters gives up the scope.
    async fn deregister(&self, registration: &ListenerRegistration);

    /// This member's current role for the scope.
    fn current_role(&self, scope: &ScopeKey) -> Role;
}
