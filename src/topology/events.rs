//! Lifecycle events published by topology and node managers.
//!
//! Each topology manager owns a broadcast channel; the node managers it creates
//! publish into the same channel. Publishing never blocks: a subscriber that
//! falls behind sees `RecvError::Lagged` and skips ahead.

use serde::Serialize;
use tokio::sync::broadcast;

use super::node_state::NodeStateKind;
use super::role::{Role, ScopeKey};
use crate::types::{NodeId, TopologyId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    NodeAdded {
        topology_id: TopologyId,
        node_id: NodeId,
    },
    NodeRemoved {
        topology_id: TopologyId,
        node_id: NodeId,
    },
    NodeStateChanged {
        topology_id: TopologyId,
        node_id: NodeId,
        from: NodeStateKind,
        to: NodeStateKind,
    },
    RoleChanged {
        scope: ScopeKey,
        role: Role,
    },
    /// A node manager gave up reconnecting and returned to `Initializing`.
    ReconnectExhausted {
        topology_id: TopologyId,
        node_id: NodeId,
        attempts: usize,
    },
    ReconciliationCompleted {
        topology_id: TopologyId,
        created: usize,
        removed: usize,
        updated: usize,
    },
}

/// Sending half shared by a topology manager and its node managers.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to current subscribers; dropped when there are none.
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}
