//! Node connection state machine.
//!
//! - Initializing: no session; followers always stay here
//! - Connecting: a session is being established (leader only)
//! - Active: a live session is held and RPCs are accepted
//! - Reconnecting: the session dropped; waiting for the next attempt
//! - Closed: the node was removed from its topology (terminal)
//!
//! # State Transitions
//!
//! ```text
//! Initializing -> Connecting -> Active <-> Reconnecting
//!       ^             |           |            |
//!       +-------------+-----------+------------+  (demotion, exhaustion)
//!
//! any -> Closed (node deleted)
//! ```
//!
//! Losing leadership returns the node to `Initializing`, never `Closed`: the
//! node persists, only this member's ownership of its session ends.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::callback::{SessionControl, SessionPreferences};
use super::role::Role;
use crate::rpc::RpcDispatcher;
use crate::schema::SourceIdentifier;
use crate::types::{NodeId, SessionId, TopologyId};

/// Configuration snapshot of a managed device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// Deployment-specific settings (credentials reference, keepalive, ...).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Device connection status as reported by the node callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    UnableToConnect,
    Disconnected,
}

/// Status published for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub connection: ConnectionStatus,
    #[serde(default)]
    pub capabilities: Vec<SourceIdentifier>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl NodeStatus {
    pub fn connecting() -> Self {
        Self {
            connection: ConnectionStatus::Connecting,
            capabilities: Vec::new(),
            detail: None,
        }
    }

    pub fn connected(capabilities: Vec<SourceIdentifier>) -> Self {
        Self {
            connection: ConnectionStatus::Connected,
            capabilities,
            detail: None,
        }
    }

    pub fn unable_to_connect(detail: impl Into<String>) -> Self {
        Self {
            connection: ConnectionStatus::UnableToConnect,
            capabilities: Vec::new(),
            detail: Some(detail.into()),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connection: ConnectionStatus::Disconnected,
            capabilities: Vec::new(),
            detail: None,
        }
    }
}

/// Name of a node state, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStateKind {
    Initializing,
    Connecting,
    Active,
    Reconnecting,
    Closed,
}

impl NodeStateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStateKind::Initializing => "initializing",
            NodeStateKind::Connecting => "connecting",
            NodeStateKind::Active => "active",
            NodeStateKind::Reconnecting => "reconnecting",
            NodeStateKind::Closed => "closed",
        }
    }
}

impl fmt::Display for NodeStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The live session of an active node.
#[derive(Clone)]
pub struct ActiveSession {
    pub preferences: SessionPreferences,
    pub dispatcher: Arc<RpcDispatcher>,
    pub control: Arc<dyn SessionControl>,
}

/// State of a node from this member's perspective.
pub enum NodeState {
    Initializing {
        since: Instant,
    },
    Connecting {
        started_at: Instant,
        /// 0 for the first connect after promotion, n for the n-th reconnect.
        attempt: usize,
    },
    Active {
        session: ActiveSession,
        connected_at: Instant,
    },
    Reconnecting {
        attempt: usize,
        since: Instant,
    },
    Closed {
        closed_at: Instant,
    },
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState::initializing()
    }
}

impl fmt::Debug for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Connecting { attempt, .. } | NodeState::Reconnecting { attempt, .. } => f
                .debug_struct(self.kind().as_str())
                .field("attempt", attempt)
                .field("duration", &self.duration_in_state())
                .finish(),
            NodeState::Active { session, .. } => f
                .debug_struct("active")
                .field("session_id", &session.preferences.session_id)
                .field("duration", &self.duration_in_state())
                .finish(),
            _ => f
                .debug_struct(self.kind().as_str())
                .field("duration", &self.duration_in_state())
                .finish(),
        }
    }
}

impl NodeState {
    pub fn initializing() -> Self {
        NodeState::Initializing {
            since: Instant::now(),
        }
    }

    pub fn connecting(attempt: usize) -> Self {
        NodeState::Connecting {
            started_at: Instant::now(),
            attempt,
        }
    }

    pub fn active(session: ActiveSession) -> Self {
        NodeState::Active {
            session,
            connected_at: Instant::now(),
        }
    }

    pub fn reconnecting(attempt: usize) -> Self {
        NodeState::Reconnecting {
            attempt,
            since: Instant::now(),
        }
    }

    pub fn closed() -> Self {
        NodeState::Closed {
            closed_at: Instant::now(),
        }
    }

    pub fn kind(&self) -> NodeStateKind {
        match self {
            NodeState::Initializing { .. } => NodeStateKind::Initializing,
            NodeState::Connecting { .. } => NodeStateKind::Connecting,
            NodeState::Active { .. } => NodeStateKind::Active,
            NodeState::Reconnecting { .. } => NodeStateKind::Reconnecting,
            NodeState::Closed { .. } => NodeStateKind::Closed,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, NodeState::Active { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, NodeState::Closed { .. })
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<&ActiveSession> {
        match self {
            NodeState::Active { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn duration_in_state(&self) -> Duration {
        let entered = match self {
            NodeState::Initializing { since } => since,
            NodeState::Connecting { started_at, .. } => started_at,
            NodeState::Active { connected_at, .. } => connected_at,
            NodeState::Reconnecting { since, .. } => since,
            NodeState::Closed { closed_at } => closed_at,
        };
        entered.elapsed()
    }
}

/// Snapshot of a node as seen by its manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub topology_id: TopologyId,
    pub node_id: NodeId,
    pub state: NodeStateKind,
    pub role: Role,
    /// Bumped on every role transition.
    pub generation: u64,
    pub config: Option<NodeConfig>,
    pub status: Option<NodeStatus>,
    pub session_id: Option<SessionId>,
    pub state_changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initializing_state() {
        let state = NodeState::initializing();
        assert_eq!(state.kind(), NodeStateKind::Initializing);
        assert!(!state.is_active());
        assert!(!state.is_closed());
        assert!(state.session().is_none());
    }

    #[test]
    fn test_reconnecting_state_debug_shows_attempt() {
        let state = NodeState::reconnecting(3);
        assert_eq!(state.kind(), NodeStateKind::Reconnecting);
        let debug = format!("{state:?}");
        assert!(debug.contains("reconnecting"));
        assert!(debug.contains("attempt: 3"));
    }

    #[test]
    fn test_closed_state() {
        let state = NodeState::closed();
        assert!(state.is_closed());
        assert_eq!(state.kind().to_string(), "closed");
    }

    #[test]
    fn test_status_constructors() {
        let caps = vec![SourceIdentifier::new("ietf-interfaces", Some("2018-02-20"))];
        let status = NodeStatus::connected(caps.clone());
        assert_eq!(status.connection, ConnectionStatus::Connected);
        assert_eq!(status.capabilities, caps);
        assert_eq!(
            NodeStatus::unable_to_connect("refused").detail.as_deref(),
            Some("refused")
        );
    }

    #[test]
    fn test_node_config_serde() {
        let config = NodeConfig::new("10.0.0.1", 830).with_property("keepalive", "120");
        let json = serde_json::to_string(&config).unwrap();
        let back: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        let minimal: NodeConfig = serde_json::from_str(r#"{"host":"h","port":22}"#).unwrap();
        assert!(minimal.properties.is_empty());
    }
}
