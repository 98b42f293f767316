//! Topology manager: owns the node managers of one topology.
//!
//! Like [`NodeManager`](super::node::NodeManager) it is a single task draining
//! an ordered mailbox. On promotion to leader it reads the authoritative node
//! set from its [`TopologyCallback`] and reconciles the node map against it;
//! while not leader it refuses administrative changes with
//! [`TopologyError::NotLeader`]. Demotion leaves node managers running: each
//! follows its own node-scope role.
//!
//! The topology-scope listener registration is made and dropped by the
//! [`TopologyHandle`], outside the actor, so the coordinator's scope lock is
//! never awaited from inside the mailbox loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::callback::{NodeCallbackFactory, TopologyCallback, TopologyCallbackFactory};
use super::config::TopologyConfig;
use super::error::{TopologyError, TopologyResult};
use super::events::{EventPublisher, LifecycleEvent};
use super::node::{NodeContext, NodeHandle, NodeManager};
use super::node_state::NodeConfig;
use super::role::{ListenerRegistration, Role, RoleChangeListener, RoleCoordinator, ScopeKey};
use super::{metrics, retry};
use crate::constants::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::rpc::{RpcReply, RpcRequest};
use crate::schema::SchemaRepository;
use crate::types::{NodeId, TopologyId};

/// Collaborators a topology manager is built from.
#[derive(Clone)]
pub struct TopologyServices {
    pub coordinator: Arc<dyn RoleCoordinator>,
    pub repository: Arc<SchemaRepository>,
    pub topology_callbacks: TopologyCallbackFactory,
    pub node_callbacks: NodeCallbackFactory,
}

enum TopologyMessage {
    RoleChanged {
        role: Role,
        ack: oneshot::Sender<()>,
    },
    NodeCreated {
        node_id: NodeId,
        config: NodeConfig,
        reply: oneshot::Sender<TopologyResult<()>>,
    },
    NodeUpdated {
        node_id: NodeId,
        config: NodeConfig,
        reply: oneshot::Sender<TopologyResult<()>>,
    },
    NodeDeleted {
        node_id: NodeId,
        reply: oneshot::Sender<TopologyResult<()>>,
    },
    GetNode {
        node_id: NodeId,
        reply: oneshot::Sender<TopologyResult<NodeHandle>>,
    },
    NodeIds {
        reply: oneshot::Sender<Vec<NodeId>>,
    },
    Role {
        reply: oneshot::Sender<Role>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct ManagedNode {
    handle: NodeHandle,
    config: NodeConfig,
    registration: ListenerRegistration,
}

#[derive(Debug, Default)]
struct Reconciliation {
    created: usize,
    removed: usize,
    updated: usize,
}

/// The topology manager actor.
pub struct TopologyManager {
    topology_id: TopologyId,
    config: Arc<TopologyConfig>,
    coordinator: Arc<dyn RoleCoordinator>,
    callback: Arc<dyn TopologyCallback>,
    node_callbacks: NodeCallbackFactory,
    node_context: NodeContext,
    events: EventPublisher,
    mailbox: mpsc::Receiver<TopologyMessage>,
    role: Role,
    nodes: BTreeMap<NodeId, ManagedNode>,
}

impl TopologyManager {
    /// Start the manager and register it with the coordinator for the topology scope.
    ///
    /// The topology callback is built here, once. If this member already leads
    /// the topology, reconciliation starts before `spawn` returns.
    pub async fn spawn(
        topology_id: TopologyId,
        config: TopologyConfig,
        services: TopologyServices,
    ) -> TopologyHandle {
        let config = Arc::new(config);
        let events = EventPublisher::new(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let (tx, mailbox) = mpsc::channel(config.mailbox_capacity);
        let callback = (services.topology_callbacks)(&topology_id);

        let manager = TopologyManager {
            topology_id: topology_id.clone(),
            config: Arc::clone(&config),
            coordinator: Arc::clone(&services.coordinator),
            callback,
            node_callbacks: services.node_callbacks,
            node_context: NodeContext {
                topology_id: topology_id.clone(),
                config: Arc::clone(&config),
                repository: services.repository,
                events: events.clone(),
            },
            events: events.clone(),
            mailbox,
            role: Role::Candidate,
            nodes: BTreeMap::new(),
        };
        tokio::spawn(manager.run());

        let listener = Arc::new(TopologyRoleListener { tx: tx.downgrade() });
        let registration = services
            .coordinator
            .register(ScopeKey::topology(&topology_id), listener)
            .await;
        info!(topology_id = %topology_id, member = %config.member_id, "Topology manager started");

        TopologyHandle {
            topology_id,
            tx,
            events,
            coordinator: services.coordinator,
            registration,
        }
    }

    async fn run(mut self) {
        let mut shutdown_reply = None;
        while let Some(message) = self.mailbox.recv().await {
            match message {
                TopologyMessage::RoleChanged { role, ack } => {
                    let promoted = self.on_role_change(role).await;
                    let _ = ack.send(());
                    if promoted {
                        self.reconcile().await;
                    }
                }
                TopologyMessage::NodeCreated {
                    node_id,
                    config,
                    reply,
                } => {
                    let result = match self.require_leader() {
                        Ok(()) if self.nodes.contains_key(&node_id) => {
                            self.update_node(&node_id, config).await
                        }
                        Ok(()) => self.add_node(node_id, config).await,
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                }
                TopologyMessage::NodeUpdated {
                    node_id,
                    config,
                    reply,
                } => {
                    let result = match self.require_leader() {
                        Ok(()) => self.update_node(&node_id, config).await,
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                }
                TopologyMessage::NodeDeleted { node_id, reply } => {
                    let result = match self.require_leader() {
                        Ok(()) => self.remove_node(&node_id).await,
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                }
                TopologyMessage::GetNode { node_id, reply } => {
                    let _ = reply.send(self.node(&node_id));
                }
                TopologyMessage::NodeIds { reply } => {
                    let _ = reply.send(self.nodes.keys().cloned().collect());
                }
                TopologyMessage::Role { reply } => {
                    let _ = reply.send(self.role);
                }
                TopologyMessage::Shutdown { reply } => {
                    shutdown_reply = Some(reply);
                    break;
                }
            }
        }

        // Close sessions before releasing node leadership.
        for (node_id, node) in std::mem::take(&mut self.nodes) {
            if let Err(e) = node.handle.shutdown().await {
                debug!(topology_id = %self.topology_id, node_id = %node_id, error = %e, "Node manager already gone");
            }
            self.coordinator.deregister(&node.registration).await;
        }
        info!(topology_id = %self.topology_id, "Topology manager stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    /// Returns true on promotion to leader.
    async fn on_role_change(&mut self, role: Role) -> bool {
        if role == self.role {
            debug!(topology_id = %self.topology_id, role = %role, "Role unchanged");
            return false;
        }

        let previous = std::mem::replace(&mut self.role, role);
        metrics::record_role_transition("topology", role.as_str());
        info!(topology_id = %self.topology_id, from = %previous, to = %role, "Topology role changed");
        self.callback.on_role_changed(&self.topology_id, role).await;
        self.events.publish(LifecycleEvent::RoleChanged {
            scope: ScopeKey::topology(&self.topology_id),
            role,
        });
        role.is_leader()
    }

    /// Bring the node map in line with the callback's initial state.
    async fn reconcile(&mut self) {
        let callback = &self.callback;
        let topology_id = &self.topology_id;
        let snapshot = retry::with_initial_state_policy(
            || callback.initial_state(topology_id),
            self.config.initial_state_retries,
        )
        .await;

        let desired: BTreeMap<NodeId, NodeConfig> = match snapshot {
            Ok(nodes) => nodes.into_iter().collect(),
            Err(e) => {
                metrics::record_reconciliation("failed");
                warn!(topology_id = %self.topology_id, error = %e, "Could not read initial state, keeping current nodes");
                return;
            }
        };

        let mut outcome = Reconciliation::default();
        let absent: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|node_id| !desired.contains_key(*node_id))
            .cloned()
            .collect();
        for node_id in absent {
            if let Err(e) = self.remove_node(&node_id).await {
                warn!(topology_id = %self.topology_id, node_id = %node_id, error = %e, "Node removal reported an error");
            }
            outcome.removed += 1;
        }

        for (node_id, config) in desired {
            let changed = match self.nodes.get(&node_id) {
                None => {
                    if let Err(e) = self.add_node(node_id.clone(), config).await {
                        warn!(topology_id = %self.topology_id, node_id = %node_id, error = %e, "Node creation reported an error");
                    }
                    outcome.created += 1;
                    continue;
                }
                Some(node) => node.config != config,
            };
            if changed {
                if let Err(e) = self.update_node(&node_id, config).await {
                    warn!(topology_id = %self.topology_id, node_id = %node_id, error = %e, "Node update reported an error");
                }
                outcome.updated += 1;
            }
        }

        metrics::record_reconciliation("success");
        info!(
            topology_id = %self.topology_id,
            created = outcome.created,
            removed = outcome.removed,
            updated = outcome.updated,
            nodes = self.nodes.len(),
            "Reconciled topology"
        );
        self.events.publish(LifecycleEvent::ReconciliationCompleted {
            topology_id: self.topology_id.clone(),
            created: outcome.created,
            removed: outcome.removed,
            updated: outcome.updated,
        });
    }

    /// Spawn a node manager, create the node, then register it for its node scope.
    ///
    /// The node exists even when its callback reported an error; the error is returned.
    async fn add_node(&mut self, node_id: NodeId, config: NodeConfig) -> TopologyResult<()> {
        let callback = (self.node_callbacks)(&self.topology_id, &node_id);
        let handle = NodeManager::spawn(self.node_context.clone(), node_id.clone(), callback);

        let result = handle.on_node_created(config.clone()).await;
        self.callback.on_node_created(&node_id, &config).await;

        let registration = self
            .coordinator
            .register(
                ScopeKey::node(&self.topology_id, &node_id),
                Arc::new(handle.clone()),
            )
            .await;
        self.nodes.insert(
            node_id.clone(),
            ManagedNode {
                handle,
                config,
                registration,
            },
        );

        debug!(topology_id = %self.topology_id, node_id = %node_id, "Node added");
        self.events.publish(LifecycleEvent::NodeAdded {
            topology_id: self.topology_id.clone(),
            node_id,
        });
        result
    }

    async fn update_node(&mut self, node_id: &NodeId, config: NodeConfig) -> TopologyResult<()> {
        let handle = match self.nodes.get_mut(node_id) {
            Some(node) if node.config == config => return Ok(()),
            Some(node) => {
                node.config = config.clone();
                node.handle.clone()
            }
            None => return Err(self.unknown_node(node_id)),
        };

        let result = handle.on_node_updated(config.clone()).await;
        self.callback.on_node_updated(node_id, &config).await;
        debug!(topology_id = %self.topology_id, node_id = %node_id, "Node updated");
        result
    }

    async fn remove_node(&mut self, node_id: &NodeId) -> TopologyResult<()> {
        let node = self
            .nodes
            .remove(node_id)
            .ok_or_else(|| self.unknown_node(node_id))?;

        // Deregistering releases the node scope; the session must be closed first.
        let result = node.handle.on_node_deleted().await;
        self.coordinator.deregister(&node.registration).await;
        self.callback.on_node_deleted(node_id).await;

        debug!(topology_id = %self.topology_id, node_id = %node_id, "Node removed");
        self.events.publish(LifecycleEvent::NodeRemoved {
            topology_id: self.topology_id.clone(),
            node_id: node_id.clone(),
        });
        result
    }

    fn node(&self, node_id: &NodeId) -> TopologyResult<NodeHandle> {
        self.nodes
            .get(node_id)
            .map(|node| node.handle.clone())
            .ok_or_else(|| self.unknown_node(node_id))
    }

    fn require_leader(&self) -> TopologyResult<()> {
        if self.role.is_leader() {
            Ok(())
        } else {
            Err(TopologyError::NotLeader {
                topology: self.topology_id.clone(),
            })
        }
    }

    fn unknown_node(&self, node_id: &NodeId) -> TopologyError {
        TopologyError::UnknownNode {
            topology: self.topology_id.clone(),
            node: node_id.clone(),
        }
    }
}

/// Forwards topology-scope role changes into the manager's mailbox.
struct TopologyRoleListener {
    tx: mpsc::WeakSender<TopologyMessage>,
}

#[async_trait]
impl RoleChangeListener for TopologyRoleListener {
    async fn role_changed(&self, scope: &ScopeKey, role: Role) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if tx
            .send(TopologyMessage::RoleChanged { role, ack })
            .await
            .is_err()
        {
            debug!(scope = %scope, "Topology manager stopped before role change");
            return;
        }
        let _ = done.await;
    }
}

/// Cloneable reference to a running topology manager.
#[derive(Clone)]
pub struct TopologyHandle {
    topology_id: TopologyId,
    tx: mpsc::Sender<TopologyMessage>,
    events: EventPublisher,
    coordinator: Arc<dyn RoleCoordinator>,
    registration: ListenerRegistration,
}

impl std::fmt::Debug for TopologyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyHandle")
            .field("topology_id", &self.topology_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl TopologyHandle {
    pub fn topology_id(&self) -> &TopologyId {
        &self.topology_id
    }

    /// Lifecycle events of this topology and its nodes.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Add a node, or reconfigure it if it already exists. Leader only.
    pub async fn on_node_created(&self, node_id: NodeId, config: NodeConfig) -> TopologyResult<()> {
        self.call(|reply| TopologyMessage::NodeCreated {
            node_id,
            config,
            reply,
        })
        .await?
    }

    /// Reconfigure an existing node. Leader only.
    pub async fn on_node_updated(&self, node_id: NodeId, config: NodeConfig) -> TopologyResult<()> {
        self.call(|reply| TopologyMessage::NodeUpdated {
            node_id,
            config,
            reply,
        })
        .await?
    }

    /// Remove a node and close its manager. Leader only.
    pub async fn on_node_deleted(&self, node_id: NodeId) -> TopologyResult<()> {
        self.call(|reply| TopologyMessage::NodeDeleted { node_id, reply })
            .await?
    }

    pub async fn get_node(&self, node_id: &NodeId) -> TopologyResult<NodeHandle> {
        let node_id = node_id.clone();
        self.call(|reply| TopologyMessage::GetNode { node_id, reply })
            .await?
    }

    /// Ids of the managed nodes, ordered.
    pub async fn node_ids(&self) -> TopologyResult<Vec<NodeId>> {
        self.call(|reply| TopologyMessage::NodeIds { reply }).await
    }

    /// This member's role for the topology scope.
    pub async fn role(&self) -> TopologyResult<Role> {
        self.call(|reply| TopologyMessage::Role { reply }).await
    }

    /// Route an RPC to the node it targets.
    pub async fn handle(&self, node_id: &NodeId, request: RpcRequest) -> TopologyResult<RpcReply> {
        self.get_node(node_id).await?.handle(request).await
    }

    /// Deregister from the coordinator and stop the manager with all its node managers.
    pub async fn shutdown(&self) -> TopologyResult<()> {
        self.coordinator.deregister(&self.registration).await;
        if self.tx.is_closed() {
            return Ok(());
        }
        match self.call(|reply| TopologyMessage::Shutdown { reply }).await {
            Ok(()) | Err(TopologyError::MailboxClosed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn call<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> TopologyMessage,
    ) -> TopologyResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(message(reply))
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    fn closed(&self) -> TopologyError {
        TopologyError::MailboxClosed(format!("topology {}", self.topology_id))
    }
}
