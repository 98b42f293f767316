//! Node manager: one actor per managed device.
//!
//! The actor owns the device's connection state machine (see
//! [`node_state`](super::node_state)) and processes its mailbox strictly in
//! order. Slow work never runs on the mailbox path:
//!
//! - session establishment runs in a spawned task whose handle the actor
//!   selects on next to the mailbox
//! - RPCs are dispatched in a spawned task that posts the result back as a
//!   message, tagged with the role generation it was issued under
//! - reconnect delays are timers the actor selects on, dropped on demotion or
//!   shutdown
//!
//! Demotion waits for an in-flight connect (bounded by the shutdown timeout)
//! and closes whatever session it produced before the role change is
//! acknowledged, so the coordinator can promote another member only once this
//! one holds nothing.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use backon::ExponentialBackoff;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use super::callback::{ConnectFuture, DeviceSession, NodeCallback, SessionPreferences};
use super::config::TopologyConfig;
use super::error::{TopologyError, TopologyResult};
use super::events::{EventPublisher, LifecycleEvent};
use super::node_state::{ActiveSession, NodeConfig, NodeRecord, NodeState, NodeStatus};
use super::role::{Role, RoleChangeListener, ScopeKey};
use super::{metrics, retry};
use crate::rpc::{RpcDispatcher, RpcReply, RpcRequest};
use crate::schema::{SchemaContext, SchemaRepository};
use crate::types::{NodeId, TopologyId};

/// Everything the node managers of one topology share.
#[derive(Clone)]
pub struct NodeContext {
    pub topology_id: TopologyId,
    pub config: Arc<TopologyConfig>,
    pub repository: Arc<SchemaRepository>,
    pub events: EventPublisher,
}

/// Session events reported by the device transport.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Disconnected { reason: String },
    SessionUpdated(SessionPreferences),
}

/// Reports session events of one connect attempt back to its node manager.
///
/// Events from an attempt that is no longer current are ignored.
#[derive(Clone)]
pub struct DeviceEvents {
    attempt: u64,
    tx: mpsc::WeakSender<NodeMessage>,
}

impl std::fmt::Debug for DeviceEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEvents")
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

impl DeviceEvents {
    /// Returns false when the node manager is gone.
    pub async fn disconnected(&self, reason: impl Into<String>) -> bool {
        self.send(DeviceEvent::Disconnected {
            reason: reason.into(),
        })
        .await
    }

    pub async fn session_updated(&self, preferences: SessionPreferences) -> bool {
        self.send(DeviceEvent::SessionUpdated(preferences)).await
    }

    async fn send(&self, event: DeviceEvent) -> bool {
        let Some(tx) = self.tx.upgrade() else {
            return false;
        };
        tx.send(NodeMessage::Device {
            attempt: self.attempt,
            event,
        })
        .await
        .is_ok()
    }
}

pub(crate) enum NodeMessage {
    Created {
        config: NodeConfig,
        reply: oneshot::Sender<TopologyResult<()>>,
    },
    Updated {
        config: NodeConfig,
        reply: oneshot::Sender<TopologyResult<()>>,
    },
    Deleted {
        reply: oneshot::Sender<TopologyResult<()>>,
    },
    RoleChanged {
        role: Role,
        ack: oneshot::Sender<()>,
    },
    Rpc {
        request: RpcRequest,
        reply: oneshot::Sender<TopologyResult<RpcReply>>,
    },
    RpcCompleted {
        generation: u64,
        result: TopologyResult<RpcReply>,
        reply: oneshot::Sender<TopologyResult<RpcReply>>,
    },
    Device {
        attempt: u64,
        event: DeviceEvent,
    },
    Record {
        reply: oneshot::Sender<NodeRecord>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Flow {
    Continue,
    Stop(Option<oneshot::Sender<()>>),
}

struct Established {
    session: DeviceSession,
    context: Arc<SchemaContext>,
}

/// The node manager actor.
pub struct NodeManager {
    ctx: NodeContext,
    node_id: NodeId,
    callback: Arc<dyn NodeCallback>,
    mailbox: mpsc::Receiver<NodeMessage>,
    self_tx: mpsc::WeakSender<NodeMessage>,

    role: Role,
    /// Bumped on every role transition; guards RPC results.
    generation: u64,
    state: NodeState,
    state_changed_at: DateTime<Utc>,
    node_config: Option<NodeConfig>,
    status: Option<NodeStatus>,
    /// Role changes received before the node was created.
    deferred_roles: Vec<Role>,

    /// Id of the latest connect attempt; tags device events.
    connect_attempt: u64,
    connecting: Option<JoinHandle<TopologyResult<Established>>>,
    reconnect: Option<ExponentialBackoff>,
    reconnect_attempts: usize,
    retry_timer: Option<Pin<Box<Sleep>>>,
}

impl NodeManager {
    /// Start a node manager and return its handle.
    ///
    /// The manager starts in `Initializing` with role `Candidate`; it does nothing
    /// device-facing until it has been created and promoted.
    pub fn spawn(ctx: NodeContext, node_id: NodeId, callback: Arc<dyn NodeCallback>) -> NodeHandle {
        let (tx, mailbox) = mpsc::channel(ctx.config.mailbox_capacity);
        let handle = NodeHandle {
            topology_id: ctx.topology_id.clone(),
            node_id: node_id.clone(),
            tx: tx.clone(),
        };

        let manager = NodeManager {
            ctx,
            node_id,
            callback,
            mailbox,
            self_tx: tx.downgrade(),
            role: Role::Candidate,
            generation: 0,
            state: NodeState::initializing(),
            state_changed_at: Utc::now(),
            node_config: None,
            status: None,
            deferred_roles: Vec::new(),
            connect_attempt: 0,
            connecting: None,
            reconnect: None,
            reconnect_attempts: 0,
            retry_timer: None,
        };

        metrics::set_managed_nodes_delta(1);
        metrics::record_node_state_change(None, Some(manager.state.kind().as_str()));
        tokio::spawn(manager.run());
        handle
    }

    async fn run(mut self) {
        debug!(topology_id = %self.ctx.topology_id, node_id = %self.node_id, "Node manager started");
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                message = self.mailbox.recv() => {
                    let Some(message) = message else { break };
                    if let Flow::Stop(reply) = self.handle_message(message).await {
                        shutdown_reply = reply;
                        break;
                    }
                }
                result = join_pending(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_finished(result).await;
                }
                () = sleep_pending(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.on_retry_timer();
                }
            }
        }

        if !self.state.is_closed() {
            self.teardown().await;
        }
        metrics::record_node_state_change(Some(self.state.kind().as_str()), None);
        metrics::set_managed_nodes_delta(-1);
        debug!(topology_id = %self.ctx.topology_id, node_id = %self.node_id, "Node manager stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle_message(&mut self, message: NodeMessage) -> Flow {
        match message {
            NodeMessage::Created { config, reply } => {
                let result = self.on_created(config).await;
                let _ = reply.send(result);
            }
            NodeMessage::Updated { config, reply } => {
                let result = self.on_updated(config).await;
                let _ = reply.send(result);
            }
            NodeMessage::Deleted { reply } => {
                let result = self.on_deleted().await;
                let _ = reply.send(result);
                return Flow::Stop(None);
            }
            NodeMessage::RoleChanged { role, ack } => {
                self.on_role_change(role).await;
                let _ = ack.send(());
            }
            NodeMessage::Rpc { request, reply } => self.on_rpc(request, reply),
            NodeMessage::RpcCompleted {
                generation,
                result,
                reply,
            } => self.on_rpc_completed(generation, result, reply),
            NodeMessage::Device { attempt, event } => self.on_device_event(attempt, event).await,
            NodeMessage::Record { reply } => {
                let _ = reply.send(self.record());
            }
            NodeMessage::Shutdown { reply } => return Flow::Stop(Some(reply)),
        }
        Flow::Continue
    }

    // ------------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------------

    async fn on_created(&mut self, config: NodeConfig) -> TopologyResult<()> {
        if self.node_config.is_some() {
            return self.reconfigure(config).await;
        }

        metrics::record_node_lifecycle("create");
        self.status = Some(self.callback.initial_status(&self.node_id, &config));
        let result = self.callback.on_node_created(&self.node_id, &config).await;
        self.status = Some(match &result {
            Ok(status) => status.clone(),
            Err(e) => self.callback.failed_status(&self.node_id, e),
        });
        self.node_config = Some(config);
        info!(topology_id = %self.ctx.topology_id, node_id = %self.node_id, "Node created");

        for role in std::mem::take(&mut self.deferred_roles) {
            debug!(node_id = %self.node_id, role = %role, "Replaying deferred role change");
            self.apply_role(role).await;
        }
        result.map(|_| ())
    }

    async fn on_updated(&mut self, config: NodeConfig) -> TopologyResult<()> {
        if self.node_config.is_none() {
            return Err(TopologyError::UnknownNode {
                topology: self.ctx.topology_id.clone(),
                node: self.node_id.clone(),
            });
        }
        self.reconfigure(config).await
    }

    async fn reconfigure(&mut self, config: NodeConfig) -> TopologyResult<()> {
        if self.node_config.as_ref() == Some(&config) {
            return Ok(());
        }

        metrics::record_node_lifecycle("update");
        let result = self.callback.on_node_updated(&self.node_id, &config).await;
        self.status = Some(match &result {
            Ok(status) => status.clone(),
            Err(e) => self.callback.failed_status(&self.node_id, e),
        });
        self.node_config = Some(config);
        info!(topology_id = %self.ctx.topology_id, node_id = %self.node_id, "Node reconfigured");

        if self.role.is_leader() {
            self.teardown().await;
            self.start_connect(0);
        }
        result.map(|_| ())
    }

    async fn on_deleted(&mut self) -> TopologyResult<()> {
        metrics::record_node_lifecycle("delete");
        self.teardown().await;
        let result = self.callback.on_node_deleted(&self.node_id).await;
        self.set_state(NodeState::closed());
        info!(topology_id = %self.ctx.topology_id, node_id = %self.node_id, "Node deleted");
        result
    }

    // ------------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------------

    async fn on_role_change(&mut self, role: Role) {
        if self.node_config.is_none() {
            let effective = self.deferred_roles.last().copied().unwrap_or(self.role);
            if effective != role {
                debug!(node_id = %self.node_id, role = %role, "Deferring role change until node is created");
                self.deferred_roles.push(role);
            }
            return;
        }
        self.apply_role(role).await;
    }

    async fn apply_role(&mut self, role: Role) {
        if role == self.role {
            debug!(node_id = %self.node_id, role = %role, "Role unchanged");
            return;
        }

        let previous = std::mem::replace(&mut self.role, role);
        self.generation += 1;
        metrics::record_role_transition("node", role.as_str());
        info!(
            topology_id = %self.ctx.topology_id,
            node_id = %self.node_id,
            from = %previous,
            to = %role,
            generation = self.generation,
            "Node role changed"
        );
        self.callback.on_role_changed(&self.node_id, role).await;
        self.ctx.events.publish(LifecycleEvent::RoleChanged {
            scope: ScopeKey::node(&self.ctx.topology_id, &self.node_id),
            role,
        });

        if role.is_leader() {
            if matches!(self.state, NodeState::Initializing { .. }) {
                self.start_connect(0);
            }
        } else if previous.is_leader() {
            self.teardown().await;
        }
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    fn start_connect(&mut self, attempt: usize) {
        let Some(config) = self.node_config.clone() else {
            return;
        };

        self.connect_attempt += 1;
        let events = DeviceEvents {
            attempt: self.connect_attempt,
            tx: self.self_tx.clone(),
        };
        let connect = self.callback.connect(&self.node_id, &config, events);
        self.connecting = Some(tokio::spawn(establish(
            self.node_id.clone(),
            connect,
            Arc::clone(&self.ctx.repository),
            self.ctx.config.connect_timeout,
        )));
        self.set_state(NodeState::connecting(attempt));
    }

    async fn on_connect_finished(&mut self, result: Result<TopologyResult<Established>, JoinError>) {
        let outcome = result
            .unwrap_or_else(|e| Err(TopologyError::Callback(format!("connect task failed: {e}"))));

        if !self.role.is_leader() || !matches!(self.state, NodeState::Connecting { .. }) {
            if let Ok(established) = outcome {
                established.session.control.close().await;
            }
            return;
        }

        match outcome {
            Ok(Established { session, context }) => {
                let DeviceSession {
                    preferences,
                    rpc,
                    control,
                } = session;
                let dispatcher = RpcDispatcher::new(preferences.session_id.clone(), context, rpc)
                    .with_timeout(self.ctx.config.rpc_timeout);
                self.status = Some(self.callback.on_device_connected(&self.node_id, &preferences));
                self.reconnect = None;
                self.reconnect_attempts = 0;
                info!(
                    topology_id = %self.ctx.topology_id,
                    node_id = %self.node_id,
                    session_id = %preferences.session_id,
                    "Node active"
                );
                self.set_state(NodeState::active(ActiveSession {
                    preferences,
                    dispatcher: Arc::new(dispatcher),
                    control,
                }));
            }
            Err(e) => {
                warn!(topology_id = %self.ctx.topology_id, node_id = %self.node_id, error = %e, "Connect failed");
                self.status = Some(self.callback.on_device_failed(&self.node_id, &e));
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let schedule = self
            .reconnect
            .get_or_insert_with(|| retry::reconnect_schedule(&self.ctx.config.reconnect));

        match schedule.next() {
            Some(delay) => {
                self.reconnect_attempts += 1;
                metrics::record_reconnect_attempt();
                info!(
                    node_id = %self.node_id,
                    attempt = self.reconnect_attempts,
                    ?delay,
                    "Scheduling reconnect"
                );
                self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
                self.set_state(NodeState::reconnecting(self.reconnect_attempts));
            }
            None => {
                let attempts = self.reconnect_attempts;
                self.reconnect = None;
                self.reconnect_attempts = 0;
                metrics::record_reconnect_exhausted();

                let error = TopologyError::ReconnectExhausted {
                    node: self.node_id.clone(),
                    attempts,
                };
                warn!(topology_id = %self.ctx.topology_id, node_id = %self.node_id, error = %error, "Releasing node session");
                self.status = Some(self.callback.failed_status(&self.node_id, &error));
                self.set_state(NodeState::initializing());
                self.ctx.events.publish(LifecycleEvent::ReconnectExhausted {
                    topology_id: self.ctx.topology_id.clone(),
                    node_id: self.node_id.clone(),
                    attempts,
                });
            }
        }
    }

    fn on_retry_timer(&mut self) {
        if self.role.is_leader() && matches!(self.state, NodeState::Reconnecting { .. }) {
            self.start_connect(self.reconnect_attempts);
        }
    }

    async fn on_device_event(&mut self, attempt: u64, event: DeviceEvent) {
        if attempt != self.connect_attempt {
            debug!(node_id = %self.node_id, attempt, "Ignoring event from a previous session");
            return;
        }

        match event {
            DeviceEvent::Disconnected { reason } => {
                let Some(session) = self.state.session() else {
                    return;
                };
                let control = Arc::clone(&session.control);
                control.close().await;

                let error = TopologyError::ConnectionLost {
                    node: self.node_id.clone(),
                    reason,
                };
                warn!(topology_id = %self.ctx.topology_id, node_id = %self.node_id, error = %error, "Device session lost");
                self.status = Some(self.callback.on_device_disconnected(&self.node_id));
                self.schedule_reconnect();
            }
            DeviceEvent::SessionUpdated(preferences) => {
                if let NodeState::Active { session, .. } = &mut self.state {
                    self.status = Some(self.callback.on_session_updated(&self.node_id, &preferences));
                    session.preferences = preferences;
                }
            }
        }
    }

    /// Release everything this member holds for the node and return to `Initializing`.
    async fn teardown(&mut self) {
        self.retry_timer = None;
        self.reconnect = None;
        self.reconnect_attempts = 0;

        if let Some(mut handle) = self.connecting.take() {
            match tokio::time::timeout(self.ctx.config.shutdown_timeout, &mut handle).await {
                Ok(Ok(Ok(established))) => established.session.control.close().await,
                Ok(Ok(Err(e))) => debug!(node_id = %self.node_id, error = %e, "In-flight connect failed"),
                Ok(Err(e)) => warn!(node_id = %self.node_id, error = %e, "Connect task failed"),
                Err(_) => {
                    handle.abort();
                    warn!(node_id = %self.node_id, "In-flight connect did not finish in time, aborted");
                }
            }
        }

        if let Some(session) = self.state.session() {
            let control = Arc::clone(&session.control);
            control.close().await;
            self.status = Some(self.callback.on_device_disconnected(&self.node_id));
        }

        if !matches!(self.state, NodeState::Initializing { .. } | NodeState::Closed { .. }) {
            self.set_state(NodeState::initializing());
        }
    }

    // ------------------------------------------------------------------------
    // RPC
    // ------------------------------------------------------------------------

    fn on_rpc(&mut self, request: RpcRequest, reply: oneshot::Sender<TopologyResult<RpcReply>>) {
        let Some(session) = self.state.session() else {
            let _ = reply.send(Err(self.not_active()));
            return;
        };

        let dispatcher = Arc::clone(&session.dispatcher);
        let generation = self.generation;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = dispatcher.dispatch(&request).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx
                    .send(NodeMessage::RpcCompleted {
                        generation,
                        result,
                        reply,
                    })
                    .await;
            }
        });
    }

    fn on_rpc_completed(
        &mut self,
        generation: u64,
        result: TopologyResult<RpcReply>,
        reply: oneshot::Sender<TopologyResult<RpcReply>>,
    ) {
        if generation != self.generation || !self.state.is_active() {
            debug!(
                node_id = %self.node_id,
                issued = generation,
                current = self.generation,
                "Discarding RPC result from a previous role generation"
            );
            let _ = reply.send(Err(self.not_active()));
            return;
        }
        let _ = reply.send(result);
    }

    fn not_active(&self) -> TopologyError {
        TopologyError::NotActive {
            node: self.node_id.clone(),
            state: self.state.kind().as_str(),
        }
    }

    // ------------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------------

    fn set_state(&mut self, next: NodeState) {
        let from = self.state.kind();
        let to = next.kind();
        self.state = next;
        self.state_changed_at = Utc::now();
        if from == to {
            return;
        }

        metrics::record_node_state_change(Some(from.as_str()), Some(to.as_str()));
        debug!(
            topology_id = %self.ctx.topology_id,
            node_id = %self.node_id,
            from = %from,
            to = %to,
            "Node state changed"
        );
        self.ctx.events.publish(LifecycleEvent::NodeStateChanged {
            topology_id: self.ctx.topology_id.clone(),
            node_id: self.node_id.clone(),
            from,
            to,
        });
    }

    fn record(&self) -> NodeRecord {
        NodeRecord {
            topology_id: self.ctx.topology_id.clone(),
            node_id: self.node_id.clone(),
            state: self.state.kind(),
            role: self.role,
            generation: self.generation,
            config: self.node_config.clone(),
            status: self.status.clone(),
            session_id: self
                .state
                .session()
                .map(|session| session.preferences.session_id.clone()),
            state_changed_at: self.state_changed_at,
        }
    }
}

async fn establish(
    node_id: NodeId,
    connect: ConnectFuture,
    repository: Arc<SchemaRepository>,
    timeout: std::time::Duration,
) -> TopologyResult<Established> {
    let session = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| TopologyError::Timeout(format!("connecting {node_id} after {timeout:?}")))??;

    match repository
        .resolve_context(&session.preferences.capabilities)
        .await
    {
        Ok(context) => Ok(Established {
            session,
            context: Arc::new(context),
        }),
        Err(e) => {
            session.control.close().await;
            Err(e.into())
        }
    }
}

/// Await the task if there is one; otherwise never resolve.
async fn join_pending<T>(handle: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn sleep_pending(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Cheap, cloneable reference to a running node manager.
#[derive(Clone)]
pub struct NodeHandle {
    topology_id: TopologyId,
    node_id: NodeId,
    tx: mpsc::Sender<NodeMessage>,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("topology_id", &self.topology_id)
            .field("node_id", &self.node_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl NodeHandle {
    pub fn topology_id(&self) -> &TopologyId {
        &self.topology_id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Whether the manager has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn on_node_created(&self, config: NodeConfig) -> TopologyResult<()> {
        self.call(|reply| NodeMessage::Created { config, reply })
            .await?
    }

    pub async fn on_node_updated(&self, config: NodeConfig) -> TopologyResult<()> {
        self.call(|reply| NodeMessage::Updated { config, reply })
            .await?
    }

    /// Remove the node; the manager closes and stops.
    pub async fn on_node_deleted(&self) -> TopologyResult<()> {
        self.call(|reply| NodeMessage::Deleted { reply }).await?
    }

    /// Apply a role change; returns once the manager has applied it.
    pub async fn on_role_change(&self, role: Role) -> TopologyResult<()> {
        self.call(|ack| NodeMessage::RoleChanged { role, ack }).await
    }

    /// Execute an RPC against the node's session.
    ///
    /// Fails with [`TopologyError::NotActive`] unless the node is active.
    pub async fn handle(&self, request: RpcRequest) -> TopologyResult<RpcReply> {
        self.call(|reply| NodeMessage::Rpc { request, reply })
            .await?
    }

    pub async fn record(&self) -> TopologyResult<NodeRecord> {
        self.call(|reply| NodeMessage::Record { reply }).await
    }

    /// Stop the manager without removing the node. Idempotent.
    pub async fn shutdown(&self) -> TopologyResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        match self.call(|reply| NodeMessage::Shutdown { reply }).await {
            Ok(()) | Err(TopologyError::MailboxClosed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn call<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> NodeMessage,
    ) -> TopologyResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(message(reply))
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    fn closed(&self) -> TopologyError {
        TopologyError::MailboxClosed(format!("node {}/{}", self.topology_id, self.node_id))
    }
}

#[async_trait]
impl RoleChangeListener for NodeHandle {
    async fn role_changed(&self, _scope: &ScopeKey, role: Role) {
        if let Err(e) = self.on_role_change(role).await {
            debug!(node_id = %self.node_id, role = %role, error = %e, "Role change not delivered");
        }
    }
}
