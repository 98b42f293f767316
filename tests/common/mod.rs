//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use topokeeper::rpc::{DataNode, RpcRequest, RpcService, RpcServiceError, WireElement};
use topokeeper::schema::{
    ParsedSchemaSource, SchemaContext, SchemaError, SchemaRepository, SchemaSource,
    SchemaSourceProvider, SourceIdentifier,
};
use topokeeper::topology::{
    ConnectorNodeCallback, DeviceConnector, DeviceEvents, DeviceSession, EventPublisher,
    NodeConfig, NodeContext, NodeHandle, NodeManager, NodeRecord, NodeStateKind,
    ReconnectConfig, SessionControl, SessionPreferences, TopologyConfig, TopologyError,
    TopologyProfile, TopologyResult,
};
use topokeeper::types::{NodeId, QName, SessionId, TopologyId};

pub const NS: &str = "urn:example:rpc-test";

pub const MODULE_JSON: &str = r#"{
    "name": "rpc-test",
    "namespace": "urn:example:rpc-test",
    "revision": "2024-01-01",
    "rpcs": [
        { "name": "void-output" },
        { "name": "reset", "input": [
            { "kind": "leaf", "name": "delay" },
            { "kind": "leaf", "name": "reason" }
        ] },
        { "name": "stats", "output": [
            { "kind": "leaf", "name": "uptime" },
            { "kind": "container", "name": "counters", "children": [
                { "kind": "leaf", "name": "in" },
                { "kind": "leaf", "name": "out" }
            ] }
        ] }
    ]
}"#;

pub fn rpc_test_id() -> SourceIdentifier {
    SourceIdentifier::new("rpc-test", Some("2024-01-01"))
}

pub fn qname(local_name: &str) -> QName {
    QName::new(NS, local_name)
}

/// Schema context holding the `rpc-test` module.
pub fn test_context() -> Arc<SchemaContext> {
    let source = SchemaSource {
        identifier: rpc_test_id(),
        content: Bytes::from_static(MODULE_JSON.as_bytes()),
    };
    let parsed = ParsedSchemaSource::parse(&source).unwrap();
    Arc::new(SchemaContext::new(vec![Arc::new(parsed)]))
}

pub fn request(message_id: &str, operation: &str, children: Vec<WireElement>) -> RpcRequest {
    let mut element = WireElement::new(qname(operation));
    element.children = children;
    RpcRequest::new(message_id, SessionId::new("session-1"), element)
}

/// Fast timings for tests.
pub fn test_config() -> TopologyConfig {
    let mut config = TopologyConfig::from_profile(TopologyProfile::Development);
    config.reconnect = ReconnectConfig {
        min_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_attempts: 2,
        jitter: false,
    };
    config.connect_timeout = Duration::from_secs(2);
    config.shutdown_timeout = Duration::from_secs(2);
    config.rpc_timeout = Duration::from_secs(2);
    config.initial_state_retries = 2;
    config
}

// ============================================================================
// Schema providers
// ============================================================================

/// Serves fixed module descriptors and counts fetches.
#[derive(Default)]
pub struct CountingSchemaProvider {
    sources: HashMap<SourceIdentifier, &'static str>,
    delay: Duration,
    pub fetches: AtomicUsize,
}

impl CountingSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, identifier: SourceIdentifier, json: &'static str) -> Self {
        self.sources.insert(identifier, json);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaSourceProvider for CountingSchemaProvider {
    async fn get_source(&self, identifier: &SourceIdentifier) -> Result<SchemaSource, SchemaError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.sources.get(identifier) {
            Some(json) => Ok(SchemaSource {
                identifier: identifier.clone(),
                content: Bytes::from_static(json.as_bytes()),
            }),
            None => Err(SchemaError::SourceNotFound(identifier.clone())),
        }
    }
}

pub fn test_repository() -> (Arc<SchemaRepository>, Arc<CountingSchemaProvider>) {
    let provider = Arc::new(CountingSchemaProvider::new().with_source(rpc_test_id(), MODULE_JSON));
    let repository = Arc::new(SchemaRepository::new(
        "test",
        Arc::clone(&provider) as Arc<dyn SchemaSourceProvider>,
    ));
    (repository, provider)
}

// ============================================================================
// RPC backends
// ============================================================================

/// Backend answering every RPC with a fixed result and recording its inputs.
pub struct ScriptedRpcService {
    result: Result<Option<DataNode>, RpcServiceError>,
    delay: Duration,
    pub calls: Mutex<Vec<(QName, Option<DataNode>)>>,
}

impl ScriptedRpcService {
    pub fn returning(output: Option<DataNode>) -> Self {
        Self {
            result: Ok(output),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: RpcServiceError) -> Self {
        Self {
            result: Err(error),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RpcService for ScriptedRpcService {
    async fn invoke_rpc(
        &self,
        operation: &QName,
        input: Option<DataNode>,
    ) -> Result<Option<DataNode>, RpcServiceError> {
        self.calls.lock().unwrap().push((operation.clone(), input));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

// ============================================================================
// Device connector
// ============================================================================

/// Open sessions per node, shared by every simulated member.
#[derive(Default)]
pub struct SessionLedger {
    active: Mutex<HashMap<NodeId, usize>>,
    peak: Mutex<HashMap<NodeId, usize>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl SessionLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn open(&self, node_id: &NodeId) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let mut active = self.active.lock().unwrap();
        let count = active.entry(node_id.clone()).or_default();
        *count += 1;
        let mut peak = self.peak.lock().unwrap();
        let max = peak.entry(node_id.clone()).or_default();
        *max = (*max).max(*count);
    }

    fn close(&self, node_id: &NodeId) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        let mut active = self.active.lock().unwrap();
        if let Some(count) = active.get_mut(node_id) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn active(&self, node_id: &NodeId) -> usize {
        self.active.lock().unwrap().get(node_id).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously open sessions ever seen for the node.
    pub fn peak(&self, node_id: &NodeId) -> usize {
        self.peak.lock().unwrap().get(node_id).copied().unwrap_or(0)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

struct MockSession {
    node_id: NodeId,
    ledger: Arc<SessionLedger>,
    close_delay: Duration,
    closed: AtomicBool,
}

#[async_trait]
impl SessionControl for MockSession {
    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // The session counts as open until the device has released it.
            if !self.close_delay.is_zero() {
                tokio::time::sleep(self.close_delay).await;
            }
            self.ledger.close(&self.node_id);
        }
    }
}

/// Connector handing out mock sessions backed by one RPC service.
pub struct MockConnector {
    ledger: Arc<SessionLedger>,
    rpc: Arc<dyn RpcService>,
    capabilities: Vec<SourceIdentifier>,
    connect_delay: Duration,
    close_delay: Duration,
    failures_left: AtomicUsize,
    always_fail: AtomicBool,
    next_session: AtomicU64,
    pub connects: AtomicUsize,
    events: Mutex<HashMap<NodeId, DeviceEvents>>,
}

impl MockConnector {
    pub fn new(ledger: Arc<SessionLedger>, rpc: Arc<dyn RpcService>) -> Self {
        Self {
            ledger,
            rpc,
            capabilities: vec![rpc_test_id()],
            connect_delay: Duration::ZERO,
            close_delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            always_fail: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
            connects: AtomicUsize::new(0),
            events: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<SourceIdentifier>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Refuse the next `count` connects.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Event sink of the node's latest session.
    pub fn events(&self, node_id: &NodeId) -> Option<DeviceEvents> {
        self.events.lock().unwrap().get(node_id).cloned()
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    async fn connect(
        &self,
        node_id: &NodeId,
        _config: &NodeConfig,
        events: DeviceEvents,
    ) -> TopologyResult<DeviceSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let refuse = self.always_fail.load(Ordering::SeqCst)
            || self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if refuse {
            return Err(TopologyError::Unavailable(format!("{node_id} refused connection")));
        }

        self.events
            .lock()
            .unwrap()
            .insert(node_id.clone(), events);
        self.ledger.open(node_id);
        let session = self.next_session.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceSession {
            preferences: SessionPreferences {
                session_id: SessionId::new(format!("{node_id}-{session}")),
                capabilities: self.capabilities.clone(),
            },
            rpc: Arc::clone(&self.rpc),
            control: Arc::new(MockSession {
                node_id: node_id.clone(),
                ledger: Arc::clone(&self.ledger),
                close_delay: self.close_delay,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

// ============================================================================
// Node managers
// ============================================================================

pub fn node_context(
    topology_id: &TopologyId,
    config: TopologyConfig,
    repository: Arc<SchemaRepository>,
) -> NodeContext {
    NodeContext {
        topology_id: topology_id.clone(),
        config: Arc::new(config),
        repository,
        events: EventPublisher::new(256),
    }
}

pub fn spawn_node(context: &NodeContext, node_id: &NodeId, connector: Arc<MockConnector>) -> NodeHandle {
    let callback = Arc::new(ConnectorNodeCallback::new(
        context.topology_id.clone(),
        connector as Arc<dyn DeviceConnector>,
    ));
    NodeManager::spawn(context.clone(), node_id.clone(), callback)
}

/// Poll the node record until it reaches `state`.
pub async fn wait_for_state(handle: &NodeHandle, state: NodeStateKind) -> NodeRecord {
    wait_for(handle, |record| record.state == state).await
}

pub async fn wait_for(handle: &NodeHandle, condition: impl Fn(&NodeRecord) -> bool) -> NodeRecord {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let record = handle.record().await.unwrap();
            if condition(&record) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    match result {
        Ok(record) => record,
        Err(_) => panic!(
            "node {} did not reach the expected state: {:?}",
            handle.node_id(),
            handle.record().await
        ),
    }
}
