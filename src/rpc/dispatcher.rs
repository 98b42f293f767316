//! Schema-driven dispatch of device RPCs.
//!
//! A dispatcher is bound to one session's schema context and one backend RPC
//! service. Dispatch of a request proceeds in order:
//!
//! 1. resolve the operation in the schema context (unknown → `bad-element`)
//! 2. build the input tree in schema declaration order
//! 3. invoke the backend and wait for completion
//! 4. empty output schema → `<ok/>`; otherwise reorder the returned children
//!    by the output schema and wrap them in the `output` container
//! 5. backend failure → `operation-failed`, documented faults pass through

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::router::{ExecutionChain, NetconfOperation};
use super::{DataNode, RpcReply, RpcRequest, WireElement};
use crate::constants::{BASE_NAMESPACE, INPUT_LOCAL_NAME, OUTPUT_LOCAL_NAME};
use crate::error::RpcError;
use crate::schema::{SchemaContext, SchemaNode};
use crate::topology::metrics;
use crate::topology::{TopologyError, TopologyResult};
use crate::types::{QName, SessionId};

/// How strongly an operation claims a request.
///
/// `CannotHandle` sorts below every `Handle` priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandlingPriority {
    CannotHandle,
    Handle(u16),
}

impl HandlingPriority {
    /// Priority of operations resolved from a device schema.
    pub const DEFAULT: HandlingPriority = HandlingPriority::Handle(1000);

    pub fn can_handle(&self) -> bool {
        matches!(self, HandlingPriority::Handle(_))
    }

    pub fn increase(self, by: u16) -> Self {
        match self {
            HandlingPriority::CannotHandle => HandlingPriority::CannotHandle,
            HandlingPriority::Handle(p) => HandlingPriority::Handle(p.saturating_add(by)),
        }
    }
}

/// Failure reported by a device RPC backend.
#[derive(Debug, Clone, Error)]
pub enum RpcServiceError {
    /// A fault the backend already expressed in protocol terms.
    #[error("{0}")]
    Documented(RpcError),

    /// Any other failure; the message is kept for logs only.
    #[error("{0}")]
    Failed(String),
}

/// Executes RPCs against a device session.
#[async_trait]
pub trait RpcService: Send + Sync {
    async fn invoke_rpc(
        &self,
        operation: &QName,
        input: Option<DataNode>,
    ) -> Result<Option<DataNode>, RpcServiceError>;
}

/// Dispatches RPCs of one session against its schema context.
pub struct RpcDispatcher {
    session_id: SessionId,
    schema: Arc<SchemaContext>,
    service: Arc<dyn RpcService>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for RpcDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcDispatcher")
            .field("session_id", &self.session_id)
            .field("modules", &self.schema.modules().count())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RpcDispatcher {
    pub fn new(
        session_id: SessionId,
        schema: Arc<SchemaContext>,
        service: Arc<dyn RpcService>,
    ) -> Self {
        Self {
            session_id,
            schema,
            service,
            timeout: None,
        }
    }

    /// Fail backend invocations that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn schema(&self) -> &SchemaContext {
        &self.schema
    }

    /// Claim requests whose namespace belongs to a module of the context.
    ///
    /// Base-protocol operations are left to the generic handlers.
    pub fn can_handle(&self, request: &RpcRequest) -> HandlingPriority {
        let namespace = &request.operation_name().namespace;
        if namespace == BASE_NAMESPACE {
            return HandlingPriority::CannotHandle;
        }
        match self.schema.find_module_by_namespace(namespace) {
            Some(_) => HandlingPriority::DEFAULT,
            None => HandlingPriority::CannotHandle,
        }
    }

    /// Dispatch one request.
    pub async fn dispatch(&self, request: &RpcRequest) -> TopologyResult<RpcReply> {
        let started = Instant::now();
        let result = self.dispatch_inner(request).await;

        let outcome = match &result {
            Ok(RpcReply::Ok) => "ok",
            Ok(RpcReply::Data(_)) => "data",
            Err(e) => e.to_rpc_error().tag.as_str(),
        };
        metrics::record_rpc(outcome, started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            warn!(
                session_id = %self.session_id,
                message_id = %request.message_id,
                operation = %request.operation_name(),
                error = %e,
                "RPC dispatch failed"
            );
        }
        result
    }

    async fn dispatch_inner(&self, request: &RpcRequest) -> TopologyResult<RpcReply> {
        let operation = request.operation_name();
        let rpc = self
            .schema
            .find_rpc(operation)
            .ok_or_else(|| TopologyError::UnknownOperation {
                operation: operation.clone(),
            })?;
        let namespace = rpc.module.namespace.as_str();

        let input = if rpc.definition.input.is_empty() && request.payload().is_empty() {
            None
        } else {
            let children = build_children(namespace, &rpc.definition.input, request.payload())
                .map_err(|fault| fault.into_error(operation))?;
            Some(DataNode::container(
                QName::new(namespace, INPUT_LOCAL_NAME),
                children,
            ))
        };

        debug!(
            session_id = %self.session_id,
            message_id = %request.message_id,
            operation = %operation,
            "Invoking RPC"
        );
        let invocation = self.service.invoke_rpc(operation, input);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, invocation)
                .await
                .map_err(|_| TopologyError::Timeout(format!("rpc {operation} after {limit:?}")))?,
            None => invocation.await,
        };
        let output = result.map_err(|source| TopologyError::BackendInvocationFailed {
            operation: operation.clone(),
            source,
        })?;

        if !rpc.definition.has_output() {
            return Ok(RpcReply::Ok);
        }
        let Some(output) = output else {
            return Ok(RpcReply::Ok);
        };

        let children = order_children(&rpc.definition.output, output.children().to_vec())
            .map_err(|message| TopologyError::MalformedOutput {
                operation: operation.clone(),
                message,
            })?;
        Ok(RpcReply::Data(DataNode::container(
            QName::new(namespace, OUTPUT_LOCAL_NAME),
            children,
        )))
    }
}

#[async_trait]
impl NetconfOperation for RpcDispatcher {
    fn name(&self) -> &str {
        "device-rpc"
    }

    fn can_handle(&self, request: &RpcRequest) -> HandlingPriority {
        RpcDispatcher::can_handle(self, request)
    }

    async fn handle(
        &self,
        request: &RpcRequest,
        _chain: ExecutionChain<'_>,
    ) -> Result<RpcReply, RpcError> {
        self.dispatch(request).await.map_err(|e| e.to_rpc_error())
    }
}

#[derive(Debug)]
enum InputFault {
    Unknown(String),
    Invalid(String),
}

impl InputFault {
    fn into_error(self, operation: &QName) -> TopologyError {
        match self {
            InputFault::Unknown(element) => TopologyError::UnknownElement {
                operation: operation.clone(),
                element,
            },
            InputFault::Invalid(message) => TopologyError::InvalidInput {
                operation: operation.clone(),
                message,
            },
        }
    }
}

fn in_namespace(element: &WireElement, namespace: &str) -> bool {
    element.name.namespace.is_empty() || element.name.namespace == namespace
}

/// Convert wire elements to data nodes, in the order `schema` declares them.
fn build_children(
    namespace: &str,
    schema: &[SchemaNode],
    wire: &[WireElement],
) -> Result<Vec<DataNode>, InputFault> {
    if let Some(unknown) = wire.iter().find(|element| {
        !in_namespace(element, namespace)
            || !schema
                .iter()
                .any(|node| node.name() == element.name.local_name)
    }) {
        return Err(InputFault::Unknown(unknown.name.local_name.clone()));
    }

    let mut children = Vec::with_capacity(wire.len());
    for node in schema {
        let mut matching = wire
            .iter()
            .filter(|element| element.name.local_name == node.name());
        let Some(element) = matching.next() else {
            continue;
        };
        if matching.next().is_some() {
            return Err(InputFault::Invalid(format!(
                "element '{}' appears more than once",
                node.name()
            )));
        }

        let name = QName::new(namespace, node.name());
        let child = match node {
            SchemaNode::Leaf { .. } => {
                if !element.children.is_empty() {
                    return Err(InputFault::Invalid(format!(
                        "leaf '{}' has child elements",
                        node.name()
                    )));
                }
                DataNode::leaf(name, element.text.clone().unwrap_or_default())
            }
            SchemaNode::Container { children, .. } => DataNode::container(
                name,
                build_children(namespace, children, &element.children)?,
            ),
        };
        children.push(child);
    }
    Ok(children)
}

/// Reorder returned data nodes by schema declaration order, recursively.
fn order_children(schema: &[SchemaNode], mut nodes: Vec<DataNode>) -> Result<Vec<DataNode>, String> {
    let mut ordered = Vec::with_capacity(nodes.len());
    for declared in schema {
        let mut index = 0;
        while index < nodes.len() {
            if nodes[index].name().local_name != declared.name() {
                index += 1;
                continue;
            }
            let node = nodes.remove(index);
            ordered.push(match (node, declared) {
                (DataNode::Container { name, children }, SchemaNode::Container { children: decl, .. }) => {
                    DataNode::Container {
                        name,
                        children: order_children(decl, children)?,
                    }
                }
                (leaf @ DataNode::Leaf { .. }, SchemaNode::Leaf { .. }) => leaf,
                (other, _) => {
                    return Err(format!("'{}' does not match its declared kind", other.name().local_name));
                }
            });
        }
    }
    if let Some(extra) = nodes.first() {
        return Err(format!("undeclared element '{}'", extra.name().local_name));
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ModuleSchema, RpcDefinition};

    const NS: &str = "urn:example:dispatch";

    fn leaf(name: &str) -> SchemaNode {
        SchemaNode::Leaf { name: name.into() }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(HandlingPriority::CannotHandle < HandlingPriority::Handle(0));
        assert!(HandlingPriority::Handle(1) < HandlingPriority::DEFAULT);
        assert!(HandlingPriority::DEFAULT.can_handle());
        assert!(!HandlingPriority::CannotHandle.can_handle());
        assert_eq!(
            HandlingPriority::Handle(u16::MAX).increase(5),
            HandlingPriority::Handle(u16::MAX)
        );
        assert_eq!(
            HandlingPriority::CannotHandle.increase(5),
            HandlingPriority::CannotHandle
        );
    }

    #[test]
    fn test_build_children_follows_schema_order() {
        let schema = vec![leaf("a"), leaf("b")];
        let wire = vec![
            WireElement::leaf(QName::new(NS, "b"), "2"),
            WireElement::leaf(QName::new("", "a"), "1"),
        ];
        let built = build_children(NS, &schema, &wire).unwrap();
        assert_eq!(built[0], DataNode::leaf(QName::new(NS, "a"), "1"));
        assert_eq!(built[1], DataNode::leaf(QName::new(NS, "b"), "2"));
    }

    #[test]
    fn test_build_children_rejects_unknown_and_duplicates() {
        let schema = vec![leaf("a")];
        let unknown = vec![WireElement::leaf(QName::new(NS, "zzz"), "1")];
        assert!(matches!(
            build_children(NS, &schema, &unknown),
            Err(InputFault::Unknown(name)) if name == "zzz"
        ));

        let foreign = vec![WireElement::leaf(QName::new("urn:other", "a"), "1")];
        assert!(matches!(
            build_children(NS, &schema, &foreign),
            Err(InputFault::Unknown(_))
        ));

        let twice = vec![
            WireElement::leaf(QName::new(NS, "a"), "1"),
            WireElement::leaf(QName::new(NS, "a"), "2"),
        ];
        assert!(matches!(
            build_children(NS, &schema, &twice),
            Err(InputFault::Invalid(_))
        ));
    }

    #[test]
    fn test_order_children_recurses_and_rejects_extras() {
        let schema = vec![
            leaf("x"),
            SchemaNode::Container {
                name: "c".into(),
                children: vec![leaf("p"), leaf("q")],
            },
        ];
        let nodes = vec![
            DataNode::container(
                QName::new(NS, "c"),
                vec![
                    DataNode::leaf(QName::new(NS, "q"), "2"),
                    DataNode::leaf(QName::new(NS, "p"), "1"),
                ],
            ),
            DataNode::leaf(QName::new(NS, "x"), "0"),
        ];
        let ordered = order_children(&schema, nodes).unwrap();
        assert_eq!(ordered[0].name().local_name, "x");
        assert_eq!(ordered[1].children()[0].name().local_name, "p");

        let extra = vec![DataNode::leaf(QName::new(NS, "nope"), "0")];
        assert!(order_children(&schema, extra).is_err());
    }

    struct NoopService;

    #[async_trait]
    impl RpcService for NoopService {
        async fn invoke_rpc(
            &self,
            _operation: &QName,
            _input: Option<DataNode>,
        ) -> Result<Option<DataNode>, RpcServiceError> {
            Ok(None)
        }
    }

    #[test]
    fn test_can_handle_by_namespace() {
        let context = SchemaContext::from_modules([ModuleSchema {
            name: "dispatch".into(),
            namespace: NS.into(),
            revision: None,
            rpcs: vec![RpcDefinition {
                name: "noop".into(),
                input: vec![],
                output: vec![],
            }],
        }]);
        let dispatcher =
            RpcDispatcher::new(SessionId::new("s"), Arc::new(context), Arc::new(NoopService));

        let request = |ns: &str| {
            RpcRequest::new("1", SessionId::new("s"), WireElement::new(QName::new(ns, "noop")))
        };
        assert_eq!(dispatcher.can_handle(&request(NS)), HandlingPriority::DEFAULT);
        assert_eq!(
            dispatcher.can_handle(&request(BASE_NAMESPACE)),
            HandlingPriority::CannotHandle
        );
        assert_eq!(
            dispatcher.can_handle(&request("urn:unknown")),
            HandlingPriority::CannotHandle
        );
    }
}
