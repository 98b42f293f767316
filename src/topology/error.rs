//! Error types for topology and node coordination.
//!
//! # Error Handling Patterns
//!
//! ## Fail-Fast (Propagate Errors)
//!
//! Used where the caller has to react:
//! - RPC dispatch (unknown operation, malformed input, backend failure)
//! - Administrative node changes on a follower (`NotLeader`)
//! - RPCs against a node that is not active (`NotActive`)
//!
//! ## Best-Effort (Log and Continue)
//!
//! Used inside the manager actors, where a failure must not kill the actor:
//! - Device session close on demotion
//! - Callback notifications for deleted nodes
//! - Lifecycle event broadcast with no subscribers
//!
//! # Redirects
//!
//! [`TopologyError::is_redirect`] marks errors that mean "this member is the
//! wrong place to ask". A router in front of the managers uses it to forward the
//! request to the current leader instead of surfacing the fault.

use thiserror::Error;

use crate::error::{ErrorTag, RpcError};
use crate::rpc::RpcServiceError;
use crate::schema::{SchemaError, SourceIdentifier};
use crate::types::{NodeId, QName, TopologyId};

/// Result type for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors raised by topology managers, node managers and the RPC dispatcher.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The topology has no node with this id.
    #[error("Node {node} not found in topology {topology}")]
    UnknownNode { topology: TopologyId, node: NodeId },

    /// The operation is not declared by any module in the schema context.
    #[error("No such rpc: {operation}")]
    UnknownOperation { operation: QName },

    /// The request payload carries an element the input schema does not declare.
    #[error("Unknown element '{element}' in input of {operation}")]
    UnknownElement { operation: QName, element: String },

    /// The request payload does not fit the input schema.
    #[error("Invalid input for {operation}: {message}")]
    InvalidInput { operation: QName, message: String },

    /// The backend returned output the output schema does not declare.
    #[error("Malformed output from {operation}: {message}")]
    MalformedOutput { operation: QName, message: String },

    /// The node manager does not hold an active session.
    #[error("Node {node} is not active (state: {state})")]
    NotActive { node: NodeId, state: &'static str },

    /// Administrative changes are only accepted by the topology leader.
    #[error("Topology {topology} is not led by this member")]
    NotLeader { topology: TopologyId },

    /// A schema source required by the session could not be found.
    #[error("Schema source {0} not found")]
    SchemaSourceNotFound(SourceIdentifier),

    /// Any other schema resolution failure.
    #[error("Schema error: {0}")]
    Schema(SchemaError),

    /// The device backend failed to execute the RPC.
    #[error("RPC {operation} failed: {source}")]
    BackendInvocationFailed {
        operation: QName,
        #[source]
        source: RpcServiceError,
    },

    /// The device session dropped.
    #[error("Connection to {node} lost: {reason}")]
    ConnectionLost { node: NodeId, reason: String },

    /// Reconnect attempts were exhausted.
    #[error("Gave up reconnecting {node} after {attempts} attempts")]
    ReconnectExhausted { node: NodeId, attempts: usize },

    /// A collaborator is temporarily unavailable; the call may be retried.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// A callback failed.
    #[error("Callback error: {0}")]
    Callback(String),

    /// The manager actor is gone.
    #[error("Manager mailbox closed: {0}")]
    MailboxClosed(String),

    /// Operation did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A reply document could not be rendered.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<SchemaError> for TopologyError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::SourceNotFound(identifier) => TopologyError::SchemaSourceNotFound(identifier),
            other => TopologyError::Schema(other),
        }
    }
}

impl From<quick_xml::Error> for TopologyError {
    fn from(e: quick_xml::Error) -> Self {
        TopologyError::Serialization(e.to_string())
    }
}

impl TopologyError {
    /// Map to the fault reported at the protocol boundary.
    ///
    /// Documented backend faults pass through untouched; undocumented backend
    /// failures become `operation-failed` without leaking the cause.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            TopologyError::UnknownOperation { operation } => {
                RpcError::application(ErrorTag::BadElement, format!("No such rpc: {operation}"))
                    .with_info("bad-element", operation.local_name.clone())
            }
            TopologyError::UnknownElement { element, .. } => {
                RpcError::application(ErrorTag::UnknownElement, self.to_string())
                    .with_info("bad-element", element.clone())
            }
            TopologyError::InvalidInput { .. } => {
                RpcError::application(ErrorTag::InvalidValue, self.to_string())
            }
            TopologyError::UnknownNode { node, .. } => {
                RpcError::application(ErrorTag::DataMissing, self.to_string())
                    .with_info("node-id", node.as_str())
            }
            TopologyError::NotActive { node, .. } => {
                RpcError::application(ErrorTag::ResourceDenied, self.to_string())
                    .with_info("node-id", node.as_str())
            }
            TopologyError::NotLeader { topology } => {
                RpcError::application(ErrorTag::ResourceDenied, self.to_string())
                    .with_info("topology-id", topology.as_str())
            }
            TopologyError::BackendInvocationFailed {
                source: RpcServiceError::Documented(error),
                ..
            } => error.clone(),
            TopologyError::BackendInvocationFailed { operation, .. } => RpcError::application(
                ErrorTag::OperationFailed,
                format!("RPC {operation} failed"),
            ),
            _ => RpcError::application(ErrorTag::OperationFailed, self.to_string()),
        }
    }

    /// Whether this error means another member should handle the request.
    pub fn is_redirect(&self) -> bool {
        matches!(
            self,
            TopologyError::NotActive { .. } | TopologyError::NotLeader { .. }
        )
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            TopologyError::Unavailable(_)
            | TopologyError::ConnectionLost { .. }
            | TopologyError::Timeout(_)
            | TopologyError::NotActive { .. }
            | TopologyError::NotLeader { .. } => true,
            TopologyError::Schema(e) => e.is_recoverable(),
            _ => false,
        }
    }
}
