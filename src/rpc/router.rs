//! Selection among operations that claim the same request.
//!
//! Every registered [`NetconfOperation`] is asked how strongly it wants the
//! request. The highest [`HandlingPriority`] wins; among equal priorities the
//! more specific operation wins. Two candidates tied on both are a
//! configuration fault and fail the request rather than picking one at random.
//!
//! Losing candidates are not discarded: they form the [`ExecutionChain`] the
//! winner may delegate to.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::dispatcher::HandlingPriority;
use super::{RpcReply, RpcRequest};
use crate::error::{ErrorSeverity, ErrorTag, ErrorType, RpcError};

/// A handler for one family of protocol operations.
#[async_trait]
pub trait NetconfOperation: Send + Sync {
    /// Name used in logs and ambiguity reports.
    fn name(&self) -> &str;

    fn can_handle(&self, request: &RpcRequest) -> HandlingPriority;

    /// Tie-breaker between operations of equal priority. Higher is more specific.
    fn specificity(&self) -> u32 {
        0
    }

    async fn handle(
        &self,
        request: &RpcRequest,
        chain: ExecutionChain<'_>,
    ) -> Result<RpcReply, RpcError>;
}

/// The operations left to run after the current one.
#[derive(Clone, Copy)]
pub struct ExecutionChain<'a> {
    remaining: &'a [Arc<dyn NetconfOperation>],
}

impl<'a> ExecutionChain<'a> {
    /// A chain with nothing after the current operation.
    pub fn terminal() -> Self {
        ExecutionChain { remaining: &[] }
    }

    pub fn is_terminal(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Run the next operation in the chain.
    pub async fn execute(self, request: &RpcRequest) -> Result<RpcReply, RpcError> {
        match self.remaining.split_first() {
            Some((next, rest)) => next.handle(request, ExecutionChain { remaining: rest }).await,
            None => Err(not_supported(request)),
        }
    }
}

impl std::fmt::Debug for ExecutionChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.remaining.iter().map(|op| op.name()))
            .finish()
    }
}

/// Routes requests to the best-matching registered operation.
#[derive(Default)]
pub struct OperationRouter {
    operations: Vec<Arc<dyn NetconfOperation>>,
}

impl OperationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operation: Arc<dyn NetconfOperation>) {
        self.operations.push(operation);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Candidates for `request`, best first.
    ///
    /// Fails with `operation-not-supported` when nothing claims the request and
    /// with `operation-failed` when the two best candidates cannot be told apart.
    pub fn select(&self, request: &RpcRequest) -> Result<Vec<Arc<dyn NetconfOperation>>, RpcError> {
        let mut candidates: Vec<(HandlingPriority, u32, Arc<dyn NetconfOperation>)> = self
            .operations
            .iter()
            .map(|op| (op.can_handle(request), op.specificity(), Arc::clone(op)))
            .filter(|(priority, _, _)| priority.can_handle())
            .collect();
        candidates.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

        if let [first, second, ..] = candidates.as_slice() {
            if first.0 == second.0 && first.1 == second.1 {
                return Err(RpcError::application(
                    ErrorTag::OperationFailed,
                    format!(
                        "Ambiguous handlers for {}: {} and {}",
                        request.operation_name(),
                        first.2.name(),
                        second.2.name()
                    ),
                ));
            }
        }
        if candidates.is_empty() {
            return Err(not_supported(request));
        }

        Ok(candidates.into_iter().map(|(_, _, op)| op).collect())
    }

    /// Run the best operation, with the rest as its execution chain.
    pub async fn execute(&self, request: &RpcRequest) -> Result<RpcReply, RpcError> {
        let ordered = self.select(request)?;
        debug!(
            message_id = %request.message_id,
            operation = %request.operation_name(),
            handler = ordered[0].name(),
            "Routing request"
        );
        ExecutionChain { remaining: &ordered }.execute(request).await
    }
}

fn not_supported(request: &RpcRequest) -> RpcError {
    RpcError::new(
        ErrorSeverity::Error,
        ErrorType::Protocol,
        ErrorTag::OperationNotSupported,
        format!("No handler for {}", request.operation_name()),
    )
}
