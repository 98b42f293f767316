//! Typed RPC requests, data trees, and reply documents.
//!
//! The transport collaborator decodes wire messages into [`RpcRequest`]s whose
//! payload is a generic [`WireElement`] tree. The [`RpcDispatcher`] turns that
//! tree into a schema-ordered [`DataNode`] input, invokes the backend, and
//! produces an [`RpcReply`] that renders to a deterministic `rpc-reply` document.

mod dispatcher;
mod router;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};

use crate::constants::{BASE_NAMESPACE, OK_ELEMENT, RPC_REPLY_ELEMENT};
use crate::error::RpcError;
use crate::types::{QName, SessionId};

pub use dispatcher::{HandlingPriority, RpcDispatcher, RpcService, RpcServiceError};
pub use router::{ExecutionChain, NetconfOperation, OperationRouter};

/// An element of a decoded request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireElement {
    /// Qualified name; an empty namespace inherits the parent's.
    pub name: QName,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<WireElement>,
}

impl WireElement {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            text: None,
            children: Vec::new(),
        }
    }

    pub fn leaf(name: QName, text: impl Into<String>) -> Self {
        Self {
            name,
            text: Some(text.into()),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: WireElement) -> Self {
        self.children.push(child);
        self
    }
}

/// A typed request as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    pub message_id: String,
    pub session_id: SessionId,
    /// The operation element; its name is the operation's QName and its
    /// children form the input payload.
    pub operation: WireElement,
}

impl RpcRequest {
    pub fn new(
        message_id: impl Into<String>,
        session_id: SessionId,
        operation: WireElement,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            session_id,
            operation,
        }
    }

    pub fn operation_name(&self) -> &QName {
        &self.operation.name
    }

    pub fn payload(&self) -> &[WireElement] {
        &self.operation.children
    }
}

/// A schema-validated data tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataNode {
    Leaf { name: QName, value: String },
    Container { name: QName, children: Vec<DataNode> },
}

impl DataNode {
    pub fn leaf(name: QName, value: impl Into<String>) -> Self {
        DataNode::Leaf {
            name,
            value: value.into(),
        }
    }

    pub fn container(name: QName, children: Vec<DataNode>) -> Self {
        DataNode::Container { name, children }
    }

    pub fn name(&self) -> &QName {
        match self {
            DataNode::Leaf { name, .. } | DataNode::Container { name, .. } => name,
        }
    }

    pub fn children(&self) -> &[DataNode] {
        match self {
            DataNode::Leaf { .. } => &[],
            DataNode::Container { children, .. } => children,
        }
    }

    fn write_xml(
        &self,
        writer: &mut Writer<Vec<u8>>,
        parent_namespace: &str,
    ) -> Result<(), quick_xml::Error> {
        let name = self.name();
        let mut start = BytesStart::new(name.local_name.as_str());
        if name.namespace != parent_namespace {
            start.push_attribute(("xmlns", name.namespace.as_str()));
        }

        match self {
            DataNode::Leaf { value, .. } => {
                writer.write_event(Event::Start(start))?;
                writer.write_event(Event::Text(BytesText::new(value)))?;
            }
            DataNode::Container { children, .. } => {
                if children.is_empty() {
                    writer.write_event(Event::Empty(start))?;
                    return Ok(());
                }
                writer.write_event(Event::Start(start))?;
                for child in children {
                    child.write_xml(writer, &name.namespace)?;
                }
            }
        }
        writer.write_event(Event::End(BytesEnd::new(name.local_name.as_str())))?;
        Ok(())
    }
}

/// Successful outcome of an RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcReply {
    /// Canonical acknowledgement for RPCs without output.
    Ok,
    /// The output container, children in schema declaration order.
    Data(DataNode),
}

impl RpcReply {
    pub fn output(&self) -> Option<&DataNode> {
        match self {
            RpcReply::Ok => None,
            RpcReply::Data(output) => Some(output),
        }
    }

    /// Render the reply document.
    ///
    /// Output children are written directly under `rpc-reply`; each carries an
    /// `xmlns` declaration when its namespace differs from its parent's.
    pub fn to_xml(&self, message_id: &str) -> Result<String, quick_xml::Error> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Start(reply_start(message_id)))?;
        match self {
            RpcReply::Ok => {
                writer.write_event(Event::Empty(BytesStart::new(OK_ELEMENT)))?;
            }
            RpcReply::Data(output) => {
                for child in output.children() {
                    child.write_xml(&mut writer, BASE_NAMESPACE)?;
                }
            }
        }
        writer.write_event(Event::End(BytesEnd::new(RPC_REPLY_ELEMENT)))?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    /// Render an error reply document for a failed request.
    pub fn error_xml(message_id: &str, error: &RpcError) -> Result<String, quick_xml::Error> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Start(reply_start(message_id)))?;
        error.write_xml(&mut writer, false)?;
        writer.write_event(Event::End(BytesEnd::new(RPC_REPLY_ELEMENT)))?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }
}

fn reply_start(message_id: &str) -> BytesStart<'_> {
    let mut start = BytesStart::new(RPC_REPLY_ELEMENT);
    start.push_attribute(("xmlns", BASE_NAMESPACE));
    start.push_attribute(("message-id", message_id));
    start
}
