//! Schema sources, the parsed schema model, and the shared schema repository.
//!
//! The YANG compiler is an external collaborator: a parsed schema source here is
//! a JSON module descriptor that lists the module's RPCs together with their
//! ordered input and output declarations. That is all the RPC dispatcher needs
//! to resolve operations and order reply payloads.
//!
//! ```text
//! {
//!   "name": "rpc-test",
//!   "namespace": "urn:example:rpc-test",
//!   "revision": "2024-01-01",
//!   "rpcs": [
//!     { "name": "reset", "input": [ { "kind": "leaf", "name": "delay" } ] },
//!     { "name": "stats", "output": [
//!         { "kind": "leaf", "name": "uptime" },
//!         { "kind": "container", "name": "counters", "children": [ ... ] } ] }
//!   ]
//! }
//! ```

mod repository;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::QName;

pub use repository::SchemaRepository;

/// Identifier of a schema source: module name plus optional revision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceIdentifier {
    pub name: String,
    #[serde(default)]
    pub revision: Option<String>,
}

impl SourceIdentifier {
    pub fn new(name: impl Into<String>, revision: Option<&str>) -> Self {
        Self {
            name: name.into(),
            revision: revision.map(str::to_string),
        }
    }
}

impl fmt::Display for SourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(revision) => write!(f, "{}@{}", self.name, revision),
            None => f.write_str(&self.name),
        }
    }
}

/// Raw schema source content as delivered by a provider.
#[derive(Debug, Clone)]
pub struct SchemaSource {
    pub identifier: SourceIdentifier,
    pub content: Bytes,
}

/// Errors produced while fetching or parsing schema sources.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// No provider could supply the source.
    #[error("Schema source {0} not found")]
    SourceNotFound(SourceIdentifier),

    /// The provider failed for a reason other than absence.
    #[error("Schema provider failed for {identifier}: {message}")]
    Provider {
        identifier: SourceIdentifier,
        message: String,
    },

    /// The source content is not a valid module descriptor.
    #[error("Schema source {identifier} could not be parsed: {message}")]
    Parse {
        identifier: SourceIdentifier,
        message: String,
    },
}

impl SchemaError {
    pub fn identifier(&self) -> &SourceIdentifier {
        match self {
            SchemaError::SourceNotFound(identifier) => identifier,
            SchemaError::Provider { identifier, .. } => identifier,
            SchemaError::Parse { identifier, .. } => identifier,
        }
    }

    /// Whether another provider may still be able to supply the source.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SchemaError::Parse { .. })
    }
}

/// Supplies raw schema sources on demand.
///
/// Consumed only by [`SchemaRepository`].
#[async_trait]
pub trait SchemaSourceProvider: Send + Sync {
    /// Fetch the source, or fail with [`SchemaError::SourceNotFound`].
    async fn get_source(&self, identifier: &SourceIdentifier) -> Result<SchemaSource, SchemaError>;
}

/// A node declared in an RPC input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SchemaNode {
    Leaf {
        name: String,
    },
    Container {
        name: String,
        #[serde(default)]
        children: Vec<SchemaNode>,
    },
}

impl SchemaNode {
    pub fn name(&self) -> &str {
        match self {
            SchemaNode::Leaf { name } | SchemaNode::Container { name, .. } => name,
        }
    }

    pub fn children(&self) -> &[SchemaNode] {
        match self {
            SchemaNode::Leaf { .. } => &[],
            SchemaNode::Container { children, .. } => children,
        }
    }
}

/// An RPC declared by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcDefinition {
    pub name: String,
    #[serde(default)]
    pub input: Vec<SchemaNode>,
    #[serde(default)]
    pub output: Vec<SchemaNode>,
}

impl RpcDefinition {
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }
}

/// A module descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSchema {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub rpcs: Vec<RpcDefinition>,
}

impl ModuleSchema {
    pub fn source_identifier(&self) -> SourceIdentifier {
        SourceIdentifier::new(self.name.clone(), self.revision.as_deref())
    }
}

/// A schema source after parsing. Immutable once cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSchemaSource {
    pub identifier: SourceIdentifier,
    pub module: ModuleSchema,
}

impl ParsedSchemaSource {
    /// Parse a raw source; the module's name and revision must match the identifier.
    pub fn parse(source: &SchemaSource) -> Result<Self, SchemaError> {
        let module: ModuleSchema =
            serde_json::from_slice(&source.content).map_err(|e| SchemaError::Parse {
                identifier: source.identifier.clone(),
                message: e.to_string(),
            })?;

        if module.name != source.identifier.name {
            return Err(SchemaError::Parse {
                identifier: source.identifier.clone(),
                message: format!("source declares module '{}'", module.name),
            });
        }
        if let Some(expected) = &source.identifier.revision {
            if module.revision.as_ref() != Some(expected) {
                return Err(SchemaError::Parse {
                    identifier: source.identifier.clone(),
                    message: format!("source declares revision {:?}", module.revision),
                });
            }
        }

        Ok(Self {
            identifier: source.identifier.clone(),
            module,
        })
    }
}

/// An RPC found in a schema context.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRpc<'a> {
    pub module: &'a ModuleSchema,
    pub definition: &'a RpcDefinition,
}

impl ResolvedRpc<'_> {
    pub fn qname(&self) -> QName {
        QName::new(self.module.namespace.clone(), self.definition.name.clone())
    }
}

/// The set of modules a session currently works against.
#[derive(Debug, Clone, Default)]
pub struct SchemaContext {
    modules: Vec<Arc<ParsedSchemaSource>>,
}

impl SchemaContext {
    pub fn new(modules: Vec<Arc<ParsedSchemaSource>>) -> Self {
        Self { modules }
    }

    /// Build a context straight from module descriptors.
    pub fn from_modules(modules: impl IntoIterator<Item = ModuleSchema>) -> Self {
        Self::new(
            modules
                .into_iter()
                .map(|module| {
                    Arc::new(ParsedSchemaSource {
                        identifier: module.source_identifier(),
                        module,
                    })
                })
                .collect(),
        )
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleSchema> {
        self.modules.iter().map(|source| &source.module)
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn find_module_by_namespace(&self, namespace: &str) -> Option<&ModuleSchema> {
        self.modules().find(|module| module.namespace == namespace)
    }

    /// Find the RPC whose namespace and local name match `operation`.
    pub fn find_rpc(&self, operation: &QName) -> Option<ResolvedRpc<'_>> {
        self.modules()
            .filter(|module| module.namespace == operation.namespace)
            .find_map(|module| {
                module
                    .rpcs
                    .iter()
                    .find(|rpc| rpc.name == operation.local_name)
                    .map(|definition| ResolvedRpc { module, definition })
            })
    }
}
