//! Crate & protocol level errors.
//!
//! This module provides the wire-facing fault type for the management protocol.
//!
//! # Error Hierarchy
//!
//! The crate uses a two-layer error hierarchy:
//!
//! ## Protocol Layer (`crate::error`)
//!
//! - [`RpcError`]: a structured fault carrying the stable
//!   `(severity, type, tag)` triple that downstream tooling keys on
//! - [`ErrorSeverity`], [`ErrorType`], [`ErrorTag`]: the triple's components
//!
//! ## Coordination Layer (`crate::topology::TopologyError`)
//!
//! - Unknown nodes, inactive managers, reconnect exhaustion, backend failures
//! - Has `to_rpc_error()` for mapping to [`RpcError`]
//!
//! Faults that reach the protocol boundary are always expressed as [`RpcError`].

use std::collections::BTreeMap;
use std::fmt;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::constants::BASE_NAMESPACE;

pub type Result<T> = std::result::Result<T, RpcError>;

/// Severity of a protocol fault.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    #[default]
    Error,
    Warning,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Error => "error",
            ErrorSeverity::Warning => "warning",
        }
    }
}

/// Layer at which a protocol fault occurred.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    #[default]
    Application,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }
}

/// Tag identifying the fault condition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    DataExists,
    DataMissing,
    OperationNotSupported,
    #[default]
    OperationFailed,
    MalformedMessage,
}

impl ErrorTag {
    /// Canonical wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::InUse => "in-use",
            ErrorTag::InvalidValue => "invalid-value",
            ErrorTag::TooBig => "too-big",
            ErrorTag::MissingAttribute => "missing-attribute",
            ErrorTag::BadAttribute => "bad-attribute",
            ErrorTag::UnknownAttribute => "unknown-attribute",
            ErrorTag::MissingElement => "missing-element",
            ErrorTag::BadElement => "bad-element",
            ErrorTag::UnknownElement => "unknown-element",
            ErrorTag::UnknownNamespace => "unknown-namespace",
            ErrorTag::AccessDenied => "access-denied",
            ErrorTag::LockDenied => "lock-denied",
            ErrorTag::ResourceDenied => "resource-denied",
            ErrorTag::DataExists => "data-exists",
            ErrorTag::DataMissing => "data-missing",
            ErrorTag::OperationNotSupported => "operation-not-supported",
            ErrorTag::OperationFailed => "operation-failed",
            ErrorTag::MalformedMessage => "malformed-message",
        }
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault reported at the protocol boundary.
///
/// Two faults are equal when their triple, message and info are equal.
#[derive(Debug, Clone, PartialEq, Eq, ThisError, Serialize, Deserialize)]
#[error("{} {} {}: {message}", severity.as_str(), error_type.as_str(), tag.as_str())]
pub struct RpcError {
    pub severity: ErrorSeverity,
    pub error_type: ErrorType,
    pub tag: ErrorTag,
    pub message: String,
    /// Extra `error-info` children, rendered in key order.
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

impl RpcError {
    pub fn new(
        severity: ErrorSeverity,
        error_type: ErrorType,
        tag: ErrorTag,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            error_type,
            tag,
            message: message.into(),
            info: BTreeMap::new(),
        }
    }

    /// Application-level error with severity `error`.
    pub fn application(tag: ErrorTag, message: impl Into<String>) -> Self {
        Self::new(ErrorSeverity::Error, ErrorType::Application, tag, message)
    }

    /// Attach an `error-info` entry.
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }

    /// The stable `(severity, type, tag)` triple.
    pub fn triple(&self) -> (ErrorSeverity, ErrorType, ErrorTag) {
        (self.severity, self.error_type, self.tag)
    }

    /// Render as a standalone `<rpc-error>` element in the base namespace.
    pub fn to_xml(&self) -> std::result::Result<String, quick_xml::Error> {
        let mut writer = Writer::new(Vec::new());
        self.write_xml(&mut writer, true)?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    pub(crate) fn write_xml(
        &self,
        writer: &mut Writer<Vec<u8>>,
        declare_namespace: bool,
    ) -> std::result::Result<(), quick_xml::Error> {
        let mut start = BytesStart::new("rpc-error");
        if declare_namespace {
            start.push_attribute(("xmlns", BASE_NAMESPACE));
        }
        writer.write_event(Event::Start(start))?;
        write_text_element(writer, "error-type", self.error_type.as_str())?;
        write_text_element(writer, "error-tag", self.tag.as_str())?;
        write_text_element(writer, "error-severity", self.severity.as_str())?;
        write_text_element(writer, "error-message", &self.message)?;
        if !self.info.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("error-info")))?;
            for (key, value) in &self.info {
                write_text_element(writer, key, value)?;
            }
            writer.write_event(Event::End(BytesEnd::new("error-info")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("rpc-error")))?;
        Ok(())
    }
}

pub(crate) fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> std::result::Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
