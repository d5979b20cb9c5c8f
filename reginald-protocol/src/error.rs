//! Error types shared by the wire codec, value model, and plugin runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

/// Standard and domain-specific JSON-RPC error codes used by PP.
///
/// The standard range mirrors JSON-RPC 2.0; codes below `-32000` are
/// Reginald-specific domain errors.
pub mod code {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// `handshake` failed (protocol/version mismatch, empty name, invalid
    /// task or config declaration).
    pub const HANDSHAKE_FAILED: i64 = -32000;
    /// A config value did not resolve against its schema.
    pub const INVALID_CONFIG: i64 = -32001;
    /// A task entry referenced an unknown task type.
    pub const INVALID_TASK_TYPE: i64 = -32002;
}

/// A JSON-RPC-shaped error payload, exchanged on the wire and propagated
/// to callers with the plugin's error payload preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PpError {
    /// One of the codes in [`code`].
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,
}

impl PpError {
    /// Build an error with no structured data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data to an error.
    pub fn with_data(mut self, data: Json) -> Self {
        self.data = Some(data);
        self
    }

    /// Shorthand for a parse-error response.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(code::PARSE_ERROR, message)
    }

    /// Shorthand for an invalid-request response.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(code::INVALID_REQUEST, message)
    }

    /// Shorthand for a method-not-found response.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(code::METHOD_NOT_FOUND, format!("method `{method}` not found"))
    }

    /// Shorthand for an invalid-params response.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(code::INVALID_PARAMS, message)
    }

    /// Shorthand for an internal-error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(code::INTERNAL_ERROR, message)
    }

    /// Shorthand for a handshake-failure response.
    pub fn handshake_failed(message: impl Into<String>) -> Self {
        Self::new(code::HANDSHAKE_FAILED, message)
    }

    /// Shorthand for an invalid-config response.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(code::INVALID_CONFIG, message)
    }

    /// Shorthand for an invalid-task-type response.
    pub fn invalid_task_type(message: impl Into<String>) -> Self {
        Self::new(code::INVALID_TASK_TYPE, message)
    }
}

impl fmt::Display for PpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for PpError {}

/// Errors produced while decoding or validating a [`crate::value::Value`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValueError {
    /// A floating-point wire value had a fractional part and cannot become
    /// an `int` without silent narrowing.
    #[error("value `{0}` is not representable as an integer without loss")]
    NonIntegral(String),
    /// The raw JSON value's shape does not match any known [`crate::value::ValueKind`].
    #[error("value has an unrecognized or unsupported shape")]
    UnsupportedShape,
    /// A list contained elements of more than one kind.
    #[error("list elements are not homogeneous")]
    Heterogeneous,
    /// Caller asked to extract a `Value` as a kind it is not.
    #[error("value is of kind `{actual}`, expected `{expected}`")]
    KindMismatch {
        /// The kind found.
        actual: String,
        /// The kind requested.
        expected: String,
    },
    /// A key was looked up but not found in a `KeyVal` list.
    #[error("key `{0}` not found")]
    KeyNotFound(String),
}

/// Errors produced by the wire codec (framing + JSON-RPC envelope rules).
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A framing-level problem: missing/invalid `Content-Length`, or a
    /// header block that never terminated.
    #[error("framing error: {0}")]
    Framing(String),
    /// The stream ended before a complete message was read.
    #[error("end of stream")]
    Eof,
    /// The message failed envelope validation (bad `jsonrpc`, unknown
    /// field, ambiguous request/response/notification shape).
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The JSON body itself did not parse.
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
