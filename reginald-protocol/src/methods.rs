//! Method names and typed parameter/result payloads for the PP method
//! protocol.

use crate::schema::Manifest;
use crate::value::KeyVal;
use serde::{Deserialize, Serialize};

/// Method name constants. Case-sensitive.
pub mod name {
    /// First call on a fresh connection.
    pub const HANDSHAKE: &str = "handshake";
    /// Sent after full config resolution.
    pub const INITIALIZE: &str = "initialize";
    /// Run a single command invocation.
    pub const RUN_COMMAND: &str = "runCommand";
    /// Run a single task invocation.
    pub const RUN_TASK: &str = "runTask";
    /// Begin graceful shutdown.
    pub const SHUTDOWN: &str = "shutdown";
    /// Terminal notification; plugin MUST NOT emit further messages after.
    pub const EXIT: &str = "exit";
    /// Plugin -> host log notification.
    pub const LOG: &str = "log";
}

/// The protocol identity both sides must agree on: name `"rpp"`,
/// integer version `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolIdentity {
    /// Protocol name.
    pub name: &'static str,
    /// Protocol version.
    pub version: u32,
}

/// The current, and so far only, protocol revision.
pub const PROTOCOL: ProtocolIdentity = ProtocolIdentity {
    name: "rpp",
    version: 0,
};

/// `handshake` request params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HandshakeParams {
    /// Protocol name the host speaks.
    pub protocol: String,
    /// Protocol version the host speaks.
    pub protocol_version: u32,
}

/// `handshake` result: the plugin's manifest, which already carries the
/// `{protocol, protocolVersion}` identity fields, so no separate wrapper
/// type is needed.
pub type HandshakeResult = Manifest;

/// Logging configuration forwarded during `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Whether the plugin should emit `log` notifications at all.
    pub enabled: bool,
    /// Minimum level the plugin should emit, e.g. `"info"`.
    pub level: String,
}

/// `initialize` request params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitializeParams {
    /// Fully resolved config values for this plugin.
    pub config: Vec<KeyVal>,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// `initialize` result: empty on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitializeResult {}

/// `runCommand` request params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunCommandParams {
    /// Domain-qualified command name.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<String>,
}

/// `runTask` request params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunTaskParams {
    /// Task-type name.
    #[serde(rename = "type")]
    pub task_type: String,
    /// The materialized task's unique ID.
    pub id: String,
    /// Working directory for the task invocation.
    pub dir: String,
    /// Resolved task config values.
    pub config: Vec<KeyVal>,
}

/// Severity of a `log` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Fine-grained diagnostic detail.
    Trace,
    /// Debug-level detail.
    Debug,
    /// Normal informational messages.
    Info,
    /// Recoverable problems.
    Warn,
    /// Unrecoverable problems.
    Error,
}

/// `log` notification params (plugin -> host).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogParams {
    /// RFC 3339 timestamp assigned by the plugin.
    pub time: String,
    /// Severity.
    pub level: LogLevel,
    /// Log message.
    pub message: String,
    /// Optional source identifier (module, file, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Optional structured attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<serde_json::Value>,
}
