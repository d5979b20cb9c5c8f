//! Host-side error taxonomy: framing/handshake/config/lifecycle failures
//! that never cross the wire, distinct from `reginald_protocol::PpError`
//! which is the error shape exchanged with plugins.

use reginald_protocol::error::WireError;
use std::path::PathBuf;

/// Errors produced by the host while managing plugins, resolving config,
/// and dispatching calls.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The plugin's process could not be spawned at all.
    #[error("failed to spawn plugin `{name}` from `{}`: {source}", path.display())]
    Spawn {
        /// Plugin name, as declared in its manifest or discovery entry.
        name: String,
        /// The executable path that failed to spawn.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A framing-level wire fault; the connection is treated as crashed.
    #[error("plugin `{name}` wire error: {source}")]
    Wire {
        /// Plugin name.
        name: String,
        /// The codec error.
        #[source]
        source: WireError,
    },

    /// `handshake` failed: protocol mismatch, empty name, or an invalid
    /// task/config declaration. Fatal for the offending plugin only.
    #[error("plugin `{name}` failed handshake: {message}")]
    HandshakeFailed {
        /// Plugin name.
        name: String,
        /// Human-readable failure detail.
        message: String,
    },

    /// A config value failed to resolve against its schema. Surfaced to
    /// the user verbatim; no default substitution.
    #[error("invalid config for `{key}`: {message}")]
    InvalidConfig {
        /// The config key (dot-joined schema path) that failed.
        key: String,
        /// Human-readable failure detail.
        message: String,
    },

    /// A raw task entry named an unknown task type.
    #[error("unknown task type `{0}`")]
    UnknownTaskType(String),

    /// Task materialization produced a duplicate ID or an unresolved
    /// `requires` reference.
    #[error("task materialization error: {0}")]
    TaskGraph(String),

    /// The plugin disconnected (EOF) while a call was still pending.
    #[error("plugin `{0}` disconnected")]
    Disconnected(String),

    /// A pending call was cancelled or exceeded its deadline.
    #[error("call to plugin `{plugin}` timed out after {elapsed_ms}ms")]
    Timeout {
        /// Plugin name.
        plugin: String,
        /// How long the host waited before giving up.
        elapsed_ms: u64,
    },

    /// The plugin's protocol-error budget was exhausted; it has been
    /// killed.
    #[error("plugin `{0}` exceeded its protocol-error budget and was killed")]
    ProtocolBudgetExhausted(String),

    /// No command or task is registered under this name.
    #[error("no command or task registered as `{0}`")]
    NotFound(String),

    /// A worker in a bulk operation panicked; the panic has been demoted
    /// to this error for the enclosing scope.
    #[error("plugin `{name}` worker panicked: {message}")]
    WorkerPanicked {
        /// Plugin name.
        name: String,
        /// The panic payload, stringified.
        message: String,
    },

    /// One or more tolerated failures accumulated during a bulk
    /// operation; only raised when strict mode is enabled.
    #[error("{0} plugin(s) failed during {1}")]
    Aggregate(usize, &'static str),
}
