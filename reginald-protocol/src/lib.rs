//! Shared wire protocol, value model, and plugin runtime for Reginald.
//!
//! This crate is linked by both the host binary and every out-of-process
//! plugin: it owns the framing codec, the JSON-RPC-2.0 envelope, the
//! typed `Value`/config-schema model exchanged during `handshake`, and a
//! small runtime plugin binaries use to implement their side of the
//! protocol without hand-rolling the state machine.

#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod error;
pub mod methods;
pub mod runtime;
pub mod schema;
pub mod value;
pub mod wire;

pub use error::{PpError, ValueError, WireError};
pub use schema::{Command, ConfigEntry, ConfigSchema, Manifest, Task, TaskConfig};
pub use value::{KeyVal, Value, ValueKind};
pub use wire::{Message, Outcome, RequestId};
