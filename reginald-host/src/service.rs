//! The `Service` capability both `PluginProcess` and the in-process
//! built-ins implement, so the lifecycle manager, store, and dispatcher
//! never need to know whether a plugin lives in a child process.

use anyhow::Result;
use async_trait::async_trait;
use reginald_protocol::wire::RequestId;
use serde_json::Value as Json;

/// A running plugin, out-of-process or built-in, that can be called and
/// notified by method name.
#[async_trait]
pub trait Service: Send + Sync {
    /// The plugin's declared name, for diagnostics and error messages.
    fn name(&self) -> &str;

    /// Issue a request and await its response, or the plugin's error
    /// payload on failure.
    async fn call(&self, method: &str, params: Json) -> Result<Json>;

    /// Send a one-way notification; no reply is awaited.
    async fn notify(&self, method: &str, params: Json) -> Result<()>;

    /// Request graceful shutdown, following with `exit`, waiting for
    /// termination up to an internal deadline before escalating to kill.
    async fn shutdown(&self) -> Result<()>;
}

/// Allocates monotonically increasing request IDs for one `Service`
/// instance's lifetime.
#[derive(Debug, Default)]
pub struct RequestIdAllocator {
    next: std::sync::atomic::AtomicI64,
}

impl RequestIdAllocator {
    /// Build an allocator starting at 1 (0 is reserved as "no request
    /// issued yet" in diagnostics).
    pub fn new() -> Self {
        Self {
            next: std::sync::atomic::AtomicI64::new(1),
        }
    }

    /// Allocate the next request ID.
    pub fn next(&self) -> RequestId {
        let id = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        RequestId::Number(id)
    }
}
