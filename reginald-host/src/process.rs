//! `PluginProcess`: one running out-of-process plugin, its child handle,
//! and the reader/stderr/wait worker loop that keeps its pending-call
//! table honest.

use crate::error::HostError;
use crate::service::{RequestIdAllocator, Service};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reginald_protocol::error::WireError;
use reginald_protocol::methods::name;
use reginald_protocol::wire::{Message, Outcome, RequestId};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

/// Lock held only for synchronous insert/remove/drain, never across an
/// await point, so it uses a blocking mutex rather than `tokio::sync::Mutex`.
use parking_lot::Mutex as SyncMutex;

/// Default number of protocol violations tolerated before a plugin is
/// killed.
pub const DEFAULT_PROTOCOL_ERROR_BUDGET: u32 = 5;

/// Default deadline for `handshake`/`initialize` requests.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for graceful shutdown before escalating to kill.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

type PendingTable = SyncMutex<HashMap<i64, oneshot::Sender<Outcome>>>;

/// A running out-of-process plugin: its child handle, framed I/O, pending
/// call table, protocol-error budget, and a done signal the reader/wait
/// loops close on disconnect.
pub struct PluginProcess {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    executable: PathBuf,
    writer: Mutex<ChildStdin>,
    pending: PendingTable,
    ids: RequestIdAllocator,
    protocol_errors: AtomicU32,
    protocol_error_budget: u32,
    child: Mutex<Option<Child>>,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl PluginProcess {
    /// Spawn a plugin executable and start its reader/stderr/wait
    /// workers. Does not perform `handshake`; callers drive that over
    /// the returned handle via [`Service::call`].
    pub async fn spawn(
        name: impl Into<String>,
        executable: &Path,
        args: &[String],
        cwd: Option<&Path>,
        env: &HashMap<String, String>,
        protocol_error_budget: u32,
    ) -> Result<Self, HostError> {
        let name = name.into();
        let mut command = Command::new(executable);
        command.kill_on_drop(true);
        command.stdin(std::process::Stdio::piped());
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        for (key, value) in env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| HostError::Spawn {
            name: name.clone(),
            path: executable.to_path_buf(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::Spawn {
                name: name.clone(),
                path: executable.to_path_buf(),
                source: std::io::Error::other("stdin unavailable"),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Spawn {
                name: name.clone(),
                path: executable.to_path_buf(),
                source: std::io::Error::other("stdout unavailable"),
            })?;
        let stderr = child.stderr.take();

        let (done_tx, done_rx) = oneshot::channel();

        let process = Self {
            inner: Arc::new(Inner {
                name: name.clone(),
                executable: executable.to_path_buf(),
                writer: Mutex::new(stdin),
                pending: SyncMutex::new(HashMap::new()),
                ids: RequestIdAllocator::new(),
                protocol_errors: AtomicU32::new(0),
                protocol_error_budget,
                child: Mutex::new(Some(child)),
                done_tx: Mutex::new(Some(done_tx)),
            }),
        };

        process.spawn_reader_loop(stdout);
        if let Some(stderr) = stderr {
            process.spawn_stderr_loop(stderr);
        }
        process.spawn_wait_loop(done_rx);

        log::info!("spawned plugin `{name}` from `{}`", executable.display());
        Ok(process)
    }

    /// The plugin's executable path, as recorded at spawn time.
    pub fn executable(&self) -> &Path {
        &self.inner.executable
    }

    fn spawn_reader_loop(&self, stdout: ChildStdout) {
        let inner = Arc::clone(&self.inner);
        let mut reader = BufReader::new(stdout);

        tokio::spawn(async move {
            loop {
                match reginald_protocol::wire::read_message(&mut reader).await {
                    Ok(Message::Response { id, outcome }) => {
                        Self::route_response(&inner, id, outcome).await;
                    }
                    Ok(Message::Notification { method, params }) => {
                        Self::handle_notification(&inner, &method, params).await;
                    }
                    Ok(Message::Request { method, .. }) => {
                        log::warn!(
                            "plugin `{}` sent an unexpected request `{method}`",
                            inner.name
                        );
                        Self::count_protocol_error(&inner).await;
                    }
                    Err(WireError::Eof) => break,
                    Err(err) => {
                        log::warn!("plugin `{}` framing error: {err}", inner.name);
                        Self::count_protocol_error(&inner).await;
                    }
                }
            }

            Self::drain_pending_on_disconnect(&inner).await;
        });
    }

    async fn route_response(inner: &Arc<Inner>, id: RequestId, outcome: Outcome) {
        let RequestId::Number(id) = id else {
            log::warn!("plugin `{}` replied with a non-numeric id", inner.name);
            Self::count_protocol_error(inner).await;
            return;
        };
        let sender = inner.pending.lock().remove(&id);
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => {
                log::warn!(
                    "plugin `{}` responded to unknown request id {id}",
                    inner.name
                );
                Self::count_protocol_error(inner).await;
            }
        }
    }

    async fn handle_notification(inner: &Arc<Inner>, method: &str, params: Json) {
        if method != name::LOG {
            log::warn!("plugin `{}` sent unknown notification `{method}`", inner.name);
            Self::count_protocol_error(inner).await;
            return;
        }
        match serde_json::from_value::<reginald_protocol::methods::LogParams>(params) {
            Ok(log_params) => {
                relay_log(&inner.name, &log_params);
            }
            Err(err) => {
                log::warn!("plugin `{}` sent malformed log params: {err}", inner.name);
                Self::count_protocol_error(inner).await;
            }
        }
    }

    async fn count_protocol_error(inner: &Arc<Inner>) {
        let count = inner.protocol_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= inner.protocol_error_budget {
            log::error!(
                "plugin `{}` exceeded its protocol-error budget ({count}/{}), killing it",
                inner.name,
                inner.protocol_error_budget
            );
            Self::kill_inner(inner).await;
        }
    }

    fn spawn_stderr_loop(&self, stderr: ChildStderr) {
        let name = self.inner.name.clone();
        tokio::spawn(async move {
            use tokio::io::AsyncBufReadExt;
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::warn!("plugin `{name}` stderr: {line}");
            }
        });
    }

    fn spawn_wait_loop(&self, done_rx: oneshot::Receiver<()>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut child = {
                let mut guard = inner.child.lock().await;
                guard.take()
            };

            if let Some(child) = child.as_mut() {
                tokio::select! {
                    status = child.wait() => {
                        match status {
                            Ok(status) => log::info!("plugin `{}` exited: {status}", inner.name),
                            Err(err) => log::warn!("plugin `{}` wait() failed: {err}", inner.name),
                        }
                    }
                    _ = done_rx => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
            }

            Self::drain_pending_on_disconnect(&inner).await;
        });
    }

    async fn drain_pending_on_disconnect(inner: &Arc<Inner>) {
        let mut pending = inner.pending.lock();
        if pending.is_empty() {
            return;
        }
        log::warn!("plugin `{}` disconnected with pending calls", inner.name);
        for (_, sender) in pending.drain() {
            let _ = sender.send(Outcome::Error(reginald_protocol::error::PpError::internal(
                format!("plugin `{}` disconnected", inner.name),
            )));
        }
    }

    async fn kill_inner(inner: &Arc<Inner>) {
        if let Some(tx) = inner.done_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }

    async fn write_message(inner: &Inner, message: &Message) -> Result<()> {
        let mut writer = inner.writer.lock().await;
        let bytes = reginald_protocol::wire::encode(message);
        writer
            .write_all(&bytes)
            .await
            .context("failed to write to plugin stdin")?;
        writer.flush().await.context("failed to flush plugin stdin")
    }
}

fn relay_log(plugin_name: &str, params: &reginald_protocol::methods::LogParams) {
    use reginald_protocol::methods::LogLevel;
    let message = match &params.source {
        Some(source) => format!("plugin={plugin_name} source={source}: {}", params.message),
        None => format!("plugin={plugin_name}: {}", params.message),
    };
    match params.level {
        LogLevel::Trace => log::trace!("{message}"),
        LogLevel::Debug => log::debug!("{message}"),
        LogLevel::Info => log::info!("{message}"),
        LogLevel::Warn => log::warn!("{message}"),
        LogLevel::Error => log::error!("{message}"),
    }
}

#[async_trait]
impl Service for PluginProcess {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn call(&self, method: &str, params: Json) -> Result<Json> {
        let id = self.inner.ids.next();
        let RequestId::Number(raw_id) = &id else {
            unreachable!("RequestIdAllocator only issues numeric ids")
        };
        let raw_id = *raw_id;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(raw_id, tx);

        if let Err(err) =
            Self::write_message(&self.inner, &Message::request(id, method, params)).await
        {
            self.inner.pending.lock().remove(&raw_id);
            return Err(err);
        }

        match rx.await {
            Ok(Outcome::Success(result)) => Ok(result),
            Ok(Outcome::Error(err)) => Err(anyhow!(err)),
            Err(_) => Err(HostError::Disconnected(self.inner.name.clone()).into()),
        }
    }

    async fn notify(&self, method: &str, params: Json) -> Result<()> {
        Self::write_message(&self.inner, &Message::notification(method, params)).await
    }

    async fn shutdown(&self) -> Result<()> {
        if let Err(err) = self.call(name::SHUTDOWN, Json::Null).await {
            log::warn!("plugin `{}` shutdown call failed: {err}", self.inner.name);
        }
        if let Err(err) = self.notify(name::EXIT, Json::Null).await {
            log::warn!("plugin `{}` exit notification failed: {err}", self.inner.name);
        }

        let mut child = self.inner.child.lock().await;
        if let Some(child) = child.as_mut() {
            match timeout(DEFAULT_SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => log::info!("plugin `{}` exited: {status}", self.inner.name),
                Ok(Err(err)) => log::warn!("plugin `{}` wait() failed: {err}", self.inner.name),
                Err(_) => {
                    log::warn!(
                        "plugin `{}` did not exit within {:?}, killing",
                        self.inner.name,
                        DEFAULT_SHUTDOWN_TIMEOUT
                    );
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.try_lock() {
            if let Some(mut child) = child.take() {
                if let Err(err) = child.start_kill() {
                    log::warn!("failed to kill plugin `{}` during drop: {err}", self.name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_allocator_is_monotonic() {
        let ids = RequestIdAllocator::new();
        let RequestId::Number(a) = ids.next() else { panic!() };
        let RequestId::Number(b) = ids.next() else { panic!() };
        assert!(b > a);
    }
}
