//! Discovery of candidate plugin executables and bulk load/initialize/
//! shutdown operations, run one worker per plugin under a single
//! cancellation scope.

use crate::error::HostError;
use crate::process::{PluginProcess, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_PROTOCOL_ERROR_BUDGET};
use crate::service::Service;
use futures::FutureExt;
use reginald_protocol::methods::{self, HandshakeParams, InitializeParams, LoggingConfig};
use reginald_protocol::schema::Manifest;
use reginald_protocol::value::KeyVal;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Whether a bulk operation fails fast on the first plugin error, or
/// tolerates individual failures and continues with the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The first plugin error cancels every other in-flight worker and
    /// is propagated to the caller.
    Strict,
    /// Plugin errors are logged, the offending plugin is dropped, and
    /// the remainder of the batch continues.
    Tolerant,
}

/// A plugin executable found during discovery, not yet spawned.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Logical name (the executable's file stem).
    pub name: String,
    /// Absolute path to the executable.
    pub path: PathBuf,
}

/// Enumerate executable files across a list of search-path directories.
///
/// Missing or unreadable directories are reported per directory; whether
/// that is fatal is left to the caller's [`Mode`].
pub fn discover(search_paths: &[PathBuf], mode: Mode) -> Result<Vec<Candidate>, HostError> {
    let mut candidates = Vec::new();

    for dir in search_paths {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                if mode == Mode::Strict {
                    return Err(HostError::Spawn {
                        name: dir.display().to_string(),
                        path: dir.clone(),
                        source: err,
                    });
                }
                log::warn!("skipping plugin search path `{}`: {err}", dir.display());
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !is_executable(&path) {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            candidates.push(Candidate { name, path });
        }
    }

    Ok(candidates)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// A plugin that has been spawned and handshaked, but not yet
/// initialized.
pub struct LoadedPlugin {
    /// Handle used for all further calls.
    pub service: Arc<dyn Service>,
    /// The plugin's self-description, as returned from `handshake`.
    pub manifest: Manifest,
}

/// Spawn and handshake every candidate concurrently.
///
/// In [`Mode::Strict`], the first failure cancels every other in-flight
/// worker and is returned as [`HostError::Aggregate`]; in
/// [`Mode::Tolerant`] failures are logged and the offending plugin is
/// simply absent from the result.
pub async fn load_all(
    candidates: Vec<Candidate>,
    mode: Mode,
    handshake_timeout: Duration,
) -> Result<Vec<LoadedPlugin>, HostError> {
    let cancel = CancellationToken::new();
    let mut joins = JoinSet::new();

    for candidate in candidates {
        let cancel = cancel.clone();
        joins.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = run_guarded(load_one(candidate.clone(), handshake_timeout)) => Some((candidate, result)),
            }
        });
    }

    let mut loaded = Vec::new();
    let mut failures = 0usize;

    while let Some(outcome) = joins.join_next().await {
        let Some((candidate, result)) = outcome.map_err(|err| HostError::WorkerPanicked {
            name: "<unknown>".to_string(),
            message: err.to_string(),
        })?
        else {
            continue;
        };

        match result {
            Ok(plugin) => loaded.push(plugin),
            Err(err) => {
                failures += 1;
                log::error!("failed to load plugin `{}`: {err}", candidate.name);
                if mode == Mode::Strict {
                    cancel.cancel();
                }
            }
        }
    }

    if mode == Mode::Strict && failures > 0 {
        return Err(HostError::Aggregate(failures, "load"));
    }

    Ok(loaded)
}

async fn load_one(
    candidate: Candidate,
    handshake_timeout: Duration,
) -> Result<LoadedPlugin, HostError> {
    let process = PluginProcess::spawn(
        &candidate.name,
        &candidate.path,
        &[],
        None,
        &HashMap::new(),
        DEFAULT_PROTOCOL_ERROR_BUDGET,
    )
    .await?;

    let params = HandshakeParams {
        protocol: methods::PROTOCOL.name.to_string(),
        protocol_version: methods::PROTOCOL.version,
    };

    let result = tokio::time::timeout(
        handshake_timeout,
        process.call(methods::name::HANDSHAKE, serde_json::to_value(params).unwrap()),
    )
    .await
    .map_err(|_| HostError::Timeout {
        plugin: candidate.name.clone(),
        elapsed_ms: handshake_timeout.as_millis() as u64,
    })?
    .map_err(|err| HostError::HandshakeFailed {
        name: candidate.name.clone(),
        message: err.to_string(),
    })?;

    let mut manifest: Manifest = serde_json::from_value(result).map_err(|err| HostError::HandshakeFailed {
        name: candidate.name.clone(),
        message: format!("manifest did not match expected shape: {err}"),
    })?;

    if manifest.name.is_empty() {
        return Err(HostError::HandshakeFailed {
            name: candidate.name.clone(),
            message: "manifest has an empty name".to_string(),
        });
    }

    manifest.executable = candidate.path.display().to_string();

    Ok(LoadedPlugin {
        service: Arc::new(process),
        manifest,
    })
}

/// Send `initialize` to every loaded plugin with its resolved config.
pub async fn initialize_all(
    loaded: &[LoadedPlugin],
    configs: &HashMap<String, Vec<KeyVal>>,
    logging: LoggingConfig,
    mode: Mode,
    handshake_timeout: Duration,
) -> Result<(), HostError> {
    let cancel = CancellationToken::new();
    let mut joins = JoinSet::new();

    for plugin in loaded {
        let service = Arc::clone(&plugin.service);
        let name = plugin.manifest.name.clone();
        let config = configs.get(&name).cloned().unwrap_or_default();
        let logging = logging.clone();
        let cancel = cancel.clone();

        joins.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = run_guarded(initialize_one(service, config, logging, handshake_timeout)) => Some((name, result)),
            }
        });
    }

    let mut failures = 0usize;
    while let Some(outcome) = joins.join_next().await {
        let Some((name, result)) = outcome.map_err(|err| HostError::WorkerPanicked {
            name: "<unknown>".to_string(),
            message: err.to_string(),
        })?
        else {
            continue;
        };

        if let Err(err) = result {
            failures += 1;
            log::error!("failed to initialize plugin `{name}`: {err}");
            if mode == Mode::Strict {
                cancel.cancel();
            }
        }
    }

    if mode == Mode::Strict && failures > 0 {
        return Err(HostError::Aggregate(failures, "initialize"));
    }
    Ok(())
}

async fn initialize_one(
    service: Arc<dyn Service>,
    config: Vec<KeyVal>,
    logging: LoggingConfig,
    timeout_duration: Duration,
) -> Result<(), HostError> {
    let params = InitializeParams { config, logging };
    tokio::time::timeout(
        timeout_duration,
        service.call(methods::name::INITIALIZE, serde_json::to_value(params).unwrap()),
    )
    .await
    .map_err(|_| HostError::Timeout {
        plugin: service.name().to_string(),
        elapsed_ms: timeout_duration.as_millis() as u64,
    })?
    .map_err(|err| HostError::HandshakeFailed {
        name: service.name().to_string(),
        message: err.to_string(),
    })?;
    Ok(())
}

/// Shut down every loaded plugin concurrently, best-effort.
pub async fn shutdown_all(loaded: Vec<LoadedPlugin>) {
    let mut joins = JoinSet::new();
    for plugin in loaded {
        let name = plugin.manifest.name.clone();
        let service = Arc::clone(&plugin.service);
        joins.spawn(async move {
            if let Err(err) = run_guarded(async move { service.shutdown().await.map_err(|e| anyhow::anyhow!(e)) }).await {
                log::warn!("plugin `{name}` failed to shut down cleanly: {err}");
            }
        });
    }
    while joins.join_next().await.is_some() {}
}

/// Run `fut`, converting a panic into a [`HostError::WorkerPanicked`]
/// rather than letting it unwind across the worker boundary.
async fn run_guarded<F, T>(fut: F) -> Result<T, HostError>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(HostError::HandshakeFailed {
            name: "<plugin>".to_string(),
            message: err.to_string(),
        }),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(HostError::WorkerPanicked {
                name: "<plugin>".to_string(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn discover_filters_non_executable_files() {
        let dir = tempfile::tempdir().unwrap();
        let exe_path = dir.path().join("plugin-a");
        {
            let mut file = std::fs::File::create(&exe_path).unwrap();
            file.write_all(b"#!/bin/sh\n").unwrap();
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&exe_path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&exe_path, perms).unwrap();
        }
        std::fs::File::create(dir.path().join("readme.txt")).unwrap();

        let found = discover(&[dir.path().to_path_buf()], Mode::Tolerant).unwrap();
        #[cfg(unix)]
        assert_eq!(found.len(), 1);
        #[cfg(not(unix))]
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn discover_tolerates_missing_directory() {
        let found = discover(&[PathBuf::from("/nonexistent/path")], Mode::Tolerant).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn discover_strict_fails_on_missing_directory() {
        let err = discover(&[PathBuf::from("/nonexistent/path")], Mode::Strict).unwrap_err();
        assert!(matches!(err, HostError::Spawn { .. }));
    }
}
