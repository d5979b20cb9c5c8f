//! `link`: the built-in task-only plugin that materializes symlinks,
//! optionally backing up whatever previously occupied the destination.

use crate::service::Service;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reginald_protocol::methods::{self, RunTaskParams};
use reginald_protocol::schema::{ConfigEntry, ConfigSchema, Manifest, Task};
use reginald_protocol::value::{KeyVal, Value, ValueKind};
use serde_json::Value as Json;
use std::path::{Path, PathBuf};

const TASK_TYPE: &str = "link.symlink";

/// The `link` built-in plugin.
pub struct LinkPlugin {
    manifest: Manifest,
}

impl Default for LinkPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkPlugin {
    /// Build the `link` plugin.
    pub fn new() -> Self {
        let manifest = Manifest {
            protocol: methods::PROTOCOL.name.to_string(),
            protocol_version: methods::PROTOCOL.version,
            name: "link".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            domain: "link".to_string(),
            description: "Materializes symlinks, with optional backup of the prior target".to_string(),
            help: String::new(),
            executable: String::new(),
            config: Vec::new(),
            commands: Vec::new(),
            tasks: vec![Task {
                name: TASK_TYPE.to_string(),
                description: "Create a symlink at `dest` pointing to `src`".to_string(),
                provides: "link".to_string(),
                config: vec![
                    ConfigSchema::Leaf(ConfigEntry {
                        key: "src".to_string(),
                        value: Value::path(""),
                        description: "Path the symlink should point to".to_string(),
                        kind: ValueKind::Path,
                        flag: None,
                        env_override: None,
                        flag_only: false,
                    }),
                    ConfigSchema::Leaf(ConfigEntry {
                        key: "dest".to_string(),
                        value: Value::path(""),
                        description: "Path at which to create the symlink".to_string(),
                        kind: ValueKind::Path,
                        flag: None,
                        env_override: None,
                        flag_only: false,
                    }),
                    ConfigSchema::Leaf(ConfigEntry {
                        key: "backup".to_string(),
                        value: Value::Bool(true),
                        description: "Rename an existing file at `dest` to `dest.bak` first".to_string(),
                        kind: ValueKind::Bool,
                        flag: None,
                        env_override: None,
                        flag_only: false,
                    }),
                ],
            }],
        };
        Self { manifest }
    }

    /// The manifest this plugin presents at handshake.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

fn require_str(config: &[KeyVal], key: &str) -> Result<String> {
    KeyVal::get(key, config)
        .ok_or_else(|| anyhow!("task config is missing `{key}`"))
        .and_then(|kv| kv.value.as_str().map(str::to_string).map_err(|e| anyhow!(e)))
}

fn require_bool(config: &[KeyVal], key: &str, default: bool) -> Result<bool> {
    match KeyVal::get(key, config) {
        Some(kv) => kv.value.as_bool().map_err(|e| anyhow!(e)),
        None => Ok(default),
    }
}

/// Create a symlink at `dest` pointing to `src`, backing up any existing
/// entry at `dest` first if `backup` is set.
pub fn link_symlink(src: &Path, dest: &Path, backup: bool) -> Result<()> {
    if dest.symlink_metadata().is_ok() {
        if backup {
            let backup_path = backup_path_for(dest);
            std::fs::rename(dest, &backup_path)
                .with_context(|| format!("failed to back up `{}` to `{}`", dest.display(), backup_path.display()))?;
        } else {
            std::fs::remove_file(dest)
                .or_else(|_| std::fs::remove_dir_all(dest))
                .with_context(|| format!("failed to remove existing `{}`", dest.display()))?;
        }
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory for `{}`", dest.display()))?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(src, dest)
        .with_context(|| format!("failed to symlink `{}` -> `{}`", dest.display(), src.display()))?;
    #[cfg(not(unix))]
    std::fs::hard_link(src, dest)
        .with_context(|| format!("failed to link `{}` -> `{}`", dest.display(), src.display()))?;

    Ok(())
}

fn backup_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    dest.with_file_name(name)
}

#[async_trait]
impl Service for LinkPlugin {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    async fn call(&self, method: &str, params: Json) -> Result<Json> {
        match method {
            methods::name::HANDSHAKE => Ok(serde_json::to_value(&self.manifest)?),
            methods::name::INITIALIZE => Ok(serde_json::json!({})),
            methods::name::RUN_TASK => {
                let params: RunTaskParams = serde_json::from_value(params)?;
                if params.task_type != TASK_TYPE {
                    return Err(anyhow!("`link` does not provide task type `{}`", params.task_type));
                }
                let src = PathBuf::from(require_str(&params.config, "src")?);
                let dest = PathBuf::from(require_str(&params.config, "dest")?);
                let backup = require_bool(&params.config, "backup", true)?;

                tokio::task::spawn_blocking(move || link_symlink(&src, &dest, backup)).await??;
                Ok(serde_json::json!({}))
            }
            methods::name::SHUTDOWN => Ok(Json::Null),
            other => Err(anyhow!(reginald_protocol::error::PpError::method_not_found(other))),
        }
    }

    async fn notify(&self, _method: &str, _params: Json) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"hello").unwrap();
        let dest = dir.path().join("dest.txt");

        link_symlink(&src, &dest, true).unwrap();
        #[cfg(unix)]
        assert!(dest.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello");
    }

    #[test]
    fn backs_up_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"new").unwrap();
        let dest = dir.path().join("dest.txt");
        std::fs::write(&dest, b"old").unwrap();

        link_symlink(&src, &dest, true).unwrap();
        let backup = dir.path().join("dest.txt.bak");
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "old");
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new");
    }

    #[tokio::test]
    async fn run_task_rejects_unknown_task_type() {
        let plugin = LinkPlugin::new();
        let params = serde_json::to_value(RunTaskParams {
            task_type: "link.bogus".to_string(),
            id: "link-0".to_string(),
            dir: "/tmp".to_string(),
            config: Vec::new(),
        })
        .unwrap();
        let err = plugin.call(methods::name::RUN_TASK, params).await.unwrap_err();
        assert!(err.to_string().contains("does not provide"));
    }
}
