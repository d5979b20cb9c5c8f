//! Example out-of-process plugin: a `fs` domain exposing both a direct
//! command and a declarative task for creating symlinks, to demonstrate
//! the two invocation paradigms a real plugin can mix.

use anyhow::{anyhow, Context, Result};
use reginald_protocol::runtime::{self, Logger, PluginHandler};
use reginald_protocol::schema::{ArgSpec, Command, ConfigEntry, ConfigSchema, Manifest, Task};
use reginald_protocol::value::{KeyVal, Value, ValueKind};
use serde_json::Value as Json;
use std::path::{Path, PathBuf};

const TASK_TYPE: &str = "fs.symlink";
const COMMAND_NAME: &str = "fs.link";

struct FsPlugin {
    logger: Option<Logger>,
}

impl FsPlugin {
    fn new() -> Self {
        Self { logger: None }
    }
}

impl PluginHandler for FsPlugin {
    fn name(&self) -> &str {
        "reginald-plugin-link"
    }

    fn manifest(&self) -> Manifest {
        Manifest {
            protocol: reginald_protocol::methods::PROTOCOL.name.to_string(),
            protocol_version: reginald_protocol::methods::PROTOCOL.version,
            name: "reginald-plugin-link".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            domain: "fs".to_string(),
            description: "Creates symlinks via a command or a declarative task".to_string(),
            help: String::new(),
            executable: String::new(),
            config: Vec::new(),
            commands: vec![Command {
                name: COMMAND_NAME.to_string(),
                usage: "fs.link <src> <dest>".to_string(),
                description: "Create a symlink at <dest> pointing to <src>".to_string(),
                help: String::new(),
                manual: String::new(),
                aliases: vec!["fs.ln".to_string()],
                args: ArgSpec { min: 2, max: 2 },
                config: Vec::new(),
                sub_commands: Vec::new(),
            }],
            tasks: vec![Task {
                name: TASK_TYPE.to_string(),
                description: "Create a symlink at `dest` pointing to `src`".to_string(),
                provides: "fs".to_string(),
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
                        value: Value::Bool(false),
                        description: "Rename an existing file at `dest` to `dest.bak` first".to_string(),
                        kind: ValueKind::Bool,
                        flag: None,
                        env_override: None,
                        flag_only: false,
                    }),
                ],
            }],
        }
    }

    fn attach_logger(&mut self, logger: Logger) {
        self.logger = Some(logger);
    }

    fn initialize(&mut self, _config: Vec<KeyVal>) -> Result<()> {
        Ok(())
    }

    fn run_command(&mut self, name: &str, args: Vec<String>) -> Result<Json> {
        if name != COMMAND_NAME {
            return Err(anyhow!("unknown command `{name}`"));
        }
        let src = PathBuf::from(&args[0]);
        let dest = PathBuf::from(&args[1]);
        create_symlink(&src, &dest, false)?;
        Ok(serde_json::json!({ "src": args[0], "dest": args[1] }))
    }

    fn run_task(&mut self, task_type: &str, _id: &str, _dir: &str, config: Vec<KeyVal>) -> Result<Json> {
        if task_type != TASK_TYPE {
            return Err(anyhow!("`fs` does not provide task type `{task_type}`"));
        }
        let src = PathBuf::from(require_str(&config, "src")?);
        let dest = PathBuf::from(require_str(&config, "dest")?);
        let backup = match KeyVal::get("backup", &config) {
            Some(kv) => kv.value.as_bool()?,
            None => false,
        };
        create_symlink(&src, &dest, backup)?;
        Ok(serde_json::json!({}))
    }
}

fn require_str(config: &[KeyVal], key: &str) -> Result<String> {
    KeyVal::get(key, config)
        .ok_or_else(|| anyhow!("task config is missing `{key}`"))
        .and_then(|kv| kv.value.as_str().map(str::to_string).map_err(|e| anyhow!(e)))
}

fn create_symlink(src: &Path, dest: &Path, backup: bool) -> Result<()> {
    if dest.symlink_metadata().is_ok() {
        if backup {
            let mut backup_name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            backup_name.push(".bak");
            let backup_path = dest.with_file_name(backup_name);
            std::fs::rename(dest, &backup_path)
                .with_context(|| format!("failed to back up `{}`", dest.display()))?;
        } else {
            std::fs::remove_file(dest)
                .with_context(|| format!("failed to remove existing `{}`", dest.display()))?;
        }
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(src, dest)
        .with_context(|| format!("failed to symlink `{}` -> `{}`", dest.display(), src.display()))?;
    #[cfg(not(unix))]
    std::fs::hard_link(src, dest)
        .with_context(|| format!("failed to link `{}` -> `{}`", dest.display(), src.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    runtime::serve(FsPlugin::new()).await
}
