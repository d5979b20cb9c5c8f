//! The command/task registry and dispatcher: indexes every loaded
//! plugin's `Command`/`Task` trees by domain-qualified name (and command
//! aliases), and routes `runCommand`/`runTask` to the owning plugin.

use crate::error::HostError;
use crate::lifecycle::LoadedPlugin;
use crate::service::Service;
use reginald_protocol::methods::{self, RunCommandParams, RunTaskParams};
use reginald_protocol::schema::{Command, Task, TaskConfig};
use std::collections::HashMap;
use std::sync::Arc;

struct CommandEntry {
    plugin: String,
    command: Command,
}

struct TaskEntry {
    plugin: String,
    task: Task,
}

/// The registry of loaded plugins' commands and tasks, and the dispatch
/// entry points used by the CLI and by `runTask` callers.
pub struct Store {
    services: HashMap<String, Arc<dyn Service>>,
    commands: HashMap<String, CommandEntry>,
    top_level: Vec<String>,
    tasks: HashMap<String, TaskEntry>,
}

impl Store {
    /// Build a store from the set of plugins that completed `initialize`.
    pub fn build(loaded: &[LoadedPlugin]) -> Result<Self, HostError> {
        let mut services = HashMap::new();
        let mut commands = HashMap::new();
        let mut top_level = Vec::new();
        let mut tasks = HashMap::new();

        for plugin in loaded {
            let name = plugin.manifest.name.clone();
            services.insert(name.clone(), Arc::clone(&plugin.service));

            for command in &plugin.manifest.commands {
                top_level.push(command.name.clone());
                index_command(&mut commands, &name, command)?;
            }

            for task in &plugin.manifest.tasks {
                if tasks.contains_key(&task.name) {
                    return Err(HostError::TaskGraph(format!(
                        "task type `{}` is declared by more than one plugin",
                        task.name
                    )));
                }
                tasks.insert(
                    task.name.clone(),
                    TaskEntry {
                        plugin: name.clone(),
                        task: task.clone(),
                    },
                );
            }
        }

        Ok(Self {
            services,
            commands,
            top_level,
            tasks,
        })
    }

    /// Every top-level command name, for `--list-commands` and CLI help.
    pub fn top_level_commands(&self) -> impl Iterator<Item = &Command> {
        self.top_level.iter().filter_map(move |name| self.commands.get(name)).map(|e| &e.command)
    }

    /// Every registered task type, for `--list-tasks`.
    pub fn task_types(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values().map(|e| &e.task)
    }

    /// A map of task-type name to [`Task`], used when materializing raw
    /// task config against the schemas the owning plugins declared.
    pub fn task_schemas(&self) -> HashMap<String, &Task> {
        self.tasks.iter().map(|(name, entry)| (name.clone(), &entry.task)).collect()
    }

    fn find_command(&self, name: &str) -> Option<&CommandEntry> {
        self.commands.get(name)
    }

    /// Run a command by name (or alias), forwarding to its owning
    /// plugin's `runCommand`.
    pub async fn run_command(&self, name: &str, args: Vec<String>) -> Result<serde_json::Value, HostError> {
        let entry = self
            .find_command(name)
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;

        if !entry.command.args.accepts(args.len()) {
            return Err(HostError::InvalidConfig {
                key: entry.command.name.clone(),
                message: format!(
                    "`{}` accepts {}..{} positional arguments, got {}",
                    entry.command.name,
                    entry.command.args.min,
                    if entry.command.args.max < 0 { "∞".to_string() } else { entry.command.args.max.to_string() },
                    args.len()
                ),
            });
        }

        let service = self
            .services
            .get(&entry.plugin)
            .ok_or_else(|| HostError::NotFound(entry.plugin.clone()))?;

        let params = RunCommandParams {
            name: entry.command.name.clone(),
            args,
        };
        service
            .call(methods::name::RUN_COMMAND, serde_json::to_value(params).unwrap())
            .await
            .map_err(|err| HostError::Disconnected(format!("{}: {err}", entry.plugin)))
    }

    /// Run one materialized task, forwarding to its owning plugin's
    /// `runTask`.
    pub async fn run_task(&self, task: &TaskConfig, dir: &str) -> Result<serde_json::Value, HostError> {
        let entry = self
            .tasks
            .get(&task.task_type)
            .ok_or_else(|| HostError::UnknownTaskType(task.task_type.clone()))?;

        let service = self
            .services
            .get(&entry.plugin)
            .ok_or_else(|| HostError::NotFound(entry.plugin.clone()))?;

        let params = RunTaskParams {
            task_type: task.task_type.clone(),
            id: task.id.clone(),
            dir: dir.to_string(),
            config: task.config.clone(),
        };
        service
            .call(methods::name::RUN_TASK, serde_json::to_value(params).unwrap())
            .await
            .map_err(|err| HostError::Disconnected(format!("{}: {err}", entry.plugin)))
    }
}

fn index_command(
    commands: &mut HashMap<String, CommandEntry>,
    plugin: &str,
    command: &Command,
) -> Result<(), HostError> {
    insert_unique(commands, &command.name, plugin, command)?;
    for alias in &command.aliases {
        insert_unique(commands, alias, plugin, command)?;
    }
    for sub in &command.sub_commands {
        index_command(commands, plugin, sub)?;
    }
    Ok(())
}

fn insert_unique(
    commands: &mut HashMap<String, CommandEntry>,
    key: &str,
    plugin: &str,
    command: &Command,
) -> Result<(), HostError> {
    if commands.contains_key(key) {
        return Err(HostError::TaskGraph(format!(
            "command name or alias `{key}` is registered more than once"
        )));
    }
    commands.insert(
        key.to_string(),
        CommandEntry {
            plugin: plugin.to_string(),
            command: command.clone(),
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reginald_protocol::schema::{ArgSpec, Manifest};
    use serde_json::json;

    struct StubService {
        name: String,
    }

    #[async_trait]
    impl Service for StubService {
        fn name(&self) -> &str {
            &self.name
        }
        async fn call(&self, method: &str, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            Ok(json!({"method": method, "params": params}))
        }
        async fn notify(&self, _method: &str, _params: serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn manifest_with_command() -> Manifest {
        Manifest {
            protocol: "rpp".to_string(),
            protocol_version: 0,
            name: "link".to_string(),
            version: "0.1.0".to_string(),
            domain: "link".to_string(),
            description: String::new(),
            help: String::new(),
            executable: String::new(),
            config: Vec::new(),
            commands: vec![Command {
                name: "link.copy".to_string(),
                usage: "link copy <src> <dst>".to_string(),
                description: String::new(),
                help: String::new(),
                manual: String::new(),
                aliases: vec!["cp".to_string()],
                args: ArgSpec { min: 2, max: 2 },
                config: Vec::new(),
                sub_commands: Vec::new(),
            }],
            tasks: Vec::new(),
        }
    }

    fn loaded_with(manifest: Manifest) -> LoadedPlugin {
        LoadedPlugin {
            service: Arc::new(StubService { name: manifest.name.clone() }),
            manifest,
        }
    }

    #[test]
    fn alias_resolves_to_same_command() {
        let store = Store::build(&[loaded_with(manifest_with_command())]).unwrap();
        assert!(store.find_command("link.copy").is_some());
        assert!(store.find_command("cp").is_some());
        assert!(store.find_command("missing").is_none());
    }

    #[tokio::test]
    async fn run_command_rejects_wrong_arg_count() {
        let store = Store::build(&[loaded_with(manifest_with_command())]).unwrap();
        let err = store.run_command("link.copy", vec!["only-one".to_string()]).await.unwrap_err();
        assert!(matches!(err, HostError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn run_command_dispatches_to_owning_plugin() {
        let store = Store::build(&[loaded_with(manifest_with_command())]).unwrap();
        let result = store
            .run_command("cp", vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(result["method"], methods::name::RUN_COMMAND);
    }

    #[test]
    fn duplicate_command_names_across_plugins_are_rejected() {
        let a = loaded_with(manifest_with_command());
        let mut b_manifest = manifest_with_command();
        b_manifest.name = "link2".to_string();
        let b = loaded_with(b_manifest);
        let err = Store::build(&[a, b]).unwrap_err();
        assert!(matches!(err, HostError::TaskGraph(_)));
    }
}
