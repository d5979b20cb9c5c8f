use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reginald_host::config_resolver::{self, NoFlags, ResolveCtx};
use reginald_host::lifecycle::{self, Mode};
use reginald_host::process::DEFAULT_HANDSHAKE_TIMEOUT;
use reginald_host::{builtin, config_file, store::Store};
use reginald_protocol::methods::LoggingConfig;
use reginald_protocol::schema::TaskConfig;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "reginald", author, version, about = "Plugin host and task orchestrator")]
struct Cli {
    /// Path to the config file. Defaults to the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to search for plugin executables. Repeatable.
    #[arg(long = "plugin-dir")]
    plugin_dir: Vec<PathBuf>,

    /// Fail on the first plugin error instead of logging and continuing.
    #[arg(long)]
    strict: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// List every top-level command exported by a loaded plugin, then exit.
    #[arg(long = "list-commands")]
    list_commands: bool,

    /// List every task type exported by a loaded plugin, then exit.
    #[arg(long = "list-tasks")]
    list_tasks: bool,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Run one task, by ID, from the config file's `tasks` list.
    RunTask {
        /// The task's `id`, as declared or auto-assigned in the config file.
        task_id: String,
    },
    /// Any other token is treated as a plugin command name, with the
    /// remaining tokens passed as its positional arguments.
    #[command(external_subcommand)]
    Command(Vec<String>),
}

fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io.github", "reginald-project", "reginald")
        .context("could not determine the platform config directory")?;
    Ok(dirs.config_dir().join("reginald.toml"))
}

fn default_plugin_dirs() -> Result<Vec<PathBuf>> {
    let dirs = directories::ProjectDirs::from("io.github", "reginald-project", "reginald")
        .context("could not determine the platform data directory")?;
    Ok(vec![dirs.data_dir().join("plugins")])
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info,reginald_host=debug,reginald=debug");
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let plugin_dirs = if cli.plugin_dir.is_empty() {
        default_plugin_dirs()?
    } else {
        cli.plugin_dir.clone()
    };
    let mode = if cli.strict { Mode::Strict } else { Mode::Tolerant };

    let raw_config = config_file::load(&config_path)?;
    let base_dir = config_file::base_dir(&config_path);
    let env: HashMap<String, String> = std::env::vars().collect();
    let os = std::env::consts::OS;
    let flags = NoFlags;
    let ctx = ResolveCtx {
        os,
        base_dir: &base_dir,
        env: &env,
        flags: &flags,
    };

    let candidates = lifecycle::discover(&plugin_dirs, mode)?;
    let discovered = lifecycle::load_all(candidates, mode, DEFAULT_HANDSHAKE_TIMEOUT).await?;
    let mut loaded = builtin::load(&discovered);
    loaded.extend(discovered);

    let mut configs = HashMap::new();
    for plugin in &loaded {
        let raw_section = raw_config.get(&plugin.manifest.name);
        let resolved = config_resolver::resolve_schema_list(&plugin.manifest.config, raw_section, &ctx)
            .with_context(|| format!("resolving config for plugin `{}`", plugin.manifest.name))?;
        configs.insert(plugin.manifest.name.clone(), resolved);
    }

    let logging = LoggingConfig {
        enabled: true,
        level: if cli.verbose { "debug".to_string() } else { "info".to_string() },
    };
    lifecycle::initialize_all(&loaded, &configs, logging, mode, DEFAULT_HANDSHAKE_TIMEOUT).await?;

    let store = Store::build(&loaded)?;

    if cli.list_commands {
        for command in store.top_level_commands() {
            println!("{:<24} {}", command.name, command.description);
        }
        lifecycle::shutdown_all(loaded).await;
        return Ok(());
    }

    if cli.list_tasks {
        for task in store.task_types() {
            println!("{:<24} {}", task.name, task.description);
        }
        lifecycle::shutdown_all(loaded).await;
        return Ok(());
    }

    let result = match cli.action {
        Some(Action::RunTask { task_id }) => run_task_by_id(&store, &raw_config, &ctx, &task_id, &base_dir).await,
        Some(Action::Command(parts)) => run_command(&store, parts).await,
        None => {
            eprintln!("no command given; pass a plugin command, --list-commands, or --list-tasks");
            Ok(())
        }
    };

    lifecycle::shutdown_all(loaded).await;
    result
}

async fn run_command(store: &Store, parts: Vec<String>) -> Result<()> {
    let Some((name, args)) = parts.split_first() else {
        anyhow::bail!("no command given");
    };
    let result = store.run_command(name, args.to_vec()).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_task_by_id(
    store: &Store,
    raw_config: &serde_json::Value,
    ctx: &ResolveCtx<'_>,
    task_id: &str,
    dir: &std::path::Path,
) -> Result<()> {
    let task_types = store.task_schemas();
    let raw_tasks: Vec<serde_json::Value> = raw_config
        .get("tasks")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();

    let tasks: Vec<TaskConfig> = config_resolver::materialize_tasks(&raw_tasks, &task_types, ctx)?;
    let task = tasks
        .iter()
        .find(|t| t.id == task_id)
        .ok_or_else(|| anyhow::anyhow!("no task with id `{task_id}` in the config file"))?;

    let result = store.run_task(task, &dir.display().to_string()).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
