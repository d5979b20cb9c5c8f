//! A small runtime plugin authors link against to speak PP without
//! re-implementing framing or the handshake/initialize/shutdown state
//! machine.
//!
//! Three pieces: a trait the plugin implements, a registrar for declaring
//! commands/tasks, and a blocking `serve()` entry point plugin binaries
//! call from `main()`.

use crate::error::PpError;
use crate::methods::{
    name, HandshakeParams, HandshakeResult, InitializeParams, InitializeResult, LogLevel,
    LogParams, RunCommandParams, RunTaskParams,
};
use crate::schema::{Command, Manifest, Task};
use crate::value::KeyVal;
use crate::wire::{Message, Outcome, RequestId};
use anyhow::{anyhow, Context, Result};
use log::{debug, error, trace};
use serde_json::Value as Json;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Implemented by a plugin binary to participate in the PP runtime.
pub trait PluginHandler: Send {
    /// Name used in diagnostics; need not match `Manifest::name` but
    /// usually does.
    fn name(&self) -> &str;

    /// Build this plugin's manifest (minus `protocol`/`protocolVersion`,
    /// which `serve()` fills in).
    fn manifest(&self) -> Manifest;

    /// Called once before `handshake` is answered, handing the plugin a
    /// handle it can use to emit `log` notifications for the rest of its
    /// lifetime.
    fn attach_logger(&mut self, _logger: Logger) {}

    /// Validate and store resolved config, sent via `initialize`.
    fn initialize(&mut self, config: Vec<KeyVal>) -> Result<()>;

    /// Run a command by domain-qualified name.
    fn run_command(&mut self, name: &str, args: Vec<String>) -> Result<Json>;

    /// Run a task invocation.
    fn run_task(&mut self, task_type: &str, id: &str, dir: &str, config: Vec<KeyVal>) -> Result<Json>;
}

/// Declares commands/tasks incrementally rather than assembling them by
/// hand in [`PluginHandler::manifest`]; most plugins will still just build
/// the lists directly, but this is convenient for plugins that register
/// commands across several modules.
#[derive(Default)]
pub struct Registrar {
    commands: Vec<Command>,
    tasks: Vec<Task>,
}

impl Registrar {
    /// Register a command.
    pub fn register_command(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Register a task type.
    pub fn register_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Consume the registrar, returning the accumulated commands and tasks.
    pub fn into_parts(self) -> (Vec<Command>, Vec<Task>) {
        (self.commands, self.tasks)
    }
}

/// Emits `log` notifications from plugin code back to the host.
///
/// Cheaply `Clone`: every clone shares the same underlying writer behind a
/// mutex, so concurrent `log()` calls from within a single plugin process
/// interleave safely.
#[derive(Clone)]
pub struct Logger {
    writer: std::sync::Arc<Mutex<BoxedWriter>>,
    plugin_name: String,
}

impl Logger {
    /// Emit one `log` notification.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<()> {
        let params = LogParams {
            time: now_rfc3339(),
            level,
            message: message.into(),
            source: Some(self.plugin_name.clone()),
            attrs: None,
        };
        let message = Message::notification(name::LOG, serde_json::to_value(params)?);
        let mut writer = self.writer.lock().await;
        crate::wire::write_message(&mut *writer, &message)
            .await
            .context("failed to write log notification")
    }
}

fn now_rfc3339() -> String {
    // Plugins have no reason to depend on a timezone-aware crate; the host
    // only uses this for display, so a coarse UTC-offset-free stamp from
    // `SystemTime` is sufficient.
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}Z", now.as_secs(), now.subsec_millis())
}

/// Run the plugin event loop to completion over stdin/stdout.
///
/// Implements the callee side of the `spawned -> handshaked ->
/// initialized -> active -> draining -> terminated` state machine. Blocks
/// the calling thread's async runtime until `exit` is received or stdin
/// closes.
pub async fn serve<P: PluginHandler>(mut plugin: P) -> Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    serve_on(&mut plugin, stdin, stdout).await
}

/// Plugin state machine stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Spawned,
    Handshaked,
    Initialized,
    Draining,
}

/// Same as [`serve`] but over caller-supplied streams, so tests can drive
/// a `PluginHandler` through an in-memory duplex pipe instead of real
/// stdio.
pub async fn serve_on<P, R, W>(plugin: &mut P, mut input: R, output: W) -> Result<()>
where
    P: PluginHandler,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer: std::sync::Arc<Mutex<BoxedWriter>> =
        std::sync::Arc::new(Mutex::new(Box::new(output)));
    plugin.attach_logger(Logger {
        writer: writer.clone(),
        plugin_name: plugin.name().to_string(),
    });

    let mut stage = Stage::Spawned;

    loop {
        let message = match crate::wire::read_message(&mut input).await {
            Ok(m) => m,
            Err(crate::error::WireError::Eof) => break,
            Err(err) => return Err(anyhow!("plugin `{}`: {err}", plugin.name())),
        };

        match message {
            Message::Request { id, method, params } => {
                if stage == Stage::Draining && method != name::EXIT {
                    let err = PpError::invalid_request(format!(
                        "plugin is draining, `{method}` is not permitted"
                    ));
                    send(&writer, Message::error(id, err)).await?;
                    continue;
                }

                match dispatch_request(plugin, &mut stage, &method, params).await {
                    Ok(result) => send(&writer, Message::success(id, result)).await?,
                    Err(err) => send(&writer, Message::error(id, err)).await?,
                }
            }
            Message::Notification { method, params } => {
                if method == name::EXIT {
                    debug!("{} received exit, terminating", plugin.name());
                    break;
                }
                trace!("{} ignoring unexpected notification `{method}`: {params:?}", plugin.name());
            }
            Message::Response { .. } => {
                error!(
                    "{} received an unexpected response-shaped message",
                    plugin.name()
                );
            }
        }
    }

    Ok(())
}

async fn dispatch_request<P: PluginHandler>(
    plugin: &mut P,
    stage: &mut Stage,
    method: &str,
    params: Json,
) -> Result<Json, PpError> {
    match method {
        name::HANDSHAKE => {
            if *stage != Stage::Spawned {
                return Err(PpError::invalid_request("duplicate handshake"));
            }
            let params: HandshakeParams = serde_json::from_value(params)
                .map_err(|e| PpError::invalid_params(e.to_string()))?;
            if params.protocol != crate::methods::PROTOCOL.name {
                return Err(PpError::handshake_failed(format!(
                    "unknown protocol `{}`",
                    params.protocol
                )));
            }
            if params.protocol_version != crate::methods::PROTOCOL.version {
                return Err(PpError::handshake_failed(format!(
                    "unsupported protocol version {}",
                    params.protocol_version
                )));
            }
            let manifest = plugin.manifest();
            if manifest.name.is_empty() {
                return Err(PpError::handshake_failed("plugin manifest has an empty name"));
            }
            validate_task_config_bindings(&manifest)?;
            *stage = Stage::Handshaked;
            let result: HandshakeResult = manifest;
            serde_json::to_value(result).map_err(|e| PpError::internal(e.to_string()))
        }
        name::INITIALIZE => {
            if *stage != Stage::Handshaked {
                return Err(PpError::invalid_request("initialize before handshake"));
            }
            let params: InitializeParams = serde_json::from_value(params)
                .map_err(|e| PpError::invalid_params(e.to_string()))?;
            plugin
                .initialize(params.config)
                .map_err(|e| PpError::invalid_config(e.to_string()))?;
            *stage = Stage::Initialized;
            serde_json::to_value(InitializeResult {}).map_err(|e| PpError::internal(e.to_string()))
        }
        name::RUN_COMMAND => {
            if *stage != Stage::Initialized {
                return Err(PpError::invalid_request("runCommand before initialize"));
            }
            let params: RunCommandParams = serde_json::from_value(params)
                .map_err(|e| PpError::invalid_params(e.to_string()))?;
            plugin
                .run_command(&params.name, params.args)
                .map_err(|e| PpError::internal(e.to_string()))
        }
        name::RUN_TASK => {
            if *stage != Stage::Initialized {
                return Err(PpError::invalid_request("runTask before initialize"));
            }
            let params: RunTaskParams = serde_json::from_value(params)
                .map_err(|e| PpError::invalid_params(e.to_string()))?;
            plugin
                .run_task(&params.task_type, &params.id, &params.dir, params.config)
                .map_err(|e| PpError::internal(e.to_string()))
        }
        name::SHUTDOWN => {
            *stage = Stage::Draining;
            Ok(Json::Null)
        }
        other => Err(PpError::method_not_found(other)),
    }
}

/// Rejects a task declaring a CLI flag binding for one of its own config
/// entries, or a `flag_only` entry — both are only meaningful for
/// command/plugin-wide config, not task config.
fn validate_task_config_bindings(manifest: &Manifest) -> Result<(), PpError> {
    for task in &manifest.tasks {
        for schema in &task.config {
            for entry in schema.leaves() {
                if entry.flag.is_some() {
                    return Err(PpError::handshake_failed(format!(
                        "task `{}` config entry `{}` declares a CLI flag binding",
                        task.name, entry.key
                    )));
                }
                if entry.flag_only {
                    return Err(PpError::handshake_failed(format!(
                        "task `{}` config entry `{}` is flag-only",
                        task.name, entry.key
                    )));
                }
            }
        }
    }
    Ok(())
}

async fn send(writer: &std::sync::Arc<Mutex<BoxedWriter>>, message: Message) -> Result<()> {
    let mut writer = writer.lock().await;
    crate::wire::write_message(&mut *writer, &message)
        .await
        .context("failed to write PP message")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArgSpec, ConfigSchema};
    use crate::value::Value;
    use tokio::io::duplex;

    struct EchoPlugin {
        initialized_with: Vec<KeyVal>,
    }

    impl PluginHandler for EchoPlugin {
        fn name(&self) -> &str {
            "echo"
        }

        fn manifest(&self) -> Manifest {
            Manifest {
                protocol: crate::methods::PROTOCOL.name.to_string(),
                protocol_version: crate::methods::PROTOCOL.version,
                name: "echo".to_string(),
                version: "0.1.0".to_string(),
                domain: "echo".to_string(),
                description: "test plugin".to_string(),
                help: String::new(),
                executable: String::new(),
                config: vec![],
                commands: vec![Command {
                    name: "echo.say".to_string(),
                    usage: "echo.say <msg>".to_string(),
                    description: "echoes input".to_string(),
                    help: String::new(),
                    manual: String::new(),
                    aliases: vec![],
                    args: ArgSpec { min: 1, max: 1 },
                    config: vec![],
                    sub_commands: vec![],
                }],
                tasks: vec![],
            }
        }

        fn initialize(&mut self, config: Vec<KeyVal>) -> Result<()> {
            self.initialized_with = config;
            Ok(())
        }

        fn run_command(&mut self, name: &str, args: Vec<String>) -> Result<Json> {
            if name != "echo.say" {
                return Err(anyhow!("unknown command `{name}`"));
            }
            Ok(serde_json::json!({ "echoed": args }))
        }

        fn run_task(&mut self, _t: &str, _id: &str, _dir: &str, _c: Vec<KeyVal>) -> Result<Json> {
            Err(anyhow!("no tasks"))
        }
    }

    #[tokio::test]
    async fn full_lifecycle_over_duplex() {
        let (mut host, plugin_side) = duplex(8192);
        let (plugin_reader, plugin_writer) = tokio::io::split(plugin_side);

        let mut plugin = EchoPlugin {
            initialized_with: vec![],
        };

        let server = tokio::spawn(async move {
            serve_on(&mut plugin, plugin_reader, plugin_writer).await.unwrap();
            plugin
        });

        // handshake
        crate::wire::write_message(
            &mut host,
            &Message::request(
                RequestId::Number(1),
                name::HANDSHAKE,
                serde_json::to_value(HandshakeParams {
                    protocol: "rpp".into(),
                    protocol_version: 0,
                })
                .unwrap(),
            ),
        )
        .await
        .unwrap();
        let resp = crate::wire::read_message(&mut host).await.unwrap();
        match resp {
            Message::Response { outcome: Outcome::Success(v), .. } => {
                let manifest: Manifest = serde_json::from_value(v).unwrap();
                assert_eq!(manifest.name, "echo");
            }
            other => panic!("unexpected: {other:?}"),
        }

        // initialize
        crate::wire::write_message(
            &mut host,
            &Message::request(
                RequestId::Number(2),
                name::INITIALIZE,
                serde_json::to_value(InitializeParams {
                    config: vec![KeyVal::from_value("verbose", Value::Bool(true))],
                    logging: crate::methods::LoggingConfig {
                        enabled: true,
                        level: "info".into(),
                    },
                })
                .unwrap(),
            ),
        )
        .await
        .unwrap();
        let resp = crate::wire::read_message(&mut host).await.unwrap();
        assert!(matches!(resp, Message::Response { outcome: Outcome::Success(_), .. }));

        // runCommand
        crate::wire::write_message(
            &mut host,
            &Message::request(
                RequestId::Number(3),
                name::RUN_COMMAND,
                serde_json::to_value(RunCommandParams {
                    name: "echo.say".into(),
                    args: vec!["hi".into()],
                })
                .unwrap(),
            ),
        )
        .await
        .unwrap();
        let resp = crate::wire::read_message(&mut host).await.unwrap();
        match resp {
            Message::Response { outcome: Outcome::Success(v), .. } => {
                assert_eq!(v["echoed"][0], "hi");
            }
            other => panic!("unexpected: {other:?}"),
        }

        // shutdown then exit
        crate::wire::write_message(
            &mut host,
            &Message::request(RequestId::Number(4), name::SHUTDOWN, Json::Null),
        )
        .await
        .unwrap();
        let resp = crate::wire::read_message(&mut host).await.unwrap();
        assert!(matches!(resp, Message::Response { outcome: Outcome::Success(_), .. }));

        // post-shutdown runCommand must be rejected
        crate::wire::write_message(
            &mut host,
            &Message::request(
                RequestId::Number(5),
                name::RUN_COMMAND,
                serde_json::to_value(RunCommandParams {
                    name: "echo.say".into(),
                    args: vec![],
                })
                .unwrap(),
            ),
        )
        .await
        .unwrap();
        let resp = crate::wire::read_message(&mut host).await.unwrap();
        match resp {
            Message::Response { outcome: Outcome::Error(err), .. } => {
                assert_eq!(err.code, crate::error::code::INVALID_REQUEST);
            }
            other => panic!("unexpected: {other:?}"),
        }

        crate::wire::write_message(
            &mut host,
            &Message::notification(name::EXIT, Json::Null),
        )
        .await
        .unwrap();

        let plugin = server.await.unwrap();
        assert_eq!(plugin.initialized_with.len(), 1);
    }

    #[test]
    fn task_flag_binding_is_rejected_at_handshake() {
        let manifest = Manifest {
            protocol: "rpp".into(),
            protocol_version: 0,
            name: "bad".into(),
            version: "0".into(),
            domain: "bad".into(),
            description: String::new(),
            help: String::new(),
            executable: String::new(),
            config: vec![],
            commands: vec![],
            tasks: vec![Task {
                name: "bad.task".into(),
                description: String::new(),
                provides: String::new(),
                config: vec![ConfigSchema::Leaf(crate::schema::ConfigEntry {
                    key: "x".into(),
                    value: Value::Bool(false),
                    description: String::new(),
                    kind: crate::value::ValueKind::Bool,
                    flag: Some(crate::schema::FlagBinding {
                        long: "x".into(),
                        short: None,
                        help: String::new(),
                    }),
                    env_override: None,
                    flag_only: false,
                })],
            }],
        };
        let err = validate_task_config_bindings(&manifest).unwrap_err();
        assert_eq!(err.code, crate::error::code::HANDSHAKE_FAILED);
    }
}
