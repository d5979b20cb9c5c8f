//! Drives the full load -> initialize -> dispatch -> shutdown lifecycle
//! against an in-process fake plugin, with no child process involved.
//!
//! Complements `plugin_link_integration.rs`, which drives the same
//! lifecycle against a real subprocess.

use async_trait::async_trait;
use reginald_host::lifecycle::{self, LoadedPlugin, Mode};
use reginald_host::process::DEFAULT_HANDSHAKE_TIMEOUT;
use reginald_host::service::Service;
use reginald_host::store::Store;
use reginald_protocol::methods::{self, LoggingConfig};
use reginald_protocol::schema::{ArgSpec, Command, Manifest, Task, TaskConfig};
use reginald_protocol::value::{KeyVal, Value};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A `Service` driven purely in-memory: no subprocess, no framed I/O.
struct FakePlugin {
    initialized: AtomicBool,
    shut_down: AtomicBool,
    last_init_config: std::sync::Mutex<Vec<KeyVal>>,
}

impl FakePlugin {
    fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            last_init_config: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Service for FakePlugin {
    fn name(&self) -> &str {
        "fake"
    }

    async fn call(&self, method: &str, params: Json) -> anyhow::Result<Json> {
        match method {
            methods::name::INITIALIZE => {
                let params: methods::InitializeParams = serde_json::from_value(params)?;
                *self.last_init_config.lock().unwrap() = params.config;
                self.initialized.store(true, Ordering::SeqCst);
                Ok(serde_json::to_value(methods::InitializeResult {})?)
            }
            methods::name::RUN_COMMAND => {
                let params: methods::RunCommandParams = serde_json::from_value(params)?;
                anyhow::ensure!(params.name == "fake.echo", "unexpected command `{}`", params.name);
                Ok(serde_json::json!({ "echoed": params.args }))
            }
            methods::name::RUN_TASK => {
                let params: methods::RunTaskParams = serde_json::from_value(params)?;
                anyhow::ensure!(params.task_type == "fake.touch", "unexpected task type `{}`", params.task_type);
                let message = KeyVal::get("message", &params.config)
                    .map(|kv| kv.value.as_str().unwrap_or_default().to_string())
                    .unwrap_or_default();
                let path = std::path::Path::new(&params.dir).join(format!("{}.touch", params.id));
                std::fs::write(&path, message)?;
                Ok(serde_json::json!({ "wrote": path.display().to_string() }))
            }
            methods::name::SHUTDOWN => {
                self.shut_down.store(true, Ordering::SeqCst);
                Ok(Json::Null)
            }
            other => anyhow::bail!("fake plugin received unknown method `{other}`"),
        }
    }

    async fn notify(&self, _method: &str, _params: Json) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.call(methods::name::SHUTDOWN, Json::Null).await?;
        Ok(())
    }
}

fn fake_manifest() -> Manifest {
    Manifest {
        protocol: "rpp".to_string(),
        protocol_version: 0,
        name: "fake".to_string(),
        version: "0.1.0".to_string(),
        domain: "fake".to_string(),
        description: "in-memory fake plugin for lifecycle tests".to_string(),
        help: String::new(),
        executable: String::new(),
        config: Vec::new(),
        commands: vec![Command {
            name: "fake.echo".to_string(),
            usage: "fake echo <word>".to_string(),
            description: String::new(),
            help: String::new(),
            manual: String::new(),
            aliases: Vec::new(),
            args: ArgSpec { min: 1, max: -1 },
            config: Vec::new(),
            sub_commands: Vec::new(),
        }],
        tasks: vec![Task {
            name: "fake.touch".to_string(),
            description: String::new(),
            provides: String::new(),
            config: Vec::new(),
        }],
    }
}

#[tokio::test]
async fn fake_plugin_runs_full_lifecycle() {
    let fake = Arc::new(FakePlugin::new());
    let loaded = vec![LoadedPlugin {
        service: fake.clone(),
        manifest: fake_manifest(),
    }];

    let mut configs: HashMap<String, Vec<KeyVal>> = HashMap::new();
    configs.insert("fake".to_string(), vec![KeyVal::from_value("greeting", Value::String("hi".to_string()))]);

    lifecycle::initialize_all(
        &loaded,
        &configs,
        LoggingConfig { enabled: true, level: "info".to_string() },
        Mode::Strict,
        DEFAULT_HANDSHAKE_TIMEOUT,
    )
    .await
    .expect("fake plugin should initialize");
    assert!(fake.initialized.load(Ordering::SeqCst));
    assert_eq!(fake.last_init_config.lock().unwrap().len(), 1);

    let store = Store::build(&loaded).expect("store should index the fake plugin's command and task");

    let result = store
        .run_command("fake.echo", vec!["hello".to_string()])
        .await
        .expect("fake.echo should succeed");
    assert_eq!(result["echoed"], serde_json::json!(["hello"]));

    let dir = tempfile::tempdir().unwrap();
    let task = TaskConfig {
        id: "fake.touch-0".to_string(),
        task_type: "fake.touch".to_string(),
        config: vec![KeyVal::from_value("message", Value::String("from the task".to_string()))],
        platforms: Vec::new(),
        requires: Vec::new(),
    };
    store.run_task(&task, dir.path().to_str().unwrap()).await.expect("fake.touch should succeed");
    let written = std::fs::read_to_string(dir.path().join("fake.touch-0.touch")).unwrap();
    assert_eq!(written, "from the task");

    lifecycle::shutdown_all(loaded).await;
    assert!(fake.shut_down.load(Ordering::SeqCst));
}
