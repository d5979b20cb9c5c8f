//! Drives the `reginald-plugin-link` example plugin as a real child
//! process through handshake, initialize, a direct command, and a task
//! invocation, then shutdown.

use reginald_host::lifecycle::{self, Candidate, Mode};
use reginald_host::store::Store;
use reginald_protocol::schema::TaskConfig;
use reginald_protocol::value::{KeyVal, Value};
use std::collections::HashMap;
use std::time::Duration;

fn plugin_path() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_reginald-plugin-link"))
}

#[tokio::test]
async fn real_plugin_handles_command_and_task() {
    let candidate = Candidate {
        name: "reginald-plugin-link".to_string(),
        path: plugin_path(),
    };

    let loaded = lifecycle::load_all(vec![candidate], Mode::Strict, Duration::from_secs(5))
        .await
        .expect("plugin should handshake successfully");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].manifest.domain, "fs");

    let configs: HashMap<String, Vec<KeyVal>> = HashMap::new();
    lifecycle::initialize_all(
        &loaded,
        &configs,
        reginald_protocol::methods::LoggingConfig {
            enabled: true,
            level: "info".to_string(),
        },
        Mode::Strict,
        Duration::from_secs(5),
    )
    .await
    .expect("plugin should initialize");

    let store = Store::build(&loaded).expect("store should index the plugin's commands and tasks");

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src.txt");
    std::fs::write(&src, b"hello").unwrap();
    let dest = dir.path().join("dest-via-command.txt");

    let result = store
        .run_command("fs.link", vec![src.display().to_string(), dest.display().to_string()])
        .await
        .expect("fs.link command should succeed");
    assert_eq!(result["dest"], dest.display().to_string());
    assert!(dest.symlink_metadata().unwrap().file_type().is_symlink());

    let task_dest = dir.path().join("dest-via-task.txt");
    let task = TaskConfig {
        id: "fs.symlink-0".to_string(),
        task_type: "fs.symlink".to_string(),
        config: vec![
            KeyVal::from_value("src", Value::path(src.display().to_string())),
            KeyVal::from_value("dest", Value::path(task_dest.display().to_string())),
            KeyVal::from_value("backup", Value::Bool(false)),
        ],
        platforms: Vec::new(),
        requires: Vec::new(),
    };
    store.run_task(&task, dir.path().to_str().unwrap()).await.expect("fs.symlink task should succeed");
    assert!(task_dest.symlink_metadata().unwrap().file_type().is_symlink());

    lifecycle::shutdown_all(loaded).await;
}
