//! `core`: the always-present built-in plugin exposing host housekeeping
//! commands, chiefly `core.plugins.list`.

use crate::error::HostError;
use crate::service::Service;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reginald_protocol::methods::{self, RunCommandParams};
use reginald_protocol::schema::{ArgSpec, Command, Manifest};
use serde::Serialize;
use serde_json::Value as Json;

/// A loaded plugin's identity, as surfaced by `core.plugins.list`.
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    /// Plugin name.
    pub name: String,
    /// Plugin version string.
    pub version: String,
    /// Command/task namespace.
    pub domain: String,
    /// Resolved executable path, empty for built-ins.
    pub executable: String,
}

/// The `core` built-in plugin.
pub struct CorePlugin {
    manifest: Manifest,
    plugins: Vec<PluginSummary>,
}

impl CorePlugin {
    /// Build the `core` plugin, pre-populated with the summaries of every
    /// other plugin loaded this run. `core` does not list itself.
    pub fn new(plugins: Vec<PluginSummary>) -> Self {
        let manifest = Manifest {
            protocol: methods::PROTOCOL.name.to_string(),
            protocol_version: methods::PROTOCOL.version,
            name: "core".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            domain: "core".to_string(),
            description: "Host housekeeping commands".to_string(),
            help: String::new(),
            executable: String::new(),
            config: Vec::new(),
            commands: vec![Command {
                name: "core.plugins.list".to_string(),
                usage: "core.plugins.list".to_string(),
                description: "List every loaded plugin".to_string(),
                help: String::new(),
                manual: String::new(),
                aliases: Vec::new(),
                args: ArgSpec { min: 0, max: 0 },
                config: Vec::new(),
                sub_commands: Vec::new(),
            }],
            tasks: Vec::new(),
        };
        Self { manifest, plugins }
    }

    /// The manifest this plugin presents at handshake.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

#[async_trait]
impl Service for CorePlugin {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    async fn call(&self, method: &str, params: Json) -> Result<Json> {
        match method {
            methods::name::HANDSHAKE => Ok(serde_json::to_value(&self.manifest)?),
            methods::name::INITIALIZE => Ok(serde_json::json!({})),
            methods::name::RUN_COMMAND => {
                let params: RunCommandParams = serde_json::from_value(params)?;
                match params.name.as_str() {
                    "core.plugins.list" => Ok(serde_json::to_value(&self.plugins)?),
                    other => Err(anyhow!(HostError::NotFound(other.to_string()))),
                }
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

    #[tokio::test]
    async fn lists_loaded_plugins() {
        let plugin = CorePlugin::new(vec![PluginSummary {
            name: "link".to_string(),
            version: "0.1.0".to_string(),
            domain: "link".to_string(),
            executable: String::new(),
        }]);
        let params = serde_json::to_value(RunCommandParams {
            name: "core.plugins.list".to_string(),
            args: Vec::new(),
        })
        .unwrap();
        let result = plugin.call(methods::name::RUN_COMMAND, params).await.unwrap();
        assert_eq!(result[0]["name"], "link");
    }

    #[tokio::test]
    async fn unknown_command_is_not_found() {
        let plugin = CorePlugin::new(Vec::new());
        let params = serde_json::to_value(RunCommandParams {
            name: "core.bogus".to_string(),
            args: Vec::new(),
        })
        .unwrap();
        let err = plugin.call(methods::name::RUN_COMMAND, params).await.unwrap_err();
        assert!(err.downcast_ref::<HostError>().is_some());
    }
}
