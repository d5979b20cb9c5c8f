//! In-process built-in plugins: always present, never spawned as a child
//! process, but otherwise indistinguishable from an out-of-process
//! plugin once loaded.

pub mod core;
pub mod link;

use crate::builtin::core::{CorePlugin, PluginSummary};
use crate::lifecycle::LoadedPlugin;
use std::sync::Arc;

/// Build the set of built-in plugins as already-loaded entries, ready to
/// merge with whatever was discovered on disk.
///
/// `discovered` lists the plugins found via [`crate::lifecycle::discover`]
/// and [`crate::lifecycle::load_all`]; their summaries, plus the
/// built-ins' own, are what `core.plugins.list` reports.
pub fn load(discovered: &[LoadedPlugin]) -> Vec<LoadedPlugin> {
    let link_plugin = link::LinkPlugin::new();
    let mut summaries: Vec<PluginSummary> = discovered
        .iter()
        .map(|p| PluginSummary {
            name: p.manifest.name.clone(),
            version: p.manifest.version.clone(),
            domain: p.manifest.domain.clone(),
            executable: p.manifest.executable.clone(),
        })
        .collect();
    summaries.push(PluginSummary {
        name: link_plugin.manifest().name.clone(),
        version: link_plugin.manifest().version.clone(),
        domain: link_plugin.manifest().domain.clone(),
        executable: String::new(),
    });

    let core_plugin = CorePlugin::new(summaries.clone());
    summaries.push(PluginSummary {
        name: core_plugin.manifest().name.clone(),
        version: core_plugin.manifest().version.clone(),
        domain: core_plugin.manifest().domain.clone(),
        executable: String::new(),
    });

    vec![
        LoadedPlugin {
            manifest: core_plugin.manifest().clone(),
            service: Arc::new(core_plugin),
        },
        LoadedPlugin {
            manifest: link_plugin.manifest().clone(),
            service: Arc::new(link_plugin),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_include_core_and_link() {
        let loaded = load(&[]);
        let names: Vec<&str> = loaded.iter().map(|p| p.manifest.name.as_str()).collect();
        assert!(names.contains(&"core"));
        assert!(names.contains(&"link"));
    }
}
