//! Decodes a config file on disk into the raw JSON tree the resolver
//! consumes. A thin shim: the resolver never touches `toml` directly.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Load a TOML config file, decoded as a `serde_json::Value` tree.
///
/// A missing file resolves to an empty object rather than an error, so a
/// run with no `--config` flag and no file at the default location still
/// gets schema defaults for everything.
pub fn load(path: &Path) -> Result<serde_json::Value> {
    if !path.exists() {
        log::info!("config file `{}` not found, using schema defaults", path.display());
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file `{}`", path.display()))?;
    let toml_value: toml::Value = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file `{}`", path.display()))?;
    serde_json::to_value(toml_value)
        .with_context(|| format!("config file `{}` could not be converted to JSON", path.display()))
}

/// The config file's own directory, used as the base for relative path
/// expansion; falls back to the current directory if the path has none
/// (e.g. a bare filename).
pub fn base_dir(path: &Path) -> std::path::PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| std::path::PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_resolves_to_empty_object() {
        let value = load(Path::new("/nonexistent/reginald.toml")).unwrap();
        assert_eq!(value, serde_json::json!({}));
    }

    #[test]
    fn decodes_toml_into_json_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reginald.toml");
        fs::write(&path, "[link]\nverbose = true\n").unwrap();

        let value = load(&path).unwrap();
        assert_eq!(value["link"]["verbose"], serde_json::json!(true));
    }

    #[test]
    fn base_dir_is_the_file_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reginald.toml");
        assert_eq!(base_dir(&path), dir.path());
    }

    #[test]
    fn base_dir_falls_back_to_current_dir_for_bare_filename() {
        assert_eq!(base_dir(Path::new("reginald.toml")), std::path::PathBuf::from("."));
    }
}
