//! Manifest, command, task, and config-schema types exchanged during
//! `handshake`.

use crate::value::{KeyVal, Value, ValueKind};
use serde::{Deserialize, Serialize};

/// One CLI flag binding declared by a [`ConfigEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagBinding {
    /// Long flag name, e.g. `verbose`.
    pub long: String,
    /// Optional single-character short flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<char>,
    /// Help text shown for the flag.
    #[serde(default)]
    pub help: String,
}

/// A `KeyVal` extended with description, CLI/env bindings, and a declared
/// kind that must match the contained value's kind on the wire.
///
/// Deliberately not built on `#[serde(flatten)]` over [`KeyVal`]: serde
/// cannot combine `flatten` with `deny_unknown_fields`, and this type's
/// wire shape needs strict unknown-field rejection like every other PP
/// envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ConfigEntry {
    /// The option's key.
    pub key: String,
    /// The option's default value.
    pub value: Value,
    /// Human-readable description of the option.
    pub description: String,
    /// Declared kind; MUST match `value`'s kind.
    pub kind: ValueKind,
    /// Optional CLI flag binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<FlagBinding>,
    /// Optional environment-variable override name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_override: Option<String>,
    /// True if this entry may only be set via CLI flag, never via config
    /// file or task config. Tasks declaring this is invalid.
    #[serde(default)]
    pub flag_only: bool,
}

impl ConfigEntry {
    /// This entry as a [`KeyVal`] (its key bound to its current value).
    pub fn as_key_val(&self) -> KeyVal {
        KeyVal::from_value(self.key.clone(), self.value.clone())
    }
}

/// One alternative in a [`ConfigSchema::Union`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum UnionAlternative {
    /// A single leaf option.
    Leaf(ConfigEntry),
    /// A dictionary of user-chosen keys each holding a sub-record.
    MappedValue(MappedValueSchema),
}

/// A dictionary schema: user-chosen keys, each holding a sub-record
/// matching `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MappedValueSchema {
    /// The outer key name (the dictionary's own schema key).
    pub key: String,
    /// Whether user-chosen keys are `string` or `path` (path keys are
    /// canonicalized when materialized).
    pub key_kind: MapKeyKind,
    /// Sub-entries each user-chosen key's record must match.
    pub values: Vec<ConfigEntry>,
}

/// The kind of key used by a [`MappedValueSchema`] or [`ConfigSchema::MappedValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MapKeyKind {
    /// Keys are arbitrary strings.
    String,
    /// Keys are paths, canonicalized when materialized.
    Path,
}

/// One entry in a [`ConfigSchema`] tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum ConfigSchema {
    /// A single option.
    Leaf(ConfigEntry),
    /// A dictionary whose user-chosen keys each hold a sub-record.
    MappedValue(MappedValueSchema),
    /// An ordered list of alternatives; the resolver picks the first whose
    /// shape matches the incoming raw value.
    Union(Vec<UnionAlternative>),
}

impl ConfigSchema {
    /// Recursively collect every [`ConfigEntry`] leaf reachable from this
    /// schema node, used when flattening a plugin-wide schema into the
    /// list handed to `initialize`.
    pub fn leaves(&self) -> Vec<&ConfigEntry> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ConfigEntry>) {
        match self {
            ConfigSchema::Leaf(entry) => out.push(entry),
            ConfigSchema::MappedValue(m) => out.extend(m.values.iter()),
            ConfigSchema::Union(alts) => {
                for alt in alts {
                    match alt {
                        UnionAlternative::Leaf(entry) => out.push(entry),
                        UnionAlternative::MappedValue(m) => out.extend(m.values.iter()),
                    }
                }
            }
        }
    }
}

/// Minimum/maximum positional argument counts for a [`Command`].
/// `max == -1` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    /// Minimum number of positional arguments.
    pub min: i32,
    /// Maximum number of positional arguments, or `-1` for unbounded.
    pub max: i32,
}

impl ArgSpec {
    /// Whether `count` positional arguments satisfy this spec.
    pub fn accepts(&self, count: usize) -> bool {
        let count = count as i32;
        count >= self.min && (self.max < 0 || count <= self.max)
    }
}

/// A user-invocable command exported by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Command {
    /// Domain-qualified name, e.g. `link.copy`.
    pub name: String,
    /// One-line usage string.
    pub usage: String,
    /// Short description.
    pub description: String,
    /// Longer help text.
    #[serde(default)]
    pub help: String,
    /// Full manual text (e.g. man-page style).
    #[serde(default)]
    pub manual: String,
    /// Alternative names this command may be invoked by.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Accepted positional argument count.
    pub args: ArgSpec,
    /// Command-specific config schema.
    #[serde(default)]
    pub config: Vec<ConfigSchema>,
    /// Nested sub-commands.
    #[serde(default)]
    pub sub_commands: Vec<Command>,
}

/// A declarative task type exported by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    /// Domain-qualified task-type name, e.g. `link.symlink`.
    pub name: String,
    /// Short description.
    pub description: String,
    /// What this task type provides, surfaced to other tasks' `requires`.
    #[serde(default)]
    pub provides: String,
    /// Task-specific config schema.
    #[serde(default)]
    pub config: Vec<ConfigSchema>,
}

/// The plugin's self-description, returned from `handshake`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Manifest {
    /// Protocol name, MUST be `"rpp"`.
    pub protocol: String,
    /// Protocol version, MUST be `0` in this revision.
    pub protocol_version: u32,
    /// Unique plugin name.
    pub name: String,
    /// Plugin version string.
    pub version: String,
    /// Namespace prepended to this plugin's command/task names.
    pub domain: String,
    /// Short description.
    pub description: String,
    /// Longer help text.
    #[serde(default)]
    pub help: String,
    /// Path to the plugin executable, as resolved by the host. Populated
    /// by the host after handshake, not sent by the plugin itself.
    #[serde(default)]
    pub executable: String,
    /// Plugin-wide config schema.
    #[serde(default)]
    pub config: Vec<ConfigSchema>,
    /// Commands this plugin exports.
    #[serde(default)]
    pub commands: Vec<Command>,
    /// Tasks this plugin exports.
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A materialized task invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Unique ID within a run; user-supplied or auto-generated `<type>-<n>`.
    pub id: String,
    /// Domain-qualified task-type name.
    pub task_type: String,
    /// Resolved configuration values.
    pub config: Vec<KeyVal>,
    /// OS names this instance applies to; empty means all.
    #[serde(default)]
    pub platforms: Vec<String>,
    /// IDs of other `TaskConfig`s this instance depends on.
    #[serde(default)]
    pub requires: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_spec_unbounded_max() {
        let spec = ArgSpec { min: 1, max: -1 };
        assert!(spec.accepts(1));
        assert!(spec.accepts(1000));
        assert!(!spec.accepts(0));
    }

    #[test]
    fn arg_spec_bounded() {
        let spec = ArgSpec { min: 0, max: 2 };
        assert!(spec.accepts(0));
        assert!(spec.accepts(2));
        assert!(!spec.accepts(3));
    }

    #[test]
    fn schema_leaves_flattens_union_and_mapped() {
        let leaf = ConfigEntry {
            key: "verbose".into(),
            value: Value::Bool(false),
            description: "be verbose".into(),
            kind: ValueKind::Bool,
            flag: None,
            env_override: None,
            flag_only: false,
        };
        let mapped = MappedValueSchema {
            key: "targets".into(),
            key_kind: MapKeyKind::String,
            values: vec![leaf.clone()],
        };
        let schema = ConfigSchema::Union(vec![
            UnionAlternative::Leaf(leaf.clone()),
            UnionAlternative::MappedValue(mapped),
        ]);
        assert_eq!(schema.leaves().len(), 2);
    }
}
