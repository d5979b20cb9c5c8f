//! Config precedence resolution: CLI flag > environment variable >
//! config-file value > schema default, plus path expansion, OS-conditional
//! values, union/mapped-value shape matching, and task materialization.

use crate::error::HostError;
use reginald_protocol::schema::{
    ConfigEntry, ConfigSchema, MapKeyKind, MappedValueSchema, Task, UnionAlternative,
};
use reginald_protocol::value::{KeyVal, Value, ValueKind};
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Prefix every environment-variable override falls back to absent an
/// explicit `envOverride` on the entry.
pub const ENV_PREFIX: &str = "REGINALD";

/// Pure name-canonicalization helpers, independent of any live config
/// state so they can be unit tested in isolation.
pub mod naming {
    use super::ENV_PREFIX;

    /// Split a single dot-free segment into its case-boundary words, e.g.
    /// `"targetDir"` -> `["target", "Dir"]`, `"HTTPServer"` -> `["HTTP",
    /// "Server"]`.
    pub fn words(segment: &str) -> Vec<String> {
        let chars: Vec<char> = segment.chars().collect();
        let mut words = Vec::new();
        let mut current = String::new();

        for (i, &c) in chars.iter().enumerate() {
            if c == '_' || c == '-' {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
                continue;
            }
            if c.is_uppercase() && !current.is_empty() {
                let prev_lower = chars[i - 1].is_lowercase() || chars[i - 1].is_numeric();
                let next_lower = i + 1 < chars.len() && chars[i + 1].is_lowercase();
                if prev_lower || (next_lower && chars[i - 1].is_uppercase()) {
                    words.push(std::mem::take(&mut current));
                }
            }
            current.push(c);
        }
        if !current.is_empty() {
            words.push(current);
        }
        words
    }

    /// Canonicalize a dot-joined schema path into a flag long name:
    /// `"Link.TargetDir"` -> `"link-target-dir"`.
    pub fn flag_long_name(path: &str) -> String {
        path.split('.')
            .flat_map(words)
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Canonicalize a dot-joined schema path into an environment variable
    /// name: `"Link.TargetDir"` -> `"REGINALD_LINK_TARGET_DIR"`.
    pub fn env_var_name(path: &str) -> String {
        let body = path
            .split('.')
            .flat_map(words)
            .map(|w| w.to_uppercase())
            .collect::<Vec<_>>()
            .join("_");
        format!("{ENV_PREFIX}_{body}")
    }
}

/// Abstracts over a parsed CLI flag set so the resolver never depends on
/// `clap` directly; `reginald-host::main` adapts `clap::ArgMatches` to
/// this trait.
pub trait FlagSource {
    /// Whether a flag by this long name was explicitly set on the command
    /// line (as opposed to merely having a default).
    fn is_present(&self, long: &str) -> bool;
    /// The flag's value as raw text, if present.
    fn value(&self, long: &str) -> Option<String>;
}

/// A `FlagSource` with no flags ever present; used for task config
/// resolution, where the `flag` binding is invalid by construction.
pub struct NoFlags;

impl FlagSource for NoFlags {
    fn is_present(&self, _long: &str) -> bool {
        false
    }
    fn value(&self, _long: &str) -> Option<String> {
        None
    }
}

/// Everything the resolver needs beyond the schema and raw config tree
/// itself: the current OS identifier, the run's base directory for path
/// absolutization, environment variables, and CLI flag state.
pub struct ResolveCtx<'a> {
    /// Current OS identifier (`std::env::consts::OS`, e.g. `"linux"`).
    pub os: &'a str,
    /// Base directory relative paths are absolutized against.
    pub base_dir: &'a Path,
    /// Environment variables visible to this run.
    pub env: &'a HashMap<String, String>,
    /// CLI flag state for this invocation.
    pub flags: &'a dyn FlagSource,
}

/// Resolve every entry of a plugin- or command-level schema tree against
/// one raw JSON object, in schema order.
pub fn resolve_schema_list(
    schema: &[ConfigSchema],
    raw: Option<&Json>,
    ctx: &ResolveCtx<'_>,
) -> Result<Vec<KeyVal>, HostError> {
    schema.iter().map(|node| resolve_node(node, raw, ctx)).collect()
}

fn resolve_node(node: &ConfigSchema, raw: Option<&Json>, ctx: &ResolveCtx<'_>) -> Result<KeyVal, HostError> {
    match node {
        ConfigSchema::Leaf(entry) => resolve_entry(entry, raw, ctx),
        ConfigSchema::MappedValue(mapped) => resolve_mapped(mapped, raw, ctx),
        ConfigSchema::Union(alternatives) => resolve_union(alternatives, raw, ctx),
    }
}

fn resolve_entry(entry: &ConfigEntry, raw_section: Option<&Json>, ctx: &ResolveCtx<'_>) -> Result<KeyVal, HostError> {
    let flag_long = entry
        .flag
        .as_ref()
        .map(|f| f.long.clone())
        .unwrap_or_else(|| naming::flag_long_name(&entry.key));
    let env_name = entry
        .env_override
        .clone()
        .unwrap_or_else(|| naming::env_var_name(&entry.key));

    if ctx.flags.is_present(&flag_long) {
        if let Some(text) = ctx.flags.value(&flag_long) {
            let value = value_from_text(&entry.key, entry.kind, &text)?;
            return Ok(finish_entry(entry, value, ctx));
        }
    }

    if let Some(text) = ctx.env.get(&env_name) {
        let value = value_from_text(&entry.key, entry.kind, text)?;
        return Ok(finish_entry(entry, value, ctx));
    }

    let raw_value = raw_section
        .and_then(Json::as_object)
        .and_then(|map| map.get(&entry.key));

    if let Some(raw_value) = raw_value {
        let selected = if entry.kind != ValueKind::Map {
            match raw_value {
                Json::Object(map) => pick_os_branch(map, ctx.os).ok_or_else(|| HostError::InvalidConfig {
                    key: entry.key.clone(),
                    message: format!("no config branch for OS `{}`, `default`, or `_`", ctx.os),
                })?,
                other => other,
            }
        } else {
            raw_value
        };

        let value = Value::from_json(selected).map_err(|err| HostError::InvalidConfig {
            key: entry.key.clone(),
            message: err.to_string(),
        })?;

        if value.kind() != entry.kind && !wire_compatible(value.kind(), entry.kind) {
            return Err(HostError::InvalidConfig {
                key: entry.key.clone(),
                message: format!("expected `{}`, got `{}`", entry.kind, value.kind()),
            });
        }
        return Ok(finish_entry(entry, value, ctx));
    }

    Ok(finish_entry(entry, entry.value.clone(), ctx))
}

fn wire_compatible(actual: ValueKind, declared: ValueKind) -> bool {
    matches!(
        (actual, declared),
        (ValueKind::String, ValueKind::Path) | (ValueKind::StringList, ValueKind::PathList)
    )
}

fn finish_entry(entry: &ConfigEntry, value: Value, ctx: &ResolveCtx<'_>) -> KeyVal {
    let value = match (entry.kind, value) {
        (ValueKind::Path, Value::String(s)) => Value::String(expand_path(&s, ctx.base_dir)),
        (ValueKind::PathList, Value::StringList(items)) => {
            Value::StringList(items.iter().map(|s| expand_path(s, ctx.base_dir)).collect())
        }
        (_, value) => value,
    };
    KeyVal::from_value(entry.key.clone(), value)
}

fn value_from_text(key: &str, kind: ValueKind, text: &str) -> Result<Value, HostError> {
    let invalid = |message: String| HostError::InvalidConfig {
        key: key.to_string(),
        message,
    };
    match kind {
        ValueKind::Bool => parse_bool(text).map(Value::Bool).ok_or_else(|| {
            invalid(format!("`{text}` is not one of true/false/1/0/yes/no"))
        }),
        ValueKind::Int => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| invalid(format!("`{text}` is not a base-10 integer"))),
        ValueKind::String | ValueKind::Path => Ok(Value::String(text.to_string())),
        ValueKind::BoolList => text
            .split(',')
            .map(|s| parse_bool(s.trim()).ok_or_else(|| invalid(format!("`{s}` is not a valid bool"))))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::BoolList),
        ValueKind::IntList => text
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<i64>()
                    .map_err(|_| invalid(format!("`{s}` is not a base-10 integer")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::IntList),
        ValueKind::StringList | ValueKind::PathList => {
            Ok(Value::StringList(text.split(',').map(|s| s.trim().to_string()).collect()))
        }
        ValueKind::Map | ValueKind::KeyValueList => {
            Err(invalid(format!("`{kind}` cannot be set via flag or environment variable")))
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Expand `$VAR`/`${VAR}` and `~`/`~user` references, then absolutize
/// against `base_dir` if the result is still relative.
pub fn expand_path(raw: &str, base_dir: &Path) -> String {
    let expanded = shellexpand::full(raw)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    let path = Path::new(&expanded);
    if path.is_absolute() {
        expanded
    } else {
        base_dir.join(path).to_string_lossy().into_owned()
    }
}

fn pick_os_branch<'a>(map: &'a JsonMap<String, Json>, os: &str) -> Option<&'a Json> {
    map.get(os).or_else(|| map.get("default")).or_else(|| map.get("_"))
}

fn resolve_mapped(schema: &MappedValueSchema, raw: Option<&Json>, ctx: &ResolveCtx<'_>) -> Result<KeyVal, HostError> {
    let outer = raw
        .and_then(Json::as_object)
        .and_then(|map| map.get(&schema.key))
        .and_then(Json::as_object);

    let Some(outer) = outer else {
        return Ok(KeyVal::from_value(schema.key.clone(), Value::KeyValueList(Vec::new())));
    };

    let mut entries = Vec::with_capacity(outer.len());
    for (user_key, sub_raw) in outer {
        let canonical_key = match schema.key_kind {
            MapKeyKind::String => user_key.clone(),
            MapKeyKind::Path => expand_path(user_key, ctx.base_dir),
        };
        let sub_values = schema
            .values
            .iter()
            .map(|entry| resolve_entry(entry, Some(sub_raw), ctx))
            .collect::<Result<Vec<_>, _>>()?;
        entries.push(KeyVal::from_value(canonical_key, Value::KeyValueList(sub_values)));
    }

    Ok(KeyVal::from_value(schema.key.clone(), Value::KeyValueList(entries)))
}

fn resolve_union(alternatives: &[UnionAlternative], raw: Option<&Json>, ctx: &ResolveCtx<'_>) -> Result<KeyVal, HostError> {
    for alt in alternatives {
        match alt {
            UnionAlternative::Leaf(entry) => {
                let raw_value = raw.and_then(Json::as_object).and_then(|m| m.get(&entry.key));
                if let Some(raw_value) = raw_value {
                    if leaf_shape_matches(raw_value, entry.kind) {
                        return resolve_entry(entry, raw, ctx);
                    }
                }
            }
            UnionAlternative::MappedValue(mapped) => {
                let raw_value = raw.and_then(Json::as_object).and_then(|m| m.get(&mapped.key));
                if let Some(Json::Object(outer)) = raw_value {
                    if outer.values().all(Json::is_object) {
                        return resolve_mapped(mapped, raw, ctx);
                    }
                }
            }
        }
    }

    match alternatives
        .first()
        .expect("ConfigSchema::Union is never constructed with zero alternatives")
    {
        UnionAlternative::Leaf(entry) => Ok(entry.as_key_val()),
        UnionAlternative::MappedValue(mapped) => Ok(KeyVal::from_value(mapped.key.clone(), Value::KeyValueList(Vec::new()))),
    }
}

fn leaf_shape_matches(raw: &Json, kind: ValueKind) -> bool {
    match kind {
        ValueKind::Bool => raw.is_boolean(),
        ValueKind::Int => raw.is_i64() || raw.is_u64(),
        ValueKind::String | ValueKind::Path => raw.is_string() || raw.is_object(),
        ValueKind::BoolList | ValueKind::IntList | ValueKind::StringList | ValueKind::PathList => raw.is_array(),
        ValueKind::Map => raw.is_object(),
        ValueKind::KeyValueList => raw.is_array(),
    }
}

/// Resolve every raw task entry in `raw_tasks` against its declared task
/// type's schema, assigning auto-IDs and validating the resulting batch.
pub fn materialize_tasks(
    raw_tasks: &[Json],
    task_types: &HashMap<String, &Task>,
    ctx: &ResolveCtx<'_>,
) -> Result<Vec<reginald_protocol::schema::TaskConfig>, HostError> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    let mut materialized = Vec::new();

    for raw in raw_tasks {
        let task_type = raw
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| HostError::TaskGraph("task entry is missing a string `type`".to_string()))?
            .to_string();

        let task = task_types
            .get(&task_type)
            .ok_or_else(|| HostError::UnknownTaskType(task_type.clone()))?;

        let platforms = read_string_or_list(raw.get("platforms"));
        if !platforms.is_empty() && !platforms.iter().any(|p| p == ctx.os) {
            log::debug!("skipping task of type `{task_type}`: OS `{}` not in {platforms:?}", ctx.os);
            continue;
        }

        let id = match raw.get("id").and_then(Json::as_str) {
            Some(id) => id.to_string(),
            None => {
                let n = counts.entry(task_type.clone()).or_insert(0);
                let id = format!("{task_type}-{n}");
                *n += 1;
                id
            }
        };

        let requires = resolve_requires(raw.get("requires"), ctx.os);
        let config = resolve_schema_list(&task.config, Some(raw), ctx)?;

        materialized.push(reginald_protocol::schema::TaskConfig {
            id,
            task_type,
            config,
            platforms,
            requires,
        });
    }

    validate_task_graph(&materialized)?;
    Ok(materialized)
}

fn read_string_or_list(raw: Option<&Json>) -> Vec<String> {
    match raw {
        Some(Json::String(s)) => vec![s.clone()],
        Some(Json::Array(items)) => items.iter().filter_map(Json::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn resolve_requires(raw: Option<&Json>, os: &str) -> Vec<String> {
    match raw {
        Some(Json::Object(map)) => pick_os_branch(map, os).map(read_string_or_list).unwrap_or_default(),
        Some(other) => read_string_or_list(Some(other)),
        None => Vec::new(),
    }
}

fn validate_task_graph(tasks: &[reginald_protocol::schema::TaskConfig]) -> Result<(), HostError> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !seen.insert(task.id.as_str()) {
            return Err(HostError::TaskGraph(format!("duplicate task id `{}`", task.id)));
        }
    }
    for task in tasks {
        for dep in &task.requires {
            if !seen.contains(dep.as_str()) {
                return Err(HostError::TaskGraph(format!(
                    "task `{}` requires unknown task id `{dep}`",
                    task.id
                )));
            }
        }
    }
    Ok(())
}
