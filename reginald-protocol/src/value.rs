//! The discriminated [`Value`] type carried over the wire.

use crate::error::ValueError;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

/// The kind tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueKind {
    /// A boolean scalar.
    Bool,
    /// An integer scalar. Encoded as a JSON number on the wire.
    Int,
    /// A string scalar.
    String,
    /// A host-side path, shell-expanded and absolutized after materialization.
    Path,
    /// A homogeneous list of booleans.
    BoolList,
    /// A homogeneous list of integers.
    IntList,
    /// A homogeneous list of strings.
    StringList,
    /// A homogeneous list of paths.
    PathList,
    /// A map of string keys to scalar or list values.
    Map,
    /// An ordered sequence of [`KeyVal`], used for nested task configs.
    KeyValueList,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::String => "string",
            ValueKind::Path => "path",
            ValueKind::BoolList => "bool-list",
            ValueKind::IntList => "int-list",
            ValueKind::StringList => "string-list",
            ValueKind::PathList => "path-list",
            ValueKind::Map => "map",
            ValueKind::KeyValueList => "key-value-list",
        };
        f.write_str(s)
    }
}

/// A map value: string keys to scalar-or-list payloads.
///
/// Kept as its own type (rather than a bag of `Value`) so the wire
/// representation round-trips as a JSON object rather than an array of
/// key-value pairs.
pub type MapEntries = std::collections::BTreeMap<String, MapScalar>;

/// The payload kinds a [`Value::Map`] entry may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapScalar {
    /// A single boolean/int/string.
    Bool(bool),
    /// A single integer.
    Int(i64),
    /// A single string.
    Str(String),
    /// A homogeneous string list.
    List(Vec<String>),
}

/// The central discriminated value type carried over PP.
///
/// `Deserialize` is hand-written rather than derived `#[serde(untagged)]`:
/// untagged decoding tries variants in declaration order and an empty JSON
/// array trivially matches the first `Vec`-shaped variant, which would
/// silently turn every empty `int-list`/`string-list`/`path-list` into an
/// empty `bool-list`. The manual impl reuses [`Value::from_json`]'s
/// kind-aware classification instead, so the wire path and the config-file
/// path agree on every shape, including the empty-list default.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// `bool` scalar.
    Bool(bool),
    /// `int` scalar; MUST round-trip exactly, no widening/narrowing.
    Int(i64),
    /// `string` scalar. Also carries `path` scalars: a path's wire payload
    /// is indistinguishable from a string's, so `path`-ness is tracked out
    /// of band by [`KeyVal::kind`] (which consults a declared kind) rather
    /// than by a separate `Value` variant.
    String(String),
    /// `bool-list`.
    BoolList(Vec<bool>),
    /// `int-list`.
    IntList(Vec<i64>),
    /// `string-list`. Also carries `path-list`, same wire shape.
    StringList(Vec<String>),
    /// `map`: string keys to scalar/list values.
    Map(MapEntries),
    /// `key-value-list`: ordered, insertion-order preserved.
    KeyValueList(Vec<KeyVal>),
}

/// A string key bound to a typed [`Value`].
///
/// `Path`/`PathList` values are wire-indistinguishable from `String`/
/// `StringList` (both are plain JSON strings/arrays-of-strings); a
/// `KeyVal` standing alone cannot tell them apart. Callers that need the
/// distinction (the config resolver, chiefly) consult the
/// [`crate::schema::ConfigEntry`] the `KeyVal` was resolved against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyVal {
    /// The key.
    pub key: String,
    /// The bound value.
    pub value: Value,
}

impl Value {
    /// Returns this value's kind tag.
    ///
    /// For `String`/`StringList` this cannot distinguish `Path`/`PathList`
    /// on its own; callers that need that distinction should go through
    /// [`KeyVal::kind`], which consults the tracked declared kind.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::String(_) => ValueKind::String,
            Value::BoolList(_) => ValueKind::BoolList,
            Value::IntList(_) => ValueKind::IntList,
            Value::StringList(_) => ValueKind::StringList,
            Value::Map(_) => ValueKind::Map,
            Value::KeyValueList(_) => ValueKind::KeyValueList,
        }
    }

    /// Construct a `Value` tagged explicitly as a path.
    pub fn path(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Construct a `Value` tagged explicitly as a path list.
    pub fn path_list(items: Vec<String>) -> Self {
        Value::StringList(items)
    }

    /// Infer a `Value` from an arbitrary raw JSON value.
    ///
    /// Used by the config resolver to turn a decoded config-file tree into
    /// typed values, and by [`KeyVal::new`].
    pub fn from_json(raw: &Json) -> Result<Self, ValueError> {
        match raw {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    if f.fract() == 0.0 && f.is_finite() {
                        Ok(Value::Int(f as i64))
                    } else {
                        Err(ValueError::NonIntegral(n.to_string()))
                    }
                } else {
                    Err(ValueError::NonIntegral(n.to_string()))
                }
            }
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Array(items) => Self::list_from_json(items),
            Json::Object(map) => {
                let mut entries = MapEntries::new();
                for (k, v) in map {
                    entries.insert(k.clone(), MapScalar::from_json(v)?);
                }
                Ok(Value::Map(entries))
            }
            Json::Null => Err(ValueError::UnsupportedShape),
        }
    }

    fn list_from_json(items: &[Json]) -> Result<Self, ValueError> {
        if items.is_empty() {
            return Ok(Value::StringList(Vec::new()));
        }
        if items.iter().all(|v| v.is_boolean()) {
            return Ok(Value::BoolList(
                items.iter().map(|v| v.as_bool().unwrap()).collect(),
            ));
        }
        if items.iter().all(|v| v.is_i64() || v.is_u64()) {
            return Ok(Value::IntList(
                items.iter().map(|v| v.as_i64().unwrap()).collect(),
            ));
        }
        if items.iter().all(|v| v.is_string()) {
            return Ok(Value::StringList(
                items
                    .iter()
                    .map(|v| v.as_str().unwrap().to_string())
                    .collect(),
            ));
        }
        if items.iter().all(is_key_val_shaped) {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let kv: KeyVal =
                    serde_json::from_value(item.clone()).map_err(|_| ValueError::UnsupportedShape)?;
                out.push(kv);
            }
            return Ok(Value::KeyValueList(out));
        }
        Err(ValueError::Heterogeneous)
    }

    /// Extract as `bool`, or a kind-mismatch error.
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch(other, ValueKind::Bool)),
        }
    }

    /// Extract as `int`.
    pub fn as_int(&self) -> Result<i64, ValueError> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(mismatch(other, ValueKind::Int)),
        }
    }

    /// Extract as `string` (also used for `path`).
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(mismatch(other, ValueKind::String)),
        }
    }

    /// Extract as `string-list` (also used for `path-list`).
    pub fn as_str_list(&self) -> Result<&[String], ValueError> {
        match self {
            Value::StringList(items) => Ok(items),
            other => Err(mismatch(other, ValueKind::StringList)),
        }
    }

    /// Extract as `int-list`.
    pub fn as_int_list(&self) -> Result<&[i64], ValueError> {
        match self {
            Value::IntList(items) => Ok(items),
            other => Err(mismatch(other, ValueKind::IntList)),
        }
    }

    /// Extract as `bool-list`.
    pub fn as_bool_list(&self) -> Result<&[bool], ValueError> {
        match self {
            Value::BoolList(items) => Ok(items),
            other => Err(mismatch(other, ValueKind::BoolList)),
        }
    }

    /// Extract as `map`.
    pub fn as_map(&self) -> Result<&MapEntries, ValueError> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(mismatch(other, ValueKind::Map)),
        }
    }

    /// Extract as `key-value-list`.
    pub fn as_key_value_list(&self) -> Result<&[KeyVal], ValueError> {
        match self {
            Value::KeyValueList(items) => Ok(items),
            other => Err(mismatch(other, ValueKind::KeyValueList)),
        }
    }

    /// Structural equality, matching JSON-RPC round-trip semantics: two
    /// values are equal iff their kind and payload are equal.
    pub fn value_eq(&self, other: &Value) -> bool {
        self == other
    }
}

/// Whether `raw` has the `{"key": string, "value": ...}` shape used by
/// [`KeyVal`]'s plain derived `Deserialize`.
fn is_key_val_shaped(raw: &Json) -> bool {
    matches!(raw, Json::Object(map) if map.len() == 2 && map.get("key").is_some_and(Json::is_string) && map.contains_key("value"))
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Json::deserialize(deserializer)?;
        Value::from_json(&raw).map_err(serde::de::Error::custom)
    }
}

fn mismatch(value: &Value, expected: ValueKind) -> ValueError {
    ValueError::KindMismatch {
        actual: value.kind().to_string(),
        expected: expected.to_string(),
    }
}

impl MapScalar {
    fn from_json(raw: &Json) -> Result<Self, ValueError> {
        match raw {
            Json::Bool(b) => Ok(MapScalar::Bool(*b)),
            Json::Number(n) => n
                .as_i64()
                .map(MapScalar::Int)
                .ok_or_else(|| ValueError::NonIntegral(n.to_string())),
            Json::String(s) => Ok(MapScalar::Str(s.clone())),
            Json::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(
                        item.as_str()
                            .ok_or(ValueError::UnsupportedShape)?
                            .to_string(),
                    );
                }
                Ok(MapScalar::List(out))
            }
            Json::Null | Json::Object(_) => Err(ValueError::UnsupportedShape),
        }
    }
}

impl KeyVal {
    /// Construct a `KeyVal`, inferring the value's kind from `raw`.
    pub fn new(key: impl Into<String>, raw: &Json) -> Result<Self, ValueError> {
        let value = Value::from_json(raw)?;
        Ok(Self {
            key: key.into(),
            value,
        })
    }

    /// Construct a `KeyVal` from an already-typed value.
    pub fn from_value(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// This `KeyVal`'s value's intrinsic kind. Does not distinguish
    /// `Path`/`PathList` from `String`/`StringList`; see the type-level
    /// doc comment.
    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    /// Look up a key in an ordered key-value list.
    pub fn get<'a>(key: &str, list: &'a [KeyVal]) -> Option<&'a KeyVal> {
        list.iter().find(|kv| kv.key == key)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::String(s) => write!(f, "{s}"),
            Value::BoolList(items) => write!(f, "[{}]", items.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(", ")),
            Value::IntList(items) => write!(f, "[{}]", items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")),
            Value::StringList(items) => write!(f, "[{}]", items.join(", ")),
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}={v:?}")?;
                }
                write!(f, "}}")
            }
            Value::KeyValueList(items) => {
                write!(f, "[")?;
                for (i, kv) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", kv.key, kv.value)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for MapScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapScalar::Bool(b) => write!(f, "{b}"),
            MapScalar::Int(i) => write!(f, "{i}"),
            MapScalar::Str(s) => write!(f, "{s}"),
            MapScalar::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_kinds_round_trip() {
        let v = Value::Int(42);
        let encoded = serde_json::to_string(&v).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(v, decoded);
        assert_eq!(decoded.kind(), ValueKind::Int);
    }

    #[test]
    fn fractional_number_rejected_as_int() {
        let raw: Json = serde_json::json!(3.5);
        let err = Value::from_json(&raw).unwrap_err();
        assert!(matches!(err, ValueError::NonIntegral(_)));
    }

    #[test]
    fn whole_float_is_accepted_as_int() {
        let raw: Json = serde_json::json!(3.0);
        let value = Value::from_json(&raw).unwrap();
        assert_eq!(value, Value::Int(3));
    }

    #[test]
    fn heterogeneous_list_rejected() {
        let raw: Json = serde_json::json!([1, "two", true]);
        let err = Value::from_json(&raw).unwrap_err();
        assert_eq!(err, ValueError::Heterogeneous);
    }

    #[test]
    fn key_value_list_preserves_order() {
        let a = KeyVal::new("a", &serde_json::json!(1)).unwrap();
        let b = KeyVal::new("b", &serde_json::json!(2)).unwrap();
        let list = Value::KeyValueList(vec![a.clone(), b.clone()]);
        let encoded = serde_json::to_string(&list).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        match decoded {
            Value::KeyValueList(items) => {
                assert_eq!(items[0].key, "a");
                assert_eq!(items[1].key, "b");
            }
            _ => panic!("expected key-value-list"),
        }
    }

    #[test]
    fn get_as_kind_mismatch_reports_both_kinds() {
        let v = Value::Bool(true);
        let err = v.as_int().unwrap_err();
        match err {
            ValueError::KindMismatch { actual, expected } => {
                assert_eq!(actual, "bool");
                assert_eq!(expected, "int");
            }
            _ => panic!("expected kind mismatch"),
        }
    }

    #[test]
    fn empty_list_decodes_as_string_list_not_bool_list() {
        let decoded: Value = serde_json::from_str("[]").unwrap();
        assert_eq!(decoded, Value::StringList(Vec::new()));
    }

    #[test]
    fn non_empty_bool_list_still_decodes_as_bool_list() {
        let decoded: Value = serde_json::from_str("[true,false]").unwrap();
        assert_eq!(decoded, Value::BoolList(vec![true, false]));
    }

    #[test]
    fn from_json_reconstructs_key_value_list() {
        let raw: Json = serde_json::json!([{"key": "a", "value": 1}, {"key": "b", "value": "x"}]);
        let value = Value::from_json(&raw).unwrap();
        match value {
            Value::KeyValueList(items) => {
                assert_eq!(items[0].key, "a");
                assert_eq!(items[1].value, Value::String("x".to_string()));
            }
            _ => panic!("expected key-value-list"),
        }
    }

    #[test]
    fn key_val_get_finds_by_key() {
        let list = vec![
            KeyVal::new("alpha", &serde_json::json!(1)).unwrap(),
            KeyVal::new("beta", &serde_json::json!(2)).unwrap(),
        ];
        let found = KeyVal::get("beta", &list).unwrap();
        assert_eq!(found.value.as_int().unwrap(), 2);
        assert!(KeyVal::get("gamma", &list).is_none());
    }
}
