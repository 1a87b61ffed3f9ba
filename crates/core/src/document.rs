//! Schema-less document tree: nested get/set over `serde_json::Value`.
//!
//! A [`Document`] is an explicit tagged union (null, bool, number, string,
//! array, object) where every node owns its children, so deep clone is a
//! plain `Value::clone`.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use smallvec::SmallVec;

/// Any fetched or synthesized resource.
pub type Document = Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("cannot set '{path}': '{at}' holds a non-object value")]
    ConflictingPath { path: String, at: String },
}

/// Dotted path of object keys, e.g. `data.value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: SmallVec<[String; 8]>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, DocumentError> {
        if raw.is_empty() {
            return Err(DocumentError::InvalidPath { path: raw.to_string(), reason: "path is empty" });
        }
        let mut segments = SmallVec::new();
        for seg in raw.split('.') {
            if seg.is_empty() {
                return Err(DocumentError::InvalidPath { path: raw.to_string(), reason: "empty segment" });
            }
            segments.push(seg.to_string());
        }
        Ok(Self { segments })
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self, DocumentError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: SmallVec<[String; 8]> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            let path = segments.join(".");
            return Err(DocumentError::InvalidPath { path, reason: "empty segment" });
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] { &self.segments }

    fn prefix(&self, len: usize) -> String { self.segments[..len].join(".") }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.segments.join(".")) }
}

impl FromStr for FieldPath {
    type Err = DocumentError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}

/// Look up `path` in `doc`. Returns `None` when any segment is absent or an
/// intermediate node is not an object.
pub fn get<'a>(doc: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments().iter().try_fold(doc, |cur, seg| cur.as_object()?.get(seg))
}

pub fn get_mut<'a>(doc: &'a mut Value, path: &FieldPath) -> Option<&'a mut Value> {
    path.segments().iter().try_fold(doc, |cur, seg| cur.as_object_mut()?.get_mut(seg))
}

/// Write `value` at `path`, creating intermediate objects as needed.
///
/// Fails with [`DocumentError::ConflictingPath`] when the root or an
/// intermediate node is not an object; in that case `doc` is left untouched.
/// The leaf is replaced whatever it held before.
pub fn set(doc: &mut Value, path: &FieldPath, value: Value) -> Result<(), DocumentError> {
    let conflict = |at: String| DocumentError::ConflictingPath { path: path.to_string(), at };
    let Some((leaf, parents)) = path.segments().split_last() else {
        return Err(DocumentError::InvalidPath { path: String::new(), reason: "path is empty" });
    };

    // Validate the whole walk before creating anything.
    if !doc.is_object() {
        return Err(conflict("<root>".to_string()));
    }
    let mut probe: &Value = doc;
    for (i, seg) in parents.iter().enumerate() {
        match probe.as_object().and_then(|m| m.get(seg)) {
            None => break,
            Some(next) if next.is_object() => probe = next,
            Some(_) => return Err(conflict(path.prefix(i + 1))),
        }
    }

    let mut cur = doc;
    for (i, seg) in parents.iter().enumerate() {
        let Value::Object(map) = cur else { return Err(conflict(path.prefix(i))) };
        cur = map.entry(seg.clone()).or_insert_with(|| Value::Object(Map::new()));
    }
    let Value::Object(map) = cur else { return Err(conflict(path.prefix(parents.len()))) };
    map.insert(leaf.clone(), value);
    Ok(())
}

/// Canonical string form of a scalar; `None` for arrays and objects.
pub fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Scalar form when there is one, compact JSON text otherwise.
pub fn render_canonical(value: &Value) -> String {
    render_scalar(value).unwrap_or_else(|| value.to_string())
}

/// Short type name used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
