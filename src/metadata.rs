//! Metadata block codec for task files
//!
//! A task file is an optional YAML block fenced by `---` lines followed by a
//! free-form body:
//!
//! ```text
//! ---
//! schema: 1
//! id: 3
//! title: Write docs
//! ...
//! ---
//! <body, byte-for-byte>
//! ```
//!
//! Keys the task schema does not know are carried through as [`FieldValue`]
//! trees so a read-modify-write cycle never drops or retypes them.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_yaml::{Mapping, Number, Value};

use crate::error::{Error, Result};

/// Fence line opening and closing the metadata block
pub const MARKER: &str = "---";

/// Schema fields, in the order they are written
pub const KNOWN_FIELDS: [&str; 8] = [
    "schema",
    "id",
    "title",
    "status",
    "created",
    "updated",
    "tags",
    "dependencies",
];

/// A metadata value of any shape YAML can express in a task file.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    /// Only used for values above `i64::MAX`
    Unsigned(u64),
    Float(f64),
    String(String),
    List(Vec<FieldValue>),
    Map(Metadata),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Integer(value) => u64::try_from(*value).ok(),
            FieldValue::Unsigned(value) => Some(*value),
            _ => None,
        }
    }

    /// Short type name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "boolean",
            FieldValue::Integer(_) | FieldValue::Unsigned(_) | FieldValue::Float(_) => "number",
            FieldValue::String(_) => "string",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "map",
        }
    }

    /// Decode a single value written on the command line (`key=value`).
    ///
    /// The text is read as YAML so `3`, `true`, `null` and `[a, b]` keep their
    /// type; anything that fails to decode is kept as a plain string.
    pub fn parse_scalar(text: &str) -> FieldValue {
        match serde_yaml::from_str::<Value>(text) {
            Ok(value) => from_yaml(value).unwrap_or_else(|_| FieldValue::String(text.to_string())),
            Err(_) => FieldValue::String(text.to_string()),
        }
    }

    fn to_yaml(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(value) => Value::Bool(*value),
            FieldValue::Integer(value) => Value::Number(Number::from(*value)),
            FieldValue::Unsigned(value) => Value::Number(Number::from(*value)),
            FieldValue::Float(value) => Value::Number(Number::from(*value)),
            FieldValue::String(value) => Value::String(value.clone()),
            FieldValue::List(items) => Value::Sequence(items.iter().map(Self::to_yaml).collect()),
            FieldValue::Map(map) => Value::Mapping(map.to_mapping()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(value) => FieldValue::Integer(value),
            Err(_) => FieldValue::Unsigned(value),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(value) => serializer.serialize_bool(*value),
            FieldValue::Integer(value) => serializer.serialize_i64(*value),
            FieldValue::Unsigned(value) => serializer.serialize_u64(*value),
            FieldValue::Float(value) => serializer.serialize_f64(*value),
            FieldValue::String(value) => serializer.serialize_str(value),
            FieldValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Map(map) => map.serialize(serializer),
        }
    }
}

/// Ordered key/value mapping; insertion order is the order written to disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<(String, FieldValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Set a value, replacing an existing key in place or appending a new one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Set a value, merging recursively when both the old and new value are maps.
    pub fn merge(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(name, _)| *name == key) {
            match (&mut entry.1, value) {
                (FieldValue::Map(existing), FieldValue::Map(incoming)) => {
                    for (child_key, child_value) in incoming.entries {
                        existing.merge(child_key, child_value);
                    }
                }
                (slot, value) => *slot = value,
            }
            return;
        }
        self.entries.push((key, value));
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        let index = self.entries.iter().position(|(name, _)| name == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Known schema fields first in [`KNOWN_FIELDS`] order, then the rest in
    /// insertion order.
    fn canonical_entries(&self) -> Vec<(&str, &FieldValue)> {
        let mut ordered = Vec::with_capacity(self.entries.len());
        for known in KNOWN_FIELDS {
            if let Some(value) = self.get(known) {
                ordered.push((known, value));
            }
        }
        ordered.extend(
            self.iter()
                .filter(|(key, _)| !KNOWN_FIELDS.contains(key)),
        );
        ordered
    }

    fn to_mapping(&self) -> Mapping {
        let mut mapping = Mapping::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            mapping.insert(Value::String(key.clone()), value.to_yaml());
        }
        mapping
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// A file split into its metadata block and body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub metadata: Metadata,
    pub body: String,
}

/// Split file text into metadata and body.
///
/// Text that does not open with a `---` line has no metadata; the whole text
/// is returned as the body unchanged.
pub fn parse(text: &str) -> Result<Document> {
    let Some(after_open) = strip_marker_line(text) else {
        return Ok(Document {
            metadata: Metadata::new(),
            body: text.to_string(),
        });
    };

    // Line 1 is the opening marker.
    let mut line_no = 2;
    let mut offset = 0;
    let block_end = loop {
        let rest = &after_open[offset..];
        if rest.is_empty() {
            return Err(Error::parse(
                Some(1),
                "metadata block opened with '---' is never closed",
            ));
        }
        let line_len = rest.find('\n').map(|idx| idx + 1).unwrap_or(rest.len());
        let line = &rest[..line_len];
        if line.trim_end_matches(['\n', '\r']) == MARKER {
            break (offset, offset + line_len);
        }
        offset += line_len;
        line_no += 1;
    };

    let (yaml_end, body_start) = block_end;
    let yaml = &after_open[..yaml_end];
    let metadata = decode_block(yaml)?;
    tracing::trace!(fields = metadata.len(), closing_line = line_no, "parsed metadata block");

    Ok(Document {
        metadata,
        body: after_open[body_start..].to_string(),
    })
}

/// Reassemble a file from a body and metadata.
///
/// Empty metadata returns the body untouched; otherwise the block is written
/// in canonical field order and the body is appended verbatim.
pub fn stringify(body: &str, metadata: &Metadata) -> Result<String> {
    if metadata.is_empty() {
        return Ok(body.to_string());
    }

    let mut mapping = Mapping::with_capacity(metadata.len());
    for (key, value) in metadata.canonical_entries() {
        mapping.insert(Value::String(key.to_string()), value.to_yaml());
    }
    let yaml = serde_yaml::to_string(&Value::Mapping(mapping))?;

    let mut out = String::with_capacity(yaml.len() + body.len() + 8);
    out.push_str(MARKER);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(MARKER);
    out.push('\n');
    out.push_str(body);
    Ok(out)
}

fn strip_marker_line(text: &str) -> Option<&str> {
    text.strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
}

fn decode_block(yaml: &str) -> Result<Metadata> {
    let value: Value = serde_yaml::from_str(yaml).map_err(|err| {
        // Block content starts on file line 2.
        let line = err.location().map(|loc| loc.line() + 1);
        Error::parse(line, format!("invalid metadata: {err}"))
    })?;

    match value {
        Value::Null => Ok(Metadata::new()),
        Value::Mapping(mapping) => mapping_to_metadata(mapping),
        other => Err(Error::parse(
            Some(2),
            format!(
                "metadata must be a mapping, found {}",
                yaml_kind(&other)
            ),
        )),
    }
}

fn mapping_to_metadata(mapping: Mapping) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for (key, value) in mapping {
        let key = match key {
            Value::String(key) => key,
            other => {
                return Err(Error::parse(
                    None,
                    format!("metadata keys must be strings, found {}", yaml_kind(&other)),
                ))
            }
        };
        let value = from_yaml(value)
            .map_err(|message| Error::parse(None, format!("field '{key}': {message}")))?;
        metadata.entries.push((key, value));
    }
    Ok(metadata)
}

fn from_yaml(value: Value) -> std::result::Result<FieldValue, String> {
    Ok(match value {
        Value::Null => FieldValue::Null,
        Value::Bool(value) => FieldValue::Bool(value),
        Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                FieldValue::Integer(value)
            } else if let Some(value) = number.as_u64() {
                FieldValue::Unsigned(value)
            } else if let Some(value) = number.as_f64() {
                FieldValue::Float(value)
            } else {
                return Err(format!("unsupported number {number}"));
            }
        }
        Value::String(value) => FieldValue::String(value),
        Value::Sequence(items) => FieldValue::List(
            items
                .into_iter()
                .map(from_yaml)
                .collect::<std::result::Result<Vec<_>, _>>()?,
        ),
        Value::Mapping(mapping) => {
            FieldValue::Map(mapping_to_metadata(mapping).map_err(|err| match err {
                Error::Parse { message, .. } => message,
                other => other.to_string(),
            })?)
        }
        Value::Tagged(tagged) => {
            return Err(format!("YAML tags are not supported ({})", tagged.tag))
        }
    })
}

fn yaml_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "map",
        Value::Tagged(_) => "tagged value",
    }
}
