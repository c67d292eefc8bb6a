//! Task records for stm.
//!
//! A task is one Markdown file: a metadata block holding the schema fields
//! (plus any extension fields other tools added) followed by a free-form
//! body. This module maps between [`Task`] and that file representation,
//! validates user input, and derives file names.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, DurationRound, SecondsFormat, TimeDelta, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::metadata::{self, Document, FieldValue, Metadata, KNOWN_FIELDS};
use crate::sections::{self, Sections};

/// Schema version written into new tasks
pub const TASK_SCHEMA_VERSION: i64 = 1;

/// Extension of task files
pub const FILE_EXTENSION: &str = "md";

const SLUG_MAX_BYTES: usize = 50;
const SLUG_FALLBACK: &str = "task";
const FILENAME_ILLEGAL: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "invalid status '{value}' (expected one of: pending, in-progress, done)"
                ))
            })
    }
}

/// A stored task
///
/// Serializes as one flat object: the schema fields, `body`, then every
/// extension field under its own key.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub schema: i64,
    pub id: u64,
    pub title: String,
    pub status: TaskStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub tags: Vec<String>,
    pub dependencies: Vec<u64>,
    pub body: String,
    /// Fields outside the task schema, in file order
    pub extensions: Metadata,
}

/// JSON key holding the body; not usable as an extension field
pub const BODY_KEY: &str = "body";

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(KNOWN_FIELDS.len() + 1 + self.extensions.len()))?;
        map.serialize_entry("schema", &self.schema)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("title", &self.title)?;
        map.serialize_entry("status", &self.status)?;
        map.serialize_entry("created", &format_timestamp(&self.created))?;
        map.serialize_entry("updated", &format_timestamp(&self.updated))?;
        map.serialize_entry("tags", &self.tags)?;
        map.serialize_entry("dependencies", &self.dependencies)?;
        map.serialize_entry(BODY_KEY, &self.body)?;
        // A hand-written `body` field cannot be shown next to the real body.
        for (key, value) in self.extensions.iter().filter(|(key, _)| *key != BODY_KEY) {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Task {
    /// File name derived from id and title
    pub fn file_name(&self) -> String {
        file_name(self.id, &self.title)
    }

    /// Structured view of the body
    pub fn sections(&self) -> Sections {
        sections::parse(&self.body)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|existing| existing == tag)
    }

    /// Metadata block contents: schema fields, then extensions
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("schema", self.schema);
        metadata.insert("id", self.id);
        metadata.insert("title", self.title.as_str());
        metadata.insert("status", self.status.as_str());
        metadata.insert("created", format_timestamp(&self.created));
        metadata.insert("updated", format_timestamp(&self.updated));
        metadata.insert(
            "tags",
            FieldValue::List(self.tags.iter().map(|tag| FieldValue::from(tag.as_str())).collect()),
        );
        metadata.insert(
            "dependencies",
            FieldValue::List(self.dependencies.iter().map(|id| FieldValue::from(*id)).collect()),
        );
        for (key, value) in self.extensions.iter() {
            metadata.insert(key, value.clone());
        }
        metadata
    }

    /// Full file text
    pub fn to_file_text(&self) -> Result<String> {
        metadata::stringify(&self.body, &self.to_metadata())
    }

    /// Parse full file text
    pub fn from_file_text(text: &str) -> Result<Self> {
        Self::from_document(metadata::parse(text)?)
    }

    pub fn from_document(document: Document) -> Result<Self> {
        let Document { metadata, body } = document;

        let schema = match metadata.get("schema") {
            None => TASK_SCHEMA_VERSION,
            Some(FieldValue::Integer(value)) => *value,
            Some(other) => return Err(wrong_type("schema", "integer", other)),
        };
        let id = match required(&metadata, "id")?.as_u64() {
            Some(id) if id > 0 => id,
            _ => {
                return Err(Error::parse(
                    None,
                    "field 'id' must be a positive integer",
                ))
            }
        };
        let title = required_str(&metadata, "title")?.to_string();
        let status = required_str(&metadata, "status")?
            .parse::<TaskStatus>()
            .map_err(|err| Error::parse(None, err.to_string()))?;
        let created = parse_timestamp(required_str(&metadata, "created")?, "created")?;
        let updated = parse_timestamp(required_str(&metadata, "updated")?, "updated")?;

        let tags = match metadata.get("tags") {
            None | Some(FieldValue::Null) => Vec::new(),
            Some(FieldValue::List(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| wrong_type("tags", "list of strings", item))
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => return Err(wrong_type("tags", "list", other)),
        };
        let dependencies = match metadata.get("dependencies") {
            None | Some(FieldValue::Null) => Vec::new(),
            Some(FieldValue::List(items)) => items
                .iter()
                .map(|item| match item.as_u64() {
                    Some(id) if id > 0 => Ok(id),
                    _ => Err(wrong_type("dependencies", "list of positive integers", item)),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => return Err(wrong_type("dependencies", "list", other)),
        };

        let extensions = metadata
            .iter()
            .filter(|(key, _)| !KNOWN_FIELDS.contains(key))
            .map(|(key, value)| (key, value.clone()))
            .collect();

        Ok(Task {
            schema,
            id,
            title,
            status,
            created,
            updated,
            tags: dedup(tags),
            dependencies: dedup(dependencies),
            body,
            extensions,
        })
    }
}

/// Input for [`crate::store::TaskStore::create`]
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    /// Defaults to `pending`
    pub status: Option<TaskStatus>,
    pub tags: Vec<String>,
    pub dependencies: Vec<u64>,
    pub body: String,
    pub extensions: Metadata,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = u64>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.extensions.insert(key, value);
        self
    }
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    /// Replaces all tags
    pub tags: Option<Vec<String>>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    /// Replaces all dependencies
    pub dependencies: Option<Vec<u64>>,
    /// Replaces the whole body
    pub body: Option<String>,
    /// Section name to new content, applied after `body`; empty content
    /// removes the section
    pub sections: Vec<(String, String)>,
    /// Extension key to `Some(value)` to set or `None` to remove
    pub fields: Vec<(String, Option<FieldValue>)>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.tags.is_none()
            && self.add_tags.is_empty()
            && self.remove_tags.is_empty()
            && self.dependencies.is_none()
            && self.body.is_none()
            && self.sections.is_empty()
            && self.fields.is_empty()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn dependencies(mut self, dependencies: impl IntoIterator<Item = u64>) -> Self {
        self.dependencies = Some(dependencies.into_iter().collect());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn section(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.sections.push((name.into(), content.into()));
        self
    }

    pub fn set_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key.into(), Some(value.into())));
        self
    }

    pub fn remove_field(mut self, key: impl Into<String>) -> Self {
        self.fields.push((key.into(), None));
        self
    }

    /// Apply to `task`, leaving `updated` to the caller
    pub(crate) fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.trim().to_string();
        }
        if let Some(status) = self.status {
            task.status = status;
        }

        if let Some(tags) = &self.tags {
            task.tags = normalize_tags(tags.clone());
        }
        if !self.add_tags.is_empty() {
            let mut tags = std::mem::take(&mut task.tags);
            tags.extend(self.add_tags.iter().cloned());
            task.tags = normalize_tags(tags);
        }
        if !self.remove_tags.is_empty() {
            task.tags
                .retain(|tag| !self.remove_tags.iter().any(|removed| removed.trim() == tag));
        }

        if let Some(dependencies) = &self.dependencies {
            task.dependencies = normalize_dependencies(dependencies.clone());
        }

        if let Some(body) = &self.body {
            task.body = body.clone();
        }
        for (name, content) in &self.sections {
            task.body = sections::update_section(&task.body, name, content);
        }

        for (key, value) in &self.fields {
            match value {
                Some(value) => task.extensions.merge(key.as_str(), value.clone()),
                None => {
                    task.extensions.remove(key);
                }
            }
        }
    }
}

/// Filter for [`crate::store::TaskStore::list`]
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// Matches tasks carrying at least one of these tags
    pub tags: Vec<String>,
    /// Case-sensitive substring of title or body
    pub search: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|tag| task.has_tag(tag)) {
            return false;
        }
        if let Some(search) = &self.search {
            if !task.title.contains(search.as_str()) && !task.body.contains(search.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Delete even when other tasks depend on this one
    pub force: bool,
}

/// Check a title and return it trimmed
pub fn validate_title(title: &str, max_length: usize) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("title cannot be empty".to_string()));
    }
    let length = trimmed.chars().count();
    if length > max_length {
        return Err(Error::Validation(format!(
            "title is {length} characters; the limit is {max_length}"
        )));
    }
    if let Some(ch) = trimmed
        .chars()
        .find(|ch| ch.is_control() || FILENAME_ILLEGAL.contains(ch))
    {
        return Err(Error::Validation(format!(
            "title contains invalid character {ch:?}"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_body(body: &str, max_bytes: usize) -> Result<()> {
    if body.len() > max_bytes {
        return Err(Error::Validation(format!(
            "body is {} bytes; the limit is {max_bytes}",
            body.len()
        )));
    }
    Ok(())
}

pub fn validate_dependencies(dependencies: &[u64]) -> Result<()> {
    if dependencies.contains(&0) {
        return Err(Error::Validation(
            "dependency ids must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Extension keys must be non-empty and must not shadow a schema field
pub fn validate_extension_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::Validation("field name cannot be empty".to_string()));
    }
    if KNOWN_FIELDS.contains(&key) || key == BODY_KEY {
        return Err(Error::Validation(format!(
            "'{key}' is a built-in field and cannot be set as a custom field"
        )));
    }
    Ok(())
}

/// Trim, drop empty and de-duplicate tags, keeping first occurrences
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    dedup(
        tags.into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
    )
}

/// De-duplicate dependency ids, keeping first occurrences
pub fn normalize_dependencies(dependencies: Vec<u64>) -> Vec<u64> {
    dedup(dependencies)
}

/// Filename-safe form of a title: lowercase alphanumerics joined by `-`
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.len() > SLUG_MAX_BYTES {
        let mut cut = SLUG_MAX_BYTES;
        while !slug.is_char_boundary(cut) {
            cut -= 1;
        }
        slug.truncate(cut);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    if slug.is_empty() {
        SLUG_FALLBACK.to_string()
    } else {
        slug
    }
}

pub fn file_name(id: u64, title: &str) -> String {
    format!("{id}-{}.{FILE_EXTENSION}", slugify(title))
}

/// Id encoded in a task file name, if the name is one
pub fn parse_file_id(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(FILE_EXTENSION)?.strip_suffix('.')?;
    let (digits, _) = stem.split_once('-')?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok().filter(|id| *id > 0)
}

/// Current time truncated to what the file format stores
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(now)
}

/// Timestamp for a mutation: now, but always after `previous`
pub fn next_updated(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_millis();
    if now > previous {
        now
    } else {
        previous + TimeDelta::milliseconds(1)
    }
}

/// RFC 3339 in UTC with a `Z` suffix
///
/// Millisecond precision, unless the value carries more: timestamps read
/// from a file are written back exactly as precise as they were.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    let format = if timestamp.timestamp_subsec_nanos() % 1_000_000 == 0 {
        SecondsFormat::Millis
    } else {
        SecondsFormat::AutoSi
    };
    timestamp.to_rfc3339_opts(format, true)
}

fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| Error::parse(None, format!("field '{field}' is not an RFC 3339 timestamp: {err}")))
}

fn required<'a>(metadata: &'a Metadata, field: &str) -> Result<&'a FieldValue> {
    metadata
        .get(field)
        .ok_or_else(|| Error::parse(None, format!("missing required field '{field}'")))
}

fn required_str<'a>(metadata: &'a Metadata, field: &str) -> Result<&'a str> {
    let value = required(metadata, field)?;
    value.as_str().ok_or_else(|| wrong_type(field, "string", value))
}

fn wrong_type(field: &str, expected: &str, found: &FieldValue) -> Error {
    Error::parse(
        None,
        format!("field '{field}' must be a {expected}, found {}", found.kind()),
    )
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut unique = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}
