//! Document shape used by the task store and its mapping to [`Task`].
//!
//! The store keeps schemaless documents: an ordered map of field name to
//! [`FieldValue`]. Documents written by older clients or interrupted writes
//! may lack fields or carry values of the wrong type, so every document is
//! passed through [`normalize_document`] before it reaches the projection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId, TaskStatus, Timestamp};

/// Field holding the task title.
pub const FIELD_TITLE: &str = "title";
/// Field holding the task description.
pub const FIELD_DESCRIPTION: &str = "description";
/// Field holding the task status (`"active"` or `"completed"`).
pub const FIELD_STATUS: &str = "status";
/// Field holding the creation timestamp.
pub const FIELD_CREATED_AT: &str = "createdAt";

/// Title shown for documents whose title is missing or blank.
pub const DEFAULT_PLACEHOLDER_TITLE: &str = "Untitled task";

/// A single typed value inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Explicit null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Integer(i64),
    /// UTF-8 text value.
    Text(String),
    /// Point in time.
    Timestamp(Timestamp),
}

impl FieldValue {
    /// Returns the text if this is a [`FieldValue::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Timestamp> for FieldValue {
    fn from(value: Timestamp) -> Self {
        Self::Timestamp(value)
    }
}

impl From<TaskStatus> for FieldValue {
    fn from(value: TaskStatus) -> Self {
        Self::Text(value.as_str().to_string())
    }
}

/// A schemaless document: field name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document(BTreeMap<String, FieldValue>);

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builds the document written when a task is created.
    ///
    /// `title` and `description` are stored as given; callers validate first.
    #[must_use]
    pub fn new_task(title: &str, description: &str, created_at: Timestamp) -> Self {
        Self::new()
            .with(FIELD_TITLE, title)
            .with(FIELD_DESCRIPTION, description)
            .with(FIELD_STATUS, TaskStatus::Active)
            .with(FIELD_CREATED_AT, created_at)
    }

    /// Builds a partial document that only sets the status.
    #[must_use]
    pub fn status_patch(status: TaskStatus) -> Self {
        Self::new().with(FIELD_STATUS, status)
    }

    /// Builds a partial document that replaces title and description.
    #[must_use]
    pub fn content_patch(title: &str, description: &str) -> Self {
        Self::new()
            .with(FIELD_TITLE, title)
            .with(FIELD_DESCRIPTION, description)
    }

    /// Returns the document with `field` set to `value`.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Sets `field` to `value`, replacing any previous value.
    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) {
        self.0.insert(field.to_string(), value.into());
    }

    /// Returns the value of `field`, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    /// Overwrites this document's fields with every field of `patch`.
    ///
    /// Fields absent from `patch` are left untouched.
    pub fn merge(&mut self, patch: &Self) {
        for (field, value) in &patch.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Returns the field names in order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns `true` if the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One entry of a store snapshot: an id plus its raw fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Store-assigned document id.
    pub id: TaskId,
    /// Document fields exactly as stored.
    pub fields: Document,
}

impl RawDocument {
    /// Creates a raw document.
    #[must_use]
    pub const fn new(id: TaskId, fields: Document) -> Self {
        Self { id, fields }
    }
}

/// Maps a raw store document onto a [`Task`], filling in defaults.
///
/// - missing, non-text or blank `title` → `placeholder_title`
/// - missing or non-text `description` → empty string
/// - missing or unrecognised `status` → [`TaskStatus::Active`]
/// - missing or invalid `createdAt` → `now`
///
/// Text fields are trimmed. `createdAt` accepts a timestamp or a
/// non-negative integer of milliseconds.
#[must_use]
pub fn normalize_document(raw: &RawDocument, now: Timestamp, placeholder_title: &str) -> Task {
    let fields = &raw.fields;

    let title = fields
        .get(FIELD_TITLE)
        .and_then(FieldValue::as_text)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(placeholder_title)
        .to_string();

    let description = fields
        .get(FIELD_DESCRIPTION)
        .and_then(FieldValue::as_text)
        .map_or_else(String::new, |d| d.trim().to_string());

    let status = fields
        .get(FIELD_STATUS)
        .and_then(FieldValue::as_text)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();

    let created_at = match fields.get(FIELD_CREATED_AT) {
        Some(FieldValue::Timestamp(ts)) => *ts,
        Some(FieldValue::Integer(ms)) => u64::try_from(*ms).map_or(now, Timestamp::from_millis),
        _ => now,
    };

    Task {
        id: raw.id.clone(),
        title,
        description,
        status,
        created_at,
    }
}
