//! Core task types for Tasklane.
//!
//! A [`Task`] is the only persisted entity. Its identifier is assigned by the
//! document store and is opaque to the client; its status is a closed
//! two-state cycle between [`TaskStatus::Active`] and [`TaskStatus::Completed`].

use serde::{Deserialize, Serialize};

/// Default maximum task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Opaque task identifier assigned by the document store on creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps a store-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Milliseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Completion state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not yet done. Every task starts here.
    #[default]
    Active,
    /// Marked done.
    Completed,
}

impl TaskStatus {
    /// Returns the opposite status.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Active => Self::Completed,
            Self::Completed => Self::Active,
        }
    }

    /// Returns the canonical stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0}")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A validated task as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier.
    pub id: TaskId,
    /// Trimmed, non-empty title.
    pub title: String,
    /// Trimmed description, possibly empty.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// Creation time; the sort key.
    pub created_at: Timestamp,
}

impl Task {
    /// Returns `true` if the task is completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Error returned when a title fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TitleError {
    /// Title is empty or whitespace only.
    #[error("task title cannot be empty")]
    Empty,
    /// Title exceeds the maximum length.
    #[error("task title too long ({len} characters, max {max})")]
    TooLong {
        /// Length of the trimmed title in characters.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Trims a title and checks it against the storage rules.
///
/// Length is counted in characters, not bytes.
///
/// # Errors
///
/// Returns [`TitleError::Empty`] for blank input, or [`TitleError::TooLong`]
/// if the trimmed title has more than `max_len` characters.
pub fn validate_title(raw: &str, max_len: usize) -> Result<String, TitleError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(TitleError::Empty);
    }
    let len = title.chars().count();
    if len > max_len {
        return Err(TitleError::TooLong { len, max: max_len });
    }
    Ok(title.to_string())
}
