//! Pure functions that turn store snapshots into the rendered task list.
//!
//! Nothing here holds state: the same snapshot (and the same `now`) always
//! yields the same projection, and filtering is a function of
//! `(tasks, filter)` alone.

use serde::{Deserialize, Serialize};

use crate::document::{RawDocument, normalize_document};
use crate::task::{Task, TaskStatus, Timestamp};

/// Normalizes every document of a snapshot and orders them newest first.
///
/// Documents with equal `createdAt` keep their snapshot order.
#[must_use]
pub fn project_snapshot(docs: &[RawDocument], now: Timestamp, placeholder_title: &str) -> Vec<Task> {
    let mut tasks: Vec<Task> = docs
        .iter()
        .map(|doc| normalize_document(doc, now, placeholder_title))
        .collect();
    sort_newest_first(&mut tasks);
    tasks
}

/// Stable sort by creation time, descending.
pub fn sort_newest_first(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Which tasks a view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// Every task.
    #[default]
    All,
    /// Only active tasks.
    Active,
    /// Only completed tasks.
    Completed,
}

impl Filter {
    /// Returns `true` if `task` is visible under this filter.
    #[must_use]
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => task.status == TaskStatus::Active,
            Self::Completed => task.status == TaskStatus::Completed,
        }
    }

    /// Returns the lowercase name of the filter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown filter name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown filter: {0} (expected all, active or completed)")]
pub struct UnknownFilter(pub String);

impl std::str::FromStr for Filter {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(UnknownFilter(other.to_string())),
        }
    }
}

/// Returns the tasks visible under `filter`, preserving order.
#[must_use]
pub fn filter_tasks(tasks: &[Task], filter: Filter) -> Vec<Task> {
    tasks.iter().filter(|t| filter.matches(t)).cloned().collect()
}

/// Per-status task counts shown beside the filter selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskCounts {
    /// All tasks.
    pub total: usize,
    /// Active tasks.
    pub active: usize,
    /// Completed tasks.
    pub completed: usize,
}

impl TaskCounts {
    /// Returns the count matching `filter`.
    #[must_use]
    pub const fn for_filter(&self, filter: Filter) -> usize {
        match filter {
            Filter::All => self.total,
            Filter::Active => self.active,
            Filter::Completed => self.completed,
        }
    }
}

/// Counts tasks by status.
#[must_use]
pub fn count_tasks(tasks: &[Task]) -> TaskCounts {
    let completed = tasks.iter().filter(|t| t.is_completed()).count();
    TaskCounts {
        total: tasks.len(),
        active: tasks.len() - completed,
        completed,
    }
}
