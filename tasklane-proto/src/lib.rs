//! Shared model definitions for `Tasklane`.
//!
//! Holds the task entity, the document shape the store persists, and the
//! pure projection rules that turn store snapshots into the rendered list.

pub mod codec;
pub mod document;
pub mod projection;
pub mod scope;
pub mod task;

pub use document::{Document, FieldValue, RawDocument, normalize_document};
pub use projection::{Filter, TaskCounts, count_tasks, filter_tasks, project_snapshot};
pub use scope::{PrincipalId, ScopePath};
pub use task::{Task, TaskId, TaskStatus, Timestamp};
