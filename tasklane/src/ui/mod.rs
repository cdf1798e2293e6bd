//! Plain-text rendering of the task view for the CLI.
//!
//! Everything here is a pure function of its inputs so the output can be
//! asserted directly in tests.

use std::fmt::Write as _;

use chrono::{Local, TimeZone};

use tasklane_proto::{Filter, Task, TaskCounts, Timestamp};

use crate::sync::TaskView;

/// Format an epoch-millisecond timestamp in local time.
///
/// Renders `"?"` when the time is out of range or `format` contains a
/// specifier chrono does not understand.
#[must_use]
pub fn format_timestamp(ts: Timestamp, format: &str) -> String {
    let ms = ts.as_millis();
    let secs = i64::try_from(ms / 1000).unwrap_or(i64::MAX);
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    let chrono::LocalResult::Single(dt) = Local.timestamp_opt(secs, nsecs) else {
        return "?".to_string();
    };
    let mut out = String::new();
    if write!(out, "{}", dt.format(format)).is_err() {
        return "?".to_string();
    }
    out
}

/// Renders one task as a checkbox line, with the description indented below.
#[must_use]
pub fn render_task(task: &Task, timestamp_format: &str) -> String {
    let checkbox = if task.is_completed() { "[x]" } else { "[ ]" };
    let mut out = format!(
        "{checkbox} {}  ({})  {}",
        task.title,
        format_timestamp(task.created_at, timestamp_format),
        task.id
    );
    if !task.description.is_empty() {
        for line in task.description.lines() {
            let _ = write!(out, "\n    {line}");
        }
    }
    out
}

/// Renders the tasks visible under `filter`, one per line.
#[must_use]
pub fn render_list(tasks: &[Task], filter: Filter, timestamp_format: &str) -> String {
    let visible: Vec<&Task> = tasks.iter().filter(|t| filter.matches(t)).collect();
    if visible.is_empty() {
        return match filter {
            Filter::All => "No tasks found.".to_string(),
            other => format!("No {other} tasks found."),
        };
    }
    visible
        .iter()
        .map(|t| render_task(t, timestamp_format))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders the filter selector counters.
#[must_use]
pub fn render_counts(counts: &TaskCounts) -> String {
    format!(
        "All ({})  Active ({})  Completed ({})",
        counts.total, counts.active, counts.completed
    )
}

/// Renders the header, counters and list for a whole view.
#[must_use]
pub fn render_view(view: &TaskView, filter: Filter, timestamp_format: &str) -> String {
    let mut out = String::new();
    if let Some(principal) = &view.principal {
        let _ = writeln!(out, "Tasks of {principal}");
    }
    if let Some(error) = &view.error {
        let _ = writeln!(out, "error: {error}");
    }
    if view.loading {
        out.push_str("Loading tasks...");
        return out;
    }
    let _ = writeln!(out, "{}", render_counts(&view.counts()));
    out.push_str(&render_list(&view.tasks, filter, timestamp_format));
    out
}
