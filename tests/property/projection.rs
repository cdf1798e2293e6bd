//! Property-based tests for snapshot projection and filtering.
//!
//! Uses proptest to verify:
//! 1. Projection is sorted newest first and stable for equal timestamps.
//! 2. Projection never yields a blank title, whatever the stored fields.
//! 3. `filter_tasks(All)` is the identity; status filters partition the list.
//! 4. Toggling a status twice is the identity.
//! 5. Titles that are blank after trimming never validate.

use proptest::prelude::*;
use tasklane_proto::document::{DEFAULT_PLACEHOLDER_TITLE, FIELD_CREATED_AT, FIELD_STATUS, FIELD_TITLE};
use tasklane_proto::task::{TitleError, validate_title};
use tasklane_proto::*;

/// Strategy for generating arbitrary field values, including wrong types.
fn arb_field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Integer),
        ".{0,16}".prop_map(FieldValue::Text),
        (0u64..10_000).prop_map(|ms| FieldValue::Timestamp(Timestamp::from_millis(ms))),
    ]
}

/// Strategy for generating a well-formed task document.
fn arb_task_document() -> impl Strategy<Value = Document> {
    ("[a-z]{1,12}", "[a-z ]{0,12}", any::<bool>(), 0u64..50).prop_map(
        |(title, description, completed, created)| {
            let status = if completed {
                TaskStatus::Completed
            } else {
                TaskStatus::Active
            };
            let mut doc = Document::new_task(&title, &description, Timestamp::from_millis(created));
            doc.merge(&Document::status_patch(status));
            doc
        },
    )
}

/// Strategy for generating a possibly malformed document.
fn arb_partial_document() -> impl Strategy<Value = Document> {
    (
        prop::option::of(arb_field_value()),
        prop::option::of(arb_field_value()),
        prop::option::of(arb_field_value()),
    )
        .prop_map(|(title, status, created)| {
            let mut doc = Document::new();
            if let Some(v) = title {
                doc.set(FIELD_TITLE, v);
            }
            if let Some(v) = status {
                doc.set(FIELD_STATUS, v);
            }
            if let Some(v) = created {
                doc.set(FIELD_CREATED_AT, v);
            }
            doc
        })
}

/// Attaches sequential ids so arrival order is recoverable from the id.
fn with_ids(docs: Vec<Document>) -> Vec<RawDocument> {
    docs.into_iter()
        .enumerate()
        .map(|(i, fields)| RawDocument::new(TaskId::new(format!("{i:04}")), fields))
        .collect()
}

fn project(docs: &[RawDocument]) -> Vec<Task> {
    project_snapshot(docs, Timestamp::from_millis(0), DEFAULT_PLACEHOLDER_TITLE)
}

proptest! {
    #[test]
    fn projection_sorted_desc_and_stable(docs in prop::collection::vec(arb_task_document(), 0..40)) {
        let tasks = project(&with_ids(docs));
        for pair in tasks.windows(2) {
            prop_assert!(pair[0].created_at >= pair[1].created_at);
            if pair[0].created_at == pair[1].created_at {
                // Equal keys keep arrival order; ids encode arrival index.
                prop_assert!(pair[0].id < pair[1].id);
            }
        }
    }

    #[test]
    fn projection_keeps_every_document(docs in prop::collection::vec(arb_partial_document(), 0..40)) {
        let raw = with_ids(docs);
        let tasks = project(&raw);
        prop_assert_eq!(tasks.len(), raw.len());
    }

    #[test]
    fn projection_never_yields_blank_title(docs in prop::collection::vec(arb_partial_document(), 0..40)) {
        for task in project(&with_ids(docs)) {
            prop_assert!(!task.title.trim().is_empty());
        }
    }

    #[test]
    fn filter_all_is_identity(docs in prop::collection::vec(arb_task_document(), 0..40)) {
        let tasks = project(&with_ids(docs));
        prop_assert_eq!(filter_tasks(&tasks, Filter::All), tasks);
    }

    #[test]
    fn status_filters_partition(docs in prop::collection::vec(arb_task_document(), 0..40)) {
        let tasks = project(&with_ids(docs));
        let active = filter_tasks(&tasks, Filter::Active);
        let completed = filter_tasks(&tasks, Filter::Completed);
        prop_assert_eq!(active.len() + completed.len(), tasks.len());
        prop_assert!(active.iter().all(|t| t.status == TaskStatus::Active));
        prop_assert!(completed.iter().all(|t| t.status == TaskStatus::Completed));

        // Order preserved: the filtered list is a subsequence of the full list.
        let mut cursor = tasks.iter();
        for t in &active {
            prop_assert!(cursor.any(|x| x == t));
        }

        let counts = count_tasks(&tasks);
        prop_assert_eq!(counts.active, active.len());
        prop_assert_eq!(counts.completed, completed.len());
    }

    #[test]
    fn toggle_twice_is_identity(completed in any::<bool>()) {
        let status = if completed { TaskStatus::Completed } else { TaskStatus::Active };
        prop_assert_ne!(status.toggled(), status);
        prop_assert_eq!(status.toggled().toggled(), status);
    }

    #[test]
    fn blank_titles_never_validate(ws in "[ \t\n\r]{0,20}") {
        prop_assert_eq!(validate_title(&ws, 256), Err(TitleError::Empty));
    }

    #[test]
    fn valid_titles_come_back_trimmed(core in "[a-zA-Z0-9][a-zA-Z0-9 ]{0,30}[a-zA-Z0-9]", pad in "[ \t]{0,4}") {
        let raw = format!("{pad}{core}{pad}");
        prop_assert_eq!(validate_title(&raw, 256), Ok(core));
    }
}
