//! Integration tests for the task sync model.
//!
//! Drive `TaskSync` end to end against `MemoryStore` and `LocalIdentity`:
//! the add/toggle/edit/remove operations, snapshot normalization, and the
//! failure paths of the remote store.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use tasklane::identity::LocalIdentity;
use tasklane::store::memory::{MemoryStore, StoreOp};
use tasklane::store::{RemoteStore, StoreError};
use tasklane::sync::{SyncConfig, SyncError, SyncPhase, TaskSync, TaskView};
use tasklane_proto::{
    Document, FieldValue, Filter, PrincipalId, RawDocument, ScopePath, TaskId, TaskStatus,
    Timestamp, filter_tasks,
};

const WAIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

struct Harness {
    store: MemoryStore,
    identity: LocalIdentity,
    sync: TaskSync<MemoryStore>,
}

impl Harness {
    /// Starts a model signed in as `principal` and waits for the first snapshot.
    async fn live(principal: &str) -> Self {
        Self::live_with(principal, MemoryStore::new(), SyncConfig::default()).await
    }

    async fn live_with(principal: &str, store: MemoryStore, config: SyncConfig) -> Self {
        let identity = LocalIdentity::new();
        let sync = TaskSync::spawn(store.clone(), &identity, config);
        identity.sign_in(PrincipalId::new(principal));
        sync.wait_until_ready(WAIT).await.expect("model should go live");
        Self {
            store,
            identity,
            sync,
        }
    }

    async fn wait(&self, predicate: impl FnMut(&TaskView) -> bool) -> TaskView {
        self.sync
            .wait_for(WAIT, predicate)
            .await
            .expect("view never reached the expected state")
    }

    /// Adds a task and waits until it shows up in the projection.
    async fn add_confirmed(&self, title: &str) -> TaskId {
        let id = self.sync.add(title, "").await.unwrap();
        self.wait(|v| v.find(&id).is_some()).await;
        id
    }

    fn mutations(&self) -> Vec<StoreOp> {
        self.store
            .ops()
            .into_iter()
            .filter(|op| !matches!(op, StoreOp::Subscribe(_)))
            .collect()
    }
}

fn scope(principal: &str) -> ScopePath {
    ScopePath::for_principal(&PrincipalId::new(principal))
}

fn raw(id: &str, doc: Document) -> RawDocument {
    RawDocument::new(TaskId::new(id), doc)
}

// ===========================================================================
// Operations
// ===========================================================================

#[tokio::test]
async fn buy_milk_scenario() {
    let h = Harness::live("alice").await;
    assert!(h.sync.view().tasks.is_empty());

    let before = Timestamp::now();
    h.sync.add("  Buy milk ", "").await.unwrap();

    let view = h.wait(|v| v.tasks.len() == 1).await;
    let task = &view.tasks[0];
    assert_eq!(task.title, "Buy milk");
    assert_eq!(task.description, "");
    assert_eq!(task.status, TaskStatus::Active);
    assert!(task.created_at >= before);
    assert_eq!(view.phase, SyncPhase::Live);
    assert!(!view.loading);
}

#[tokio::test]
async fn add_writes_into_principal_scope() {
    let h = Harness::live("alice").await;
    h.add_confirmed("Task").await;

    match h.mutations().as_slice() {
        [StoreOp::Create { scope: s, doc }] => {
            assert_eq!(s, &scope("alice"));
            assert_eq!(
                doc.get("status"),
                Some(&FieldValue::Text("active".to_string()))
            );
            assert!(matches!(doc.get("createdAt"), Some(FieldValue::Timestamp(_))));
        }
        other => panic!("expected a single create, got {other:?}"),
    }
}

#[tokio::test]
async fn newest_task_is_listed_first() {
    let h = Harness::live("alice").await;
    h.add_confirmed("first").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    h.add_confirmed("second").await;

    let titles: Vec<String> = h.sync.view().tasks.iter().map(|t| t.title.clone()).collect();
    assert_eq!(titles, ["second", "first"]);
}

#[tokio::test]
async fn toggle_twice_restores_status() {
    let h = Harness::live("alice").await;
    let id = h.add_confirmed("Task").await;

    h.sync.toggle(&id).await.unwrap();
    let view = h
        .wait(|v| v.find(&id).is_some_and(|t| t.status == TaskStatus::Completed))
        .await;
    let toggled = view.find(&id).unwrap().clone();

    h.sync.toggle(&id).await.unwrap();
    let view = h
        .wait(|v| v.find(&id).is_some_and(|t| t.status == TaskStatus::Active))
        .await;
    let restored = view.find(&id).unwrap();

    assert_eq!(restored.title, toggled.title);
    assert_eq!(restored.created_at, toggled.created_at);
}

#[tokio::test]
async fn edit_replaces_title_and_description() {
    let h = Harness::live("alice").await;
    let id = h.add_confirmed("Draft").await;

    h.sync.edit(&id, " Final ", " with notes ").await.unwrap();
    let view = h.wait(|v| v.find(&id).is_some_and(|t| t.title == "Final")).await;
    let task = view.find(&id).unwrap();
    assert_eq!(task.description, "with notes");
    assert_eq!(task.status, TaskStatus::Active);
}

#[tokio::test]
async fn edit_with_empty_title_is_rejected_before_remote_call() {
    let h = Harness::live("alice").await;
    let id = h.add_confirmed("Keep me").await;
    h.store.clear_ops();

    let err = h.sync.edit(&id, "", "new").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput(_)));
    assert!(h.store.ops().is_empty());
    assert_eq!(h.sync.view().find(&id).unwrap().title, "Keep me");
}

#[tokio::test]
async fn edit_validates_before_checking_existence() {
    let h = Harness::live("alice").await;
    let err = h
        .sync
        .edit(&TaskId::new("ghost"), "   ", "")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput(_)));
}

#[tokio::test]
async fn remove_unknown_id_is_not_found() {
    let h = Harness::live("alice").await;
    h.add_confirmed("Task").await;

    let err = h.sync.remove(&TaskId::new("no-such-task")).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(ref id) if id.as_str() == "no-such-task"));
    assert_eq!(h.mutations().len(), 1);
    assert_eq!(h.sync.view().tasks.len(), 1);
}

#[tokio::test]
async fn remove_deletes_task() {
    let h = Harness::live("alice").await;
    let keep = h.add_confirmed("keep").await;
    let gone = h.add_confirmed("gone").await;

    h.sync.remove(&gone).await.unwrap();
    let view = h.wait(|v| v.find(&gone).is_none()).await;
    assert_eq!(view.tasks.len(), 1);
    assert!(view.find(&keep).is_some());
}

#[tokio::test]
async fn filters_follow_status_changes() {
    let h = Harness::live("alice").await;
    let a = h.add_confirmed("a").await;
    h.add_confirmed("b").await;
    h.sync.toggle(&a).await.unwrap();
    let view = h.wait(|v| v.counts().completed == 1).await;

    assert_eq!(filter_tasks(&view.tasks, Filter::All), view.tasks);
    let completed = view.filtered(Filter::Completed);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, a);
    assert_eq!(view.filtered(Filter::Active).len(), 1);
    assert_eq!(view.counts().total, 2);
}

// ===========================================================================
// Normalization of stored documents
// ===========================================================================

#[tokio::test]
async fn partial_documents_are_normalized() {
    let store = MemoryStore::new();
    store
        .insert_raw(&scope("alice"), raw("empty", Document::new()))
        .unwrap();
    store
        .insert_raw(
            &scope("alice"),
            raw(
                "legacy",
                Document::new()
                    .with("title", "  Old task  ")
                    .with("status", "archived")
                    .with("createdAt", "6/11/2025"),
            ),
        )
        .unwrap();

    let before = Timestamp::now();
    let h = Harness::live_with("alice", store, SyncConfig::default()).await;
    let view = h.sync.view();
    assert_eq!(view.tasks.len(), 2);

    let empty = view.find(&TaskId::new("empty")).unwrap();
    assert_eq!(empty.title, "Untitled task");
    assert_eq!(empty.description, "");
    assert_eq!(empty.status, TaskStatus::Active);
    assert!(empty.created_at >= before);

    let legacy = view.find(&TaskId::new("legacy")).unwrap();
    assert_eq!(legacy.title, "Old task");
    assert_eq!(legacy.status, TaskStatus::Active);
}

#[tokio::test]
async fn custom_placeholder_title_is_used() {
    let store = MemoryStore::new();
    store
        .insert_raw(&scope("alice"), raw("t", Document::new().with("title", "   ")))
        .unwrap();
    let config = SyncConfig {
        placeholder_title: "(untitled)".to_string(),
        ..SyncConfig::default()
    };
    let h = Harness::live_with("alice", store, config).await;
    assert_eq!(h.sync.view().tasks[0].title, "(untitled)");
}

#[tokio::test]
async fn seeded_tasks_sort_by_created_at_descending() {
    let store = MemoryStore::new();
    for (id, ts) in [("old", 1_000), ("new", 3_000), ("mid", 2_000)] {
        store
            .insert_raw(
                &scope("alice"),
                raw(id, Document::new_task(id, "", Timestamp::from_millis(ts))),
            )
            .unwrap();
    }
    let h = Harness::live_with("alice", store, SyncConfig::default()).await;
    let view = h.sync.view();
    let ids: Vec<&str> = view.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["new", "mid", "old"]);
}

// ===========================================================================
// Remote failures
// ===========================================================================

#[tokio::test]
async fn remote_failure_is_surfaced_and_projection_kept() {
    let h = Harness::live("alice").await;
    let id = h.add_confirmed("Task").await;
    h.store.set_mutation_failure(Some("permission denied"));

    for result in [
        h.sync.add("Other", "").await.map(|_| ()),
        h.sync.toggle(&id).await,
        h.sync.edit(&id, "Renamed", "").await,
        h.sync.remove(&id).await,
    ] {
        assert!(matches!(
            result,
            Err(SyncError::RemoteFailure(StoreError::Rejected(ref r))) if r == "permission denied"
        ));
    }

    let view = h.sync.view();
    assert_eq!(view.tasks.len(), 1);
    assert_eq!(view.tasks[0].title, "Task");
    assert_eq!(view.tasks[0].status, TaskStatus::Active);
}

#[tokio::test]
async fn failed_call_is_not_retried() {
    let h = Harness::live("alice").await;
    h.store.set_mutation_failure(Some("offline"));
    let _ = h.sync.add("Task", "").await;
    assert_eq!(h.mutations().len(), 1);
}

#[tokio::test]
async fn slow_store_times_out() {
    let config = SyncConfig {
        op_timeout: Duration::from_millis(30),
        ..SyncConfig::default()
    };
    let h = Harness::live_with("alice", MemoryStore::new(), config).await;
    h.store.set_latency(Duration::from_secs(1));

    let err = h.sync.add("Task", "").await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteFailure(StoreError::Timeout)));
}

#[tokio::test]
async fn subscription_error_persists_until_next_snapshot() {
    let h = Harness::live("alice").await;
    h.store.push_error(&scope("alice"), "index building");

    let view = h.wait(|v| v.error.is_some()).await;
    assert_eq!(view.error.as_deref(), Some("index building"));
    assert!(!view.loading);
    assert_eq!(view.phase, SyncPhase::Live);

    h.add_confirmed("Task").await;
    assert!(h.sync.view().error.is_none());
}

#[tokio::test]
async fn store_loss_returns_to_idle_and_blocks_operations() {
    let h = Harness::live("alice").await;
    let id = h.add_confirmed("Task").await;

    h.store.disconnect();
    let view = h.wait(|v| v.phase == SyncPhase::Idle).await;
    assert!(view.tasks.is_empty());
    assert!(view.error.is_some());

    assert!(matches!(
        h.sync.add("Task", "").await,
        Err(SyncError::Unavailable)
    ));
    assert!(matches!(h.sync.toggle(&id).await, Err(SyncError::Unavailable)));
}

#[tokio::test]
async fn sign_in_after_store_loss_recovers() {
    let h = Harness::live("alice").await;
    h.add_confirmed("Task").await;
    h.store.disconnect();
    h.wait(|v| v.phase == SyncPhase::Idle).await;

    h.store.reconnect();
    h.identity.sign_in(PrincipalId::new("alice"));
    let view = h
        .wait(|v| v.phase == SyncPhase::Live && v.tasks.len() == 1)
        .await;
    assert!(view.error.is_none());
}

// ===========================================================================
// Subscription lifecycle
// ===========================================================================

#[tokio::test]
async fn exactly_one_subscription_while_live() {
    let h = Harness::live("alice").await;
    h.add_confirmed("a").await;
    h.add_confirmed("b").await;
    assert_eq!(h.store.subscriber_count(&scope("alice")), 1);
}

#[tokio::test]
async fn shutdown_releases_subscription() {
    let h = Harness::live("alice").await;
    assert_eq!(h.store.subscriber_count(&scope("alice")), 1);

    let Harness { store, sync, .. } = h;
    sync.shutdown().await;
    assert_eq!(store.subscriber_count(&scope("alice")), 0);
}

#[tokio::test]
async fn persisted_tasks_survive_restart() {
    let path = std::env::temp_dir().join(format!("tasklane-it-{}.bin", uuid::Uuid::now_v7()));

    let h = Harness::live_with(
        "alice",
        MemoryStore::open(&path).unwrap(),
        SyncConfig::default(),
    )
    .await;
    let id = h.add_confirmed("Remember me").await;
    let Harness { sync, .. } = h;
    sync.shutdown().await;

    let h = Harness::live_with(
        "alice",
        MemoryStore::open(&path).unwrap(),
        SyncConfig::default(),
    )
    .await;
    assert_eq!(h.sync.view().find(&id).unwrap().title, "Remember me");

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn store_is_usable_directly_through_trait() {
    let store = MemoryStore::new();
    let mut sub = store.subscribe(&scope("alice")).await.unwrap();
    assert!(sub.next_event().await.is_some());
    assert_eq!(sub.scope(), &scope("alice"));
}
