//! Task sync model: the local projection of one principal's tasks.
//!
//! [`TaskSync`] owns a background driver task that follows the identity
//! provider, holds at most one live [`Subscription`] on the signed-in
//! principal's collection, and republishes a [`TaskView`] after every
//! snapshot. Presentation code reads the view and calls the four mutation
//! operations; it never edits the projection directly.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──principal──▶ Subscribing ──first snapshot──▶ Live
//!   ▲                     │                            │
//!   └──── sign-out / store lost (any state) ───────────┘
//! ```
//!
//! Switching principal releases the old subscription and clears the
//! projection before the new subscription is opened.
//!
//! # Mutations are not optimistic
//!
//! `add`, `toggle`, `edit` and `remove` only issue the remote call. The view
//! changes when the store pushes the resulting snapshot.

mod driver;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use tasklane_proto::document::DEFAULT_PLACEHOLDER_TITLE;
use tasklane_proto::task::{MAX_TASK_TITLE_LENGTH, TitleError, validate_title};
use tasklane_proto::{
    Document, Filter, PrincipalId, ScopePath, Task, TaskCounts, TaskId, Timestamp, count_tasks,
    filter_tasks,
};

use crate::identity::IdentityProvider;
use crate::store::{RemoteStore, StoreError};

use driver::Driver;

/// Errors returned by the sync model's operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No principal is signed in, or the store handle was lost.
    #[error("task store unavailable: not signed in or not connected")]
    Unavailable,

    /// The input failed validation; nothing was sent to the store.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] TitleError),

    /// The task is not in the current projection.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The store rejected or failed the call.
    #[error("remote store failure: {0}")]
    RemoteFailure(#[from] StoreError),
}

/// Subscription lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// No subscription.
    #[default]
    Idle,
    /// Subscription requested, no snapshot yet.
    Subscribing,
    /// At least one snapshot applied.
    Live,
}

/// Read model published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskView {
    /// Tasks of the current principal, newest first.
    pub tasks: Vec<Task>,
    /// `true` while identity is resolving or the first snapshot is pending.
    pub loading: bool,
    /// Last subscription error; cleared by the next snapshot.
    pub error: Option<String>,
    /// Subscription phase.
    pub phase: SyncPhase,
    /// Principal whose tasks are shown.
    pub principal: Option<PrincipalId>,
}

impl Default for TaskView {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            loading: true,
            error: None,
            phase: SyncPhase::Idle,
            principal: None,
        }
    }
}

impl TaskView {
    /// Returns the collection mutations should target, if any.
    ///
    /// `None` when no principal is signed in or the subscription was lost.
    #[must_use]
    pub fn scope(&self) -> Option<ScopePath> {
        if self.phase == SyncPhase::Idle {
            return None;
        }
        self.principal.as_ref().map(ScopePath::for_principal)
    }

    /// Finds a task in the projection.
    #[must_use]
    pub fn find(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == *id)
    }

    /// Returns the tasks visible under `filter`.
    #[must_use]
    pub fn filtered(&self, filter: Filter) -> Vec<Task> {
        filter_tasks(&self.tasks, filter)
    }

    /// Returns per-status counts.
    #[must_use]
    pub fn counts(&self) -> TaskCounts {
        count_tasks(&self.tasks)
    }
}

/// Tunables for [`TaskSync`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on each remote mutation call.
    pub op_timeout: Duration,
    /// Maximum title length in characters.
    pub max_title_len: usize,
    /// Title shown for documents without one.
    pub placeholder_title: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(10),
            max_title_len: MAX_TASK_TITLE_LENGTH,
            placeholder_title: DEFAULT_PLACEHOLDER_TITLE.to_string(),
        }
    }
}

/// Keeps a principal's task projection in sync with a [`RemoteStore`].
///
/// Dropping a `TaskSync` aborts its driver, which releases the
/// subscription. [`shutdown`](Self::shutdown) does the same and waits
/// for the driver to finish.
pub struct TaskSync<S: RemoteStore> {
    store: Arc<S>,
    view_rx: watch::Receiver<TaskView>,
    config: SyncConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl<S: RemoteStore> TaskSync<S> {
    /// Starts the sync model and its driver task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<I: IdentityProvider>(store: S, identity: &I, config: SyncConfig) -> Self {
        let store = Arc::new(store);
        let (view_tx, view_rx) = watch::channel(TaskView::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let driver = Driver::new(
            Arc::clone(&store),
            identity.watch(),
            view_tx,
            config.placeholder_title.clone(),
        );
        let handle = tokio::spawn(driver.run(shutdown_rx));

        Self {
            store,
            view_rx,
            config,
            shutdown_tx: Some(shutdown_tx),
            driver: Some(handle),
        }
    }

    /// Returns the current read model.
    #[must_use]
    pub fn view(&self) -> TaskView {
        self.view_rx.borrow().clone()
    }

    /// Returns a receiver notified on every republished view.
    #[must_use]
    pub fn watch_view(&self) -> watch::Receiver<TaskView> {
        self.view_rx.clone()
    }

    /// Waits until `predicate` holds for the view, up to `timeout`.
    ///
    /// Returns the matching view, or `None` on timeout or if the driver
    /// has stopped.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&TaskView) -> bool,
    ) -> Option<TaskView> {
        let mut rx = self.view_rx.clone();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|v| predicate(v))).await;
        match waited {
            Ok(Ok(view)) => Some(view.clone()),
            _ => None,
        }
    }

    /// Waits for the model to settle, up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] if the model is not
    /// [`SyncPhase::Live`] once loading ends or the timeout expires.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<TaskView, SyncError> {
        match self.wait_for(timeout, |v| !v.loading).await {
            Some(view) if view.phase == SyncPhase::Live => Ok(view),
            _ => Err(SyncError::Unavailable),
        }
    }

    /// Creates a task with `status = active` and `createdAt = now`.
    ///
    /// # Errors
    ///
    /// [`SyncError::Unavailable`] without a scope,
    /// [`SyncError::InvalidInput`] for a blank or oversized title, and
    /// [`SyncError::RemoteFailure`] if the store call fails.
    pub async fn add(&self, title: &str, description: &str) -> Result<TaskId, SyncError> {
        let scope = self.view().scope().ok_or(SyncError::Unavailable)?;
        let title = validate_title(title, self.config.max_title_len)?;

        let doc = Document::new_task(&title, description.trim(), Timestamp::now());
        let id = self.remote("create", self.store.create(&scope, doc)).await?;
        tracing::debug!(scope = %scope, id = %id, "task added");
        Ok(id)
    }

    /// Flips a task between active and completed.
    ///
    /// # Errors
    ///
    /// [`SyncError::Unavailable`] without a scope, [`SyncError::NotFound`]
    /// if `id` is not in the projection, [`SyncError::RemoteFailure`] if the
    /// store call fails.
    pub async fn toggle(&self, id: &TaskId) -> Result<(), SyncError> {
        let view = self.view();
        let scope = view.scope().ok_or(SyncError::Unavailable)?;
        let task = view.find(id).ok_or_else(|| SyncError::NotFound(id.clone()))?;

        let patch = Document::status_patch(task.status.toggled());
        self.remote("update", self.store.update(&scope, id, patch))
            .await
    }

    /// Replaces a task's title and description.
    ///
    /// # Errors
    ///
    /// [`SyncError::Unavailable`] without a scope,
    /// [`SyncError::InvalidInput`] for a blank or oversized title,
    /// [`SyncError::NotFound`] if `id` is not in the projection,
    /// [`SyncError::RemoteFailure`] if the store call fails.
    pub async fn edit(&self, id: &TaskId, title: &str, description: &str) -> Result<(), SyncError> {
        let view = self.view();
        let scope = view.scope().ok_or(SyncError::Unavailable)?;
        let title = validate_title(title, self.config.max_title_len)?;
        if view.find(id).is_none() {
            return Err(SyncError::NotFound(id.clone()));
        }

        let patch = Document::content_patch(&title, description.trim());
        self.remote("update", self.store.update(&scope, id, patch))
            .await
    }

    /// Deletes a task.
    ///
    /// # Errors
    ///
    /// [`SyncError::Unavailable`] without a scope, [`SyncError::NotFound`]
    /// if `id` is not in the projection, [`SyncError::RemoteFailure`] if the
    /// store call fails.
    pub async fn remove(&self, id: &TaskId) -> Result<(), SyncError> {
        let view = self.view();
        let scope = view.scope().ok_or(SyncError::Unavailable)?;
        if view.find(id).is_none() {
            return Err(SyncError::NotFound(id.clone()));
        }

        self.remote("delete", self.store.delete(&scope, id)).await
    }

    /// Stops the driver and waits for it to release the subscription.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.driver.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "sync driver ended abnormally");
        }
    }

    /// Runs a store call under the configured timeout.
    async fn remote<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, SyncError> {
        let result = match tokio::time::timeout(self.config.op_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };
        result.map_err(|e| {
            tracing::warn!(op, error = %e, "remote store call failed");
            SyncError::RemoteFailure(e)
        })
    }
}

impl<S: RemoteStore> Drop for TaskSync<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
    }
}
