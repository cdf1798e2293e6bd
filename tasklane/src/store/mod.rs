//! Task store abstraction for `Tasklane`.
//!
//! Defines the [`RemoteStore`] trait that every document store backend must
//! satisfy. Concrete implementations include:
//! - [`memory::MemoryStore`], an in-process store with optional file persistence
//!
//! A store keeps one collection of task documents per [`ScopePath`] and
//! pushes the full contents of a collection to every live [`Subscription`]
//! whenever it changes.

pub mod memory;

use std::path::PathBuf;

use tokio::sync::mpsc;

use tasklane_proto::{Document, RawDocument, ScopePath, TaskId};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store handle is gone (disconnected, shut down).
    #[error("task store unavailable")]
    Unavailable,

    /// The store refused the operation.
    #[error("operation rejected by store: {0}")]
    Rejected(String),

    /// The targeted document does not exist in the collection.
    #[error("document not found: {0}")]
    NotFound(TaskId),

    /// The operation did not complete within the configured timeout.
    #[error("store operation timed out")]
    Timeout,

    /// Writing or reading the backing file failed.
    #[error("store persistence failed for {path}: {reason}")]
    Persistence {
        /// Backing file path.
        path: PathBuf,
        /// Description of the failure.
        reason: String,
    },
}

/// An event delivered on a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The full current contents of the subscribed collection.
    Snapshot(Vec<RawDocument>),
    /// The subscription hit an error; it stays open.
    Error(String),
}

/// A live query on one collection.
///
/// Events arrive on a single-consumer channel. Dropping the subscription
/// unsubscribes; when the store itself goes away the channel closes and
/// [`next_event`](Self::next_event) returns `None`.
pub struct Subscription {
    scope: ScopePath,
    events: mpsc::UnboundedReceiver<StoreEvent>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a subscription fed by `events`.
    ///
    /// `on_drop` runs exactly once, when the subscription is dropped.
    pub fn new(
        scope: ScopePath,
        events: mpsc::UnboundedReceiver<StoreEvent>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            scope,
            events,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// The collection this subscription watches.
    #[must_use]
    pub const fn scope(&self) -> &ScopePath {
        &self.scope
    }

    /// Waits for the next event. Returns `None` once the store has closed
    /// the subscription.
    pub async fn next_event(&mut self) -> Option<StoreEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.on_drop.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Async document store holding per-principal task collections.
///
/// # Invariant
///
/// Operations on one [`ScopePath`] never read or write documents of
/// another scope.
pub trait RemoteStore: Send + Sync + 'static {
    /// Opens a live query on `scope`.
    ///
    /// The current contents are delivered as the first
    /// [`StoreEvent::Snapshot`], followed by a new snapshot after every
    /// change to the collection.
    fn subscribe(
        &self,
        scope: &ScopePath,
    ) -> impl std::future::Future<Output = Result<Subscription, StoreError>> + Send;

    /// Creates a document and returns its store-assigned id.
    fn create(
        &self,
        scope: &ScopePath,
        doc: Document,
    ) -> impl std::future::Future<Output = Result<TaskId, StoreError>> + Send;

    /// Merges `patch` into an existing document.
    fn update(
        &self,
        scope: &ScopePath,
        id: &TaskId,
        patch: Document,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Deletes a document.
    fn delete(
        &self,
        scope: &ScopePath,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}
