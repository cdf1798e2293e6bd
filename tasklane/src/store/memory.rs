//! In-process document store.
//!
//! [`MemoryStore`] keeps every collection in memory behind a
//! [`parking_lot::Mutex`] and fans snapshots out to subscribers over
//! unbounded channels. When opened with a backing file it rewrites a
//! postcard image of the whole store after each mutation, so the CLI keeps
//! its tasks between runs.
//!
//! Several handles, in one process or many, may share a backing file. Each
//! mutation takes an exclusive lock on `<file>.lock`, applies itself to the
//! file's current contents and writes the result back, so no handle
//! overwrites another's writes with a stale copy.
//!
//! The store also carries the hooks tests need to drive the sync model:
//! failure injection, artificial latency, a bounded operation log,
//! subscription errors and simulated loss of the store handle.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use tasklane_proto::codec::{self, CollectionImage, StoreImage};
use tasklane_proto::{Document, RawDocument, ScopePath, TaskId};

use super::{RemoteStore, StoreError, StoreEvent, Subscription};

/// Maximum number of calls kept in the operation log; older ones are dropped.
pub const OP_LOG_CAPACITY: usize = 1024;

/// How long a mutation waits for another writer to release the data file.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// One call made against the store, recorded for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// A subscription was requested.
    Subscribe(ScopePath),
    /// A document creation was requested.
    Create {
        /// Target collection.
        scope: ScopePath,
        /// Document as sent.
        doc: Document,
    },
    /// A document update was requested.
    Update {
        /// Target collection.
        scope: ScopePath,
        /// Target document.
        id: TaskId,
        /// Fields as sent.
        patch: Document,
    },
    /// A document deletion was requested.
    Delete {
        /// Target collection.
        scope: ScopePath,
        /// Target document.
        id: TaskId,
    },
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Default)]
struct StoreState {
    collections: HashMap<ScopePath, Vec<RawDocument>>,
    subscribers: HashMap<ScopePath, Vec<Subscriber>>,
    next_subscriber_id: u64,
    disconnected: bool,
    mutation_failure: Option<String>,
    subscribe_failure: Option<String>,
    latency: Duration,
    ops: VecDeque<StoreOp>,
}

impl StoreState {
    fn check_mutation(&self) -> Result<(), StoreError> {
        if self.disconnected {
            return Err(StoreError::Unavailable);
        }
        if let Some(reason) = &self.mutation_failure {
            return Err(StoreError::Rejected(reason.clone()));
        }
        Ok(())
    }

    fn documents(&self, scope: &ScopePath) -> Vec<RawDocument> {
        self.collections.get(scope).cloned().unwrap_or_default()
    }

    fn record(&mut self, op: StoreOp) {
        if self.ops.len() == OP_LOG_CAPACITY {
            self.ops.pop_front();
        }
        self.ops.push_back(op);
    }

    /// Replaces every collection with `latest` and pushes a snapshot for
    /// each one whose contents changed, and for `touched` regardless.
    ///
    /// Returns the number of collections that changed.
    fn install(
        &mut self,
        latest: HashMap<ScopePath, Vec<RawDocument>>,
        touched: Option<&ScopePath>,
    ) -> usize {
        let mut scopes: Vec<ScopePath> = self.collections.keys().cloned().collect();
        scopes.extend(latest.keys().filter(|s| !self.collections.contains_key(*s)).cloned());
        if let Some(scope) = touched.filter(|s| !scopes.contains(s)) {
            scopes.push(scope.clone());
        }

        let mut changed = 0;
        for scope in scopes {
            let docs = latest.get(&scope).cloned().unwrap_or_default();
            let differs = self.documents(&scope) != docs;
            if differs {
                self.collections.insert(scope.clone(), docs);
                changed += 1;
            }
            if differs || touched == Some(&scope) {
                let snapshot = StoreEvent::Snapshot(self.documents(&scope));
                self.broadcast(&scope, &snapshot);
            }
        }
        changed
    }

    fn broadcast(&mut self, scope: &ScopePath, event: &StoreEvent) {
        if let Some(subs) = self.subscribers.get_mut(scope) {
            subs.retain(|s| s.tx.send(event.clone()).is_ok());
        }
    }

    fn remove_subscriber(&mut self, scope: &ScopePath, id: u64) {
        if let Some(subs) = self.subscribers.get_mut(scope) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                self.subscribers.remove(scope);
            }
        }
    }
}

/// In-memory [`RemoteStore`] with optional file persistence.
///
/// Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates an empty, non-persistent store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by `path`.
    ///
    /// A missing file yields an empty store; the file is created on the
    /// first mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the file exists but cannot be
    /// read or decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let collections = collections_of(load_image(&path)?);
        tracing::debug!(
            path = %path.display(),
            collections = collections.len(),
            "opened task store"
        );

        Ok(Self {
            state: Arc::new(Mutex::new(StoreState {
                collections,
                ..StoreState::default()
            })),
            path: Some(path),
        })
    }

    /// Re-reads the backing file and pushes a snapshot for every
    /// collection whose contents changed on disk.
    ///
    /// Lets one process observe mutations made by another process sharing
    /// the same file. Returns the number of collections that changed; a
    /// store without a backing file never changes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the file cannot be read or
    /// decoded. The in-memory contents are left untouched on error.
    pub fn reload(&self) -> Result<usize, StoreError> {
        let Some(path) = &self.path else {
            return Ok(0);
        };
        let on_disk = collections_of(load_image(path)?);
        let changed = self.state.lock().install(on_disk, None);

        if changed > 0 {
            tracing::debug!(path = %path.display(), collections = changed, "reloaded task store");
        }
        Ok(changed)
    }

    /// Makes every subsequent mutation fail with [`StoreError::Rejected`],
    /// or clears the failure with `None`.
    pub fn set_mutation_failure(&self, reason: Option<&str>) {
        self.state.lock().mutation_failure = reason.map(str::to_string);
    }

    /// Makes every subsequent subscribe fail with [`StoreError::Rejected`],
    /// or clears the failure with `None`.
    pub fn set_subscribe_failure(&self, reason: Option<&str>) {
        self.state.lock().subscribe_failure = reason.map(str::to_string);
    }

    /// Delays every mutation by `latency` before it takes effect.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Simulates loss of the store: closes every subscription channel and
    /// rejects further calls with [`StoreError::Unavailable`].
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.disconnected = true;
        let dropped: usize = state.subscribers.drain().map(|(_, subs)| subs.len()).sum();
        drop(state);
        tracing::debug!(subscribers = dropped, "task store disconnected");
    }

    /// Accepts calls again after [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        self.state.lock().disconnected = false;
    }

    /// Sends [`StoreEvent::Error`] to every subscriber of `scope`.
    pub fn push_error(&self, scope: &ScopePath, message: &str) {
        self.state
            .lock()
            .broadcast(scope, &StoreEvent::Error(message.to_string()));
    }

    /// Inserts a document verbatim, bypassing the client's field rules.
    ///
    /// Useful for seeding partially written or legacy documents.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the backing file cannot be
    /// written.
    pub fn insert_raw(&self, scope: &ScopePath, doc: RawDocument) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.commit(&mut state, scope, |docs| {
            docs.push(doc);
            Ok(())
        })
    }

    /// Returns the documents of `scope` in insertion order.
    #[must_use]
    pub fn documents(&self, scope: &ScopePath) -> Vec<RawDocument> {
        self.state.lock().documents(scope)
    }

    /// Returns the number of live subscriptions on `scope`.
    #[must_use]
    pub fn subscriber_count(&self, scope: &ScopePath) -> usize {
        self.state.lock().subscribers.get(scope).map_or(0, Vec::len)
    }

    /// Returns the calls made against the store, oldest first.
    ///
    /// Only the most recent [`OP_LOG_CAPACITY`] calls are kept.
    #[must_use]
    pub fn ops(&self) -> Vec<StoreOp> {
        self.state.lock().ops.iter().cloned().collect()
    }

    /// Forgets the recorded operation log.
    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Applies `mutate` to the current documents of `scope` and publishes
    /// the result.
    ///
    /// With a backing file the mutation runs against the file's contents
    /// while holding the lock, and everything read from the file replaces
    /// the in-memory copy. Nothing changes if `mutate` fails or the file
    /// cannot be written.
    fn commit<T>(
        &self,
        state: &mut StoreState,
        scope: &ScopePath,
        mutate: impl FnOnce(&mut Vec<RawDocument>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let Some(path) = &self.path else {
            let mut docs = state.documents(scope);
            let out = mutate(&mut docs)?;
            state.collections.insert(scope.clone(), docs);
            let snapshot = StoreEvent::Snapshot(state.documents(scope));
            state.broadcast(scope, &snapshot);
            return Ok(out);
        };

        let lock = FileLock::acquire(path)?;
        let mut collections = collections_of(load_image(path)?);
        let mut docs = collections.remove(scope).unwrap_or_default();
        let out = mutate(&mut docs)?;
        collections.insert(scope.clone(), docs);
        persist(path, &collections)?;
        drop(lock);

        state.install(collections, Some(scope));
        Ok(out)
    }
}

impl RemoteStore for MemoryStore {
    async fn subscribe(&self, scope: &ScopePath) -> Result<Subscription, StoreError> {
        let mut state = self.state.lock();
        state.record(StoreOp::Subscribe(scope.clone()));
        if state.disconnected {
            return Err(StoreError::Unavailable);
        }
        if let Some(reason) = &state.subscribe_failure {
            return Err(StoreError::Rejected(reason.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so the initial send cannot fail.
        let _ = tx.send(StoreEvent::Snapshot(state.documents(scope)));

        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state
            .subscribers
            .entry(scope.clone())
            .or_default()
            .push(Subscriber { id, tx });
        drop(state);

        tracing::debug!(scope = %scope, subscriber = id, "subscription opened");

        let weak = Arc::downgrade(&self.state);
        let release_scope = scope.clone();
        Ok(Subscription::new(scope.clone(), rx, move || {
            if let Some(state) = weak.upgrade() {
                state.lock().remove_subscriber(&release_scope, id);
                tracing::debug!(scope = %release_scope, subscriber = id, "subscription released");
            }
        }))
    }

    async fn create(&self, scope: &ScopePath, doc: Document) -> Result<TaskId, StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.record(StoreOp::Create {
            scope: scope.clone(),
            doc: doc.clone(),
        });
        state.check_mutation()?;

        let id = TaskId::new(Uuid::now_v7().to_string());
        self.commit(&mut state, scope, |docs| {
            docs.push(RawDocument::new(id.clone(), doc));
            Ok(())
        })?;
        drop(state);

        tracing::debug!(scope = %scope, id = %id, "document created");
        Ok(id)
    }

    async fn update(&self, scope: &ScopePath, id: &TaskId, patch: Document) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.record(StoreOp::Update {
            scope: scope.clone(),
            id: id.clone(),
            patch: patch.clone(),
        });
        state.check_mutation()?;

        self.commit(&mut state, scope, |docs| {
            let doc = docs
                .iter_mut()
                .find(|d| d.id == *id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            doc.fields.merge(&patch);
            Ok(())
        })?;
        drop(state);

        tracing::debug!(scope = %scope, id = %id, "document updated");
        Ok(())
    }

    async fn delete(&self, scope: &ScopePath, id: &TaskId) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.record(StoreOp::Delete {
            scope: scope.clone(),
            id: id.clone(),
        });
        state.check_mutation()?;

        self.commit(&mut state, scope, |docs| {
            let before = docs.len();
            docs.retain(|d| d.id != *id);
            if docs.len() == before {
                return Err(StoreError::NotFound(id.clone()));
            }
            Ok(())
        })?;
        drop(state);

        tracing::debug!(scope = %scope, id = %id, "document deleted");
        Ok(())
    }
}

/// Exclusive advisory lock on the sidecar `<file>.lock` of a data file.
///
/// Released when dropped.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(data_path: &Path) -> Result<Self, StoreError> {
        let failure = |reason: String| StoreError::Persistence {
            path: data_path.to_path_buf(),
            reason,
        };

        let lock_path = sibling(data_path, "lock");
        if let Some(dir) = lock_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| failure(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| failure(e.to_string()))?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= LOCK_TIMEOUT {
                        return Err(failure("timed out waiting for another writer".to_string()));
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(failure(e.to_string())),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// `<path>.<suffix>`, keeping the original extension.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn collections_of(image: StoreImage) -> HashMap<ScopePath, Vec<RawDocument>> {
    image
        .collections
        .into_iter()
        .map(|c| (c.scope, c.documents))
        .collect()
}

/// Reads the store image at `path`; a missing file is an empty store.
fn load_image(path: &Path) -> Result<StoreImage, StoreError> {
    let failure = |reason: String| StoreError::Persistence {
        path: path.to_path_buf(),
        reason,
    };
    match std::fs::read(path) {
        Ok(bytes) => codec::decode_image(&bytes).map_err(|e| failure(e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreImage::default()),
        Err(e) => Err(failure(e.to_string())),
    }
}

/// Writes the whole store to `path` via a temporary file and rename.
fn persist(path: &Path, collections: &HashMap<ScopePath, Vec<RawDocument>>) -> Result<(), StoreError> {
    let failure = |reason: String| StoreError::Persistence {
        path: path.to_path_buf(),
        reason,
    };

    let mut image = StoreImage {
        collections: collections
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(scope, docs)| CollectionImage {
                scope: scope.clone(),
                documents: docs.clone(),
            })
            .collect(),
    };
    image.collections.sort_by(|a, b| a.scope.cmp(&b.scope));

    let bytes = codec::encode_image(&image).map_err(|e| failure(e.to_string()))?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| failure(e.to_string()))?;
    }
    let tmp = sibling(path, &format!("{}.tmp", Uuid::now_v7()));
    if let Err(e) = std::fs::write(&tmp, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(failure(e.to_string()));
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        failure(e.to_string())
    })
}
