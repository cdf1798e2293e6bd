//! Background driver owning the subscription and publishing the view.
//!
//! The driver is the only writer of the [`TaskView`] watch channel. It
//! reacts to three inputs: identity changes, subscription events, and the
//! shutdown signal.

use std::sync::Arc;

use tokio::sync::{oneshot, watch};

use tasklane_proto::{PrincipalId, ScopePath, Timestamp, project_snapshot};

use super::{SyncPhase, TaskView};
use crate::identity::IdentityState;
use crate::store::{RemoteStore, StoreEvent, Subscription};

/// Error shown when the subscription channel closes underneath the model.
pub(super) const STORE_LOST_MESSAGE: &str = "task store unavailable";

/// Why the driver loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// [`TaskSync::shutdown`](super::TaskSync::shutdown) was called or the
    /// model was dropped.
    Shutdown,
    /// The identity provider went away.
    IdentityClosed,
}

pub(super) struct Driver<S: RemoteStore> {
    store: Arc<S>,
    identity: watch::Receiver<IdentityState>,
    view_tx: watch::Sender<TaskView>,
    placeholder_title: String,
    subscription: Option<Subscription>,
}

impl<S: RemoteStore> Driver<S> {
    pub(super) fn new(
        store: Arc<S>,
        identity: watch::Receiver<IdentityState>,
        view_tx: watch::Sender<TaskView>,
        placeholder_title: String,
    ) -> Self {
        Self {
            store,
            identity,
            view_tx,
            placeholder_title,
            subscription: None,
        }
    }

    /// Runs until shutdown, then releases the subscription.
    pub(super) async fn run(mut self, shutdown: oneshot::Receiver<()>) {
        let reason = self.run_event_loop(shutdown).await;
        if reason == StopReason::IdentityClosed {
            self.go_idle(None, None);
        }
        self.subscription = None;
        tracing::debug!(?reason, "sync driver stopped");
    }

    async fn run_event_loop(&mut self, mut shutdown: oneshot::Receiver<()>) -> StopReason {
        let initial = self.identity.borrow_and_update().clone();
        self.apply_identity(initial).await;

        loop {
            tokio::select! {
                _ = &mut shutdown => return StopReason::Shutdown,
                changed = self.identity.changed() => {
                    if changed.is_err() {
                        return StopReason::IdentityClosed;
                    }
                    let state = self.identity.borrow_and_update().clone();
                    self.apply_identity(state).await;
                }
                event = next_event(&mut self.subscription) => self.apply_event(event),
            }
        }
    }

    async fn apply_identity(&mut self, state: IdentityState) {
        match state {
            // Keep whatever is shown until resolution finishes.
            IdentityState::Resolving => {}
            IdentityState::SignedOut => {
                if self.subscription.is_some() || self.view_tx.borrow().principal.is_some() {
                    tracing::info!("principal signed out, releasing subscription");
                }
                self.go_idle(None, None);
            }
            IdentityState::SignedIn(principal) => self.switch_to(principal).await,
        }
    }

    async fn switch_to(&mut self, principal: PrincipalId) {
        let current = self.view_tx.borrow().principal.clone();
        if current.as_ref() == Some(&principal) && self.subscription.is_some() {
            return;
        }

        // Release and clear before opening the new scope so nothing of the
        // previous principal survives the switch.
        self.subscription = None;
        self.view_tx.send_replace(TaskView {
            tasks: Vec::new(),
            loading: true,
            error: None,
            phase: SyncPhase::Subscribing,
            principal: Some(principal.clone()),
        });

        let scope = ScopePath::for_principal(&principal);
        tracing::info!(principal = %principal, scope = %scope, "subscribing");
        match self.store.subscribe(&scope).await {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "subscribe failed");
                self.view_tx.send_replace(TaskView {
                    tasks: Vec::new(),
                    loading: false,
                    error: Some(e.to_string()),
                    phase: SyncPhase::Idle,
                    principal: Some(principal),
                });
            }
        }
    }

    fn apply_event(&mut self, event: Option<StoreEvent>) {
        match event {
            Some(StoreEvent::Snapshot(docs)) => {
                let tasks = project_snapshot(&docs, Timestamp::now(), &self.placeholder_title);
                tracing::debug!(tasks = tasks.len(), "snapshot applied");
                self.view_tx.send_modify(|view| {
                    view.tasks = tasks;
                    view.loading = false;
                    view.error = None;
                    view.phase = SyncPhase::Live;
                });
            }
            Some(StoreEvent::Error(message)) => {
                tracing::warn!(error = %message, "subscription error");
                self.view_tx.send_modify(|view| {
                    view.error = Some(message);
                    view.loading = false;
                });
            }
            None => {
                tracing::warn!("subscription closed by store");
                let principal = self.view_tx.borrow().principal.clone();
                self.go_idle(principal, Some(STORE_LOST_MESSAGE.to_string()));
            }
        }
    }

    /// Drops the subscription and publishes an empty, settled view.
    fn go_idle(&mut self, principal: Option<PrincipalId>, error: Option<String>) {
        self.subscription = None;
        self.view_tx.send_replace(TaskView {
            tasks: Vec::new(),
            loading: false,
            error,
            phase: SyncPhase::Idle,
            principal,
        });
    }
}

/// Next event of the live subscription; pending forever without one.
async fn next_event(subscription: &mut Option<Subscription>) -> Option<StoreEvent> {
    match subscription {
        Some(sub) => sub.next_event().await,
        None => std::future::pending().await,
    }
}
