//! Local identity provider.
//!
//! [`LocalIdentity`] is driven directly by the caller: the CLI signs in the
//! configured principal or restores a persisted anonymous session, and tests
//! sign principals in and out to exercise the sync model's lifecycle.

use std::path::Path;

use tokio::sync::watch;
use uuid::Uuid;

use tasklane_proto::PrincipalId;

use super::{IdentityError, IdentityProvider, IdentityState};

/// Prefix of principal ids minted by [`LocalIdentity::sign_in_anonymously`].
pub const ANONYMOUS_PREFIX: &str = "anon-";

/// Caller-driven identity provider backed by a [`watch`] channel.
///
/// Starts in [`IdentityState::Resolving`].
#[derive(Debug)]
pub struct LocalIdentity {
    tx: watch::Sender<IdentityState>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalIdentity {
    /// Creates a provider that has not resolved yet.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(IdentityState::Resolving);
        Self { tx }
    }

    /// Signs `principal` in, replacing any current principal.
    pub fn sign_in(&self, principal: PrincipalId) {
        tracing::info!(principal = %principal, "signed in");
        self.tx.send_replace(IdentityState::SignedIn(principal));
    }

    /// Signs in a freshly minted anonymous principal and returns it.
    pub fn sign_in_anonymously(&self) -> PrincipalId {
        let principal = mint_anonymous();
        self.sign_in(principal.clone());
        principal
    }

    /// Signs the current principal out.
    pub fn sign_out(&self) {
        tracing::info!("signed out");
        self.tx.send_replace(IdentityState::SignedOut);
    }

    /// Returns to the resolving state, e.g. while a session is refreshed.
    pub fn begin_resolving(&self) {
        self.tx.send_replace(IdentityState::Resolving);
    }

    /// Resumes the session stored at `path`, or starts an anonymous one.
    ///
    /// If the file holds a principal id, that principal is signed in.
    /// Otherwise an anonymous principal is minted, signed in, and written
    /// to `path` so the next run resumes it.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Session`] if the file exists but cannot be
    /// read, or the new session cannot be written. The state is left
    /// unchanged on error.
    pub fn restore_session(&self, path: &Path) -> Result<PrincipalId, IdentityError> {
        let session_error = |source| IdentityError::Session {
            path: path.to_path_buf(),
            source,
        };

        match std::fs::read_to_string(path) {
            Ok(contents) if !contents.trim().is_empty() => {
                let principal = PrincipalId::new(contents.trim());
                tracing::debug!(path = %path.display(), "restored session");
                self.sign_in(principal.clone());
                return Ok(principal);
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(session_error(e)),
        }

        let principal = mint_anonymous();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(session_error)?;
        }
        std::fs::write(path, principal.as_str()).map_err(session_error)?;
        tracing::debug!(path = %path.display(), "started anonymous session");
        self.sign_in(principal.clone());
        Ok(principal)
    }
}

fn mint_anonymous() -> PrincipalId {
    PrincipalId::new(format!("{ANONYMOUS_PREFIX}{}", Uuid::now_v7()))
}

impl IdentityProvider for LocalIdentity {
    fn current(&self) -> IdentityState {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<IdentityState> {
        self.tx.subscribe()
    }
}
