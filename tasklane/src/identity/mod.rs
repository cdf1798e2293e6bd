//! Identity capability consumed by the sync model.
//!
//! An identity provider reports one of three states. "Still resolving" is
//! deliberately distinct from "signed out": the sync model keeps its current
//! state while resolution is in flight instead of flashing an empty list.

pub mod local;

use std::path::PathBuf;

use tokio::sync::watch;

use tasklane_proto::PrincipalId;

pub use local::LocalIdentity;

/// Authentication state reported by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityState {
    /// The provider has not yet determined who is signed in.
    #[default]
    Resolving,
    /// Resolution finished and nobody is signed in.
    SignedOut,
    /// A principal is signed in.
    SignedIn(PrincipalId),
}

impl IdentityState {
    /// Returns the signed-in principal, if any.
    #[must_use]
    pub const fn principal(&self) -> Option<&PrincipalId> {
        match self {
            Self::SignedIn(p) => Some(p),
            Self::Resolving | Self::SignedOut => None,
        }
    }

    /// Returns `true` once the provider has finished resolving.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !matches!(self, Self::Resolving)
    }
}

/// Errors raised by identity providers.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Reading or writing the session file failed.
    #[error("session file {path}: {source}")]
    Session {
        /// Session file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Source of authentication state and change notifications.
pub trait IdentityProvider {
    /// Returns the current state.
    fn current(&self) -> IdentityState;

    /// Returns a receiver that observes every state change.
    fn watch(&self) -> watch::Receiver<IdentityState>;
}
