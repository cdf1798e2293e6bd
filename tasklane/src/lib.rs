//! `Tasklane`: personal task tracker with live document-store sync.
//!
//! The [`sync::TaskSync`] model keeps a local projection of one principal's
//! tasks consistent with a [`store::RemoteStore`], following the principal
//! reported by an [`identity::IdentityProvider`].

pub mod config;
pub mod identity;
pub mod store;
pub mod sync;
pub mod ui;
