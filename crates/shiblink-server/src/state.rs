//! Shared application state for `shiblink` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the authentication resolver, the
//! encrypted attribute store and the linking protocol, all of which are
//! built eagerly before the listener is bound.

use std::sync::Arc;

use shiblink_core::attributes::AttributeStore;
use shiblink_core::linking::Linker;
use shiblink_core::resolver::Resolver;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Classifies the `Authorization` header of every protected request.
    pub resolver: Resolver,
    /// Encrypted per-account attributes.
    pub attributes: Arc<AttributeStore>,
    /// Identity-linking protocol over `attributes`.
    pub linker: Linker,
    /// Whether development-only routes are mounted.
    pub dev_mode: bool,
}

impl AppState {
    #[must_use]
    pub fn new(
        resolver: Resolver,
        attributes: Arc<AttributeStore>,
        linker: Linker,
        dev_mode: bool,
    ) -> Self {
        Self {
            resolver,
            attributes,
            linker,
            dev_mode,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("dev_mode", &self.dev_mode)
            .finish_non_exhaustive()
    }
}
