//! Shared application state injected into every Axum handler.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::vault::{TokenManager, VaultClient};

/// Application state shared across all request handlers.
///
/// All fields are cheaply cloneable (`Arc`-wrapped or already `Arc`-backed) so
/// that Axum can clone the state for each request without copying expensive data.
#[derive(Clone)]
pub struct AppState {
    /// Owner of the sidecar's Vault token.
    pub tokens: Arc<TokenManager>,
    /// Upstream client; shares its connection pool with the token manager.
    pub vault: VaultClient,
    /// `None` when caching is disabled.
    pub cache: Option<Arc<ResponseCache>>,
    /// Deadline for one proxied request, including any wait for a login or
    /// for an identical request ahead of it.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        tokens: Arc<TokenManager>,
        cache: Option<Arc<ResponseCache>>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            vault: tokens.vault().clone(),
            tokens,
            cache,
            request_timeout,
        }
    }
}
