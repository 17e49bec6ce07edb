//! Axum router construction.

use axum::Router;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use super::{handlers, state::AppState};

/// Build the application [`Router`]: everything falls through to the proxy.
///
/// The per-request deadline is enforced by the proxy handler itself so that
/// an expired request still gets a Vault-style error body.
pub fn build(state: AppState) -> Router {
    Router::new()
        .fallback(handlers::proxy)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
