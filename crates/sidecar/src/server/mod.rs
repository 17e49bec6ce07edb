//! Local HTTP reverse proxy in front of Vault.
//!
//! # Responsibilities
//! - Define the Axum router: every method and path goes to the proxy handler.
//! - Inject shared application state (`AppState`) into the handler.
//! - Attach tracing and panic-recovery middleware.
//! - Bound every proxied request by a deadline.

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
