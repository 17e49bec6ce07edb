//! Response cache for idempotent Vault reads.
//!
//! A request is cached under its [fingerprint](fingerprint::compute_fingerprint),
//! which covers everything that can change Vault's answer, including the
//! token. Whether a request may read or populate the cache is decided by its
//! `X-Vault-Cache-Control` [directives](directives::CacheOptions).

pub mod directives;
pub mod fingerprint;
pub mod store;

pub use directives::{shall_fetch_cache, shall_refresh_cache, wants_revoke, CacheOptions};
pub use fingerprint::compute_fingerprint;
pub use store::{spawn_sweeper, CachedResponse, ResponseCache};
