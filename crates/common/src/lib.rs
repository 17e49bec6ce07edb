//! Vault wire types and proxy errors shared across `vault-sidecar` crates.

pub mod error;
pub mod protocol;

pub use error::ProxyError;
