//! Vault access: the upstream HTTP client, the token lifecycle, and the
//! background refresh loop that keeps the token warm.

pub mod client;
pub mod refresh;
pub mod token;

pub use client::{VaultClient, VaultError, TOKEN_HEADER};
pub use refresh::spawn_refresh;
pub use token::{AuthSettings, TokenManager};
