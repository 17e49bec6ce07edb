//! Proxy-facing error taxonomy shared across crates.

use std::time::Duration;

use thiserror::Error;

/// Failure modes of a single proxied request.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`ProxyError::TokenUnavailable`] → 500
/// - [`ProxyError::BadRequest`] → 500
/// - [`ProxyError::PayloadTooLarge`] → 413
/// - [`ProxyError::Upstream`] → 502
/// - [`ProxyError::Timeout`] → 502
/// - [`ProxyError::Internal`] → 500
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No valid Vault token could be obtained for the request.
    #[error("failed to get valid Vault token: {0}")]
    TokenUnavailable(String),

    /// The inbound request could not be read or turned into a forwarded request.
    #[error("failed to generate proxy request: {0}")]
    BadRequest(String),

    /// The inbound request body exceeded the buffering limit.
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// The upstream round trip failed at the transport level.
    #[error("failed to proxy request: {0}")]
    Upstream(String),

    /// The request did not complete within its deadline.
    #[error("failed to proxy request: timed out after {0:?}")]
    Timeout(Duration),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ProxyError::TokenUnavailable(_) => 500,
            ProxyError::BadRequest(_) => 500,
            ProxyError::PayloadTooLarge(_) => 413,
            ProxyError::Upstream(_) => 502,
            ProxyError::Timeout(_) => 502,
            ProxyError::Internal(_) => 500,
        }
    }
}
