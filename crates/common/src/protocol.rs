//! Vault request and response bodies used by the sidecar.
//!
//! Only the fields the sidecar reads or writes are modelled; everything else
//! in Vault's responses is ignored on deserialisation.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// AWS IAM login
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/auth/<provider>/login` with the AWS IAM method.
///
/// The URL, headers and body of the signed `sts:GetCallerIdentity` request
/// are base64 encoded; Vault replays the request to STS to learn the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IamLoginRequest {
    /// HTTP method of the signed request (always `POST`).
    pub iam_http_request_method: String,
    /// Base64 of the signed request URL.
    pub iam_request_url: String,
    /// Base64 of the JSON-encoded signed request headers (`{name: [values]}`).
    pub iam_request_headers: String,
    /// Base64 of the signed request body.
    pub iam_request_body: String,
    /// Vault role to log in as.
    pub role: String,
}

// ---------------------------------------------------------------------------
// Token lifecycle
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/auth/token/renew-self`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewSelfRequest {
    /// Requested lease extension in seconds.
    pub increment: u64,
}

/// The `auth` block Vault returns from login and renew calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretAuth {
    /// The issued Vault token.
    pub client_token: String,
    /// Lease duration in seconds; zero for non-expiring tokens.
    #[serde(default)]
    pub lease_duration: u64,
    /// Whether the token can be renewed without logging in again.
    #[serde(default)]
    pub renewable: bool,
}

/// Envelope of a Vault auth response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Absent on malformed or empty responses.
    #[serde(default)]
    pub auth: Option<SecretAuth>,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Error body in Vault's shape, so Vault clients talking to the proxy can
/// parse proxy-originated failures the same way as upstream ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error messages.
    pub errors: Vec<String>,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] carrying a single message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}
