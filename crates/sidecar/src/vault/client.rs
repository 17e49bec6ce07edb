//! [`VaultClient`]: HTTP(S) access to the upstream Vault server.
//!
//! One pooled hyper client is shared by the sidecar's own auth calls and by
//! the reverse proxy, so both reuse the same upstream connections.

use std::time::Duration;

use axum::body::Body;
use axum::http::{
    header, uri::Authority, uri::PathAndQuery, uri::Scheme, HeaderValue, Method, Request,
    Response, StatusCode, Uri,
};
use bytes::Bytes;
use common::protocol::{AuthResponse, IamLoginRequest, RenewSelfRequest, SecretAuth};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tracing::debug;

/// Header carrying the Vault token on every authenticated request.
pub const TOKEN_HEADER: &str = "x-vault-token";

/// Header carrying Vault's replication consistency state.
pub const INDEX_HEADER: &str = "x-vault-index";

/// Pooled upstream client type.
pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Errors produced by upstream Vault calls.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The configured address is not an absolute `http(s)://host[:port]` URL.
    #[error("invalid Vault address {0:?}")]
    InvalidAddress(String),

    /// The request could not be constructed.
    #[error("failed to build request: {0}")]
    Request(#[from] axum::http::Error),

    /// The connection failed or the response could not be parsed as HTTP.
    #[error("transport error: {0}")]
    Transport(String),

    /// The round trip exceeded the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Vault answered with a non-success status.
    #[error("Vault returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The response body could not be decoded.
    #[error("failed to decode Vault response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Login or renew returned no `auth` block.
    #[error("Vault response contained no auth data")]
    MissingAuth,
}

/// A successful login: the auth block plus the consistency state Vault
/// reported for it.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub auth: SecretAuth,
    /// Value of the `X-Vault-Index` response header, if any.
    pub index_state: Option<String>,
}

/// Client for one Vault server.
#[derive(Clone, Debug)]
pub struct VaultClient {
    http: HttpClient,
    scheme: Scheme,
    authority: Authority,
    timeout: Duration,
    user_agent: HeaderValue,
    proxy_user_agent: HeaderValue,
}

impl VaultClient {
    /// Create a client for the Vault server at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidAddress`] if `address` has no scheme or host.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, VaultError> {
        let invalid = || VaultError::InvalidAddress(address.to_owned());
        let uri: Uri = address.trim().parse().map_err(|_| invalid())?;
        let scheme = uri.scheme().cloned().ok_or_else(invalid)?;
        let authority = uri.authority().cloned().ok_or_else(invalid)?;
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err(invalid());
        }

        Ok(Self {
            http: build_http_client(),
            scheme,
            authority,
            timeout,
            user_agent: header_value(&user_agent(None))?,
            proxy_user_agent: header_value(&user_agent(Some("proxy")))?,
        })
    }

    /// User agent set on requests forwarded by the reverse proxy.
    pub fn proxy_user_agent(&self) -> &HeaderValue {
        &self.proxy_user_agent
    }

    /// Rebase `path_and_query` onto the Vault server's scheme and authority.
    pub fn upstream_uri(&self, path_and_query: Option<&PathAndQuery>) -> Result<Uri, VaultError> {
        let mut builder = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone());
        builder = match path_and_query {
            Some(pq) => builder.path_and_query(pq.clone()),
            None => builder.path_and_query("/"),
        };
        Ok(builder.build()?)
    }

    /// Send a prepared request upstream, bounded by the client timeout.
    ///
    /// Dropping the returned future aborts the round trip.
    pub async fn send(&self, req: Request<Body>) -> Result<Response<Incoming>, VaultError> {
        match tokio::time::timeout(self.timeout, self.http.request(req)).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(VaultError::Transport(error_chain(&e))),
            Err(_) => Err(VaultError::Timeout(self.timeout)),
        }
    }

    /// `POST /v1/auth/<provider>/login` with an AWS IAM payload.
    pub async fn login(
        &self,
        provider: &str,
        payload: &IamLoginRequest,
    ) -> Result<LoginResponse, VaultError> {
        let path = format!("/v1/auth/{provider}/login");
        let req = self.json_request(Method::POST, &path, None, serde_json::to_vec(payload)?)?;
        let (parts, body) = self.call(req).await?;

        let index_state = parts
            .headers
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let auth = parse_auth(&body)?;
        Ok(LoginResponse { auth, index_state })
    }

    /// `POST /v1/auth/token/renew-self`, asking for `increment` more lease.
    pub async fn renew_self(
        &self,
        token: &str,
        increment: Duration,
    ) -> Result<SecretAuth, VaultError> {
        let payload = RenewSelfRequest {
            increment: increment.as_secs(),
        };
        let req = self.json_request(
            Method::POST,
            "/v1/auth/token/renew-self",
            Some(token),
            serde_json::to_vec(&payload)?,
        )?;
        let (_, body) = self.call(req).await?;
        parse_auth(&body)
    }

    /// `POST /v1/auth/token/revoke-self`.
    pub async fn revoke_self(&self, token: &str) -> Result<(), VaultError> {
        let path = "/v1/auth/token/revoke-self";
        let req = self.json_request(Method::POST, path, Some(token), Vec::new())?;
        self.call(req).await.map(|_| ())
    }

    /// `GET /v1/<path>`, optionally pinned to a consistency state.
    ///
    /// Returns the raw JSON document Vault answered with, or `null` when
    /// nothing exists at `path`.
    pub async fn read(
        &self,
        path: &str,
        token: &str,
        index_state: Option<&str>,
    ) -> Result<serde_json::Value, VaultError> {
        let path = format!("/v1/{}", path.trim_start_matches('/'));
        let mut req = self.json_request(Method::GET, &path, Some(token), Vec::new())?;
        if let Some(state) = index_state {
            let value = HeaderValue::from_str(state)
                .map_err(|e| VaultError::Request(e.into()))?;
            req.headers_mut().insert(INDEX_HEADER, value);
        }
        match self.call(req).await {
            Ok((_, body)) => Ok(serde_json::from_slice(&body)?),
            Err(VaultError::Status { status, .. }) if status == StatusCode::NOT_FOUND => {
                Ok(serde_json::Value::Null)
            }
            Err(e) => Err(e),
        }
    }

    fn json_request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Vec<u8>,
    ) -> Result<Request<Body>, VaultError> {
        let pq: PathAndQuery = path.parse().map_err(axum::http::Error::from)?;
        let uri = self.upstream_uri(Some(&pq))?;
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, self.user_agent.clone());
        if !body.is_empty() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        if let Some(token) = token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        Ok(builder.body(Body::from(body))?)
    }

    /// Send `req` and buffer the reply, mapping non-2xx statuses to errors.
    async fn call(
        &self,
        req: Request<Body>,
    ) -> Result<(axum::http::response::Parts, Bytes), VaultError> {
        let path = req.uri().path().to_owned();
        let resp = self.send(req).await?;
        let (parts, body) = resp.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| VaultError::Transport(error_chain(&e)))?
            .to_bytes();

        debug!(path = %path, status = %parts.status, "Vault call completed");
        if !parts.status.is_success() {
            return Err(VaultError::Status {
                status: parts.status,
                body: String::from_utf8_lossy(&body).trim().to_owned(),
            });
        }
        Ok((parts, body))
    }
}

/// `vault-sidecar/<version> (<os> <arch>; Rust)`, plus `; <purpose>` when given.
fn user_agent(purpose: Option<&str>) -> String {
    let base = format!(
        "vault-sidecar/{} ({} {}; Rust)",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    );
    match purpose {
        Some(purpose) => format!("{base}; {purpose}"),
        None => base,
    }
}

fn header_value(value: &str) -> Result<HeaderValue, VaultError> {
    Ok(HeaderValue::from_str(value).map_err(axum::http::Error::from)?)
}

fn parse_auth(body: &[u8]) -> Result<SecretAuth, VaultError> {
    if body.is_empty() {
        return Err(VaultError::MissingAuth);
    }
    let resp: AuthResponse = serde_json::from_slice(body)?;
    match resp.auth {
        Some(auth) if !auth.client_token.is_empty() => Ok(auth),
        _ => Err(VaultError::MissingAuth),
    }
}

fn build_http_client() -> HttpClient {
    // Both ring and aws-lc-rs end up compiled in; pin the provider so
    // `ClientConfig::builder()` inside hyper-rustls has a default.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new()).build(connector)
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        source = inner.source();
    }
    msg
}
