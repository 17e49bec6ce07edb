//! SigV4-signed `sts:GetCallerIdentity` requests.
//!
//! # Wire shape
//!
//! ```text
//! POST https://sts[.<region>].amazonaws.com/
//! Content-Type: application/x-www-form-urlencoded; charset=utf-8
//! X-Vault-Aws-Iam-Server-Id: <server id>      (optional, signed)
//! Authorization: AWS4-HMAC-SHA256 Credential=...
//!
//! Action=GetCallerIdentity&Version=2011-06-15
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use aws_config::BehaviorVersion;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningParams, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::protocol::IamLoginRequest;
use thiserror::Error;
use tracing::debug;

/// Header Vault checks against the auth mount's configured server id.
pub const IAM_SERVER_ID_HEADER: &str = "X-Vault-AWS-IAM-Server-ID";

const GET_CALLER_IDENTITY_BODY: &str = "Action=GetCallerIdentity&Version=2011-06-15";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const GLOBAL_STS_REGION: &str = "us-east-1";
const GLOBAL_STS_HOST: &str = "sts.amazonaws.com";

/// Boxed future returned by [`IdentityProvider`] so the trait stays object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors produced while building an identity assertion.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The AWS SDK could not find any credential source.
    #[error("no AWS credentials provider is configured")]
    NoCredentialsProvider,

    /// The credential chain failed to produce credentials.
    #[error("failed to resolve AWS credentials: {0}")]
    Credentials(String),

    /// SigV4 signing rejected the request or parameters.
    #[error("failed to sign GetCallerIdentity request: {0}")]
    Signing(String),

    /// The signed headers could not be encoded for Vault.
    #[error("failed to encode signed request headers: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A fully signed HTTP request, ready to be handed to Vault for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: String,
    pub url: String,
    /// Canonical-case header names mapped to their values.
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

impl SignedRequest {
    /// Encode this request as the body of Vault's AWS IAM login call.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Encoding`] if the headers cannot be serialised.
    pub fn to_login_request(&self, role: &str) -> Result<IamLoginRequest, IdentityError> {
        let headers = serde_json::to_vec(&self.headers)?;
        Ok(IamLoginRequest {
            iam_http_request_method: self.method.clone(),
            iam_request_url: STANDARD.encode(self.url.as_bytes()),
            iam_request_headers: STANDARD.encode(headers),
            iam_request_body: STANDARD.encode(&self.body),
            role: role.to_owned(),
        })
    }
}

/// Source of signed caller-identity assertions.
///
/// Implemented by [`StsIdentity`] in production; tests substitute a static
/// assertion so login flows can run without AWS.
pub trait IdentityProvider: Send + Sync {
    /// Build a freshly signed `GetCallerIdentity` request, including the
    /// server id header when one is given.
    fn signed_caller_identity<'a>(
        &'a self,
        server_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<SignedRequest, IdentityError>>;
}

/// Signs `GetCallerIdentity` with credentials from the AWS credential chain.
#[derive(Clone, Debug)]
pub struct StsIdentity {
    credentials: SharedCredentialsProvider,
    region: String,
    host: String,
}

impl StsIdentity {
    /// Resolve the default AWS credential chain (environment, profile, web
    /// identity, container / instance metadata).
    ///
    /// `region` selects a regional STS endpoint; `None` signs for the global
    /// endpoint in `us-east-1`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoCredentialsProvider`] if the SDK found no
    /// credential source at all.
    pub async fn from_env(region: Option<&str>) -> Result<Self, IdentityError> {
        let sdk = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let credentials = sdk
            .credentials_provider()
            .ok_or(IdentityError::NoCredentialsProvider)?;
        Ok(Self::new(credentials, region))
    }

    /// Build from an explicit credentials provider.
    pub fn new(credentials: SharedCredentialsProvider, region: Option<&str>) -> Self {
        let (region, host) = match region {
            Some(r) => (r.to_owned(), format!("sts.{r}.amazonaws.com")),
            None => (GLOBAL_STS_REGION.to_owned(), GLOBAL_STS_HOST.to_owned()),
        };
        Self {
            credentials,
            region,
            host,
        }
    }

    async fn sign(&self, server_id: Option<&str>) -> Result<SignedRequest, IdentityError> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .map_err(|e| IdentityError::Credentials(e.to_string()))?;
        let identity: Identity = credentials.into();

        let url = format!("https://{}/", self.host);
        let mut headers: Vec<(String, String)> = vec![
            ("host".into(), self.host.clone()),
            ("content-type".into(), FORM_CONTENT_TYPE.into()),
        ];
        if let Some(id) = server_id {
            headers.push((IAM_SERVER_ID_HEADER.to_ascii_lowercase(), id.to_owned()));
        }

        let v4_params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name("sts")
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .map_err(|e| IdentityError::Signing(e.to_string()))?;
        let params: SigningParams<'_> = v4_params.into();

        let signable = SignableRequest::new(
            "POST",
            &url,
            headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            SignableBody::Bytes(GET_CALLER_IDENTITY_BODY.as_bytes()),
        )
        .map_err(|e| IdentityError::Signing(e.to_string()))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| IdentityError::Signing(e.to_string()))?
            .into_parts();

        let mut signed = BTreeMap::<String, Vec<String>>::new();
        let added = instructions
            .headers()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect::<Vec<_>>();
        for (name, value) in headers.into_iter().chain(added) {
            signed
                .entry(canonical_header_name(&name))
                .or_default()
                .push(value);
        }

        debug!(region = %self.region, host = %self.host, "signed GetCallerIdentity request");
        Ok(SignedRequest {
            method: "POST".into(),
            url,
            headers: signed,
            body: GET_CALLER_IDENTITY_BODY.as_bytes().to_vec(),
        })
    }
}

impl IdentityProvider for StsIdentity {
    fn signed_caller_identity<'a>(
        &'a self,
        server_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<SignedRequest, IdentityError>> {
        Box::pin(self.sign(server_id))
    }
}

/// `x-amz-date` → `X-Amz-Date`. Vault rebuilds the headers through Go's
/// `http.Header`, which expects this form.
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
