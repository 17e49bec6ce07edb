//! [`TokenManager`]: the single Vault token shared by every caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::protocol::SecretAuth;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::{VaultClient, VaultError};
use crate::aws::{IdentityError, IdentityProvider};

/// Errors produced by the token layer.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The identity assertion could not be built.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Vault rejected or failed the login call.
    #[error("login via the {provider:?} auth method failed: {source}")]
    Login {
        provider: String,
        #[source]
        source: VaultError,
    },

    /// Vault rejected or failed the renew-self call.
    #[error("token renewal failed: {0}")]
    Renew(#[source] VaultError),

    /// No token has been issued yet.
    #[error("no Vault token has been issued")]
    NotAuthenticated,

    /// The current token was issued as non-renewable.
    #[error("current Vault token is not renewable")]
    NotRenewable,
}

/// How to log in: the auth mount, role, and optional IAM server id.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub role: String,
    pub provider: String,
    pub iam_server_id: Option<String>,
}

/// One issued Vault token and its lease metadata.
///
/// Always read and written as a whole under the [`TokenManager`] lock, so a
/// token is never observed without its matching expiry.
#[derive(Clone)]
pub struct Credential {
    token: String,
    ttl: Duration,
    /// `None` for tokens that never expire (lease duration zero).
    expiry: Option<Instant>,
    renewable: bool,
}

impl Credential {
    pub fn new(
        token: impl Into<String>,
        ttl: Duration,
        expiry: Option<Instant>,
        renewable: bool,
    ) -> Self {
        Self {
            token: token.into(),
            ttl,
            expiry,
            renewable,
        }
    }

    /// Credential for a freshly issued auth block.
    pub fn issued(auth: &SecretAuth, now: Instant) -> Self {
        let ttl = Duration::from_secs(auth.lease_duration);
        Self::new(auth.client_token.clone(), ttl, expiry_from(now, ttl), auth.renewable)
    }

    /// Apply a renewal in place. The token itself never changes on renew.
    fn renewed(&mut self, auth: &SecretAuth, now: Instant) {
        self.ttl = Duration::from_secs(auth.lease_duration);
        self.expiry = expiry_from(now, self.ttl);
        self.renewable = auth.renewable;
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[allow(dead_code)]
    pub fn renewable(&self) -> bool {
        self.renewable
    }

    /// True iff `now + grace` is at or past the expiry.
    pub fn is_expired(&self, now: Instant, grace: Duration) -> bool {
        match self.expiry {
            Some(expiry) => now + grace >= expiry,
            None => false,
        }
    }

    /// True iff renewable and less than a fifth of the TTL remains.
    pub fn should_renew(&self, now: Instant) -> bool {
        match self.expiry {
            Some(expiry) => self.renewable && expiry.saturating_duration_since(now) < self.ttl / 5,
            None => false,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .field("expiry", &self.expiry)
            .field("renewable", &self.renewable)
            .finish()
    }
}

fn expiry_from(now: Instant, ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        now.checked_add(ttl)
    }
}

/// Result of one renew-self call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Renewal {
    pub requested: Duration,
    pub granted: Duration,
    pub renewable: bool,
}

/// Lease state of the current credential, as seen by the refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lease {
    /// Nothing issued yet, or the token was revoked.
    Missing,
    /// The token never expires.
    NonExpiring,
    /// The token expires; the value is its TTL.
    Expiring(Duration),
}

#[derive(Default)]
struct TokenState {
    credential: Option<Credential>,
    /// `X-Vault-Index` reported by the last login.
    index_state: Option<String>,
}

/// Owner of the sidecar's Vault token.
///
/// Every read, renewal and login happens under one async mutex, so only one
/// login or renewal is ever in flight. Callers that arrive during a login wait
/// for it and then reuse its token.
pub struct TokenManager {
    vault: VaultClient,
    identity: Arc<dyn IdentityProvider>,
    auth: AuthSettings,
    grace_period: Duration,
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new(
        vault: VaultClient,
        identity: Arc<dyn IdentityProvider>,
        auth: AuthSettings,
        grace_period: Duration,
    ) -> Self {
        Self {
            vault,
            identity,
            auth,
            grace_period,
            state: Mutex::new(TokenState::default()),
        }
    }

    /// The Vault client this manager authenticates against.
    pub fn vault(&self) -> &VaultClient {
        &self.vault
    }

    /// Return a valid token, logging in or renewing first when needed.
    ///
    /// A login is synchronous and its failure is returned. A renewal is best
    /// effort: on failure the still-valid token is returned.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] only when a required login fails.
    pub async fn token(&self) -> Result<String, TokenError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let needs_login = state
            .credential
            .as_ref()
            .map_or(true, |c| c.is_expired(now, self.grace_period));

        if needs_login {
            debug!("authenticating to Vault");
            self.login_locked(&mut state).await?;
        } else if state.credential.as_ref().is_some_and(|c| c.should_renew(now)) {
            debug!("renewing Vault token");
            if let Err(e) = self.renew_locked(&mut state).await {
                warn!(error = %e, "failed to renew token but attempting to continue");
            }
        }

        state
            .credential
            .as_ref()
            .map(|c| c.token.clone())
            .ok_or(TokenError::NotAuthenticated)
    }

    /// Log in unconditionally, replacing the current credential.
    ///
    /// Returns the new token's TTL.
    pub async fn login(&self) -> Result<Duration, TokenError> {
        let mut state = self.state.lock().await;
        self.login_locked(&mut state).await
    }

    /// Renew the current credential, asking for its full TTL again.
    pub async fn renew(&self) -> Result<Renewal, TokenError> {
        let mut state = self.state.lock().await;
        self.renew_locked(&mut state).await
    }

    /// Revoke the current token (best effort) and forget it, so the next
    /// [`token`](Self::token) call logs in again.
    pub async fn revoke(&self) {
        let mut state = self.state.lock().await;
        state.index_state = None;
        let Some(credential) = state.credential.take() else {
            return;
        };
        match self.vault.revoke_self(&credential.token).await {
            Ok(()) => info!("revoked Vault token"),
            Err(e) => warn!(error = %e, "failed to revoke Vault token; discarding it anyway"),
        }
    }

    pub async fn lease(&self) -> Lease {
        let state = self.state.lock().await;
        match &state.credential {
            None => Lease::Missing,
            Some(c) if c.expiry.is_none() => Lease::NonExpiring,
            Some(c) => Lease::Expiring(c.ttl),
        }
    }

    /// Take the consistency state recorded by the last login, leaving none.
    pub async fn take_index_state(&self) -> Option<String> {
        self.state.lock().await.index_state.take()
    }

    async fn login_locked(&self, state: &mut TokenState) -> Result<Duration, TokenError> {
        let signed = self
            .identity
            .signed_caller_identity(self.auth.iam_server_id.as_deref())
            .await?;
        let payload = signed.to_login_request(&self.auth.role)?;

        let resp = self
            .vault
            .login(&self.auth.provider, &payload)
            .await
            .map_err(|source| TokenError::Login {
                provider: self.auth.provider.clone(),
                source,
            })?;

        let credential = Credential::issued(&resp.auth, Instant::now());
        let ttl = credential.ttl();
        info!(
            ttl_secs = ttl.as_secs(),
            renewable = credential.renewable,
            "authenticated to Vault"
        );
        state.credential = Some(credential);
        state.index_state = resp.index_state;
        Ok(ttl)
    }

    async fn renew_locked(&self, state: &mut TokenState) -> Result<Renewal, TokenError> {
        let credential = state
            .credential
            .as_mut()
            .ok_or(TokenError::NotAuthenticated)?;
        if !credential.renewable {
            return Err(TokenError::NotRenewable);
        }

        let requested = credential.ttl;
        let auth = self
            .vault
            .renew_self(&credential.token, requested)
            .await
            .map_err(TokenError::Renew)?;
        credential.renewed(&auth, Instant::now());

        debug!(ttl_secs = credential.ttl.as_secs(), "renewed Vault token");
        Ok(Renewal {
            requested,
            granted: credential.ttl,
            renewable: credential.renewable,
        })
    }

    #[cfg(test)]
    pub(crate) async fn install(&self, credential: Credential) {
        self.state.lock().await.credential = Some(credential);
    }

    #[cfg(test)]
    pub(crate) async fn current(&self) -> Option<Credential> {
        self.state.lock().await.credential.clone()
    }
}
