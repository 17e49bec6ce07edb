//! Configuration loading and validation for the sidecar.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::runmode::RunMode;

/// Validated sidecar configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Vault address, e.g. `https://vault.example.com:8200`.
    #[serde(default)]
    pub vault_addr: Option<String>,

    /// Overrides `VAULT_ADDR` when set, so the sidecar can target a different
    /// Vault than other Vault-aware tooling in the same environment.
    #[serde(default)]
    pub vle_vault_addr: Option<String>,

    /// Vault role to authenticate as. **Required.**
    #[serde(default)]
    pub vault_auth_role: String,

    /// Mount name of the AWS auth method (e.g. `"aws"`). **Required.**
    #[serde(default)]
    pub vault_auth_provider: String,

    /// Value for the `X-Vault-AWS-IAM-Server-ID` header, if the auth mount
    /// requires one.
    #[serde(default)]
    pub vault_iam_server_id: Option<String>,

    /// Region of the regional STS endpoint to sign against. Uses the global
    /// endpoint when unset.
    #[serde(default)]
    pub vault_sts_endpoint_region: Option<String>,

    /// Response cache TTL in seconds. Zero disables caching entirely.
    #[serde(default)]
    pub vault_default_cache_ttl_secs: u64,

    /// Cache every eligible request unless it opts out with `nocache`.
    #[serde(default)]
    pub vault_default_cache_enabled: bool,

    /// A token is treated as expired this many seconds before its real expiry.
    #[serde(default = "default_grace_period")]
    pub vault_token_expiry_grace_period_secs: u64,

    /// Ceiling for the background re-authentication backoff.
    #[serde(default = "default_max_backoff")]
    pub vault_refresh_max_backoff_secs: u64,

    /// Run the background renew / re-authenticate loop.
    #[serde(default = "default_background_refresh")]
    pub vault_background_refresh: bool,

    /// Timeout for each upstream Vault round trip.
    #[serde(default = "default_client_timeout")]
    pub vault_client_timeout_secs: u64,

    /// Port the local proxy listens on (loopback only).
    #[serde(default = "default_proxy_port")]
    pub vault_proxy_port: u16,

    /// `default`, `file` or `proxy`.
    #[serde(default = "default_run_mode")]
    pub vault_run_mode: String,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub vault_log_level: String,

    /// OTLP endpoint for span export. Logs only when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
}

fn default_grace_period() -> u64 {
    10
}
fn default_max_backoff() -> u64 {
    300
}
fn default_background_refresh() -> bool {
    true
}
fn default_client_timeout() -> u64 {
    60
}
fn default_proxy_port() -> u16 {
    8200
}
fn default_run_mode() -> String {
    "default".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Effective Vault address: `VLE_VAULT_ADDR` wins over `VAULT_ADDR`.
    pub fn vault_address(&self) -> Option<&str> {
        non_empty(self.vle_vault_addr.as_deref()).or_else(|| non_empty(self.vault_addr.as_deref()))
    }

    /// Response cache TTL, or `None` when caching is disabled.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.vault_default_cache_ttl_secs > 0)
            .then(|| Duration::from_secs(self.vault_default_cache_ttl_secs))
    }

    pub fn token_expiry_grace_period(&self) -> Duration {
        Duration::from_secs(self.vault_token_expiry_grace_period_secs)
    }

    pub fn refresh_max_backoff(&self) -> Duration {
        Duration::from_secs(self.vault_refresh_max_backoff_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.vault_client_timeout_secs)
    }

    pub fn run_mode(&self) -> RunMode {
        RunMode::parse(&self.vault_run_mode)
    }

    pub fn iam_server_id(&self) -> Option<&str> {
        non_empty(self.vault_iam_server_id.as_deref())
    }

    pub fn sts_endpoint_region(&self) -> Option<&str> {
        non_empty(self.vault_sts_endpoint_region.as_deref())
    }

    pub fn otlp_endpoint(&self) -> Option<&str> {
        non_empty(self.otel_exporter_otlp_endpoint.as_deref())
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.vault_address().is_none() {
            anyhow::bail!("one of VLE_VAULT_ADDR or VAULT_ADDR is required and must not be empty");
        }
        ensure_non_empty(&self.vault_auth_role, "VAULT_AUTH_ROLE")?;
        ensure_non_empty(&self.vault_auth_provider, "VAULT_AUTH_PROVIDER")?;

        if self.vault_refresh_max_backoff_secs == 0 {
            anyhow::bail!("VAULT_REFRESH_MAX_BACKOFF_SECS must be > 0");
        }
        if self.vault_client_timeout_secs == 0 {
            anyhow::bail!("VAULT_CLIENT_TIMEOUT_SECS must be > 0");
        }
        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
