//! `vault-sidecar` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise tracing (JSON logs, optional OTLP export).
//! 3. Build the Vault client and the AWS identity source, then log in.
//! 4. In `default` / `file` mode, write preconfigured secrets to disk.
//! 5. Spawn background tasks: token refresh, cache sweeper.
//! 6. In `default` / `proxy` mode, serve the proxy on loopback until a
//!    shutdown signal; otherwise just wait for the signal.

mod aws;
mod cache;
mod config;
mod runmode;
mod secrets;
mod server;
mod telemetry;
mod vault;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aws::StsIdentity;
use cache::ResponseCache;
use config::Config;
use server::state::AppState;
use vault::{AuthSettings, TokenManager, VaultClient};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otlp_endpoint(), &cfg.vault_log_level)?;
    let run_mode = cfg.run_mode();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?run_mode,
        "vault-sidecar starting"
    );

    // Fail on bad declarations before making any network call.
    let secrets = if run_mode.has_file() {
        secrets::parse_configured_secrets(std::env::vars())
            .context("failed to parse configured secrets")?
    } else {
        Vec::new()
    };

    // -----------------------------------------------------------------------
    // 3. Vault client, identity, first login
    // -----------------------------------------------------------------------
    let address = cfg
        .vault_address()
        .context("one of VLE_VAULT_ADDR or VAULT_ADDR is required")?;
    let vault = VaultClient::new(address, cfg.client_timeout()).context("invalid Vault address")?;
    let identity = StsIdentity::from_env(cfg.sts_endpoint_region())
        .await
        .context("failed to load AWS credentials")?;
    let tokens = Arc::new(TokenManager::new(
        vault.clone(),
        Arc::new(identity),
        AuthSettings {
            role: cfg.vault_auth_role.trim().to_owned(),
            provider: cfg.vault_auth_provider.trim().to_owned(),
            iam_server_id: cfg.iam_server_id().map(str::to_owned),
        },
        cfg.token_expiry_grace_period(),
    ));
    let token = tokens
        .token()
        .await
        .context("failed to authenticate to Vault")?;

    // -----------------------------------------------------------------------
    // 4. Preconfigured secrets
    // -----------------------------------------------------------------------
    let index_state = tokens.take_index_state().await;
    if !secrets.is_empty() {
        secrets::write_configured(&vault, &token, index_state.as_deref(), &secrets)
            .await
            .context("failed to write preconfigured secrets")?;
    }
    drop(token);

    // -----------------------------------------------------------------------
    // 5. Background tasks
    // -----------------------------------------------------------------------
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();
    if cfg.vault_background_refresh {
        tasks.push(vault::spawn_refresh(
            tokens.clone(),
            cfg.refresh_max_backoff(),
            cancel.clone(),
        ));
    }

    // -----------------------------------------------------------------------
    // 6. Proxy
    // -----------------------------------------------------------------------
    if run_mode.has_proxy() {
        let cache = match cfg.cache_ttl() {
            Some(ttl) => {
                let cache = Arc::new(ResponseCache::new(ttl, cfg.vault_default_cache_enabled)?);
                tasks.push(cache::spawn_sweeper(cache.clone(), cancel.clone()));
                Some(cache)
            }
            None => None,
        };
        info!(
            cache_enabled = cache.is_some(),
            cache_default_on = cfg.vault_default_cache_enabled,
            "response cache configured"
        );

        let deadline = server::middleware::request_timeout(cfg.client_timeout());
        let router = server::router::build(AppState::new(tokens.clone(), cache, deadline));
        let addr: SocketAddr = ([127, 0, 0, 1], cfg.vault_proxy_port).into();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind proxy listener on {addr}"))?;
        info!(addr = %addr, "listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("proxy server failed")?;
    } else {
        info!("proxy disabled by run mode; waiting for shutdown signal");
        shutdown_signal().await;
    }

    info!("shutting down");
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }
    telemetry::shutdown_telemetry();
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
