//! Background token refresh.
//!
//! # Lifecycle
//!
//! 1. Sleep for two thirds of the current token's TTL.
//! 2. Renew repeatedly, each time sleeping two thirds of the granted lease,
//!    until Vault stops extending it (non-renewable, or less granted than
//!    requested) or a renewal fails.
//! 3. Log in again, retrying with jittered exponential backoff from 100ms up
//!    to the configured maximum.
//! 4. Go back to 1 with the new token.
//!
//! Every sleep and every Vault call races the cancellation token, so shutdown
//! stops the loop promptly.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::token::{Lease, TokenError, TokenManager};

/// First delay between failed re-authentication attempts.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Spawn the refresh loop. It runs until `cancel` fires.
pub fn spawn_refresh(
    manager: Arc<TokenManager>,
    max_backoff: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        refresh_loop(&manager, max_backoff, &cancel).await;
        info!("token refresh loop stopped");
    })
}

/// Next backoff: double `previous`, cap at `max`, then subtract a random
/// jitter in `[0, cap / 4)`.
pub fn calculate_backoff(previous: Duration, max: Duration) -> Duration {
    let ceiling = previous.saturating_mul(2).min(max);
    let quarter = u64::try_from(ceiling.as_nanos() / 4).unwrap_or(u64::MAX);
    if quarter == 0 {
        return ceiling;
    }
    let jitter = rand::thread_rng().gen_range(0..quarter);
    ceiling - Duration::from_nanos(jitter)
}

async fn refresh_loop(manager: &TokenManager, max_backoff: Duration, cancel: &CancellationToken) {
    loop {
        match manager.lease().await {
            Lease::NonExpiring => {
                info!("Vault token does not expire; background refresh idle");
                cancel.cancelled().await;
                return;
            }
            Lease::Expiring(ttl) => {
                if !sleep_or_cancel(cancel, renew_after(ttl)).await {
                    return;
                }
                match run_renewer(manager, cancel).await {
                    Ok(()) => info!("token reached its maximum lease; re-authenticating"),
                    Err(e) => warn!(error = %e, "token renewer stopped; re-authenticating"),
                }
            }
            Lease::Missing => {}
        }
        if cancel.is_cancelled() {
            return;
        }

        let mut backoff = INITIAL_BACKOFF;
        loop {
            info!("attempting to re-authenticate to Vault");
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                res = manager.login() => res,
            };
            match result {
                Ok(ttl) => {
                    debug!(ttl_secs = ttl.as_secs(), "re-authenticated to Vault");
                    break;
                }
                Err(e) => warn!(
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "failed to re-authenticate"
                ),
            }
            if !sleep_or_cancel(cancel, backoff).await {
                return;
            }
            backoff = calculate_backoff(backoff, max_backoff);
        }
    }
}

/// Renew until Vault stops extending the lease. Returns `Ok` when the lease
/// is exhausted (after using up most of what is left) or on cancellation.
async fn run_renewer(manager: &TokenManager, cancel: &CancellationToken) -> Result<(), TokenError> {
    loop {
        let renewal = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = manager.renew() => res?,
        };

        if renewal.granted.is_zero() {
            cancel.cancelled().await;
            return Ok(());
        }

        let exhausted = !renewal.renewable || renewal.granted < renewal.requested;
        if !sleep_or_cancel(cancel, renew_after(renewal.granted)).await || exhausted {
            return Ok(());
        }
    }
}

fn renew_after(ttl: Duration) -> Duration {
    ttl * 2 / 3
}

/// Sleep for `duration`. Returns false if cancelled first.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::testing::{login_reply, manager_for, renew_reply, LOGIN_PATH, RENEW_PATH};
    use crate::vault::token::Credential;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HOUR: Duration = Duration::from_secs(3600);

    async fn login_attempts(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == LOGIN_PATH)
            .count()
    }

    async fn stop(cancel: CancellationToken, handle: JoinHandle<()>) {
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresh loop did not stop")
            .unwrap();
    }

    #[test]
    fn backoff_stays_within_jitter_window() {
        let max = Duration::from_secs(300);
        for previous in [
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::from_secs(60),
        ] {
            let ceiling = (previous * 2).min(max);
            for _ in 0..1000 {
                let next = calculate_backoff(previous, max);
                assert!(next <= ceiling, "{next:?} > {ceiling:?}");
                assert!(next > ceiling - ceiling / 4, "{next:?} too small for {ceiling:?}");
            }
        }
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let max = Duration::from_secs(300);
        for _ in 0..1000 {
            let next = calculate_backoff(Duration::from_secs(250), max);
            assert!(next <= max);
            assert!(next > max * 3 / 4);
        }
    }

    #[test]
    fn backoff_without_room_for_jitter() {
        assert_eq!(
            calculate_backoff(Duration::from_nanos(1), Duration::from_nanos(1)),
            Duration::from_nanos(1)
        );
        assert_eq!(calculate_backoff(Duration::ZERO, Duration::from_secs(1)), Duration::ZERO);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let server = MockServer::start().await;
        let manager = Arc::new(manager_for(&server));
        manager
            .install(Credential::new("t", HOUR, Some(Instant::now() + HOUR), true))
            .await;

        let cancel = CancellationToken::new();
        let handle = spawn_refresh(manager, Duration::from_secs(300), cancel.clone());

        stop(cancel, handle).await;
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn re_authenticates_when_renewal_is_impossible() {
        let server = MockServer::start().await;
        Mock::given(path(LOGIN_PATH))
            .respond_with(login_reply("fresh", 3600, true))
            .expect(1)
            .mount(&server)
            .await;
        let manager = Arc::new(manager_for(&server));
        manager
            .install(Credential::new(
                "short",
                Duration::from_secs(1),
                Some(Instant::now() + Duration::from_secs(1)),
                false,
            ))
            .await;

        let cancel = CancellationToken::new();
        let handle = spawn_refresh(manager.clone(), Duration::from_secs(300), cancel.clone());

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.lease().await != Lease::Expiring(HOUR) {
            assert!(Instant::now() < deadline, "token was never replaced");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(manager.token().await.unwrap(), "fresh");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn renews_before_expiry() {
        let server = MockServer::start().await;
        Mock::given(path(RENEW_PATH))
            .respond_with(renew_reply("short", 3600, true))
            .expect(1)
            .mount(&server)
            .await;
        let manager = Arc::new(manager_for(&server));
        manager
            .install(Credential::new(
                "short",
                Duration::from_secs(1),
                Some(Instant::now() + Duration::from_secs(1)),
                true,
            ))
            .await;

        let cancel = CancellationToken::new();
        let handle = spawn_refresh(manager.clone(), Duration::from_secs(300), cancel.clone());

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.lease().await != Lease::Expiring(HOUR) {
            assert!(Instant::now() < deadline, "token was never renewed");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(manager.current().await.unwrap().ttl(), HOUR);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn failed_logins_are_retried_until_one_succeeds() {
        let server = MockServer::start().await;
        Mock::given(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(path(LOGIN_PATH))
            .respond_with(login_reply("fresh", 3600, true))
            .mount(&server)
            .await;
        let manager = Arc::new(manager_for(&server));

        let cancel = CancellationToken::new();
        let handle = spawn_refresh(manager.clone(), Duration::from_secs(300), cancel.clone());

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.lease().await != Lease::Expiring(HOUR) {
            assert!(Instant::now() < deadline, "never logged in");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(login_attempts(&server).await, 4);
        assert_eq!(manager.token().await.unwrap(), "fresh");

        stop(cancel, handle).await;
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let server = MockServer::start().await;
        Mock::given(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let manager = Arc::new(manager_for(&server));

        let cancel = CancellationToken::new();
        let handle = spawn_refresh(manager, Duration::from_secs(300), cancel.clone());

        let deadline = Instant::now() + Duration::from_secs(5);
        while login_attempts(&server).await < 3 {
            assert!(Instant::now() < deadline, "logins were not retried");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        stop(cancel, handle).await;
    }

    #[tokio::test]
    async fn cancellation_interrupts_renewer_wait() {
        let server = MockServer::start().await;
        Mock::given(path(RENEW_PATH))
            .respond_with(renew_reply("short", 3600, true))
            .mount(&server)
            .await;
        let manager = Arc::new(manager_for(&server));
        manager
            .install(Credential::new(
                "short",
                Duration::from_secs(1),
                Some(Instant::now() + Duration::from_secs(1)),
                true,
            ))
            .await;

        let cancel = CancellationToken::new();
        let handle = spawn_refresh(manager.clone(), Duration::from_secs(300), cancel.clone());

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.lease().await != Lease::Expiring(HOUR) {
            assert!(Instant::now() < deadline, "token was never renewed");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        stop(cancel, handle).await;
        assert_eq!(login_attempts(&server).await, 0);
    }
}
