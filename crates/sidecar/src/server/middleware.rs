//! Request size and deadline limits.

use std::time::Duration;

/// Largest request body the proxy will buffer.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Overall per-request deadline. A request may need a login round trip and
/// then the forwarded call, each bounded by the upstream timeout.
pub fn request_timeout(upstream_timeout: Duration) -> Duration {
    upstream_timeout.saturating_mul(2) + Duration::from_secs(10)
}
