//! Tracing setup: JSON logs, plus OTLP span export when an endpoint is set.
//!
//! # Telemetry invariants
//!
//! - **No token material** must appear in any span attribute or log field.
//! - Log level is configurable via `VAULT_LOG_LEVEL` (default: `info`);
//!   `RUST_LOG` takes precedence when set.

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
