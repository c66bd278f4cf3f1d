//! Logging and tracing setup
//!
//! Structured logging configuration using tracing. All services call one of
//! these from `main` before doing anything else.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for the application
///
/// Reads the log level from the `RUST_LOG` env var, defaulting to `info`.
///
/// Usage:
/// ```rust,no_run
/// gatehub_common::init_tracing();
/// tracing::info!("gateway starting on port 8080");
/// ```
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .compact(),
        )
        .init();
}

/// Initialize tracing with JSON output (for production)
///
/// JSON lines are friendlier to log aggregation systems (Loki, ELK).
pub fn init_tracing_json() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_level(true)
                .with_current_span(true),
        )
        .init();
}
