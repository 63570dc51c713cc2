//! Tracing subscriber setup.
//!
//! The subscriber is built from [`Config::log_level`] (an `EnvFilter`
//! directive string, `RUST_LOG`) and [`Config::log_json`] (`LOG_FORMAT=json`).

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Filter used when `log_level` does not parse.
pub const FALLBACK_LOG_FILTER: &str = "info";

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing(config: &Config) {
    let filter = env_filter(&config.log_level);

    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Parse `directives`, falling back to [`FALLBACK_LOG_FILTER`].
pub fn env_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("Invalid log filter {directives:?} ({e}), using {FALLBACK_LOG_FILTER:?}");
        EnvFilter::new(FALLBACK_LOG_FILTER)
    })
}
