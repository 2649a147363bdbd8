//! Tracing/logging initialization.
//!
//! Sets up `tracing_subscriber` with an env-filter and either human-readable
//! or JSON output. `RUST_LOG` always wins over the configured level.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter directive for the server: `walletpass_*` crates at
/// `level`, everything else at `warn`.
pub fn default_filter(level: &str) -> String {
    format!(
        "warn,walletpass_server={level},walletpass_core={level},walletpass_crypto={level},tower_http={level}"
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- used when `RUST_LOG` is not set
///   (see [`default_filter`]).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_scopes_own_crates() {
        let filter = default_filter("debug");
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("walletpass_server=debug"));
        assert!(tracing_subscriber::EnvFilter::try_new(&filter).is_ok());
    }
}
