//! Tracing setup for processes embedding the cache layer.
//!
//! `RUST_LOG` wins over the configured level.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Install the global subscriber from `logging.level`.
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(&logging.level)),
        Err(_) => filter_for(&logging.level),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

/// Parse `level` as filter directives, falling back to `info`.
fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_keeps_directives() {
        assert!(filter_for("bsr_cache=debug").to_string().contains("bsr_cache"));
    }

    #[test]
    fn test_init_twice_is_noop() {
        let logging = LoggingConfig::default();
        init_tracing(&logging);
        init_tracing(&logging);
    }
}
