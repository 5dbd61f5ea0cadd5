//! Logging setup for the CLI.
//!
//! # Environment Variables
//!
//! - `STRATA_LOG=debug|info|warn|error|trace` or any `EnvFilter` directive
//! - `STRATA_LOG_FORMAT=pretty|compact|json` (default: compact)

use std::env;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding the filter directive.
pub const LOG_ENV: &str = "STRATA_LOG";

/// Environment variable holding the output format.
pub const LOG_FORMAT_ENV: &str = "STRATA_LOG_FORMAT";

/// The filter directive to use. `quiet` overrides the environment.
pub fn filter_directive(quiet: bool) -> String {
    if quiet {
        return "error".to_string();
    }
    env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "warn".to_string())
}

/// Install the global subscriber. Logs go to stderr.
pub fn init(quiet: bool) {
    let filter =
        EnvFilter::try_new(filter_directive(quiet)).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    let format = env::var(LOG_FORMAT_ENV).unwrap_or_default();
    let result = match format.to_lowercase().as_str() {
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        "pretty" => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("A global subscriber was already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_forces_error() {
        assert_eq!(filter_directive(true), "error");
    }
}
