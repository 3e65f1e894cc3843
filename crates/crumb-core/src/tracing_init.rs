//! Tracing subscriber setup for the crumb binaries.
//!
//! Logs always go to stderr; stdout carries keys and tokens only.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;
use crate::error::{Error, Result};

const CRATES: [&str; 3] = ["crumb", "crumb_cli", "crumb_crypto"];

/// Filter directive applying `level` to every crumb crate.
pub fn filter_directive(level: &str) -> String {
    CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `log.level` when set. `force_json` comes from the
/// `--log-json` flag and overrides `log.json`.
pub fn init_tracing(log: &LogConfig, force_json: bool) -> Result<()> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(directives),
        Err(_) => EnvFilter::try_new(filter_directive(&log.level)),
    }
    .map_err(|e| Error::Tracing(format!("invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if force_json || log.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| Error::Tracing(e.to_string()))
}
