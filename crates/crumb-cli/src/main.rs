//! Crumb CLI
//!
//! Generates cookie keys and issues or inspects login tokens and CSRF nonces.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use crumb_cli::token_cmd::{self, TokenAction};

#[derive(Parser, Debug)]
#[command(name = "crumb")]
#[command(version, about = "Crumb cookie key and token tool")]
struct Cli {
    /// Path to a JSON config file, applied over the global config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base64 cookie key (16, 24 or 32 bytes).
    #[arg(long, global = true, env = "CRUMB_COOKIE_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    action: TokenAction,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = crumb_core::config::load_config(cli.config.as_deref())?;

    crumb_core::tracing_init::init_tracing(&config.log, cli.log_json)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting crumb");

    let service = token_cmd::build_service(&config.tokens, cli.key.as_deref())?;
    if token_cmd::run(cli.action, &service)? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
