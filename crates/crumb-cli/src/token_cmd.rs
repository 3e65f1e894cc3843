//! Token subcommands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::Subcommand;
use tracing::{debug, warn};

use crumb_core::config::TokensConfig;
use crumb_crypto::{KeyManager, MissingKeyPolicy, TokenPolicy, TokenService};

#[derive(Subcommand, Debug)]
pub enum TokenAction {
    /// Generate a random 16-byte cookie key and print it as base64.
    Keygen,

    /// Issue a login token for a subject id.
    IssueLogin {
        /// Identity-store primary key of the user.
        #[arg(long)]
        subject: i64,
    },

    /// Decode a login token and print the subject id.
    ResolveLogin {
        token: String,

        /// Reject tokens issued before this unix time (last password change).
        #[arg(long)]
        invalidated_at: Option<i64>,
    },

    /// Issue a CSRF nonce.
    IssueNonce,

    /// Check whether a CSRF nonce is inside its validity window.
    VerifyNonce {
        token: String,

        /// Window in seconds (default: configured nonce max age).
        #[arg(long)]
        max_age: Option<u64>,
    },
}

/// Build a [`TokenService`] from configuration.
///
/// `key_override` (from `--key` / `CRUMB_COOKIE_KEY`) takes precedence over
/// the configured key.
pub fn build_service(config: &TokensConfig, key_override: Option<&str>) -> Result<TokenService> {
    let policy = if config.fail_closed {
        MissingKeyPolicy::FailClosed
    } else {
        MissingKeyPolicy::GenerateEphemeral
    };
    let keys = KeyManager::new(policy);

    match key_override.or(config.cookie_key.as_deref()) {
        Some(encoded) => {
            let key = STANDARD
                .decode(encoded.trim())
                .context("Cookie key is not valid base64")?;
            keys.set(&key).context("Cookie key rejected")?;
        }
        None if policy == MissingKeyPolicy::GenerateEphemeral => {
            warn!("No cookie key configured; tokens from this run cannot be verified later");
        }
        None => {}
    }

    let token_policy = TokenPolicy {
        login_max_age: config.login_max_age(),
        nonce_max_age: config.nonce_max_age(),
    };
    Ok(TokenService::new(Arc::new(keys), token_policy))
}

/// Execute a token subcommand. Returns `false` when a presented token was
/// rejected.
#[allow(clippy::print_stdout)]
pub fn run(action: TokenAction, service: &TokenService) -> Result<bool> {
    match action {
        TokenAction::Keygen => {
            let key = service.generate_key().context("Key generation failed")?;
            println!("{}", STANDARD.encode(key));
        }
        TokenAction::IssueLogin { subject } => {
            let token = service
                .issue_login_token(subject)
                .context("Failed to issue login token")?;
            println!("{token}");
        }
        TokenAction::ResolveLogin {
            token,
            invalidated_at,
        } => match service.resolve_login_token_since(&token, invalidated_at) {
            Ok(resolved) => {
                debug!(
                    key_id = resolved.key_id,
                    issued_at = resolved.issued_at,
                    "Login token resolved"
                );
                println!("{}", resolved.subject_id);
            }
            Err(e) => {
                println!("rejected: {e}");
                return Ok(false);
            }
        },
        TokenAction::IssueNonce => {
            let nonce = service.issue_nonce().context("Failed to issue nonce")?;
            println!("{nonce}");
        }
        TokenAction::VerifyNonce { token, max_age } => {
            let valid = match max_age {
                Some(secs) => service.verify_nonce(&token, Duration::from_secs(secs)),
                None => service.verify_nonce_default(&token),
            };
            println!("{}", if valid { "valid" } else { "invalid" });
            return Ok(valid);
        }
    }
    Ok(true)
}
