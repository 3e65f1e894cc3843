//! Token service facade used by the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::codec::TokenCodec;
use crate::error::TokenError;
use crate::keys::KeyManager;
use crate::login::{self, LoginClaims};
use crate::nonce;
use crate::window::{DEFAULT_LOGIN_MAX_AGE, DEFAULT_NONCE_MAX_AGE, TimeWindow};

/// Lifetimes applied when verifying tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    /// Maximum age of a login token; `None` accepts any age.
    pub login_max_age: Option<Duration>,
    /// Window used by [`TokenService::verify_nonce_default`].
    pub nonce_max_age: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            login_max_age: Some(DEFAULT_LOGIN_MAX_AGE),
            nonce_max_age: DEFAULT_NONCE_MAX_AGE,
        }
    }
}

/// A login token that passed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLogin {
    pub subject_id: i64,
    pub issued_at: i64,
    /// Ring key that decrypted the token.
    pub key_id: u32,
    newest_key: bool,
}

impl ResolvedLogin {
    /// The token was encrypted under a key that has since been rotated out of
    /// first place; the caller should replace the cookie.
    pub const fn needs_reissue(&self) -> bool {
        !self.newest_key
    }
}

/// Issues and verifies login tokens and CSRF nonces.
#[derive(Debug, Clone)]
pub struct TokenService {
    codec: TokenCodec,
    policy: TokenPolicy,
}

impl TokenService {
    pub const fn new(keys: Arc<KeyManager>, policy: TokenPolicy) -> Self {
        Self {
            codec: TokenCodec::new(keys),
            policy,
        }
    }

    pub const fn keys(&self) -> &Arc<KeyManager> {
        self.codec.keys()
    }

    pub const fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    fn clock(&self) -> &dyn Clock {
        self.codec.keys().clock().as_ref()
    }

    /// Replace the key ring with `key`.
    pub fn set_key(&self, key: &[u8]) -> Result<(), TokenError> {
        self.keys().set(key)
    }

    /// Generate and install a fresh key, returning its bytes.
    pub fn generate_key(&self) -> Result<Vec<u8>, TokenError> {
        self.keys().generate()
    }

    pub fn issue_login_token(&self, subject_id: i64) -> Result<String, TokenError> {
        login::issue(&self.codec, self.clock(), subject_id)
    }

    /// Resolve a login token to the subject it was issued for.
    pub fn resolve_login_token(&self, token: &str) -> Result<ResolvedLogin, TokenError> {
        self.resolve_login_token_since(token, None)
    }

    /// Resolve a login token, also rejecting tokens issued before
    /// `invalidated_at` (the subject's last password change or
    /// log-out-everywhere event, as recorded by the identity store).
    pub fn resolve_login_token_since(
        &self,
        token: &str,
        invalidated_at: Option<i64>,
    ) -> Result<ResolvedLogin, TokenError> {
        let decoded = login::decode(&self.codec, token).map_err(conceal)?;
        let claims = decoded.value;

        let window = self.policy.login_max_age.map(TimeWindow::new);
        claims.validate(window, self.clock().now_unix(), invalidated_at)?;

        Ok(ResolvedLogin {
            subject_id: claims.subject_id,
            issued_at: claims.issued_at,
            key_id: decoded.key_id,
            newest_key: decoded.newest,
        })
    }

    /// Issue a replacement for a login token that was decrypted under an
    /// older key. The original issue time is kept so rotation never extends
    /// a session.
    pub fn refresh_login_token(&self, resolved: &ResolvedLogin) -> Result<Option<String>, TokenError> {
        if !resolved.needs_reissue() {
            return Ok(None);
        }
        let claims = LoginClaims {
            issued_at: resolved.issued_at,
            subject_id: resolved.subject_id,
        };
        let token = login::encode(&self.codec, &claims)?;
        debug!(
            subject_id = resolved.subject_id,
            old_key_id = resolved.key_id,
            "Reissued login token under newest key"
        );
        Ok(Some(token))
    }

    pub fn issue_nonce(&self) -> Result<String, TokenError> {
        nonce::create(&self.codec, self.clock())
    }

    pub fn verify_nonce(&self, token: &str, max_age: Duration) -> bool {
        nonce::verify(&self.codec, self.clock(), token, max_age)
    }

    pub fn verify_nonce_default(&self, token: &str) -> bool {
        self.verify_nonce(token, self.policy.nonce_max_age)
    }
}

/// Collapse decode-stage failures so callers cannot tell a forged token
/// from one encrypted under a retired key. The cause stays in the logs.
fn conceal(err: TokenError) -> TokenError {
    if err.is_decode_failure() {
        debug!(error = %err, "Login token failed to decode");
        TokenError::InvalidToken
    } else {
        err
    }
}
