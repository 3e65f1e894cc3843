//! Token error types.

/// Errors from issuing or verifying tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Secure random source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Invalid key length: expected 16, 24 or 32 bytes, got {actual}")]
    InvalidKeyLength { actual: usize },

    #[error("No cookie key configured")]
    KeyNotConfigured,

    #[error("Token is not valid base64: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Token too short: {actual} bytes, need at least {min}")]
    CiphertextTooShort { actual: usize, min: usize },

    #[error("Payload could not be deserialized: {0}")]
    Deserialize(String),

    #[error("Payload could not be serialized: {0}")]
    Serialize(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired: age {age}s, max {max_age}s")]
    Expired { age: i64, max_age: i64 },

    #[error("Token issued {skew}s in the future")]
    IssuedInFuture { skew: i64 },

    #[error("Token issued at {issued_at} predates credential invalidation at {invalidated_at}")]
    Revoked { issued_at: i64, invalidated_at: i64 },
}

impl TokenError {
    /// Whether this error comes from the wire-decoding stage (base64, length,
    /// decryption under the wrong key, payload parsing).
    ///
    /// These are reported to callers as [`TokenError::InvalidToken`] so an
    /// attacker cannot tell which stage rejected a forged token.
    pub const fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Self::Base64Decode(_)
                | Self::CiphertextTooShort { .. }
                | Self::Deserialize(_)
                | Self::InvalidToken
        )
    }
}
