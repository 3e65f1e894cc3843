//! Login token payload.
//!
//! Plaintext layout: `pad(8) || CBOR{ "t": issued_at, "u": subject_id }`.
//! The map keys and their order are part of the wire format.

use ciborium::Value;
use serde::Serialize;

use crate::clock::Clock;
use crate::codec::{Decoded, TokenCodec, strip_pad, with_random_pad};
use crate::error::TokenError;
use crate::window::TimeWindow;

/// Claims carried by a login token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoginClaims {
    /// Issue time, unix seconds.
    #[serde(rename = "t")]
    pub issued_at: i64,
    /// Identity-store primary key of the logged-in user.
    #[serde(rename = "u")]
    pub subject_id: i64,
}

impl LoginClaims {
    /// Serialize to the CBOR payload (without pad).
    pub fn to_cbor(&self) -> Result<Vec<u8>, TokenError> {
        let mut out = Vec::with_capacity(16);
        ciborium::into_writer(self, &mut out).map_err(|e| TokenError::Serialize(e.to_string()))?;
        Ok(out)
    }

    /// Parse a CBOR payload (without pad).
    ///
    /// Accepts only a map with exactly the text keys `"t"` and `"u"`, each
    /// bound to an integer that fits in `i64`. Trailing bytes are rejected.
    pub fn from_cbor(payload: &[u8]) -> Result<Self, TokenError> {
        let mut rest = payload;
        let value: Value = ciborium::from_reader(&mut rest)
            .map_err(|e| TokenError::Deserialize(e.to_string()))?;
        if !rest.is_empty() {
            return Err(TokenError::Deserialize(format!(
                "{} trailing bytes after login claims",
                rest.len()
            )));
        }
        let Value::Map(entries) = value else {
            return Err(TokenError::Deserialize("login claims are not a map".into()));
        };

        let mut issued_at = None;
        let mut subject_id = None;
        for (key, value) in entries {
            let slot = match &key {
                Value::Text(name) if name == "t" => &mut issued_at,
                Value::Text(name) if name == "u" => &mut subject_id,
                other => {
                    return Err(TokenError::Deserialize(format!(
                        "unexpected login claim key {other:?}"
                    )));
                }
            };
            if slot.replace(claim_int(value)?).is_some() {
                return Err(TokenError::Deserialize(format!(
                    "duplicate login claim key {key:?}"
                )));
            }
        }

        match (issued_at, subject_id) {
            (Some(issued_at), Some(subject_id)) => Ok(Self {
                issued_at,
                subject_id,
            }),
            _ => Err(TokenError::Deserialize("missing login claim".into())),
        }
    }

    /// Apply the age window and the subject's credential-invalidation time.
    pub fn validate(
        &self,
        window: Option<TimeWindow>,
        now: i64,
        invalidated_at: Option<i64>,
    ) -> Result<(), TokenError> {
        if let Some(window) = window {
            window.check(self.issued_at, now)?;
        }
        match invalidated_at {
            Some(invalidated_at) if self.issued_at < invalidated_at => Err(TokenError::Revoked {
                issued_at: self.issued_at,
                invalidated_at,
            }),
            _ => Ok(()),
        }
    }
}

fn claim_int(value: Value) -> Result<i64, TokenError> {
    match value {
        Value::Integer(n) => i64::try_from(n)
            .map_err(|_| TokenError::Deserialize("login claim out of range".into())),
        other => Err(TokenError::Deserialize(format!(
            "login claim is not an integer: {other:?}"
        ))),
    }
}

/// Encrypt `claims` into a login token.
pub fn encode(codec: &TokenCodec, claims: &LoginClaims) -> Result<String, TokenError> {
    let plaintext = with_random_pad(&claims.to_cbor()?)?;
    codec.encode(&plaintext)
}

/// Issue a login token for `subject_id`, stamped with the current time.
pub fn issue(codec: &TokenCodec, clock: &dyn Clock, subject_id: i64) -> Result<String, TokenError> {
    let claims = LoginClaims {
        issued_at: clock.now_unix(),
        subject_id,
    };
    encode(codec, &claims)
}

/// Parse a decrypted plaintext into claims.
pub fn parse(plaintext: &[u8]) -> Result<LoginClaims, TokenError> {
    LoginClaims::from_cbor(strip_pad(plaintext)?)
}

/// Decrypt a login token with whichever ring key yields well-formed claims.
///
/// No time policy is applied here; see [`LoginClaims::validate`].
pub fn decode(codec: &TokenCodec, token: &str) -> Result<Decoded<LoginClaims>, TokenError> {
    codec.decode_with_any(token, parse)
}
