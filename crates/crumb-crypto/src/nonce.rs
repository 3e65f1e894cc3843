//! CSRF nonce payload.
//!
//! Plaintext layout: `pad(8) || varint(issued_at)` where the varint is a
//! zig-zag signed LEB128 integer of 1 to 10 bytes that must end exactly at
//! the end of the plaintext.
//!
//! A nonce is valid for any number of presentations inside its time window.
//! Nothing records consumed nonces, so replay within the window is possible.

use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::codec::{Decoded, TokenCodec, strip_pad, with_random_pad};
use crate::error::TokenError;
use crate::window::TimeWindow;

/// Longest varint encoding of a 64-bit integer.
pub const MAX_VARINT_LEN: usize = 10;

/// Issue a nonce stamped with the current time.
pub fn create(codec: &TokenCodec, clock: &dyn Clock) -> Result<String, TokenError> {
    let mut payload = Vec::with_capacity(MAX_VARINT_LEN);
    put_varint(clock.now_unix(), &mut payload);
    codec.encode(&with_random_pad(&payload)?)
}

/// Parse a decrypted plaintext into the embedded issue time.
pub fn parse(plaintext: &[u8]) -> Result<i64, TokenError> {
    let payload = strip_pad(plaintext)?;
    let (issued_at, used) = read_varint(payload)?;
    if used != payload.len() {
        return Err(TokenError::Deserialize(format!(
            "{} trailing bytes after nonce timestamp",
            payload.len() - used
        )));
    }
    Ok(issued_at)
}

/// Decrypt a nonce and return its issue time without checking the window.
pub fn issued_at(codec: &TokenCodec, token: &str) -> Result<Decoded<i64>, TokenError> {
    codec.decode_with_any(token, parse)
}

/// Check that `token` is a nonce issued less than `max_age` ago.
///
/// Every key in the ring is tried; a key is accepted only if the plaintext
/// parses and its timestamp falls inside the window.
pub fn verify(codec: &TokenCodec, clock: &dyn Clock, token: &str, max_age: Duration) -> bool {
    let window = TimeWindow::new(max_age);
    let now = clock.now_unix();
    match codec.decode_with_any(token, |plaintext| {
        let issued_at = parse(plaintext)?;
        window.check(issued_at, now)?;
        Ok(issued_at)
    }) {
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, "Nonce rejected");
            false
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn put_varint(value: i64, out: &mut Vec<u8>) {
    let mut zigzag = ((value << 1) ^ (value >> 63)) as u64;
    while zigzag >= 0x80 {
        #[allow(clippy::cast_possible_truncation)]
        out.push((zigzag as u8) | 0x80);
        zigzag >>= 7;
    }
    #[allow(clippy::cast_possible_truncation)]
    out.push(zigzag as u8);
}

/// Returns the decoded value and the number of bytes consumed.
#[allow(clippy::cast_possible_wrap)]
fn read_varint(buf: &[u8]) -> Result<(i64, usize), TokenError> {
    let mut zigzag = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(TokenError::Deserialize("varint overflows 64 bits".into()));
        }
        zigzag |= u64::from(byte & 0x7f) << (7 * i);
        if byte < 0x80 {
            let value = ((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64);
            return Ok((value, i + 1));
        }
    }
    Err(TokenError::Deserialize("truncated varint".into()))
}
