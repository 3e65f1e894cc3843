//! Encrypt-to-text token codec.
//!
//! Wire format: `base64_standard(IV(16) || AES-CFB(key, IV, plaintext))`.
//! The ciphertext has the same length as the plaintext; there is no padding
//! scheme and no authentication tag, so the codec provides confidentiality
//! only. Callers detect corruption by parsing the decrypted payload.

use std::sync::Arc;

use aes::cipher::{AsyncStreamCipher, BlockCipher, BlockEncryptMut, KeyInit, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::error::TokenError;
use crate::keys::{KeyEntry, KeyManager, fill_random, validate_key_len};

/// AES block size, which is also the IV length.
pub const BLOCK_SIZE: usize = 16;

/// Random bytes prepended to every payload so equal payloads never share a
/// ciphertext prefix.
pub const PAD_LEN: usize = 8;

#[derive(Debug, Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// A successfully decoded token together with the key that opened it.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub value: T,
    pub key_id: u32,
    /// `false` when an older key in the ring was needed.
    pub newest: bool,
}

/// Encodes and decodes tokens under the keys of a [`KeyManager`].
#[derive(Debug, Clone)]
pub struct TokenCodec {
    keys: Arc<KeyManager>,
}

impl TokenCodec {
    pub const fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    pub const fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Encrypt `raw` under the newest key.
    pub fn encode(&self, raw: &[u8]) -> Result<String, TokenError> {
        let entry = self.keys.get()?;
        seal(entry.bytes(), raw)
    }

    /// Decrypt `token` with the newest key only.
    pub fn decode(&self, token: &str) -> Result<Vec<u8>, TokenError> {
        let bytes = unwrap_token(token)?;
        let entry = self.keys.get()?;
        open_bytes(entry.bytes(), &bytes)
    }

    /// Decrypt `token` with each key in the ring, newest first, until `accept`
    /// succeeds on the plaintext.
    ///
    /// Without an authentication tag every key "decrypts" every token, so the
    /// payload parser in `accept` is what tells a right key from a wrong one.
    /// When no key is accepted the last rejection is returned.
    pub fn decode_with_any<T, F>(&self, token: &str, mut accept: F) -> Result<Decoded<T>, TokenError>
    where
        F: FnMut(&[u8]) -> Result<T, TokenError>,
    {
        let bytes = unwrap_token(token)?;
        let ring = self.keys.ring()?;

        let mut last_err = TokenError::InvalidToken;
        for (position, entry) in ring.iter().enumerate() {
            let plaintext = open_with(entry, &bytes)?;
            match accept(&plaintext) {
                Ok(value) => {
                    return Ok(Decoded {
                        value,
                        key_id: entry.id(),
                        newest: position == 0,
                    });
                }
                Err(e) => {
                    debug!(key_id = entry.id(), error = %e, "Token rejected under key");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

/// Encrypt `raw` under `key` with a fresh random IV and encode as base64.
pub fn seal(key: &[u8], raw: &[u8]) -> Result<String, TokenError> {
    validate_key_len(key.len())?;

    let mut out = vec![0u8; BLOCK_SIZE + raw.len()];
    let (iv, body) = out.split_at_mut(BLOCK_SIZE);
    fill_random(iv)?;
    body.copy_from_slice(raw);
    apply_keystream(key, iv, body, Direction::Encrypt)?;

    Ok(STANDARD.encode(&out))
}

/// Decode and decrypt a token produced by [`seal`] with the same key.
pub fn open(key: &[u8], token: &str) -> Result<Vec<u8>, TokenError> {
    let bytes = unwrap_token(token)?;
    open_bytes(key, &bytes)
}

/// Prefix `payload` with [`PAD_LEN`] fresh random bytes.
pub(crate) fn with_random_pad(payload: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut plaintext = vec![0u8; PAD_LEN];
    fill_random(&mut plaintext)?;
    plaintext.extend_from_slice(payload);
    Ok(plaintext)
}

/// Skip the random pad of a decrypted plaintext.
pub(crate) fn strip_pad(plaintext: &[u8]) -> Result<&[u8], TokenError> {
    plaintext.get(PAD_LEN..).ok_or_else(|| {
        TokenError::Deserialize(format!(
            "plaintext is {} bytes, shorter than the {PAD_LEN}-byte pad",
            plaintext.len()
        ))
    })
}

/// Base64-decode a token and check it holds at least an IV.
fn unwrap_token(token: &str) -> Result<Vec<u8>, TokenError> {
    let bytes = STANDARD.decode(token)?;
    if bytes.len() < BLOCK_SIZE {
        return Err(TokenError::CiphertextTooShort {
            actual: bytes.len(),
            min: BLOCK_SIZE,
        });
    }
    Ok(bytes)
}

fn open_with(entry: &KeyEntry, bytes: &[u8]) -> Result<Vec<u8>, TokenError> {
    open_bytes(entry.bytes(), bytes)
}

fn open_bytes(key: &[u8], bytes: &[u8]) -> Result<Vec<u8>, TokenError> {
    validate_key_len(key.len())?;
    let Some((iv, body)) = bytes.split_at_checked(BLOCK_SIZE) else {
        return Err(TokenError::CiphertextTooShort {
            actual: bytes.len(),
            min: BLOCK_SIZE,
        });
    };
    let mut plaintext = body.to_vec();
    apply_keystream(key, iv, &mut plaintext, Direction::Decrypt)?;
    Ok(plaintext)
}

fn apply_keystream(
    key: &[u8],
    iv: &[u8],
    buf: &mut [u8],
    direction: Direction,
) -> Result<(), TokenError> {
    match key.len() {
        16 => cfb::<aes::Aes128>(key, iv, buf, direction),
        24 => cfb::<aes::Aes192>(key, iv, buf, direction),
        32 => cfb::<aes::Aes256>(key, iv, buf, direction),
        actual => Err(TokenError::InvalidKeyLength { actual }),
    }
}

fn cfb<C>(key: &[u8], iv: &[u8], buf: &mut [u8], direction: Direction) -> Result<(), TokenError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let bad_len = |_| TokenError::InvalidKeyLength { actual: key.len() };
    match direction {
        Direction::Encrypt => cfb_mode::Encryptor::<C>::new_from_slices(key, iv)
            .map_err(bad_len)?
            .encrypt(buf),
        Direction::Decrypt => cfb_mode::Decryptor::<C>::new_from_slices(key, iv)
            .map_err(bad_len)?
            .decrypt(buf),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::keys::MissingKeyPolicy;
    use proptest::prelude::*;

    const TEST_KEY: &[u8; 16] = b"0123456789012345";

    fn test_codec() -> TokenCodec {
        TokenCodec::new(Arc::new(KeyManager::from_key(TEST_KEY).unwrap()))
    }

    #[test]
    fn encode_decode_roundtrip() {
        let codec = test_codec();
        let token = codec.encode(b"hello cookie").unwrap();
        assert_eq!(codec.decode(&token).unwrap(), b"hello cookie");
    }

    #[test]
    fn roundtrip_every_key_size() {
        for len in crate::keys::VALID_KEY_LENS {
            let key = vec![0x5Au8; len];
            let token = seal(&key, b"payload").unwrap();
            assert_eq!(open(&key, &token).unwrap(), b"payload");
        }
    }

    #[test]
    fn empty_payload_is_just_an_iv() {
        let token = seal(TEST_KEY, b"").unwrap();
        assert_eq!(STANDARD.decode(&token).unwrap().len(), BLOCK_SIZE);
        assert!(open(TEST_KEY, &token).unwrap().is_empty());
    }

    #[test]
    fn ciphertext_length_equals_plaintext_length() {
        let raw = [9u8; 37];
        let token = seal(TEST_KEY, &raw).unwrap();
        assert_eq!(STANDARD.decode(&token).unwrap().len(), BLOCK_SIZE + raw.len());
    }

    #[test]
    fn same_payload_encodes_differently() {
        let codec = test_codec();
        let a = codec.encode(b"same").unwrap();
        let b = codec.encode(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn ivs_never_repeat() {
        let mut ivs = std::collections::HashSet::new();
        for _ in 0..1000 {
            let token = seal(TEST_KEY, b"x").unwrap();
            let bytes = STANDARD.decode(&token).unwrap();
            assert!(ivs.insert(bytes[..BLOCK_SIZE].to_vec()), "IV reused");
        }
    }

    #[test]
    fn malformed_base64_is_rejected() {
        let codec = test_codec();
        assert!(matches!(
            codec.decode("not-base64!!"),
            Err(TokenError::Base64Decode(_))
        ));
    }

    #[test]
    fn short_token_is_rejected() {
        let codec = test_codec();
        let short = STANDARD.encode(b"short");
        assert!(matches!(
            codec.decode(&short),
            Err(TokenError::CiphertextTooShort { actual: 5, min: BLOCK_SIZE })
        ));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(
            open(TEST_KEY, ""),
            Err(TokenError::CiphertextTooShort { actual: 0, .. })
        ));
    }

    #[test]
    fn seal_rejects_bad_key_length() {
        assert!(matches!(
            seal(&[0u8; 15], b"x"),
            Err(TokenError::InvalidKeyLength { actual: 15 })
        ));
    }

    #[test]
    fn wrong_key_yields_garbage_not_error() {
        let token = seal(TEST_KEY, b"confidential").unwrap();
        let other = open(b"5432109876543210", &token).unwrap();
        assert_eq!(other.len(), b"confidential".len());
        assert_ne!(other, b"confidential");
    }

    #[test]
    fn encode_fails_closed_without_key() {
        let codec = TokenCodec::new(Arc::new(KeyManager::new(MissingKeyPolicy::FailClosed)));
        assert!(matches!(codec.encode(b"x"), Err(TokenError::KeyNotConfigured)));
    }

    #[test]
    fn pad_is_random_and_stripped() {
        let a = with_random_pad(b"abc").unwrap();
        let b = with_random_pad(b"abc").unwrap();
        assert_eq!(a.len(), PAD_LEN + 3);
        assert_ne!(a[..PAD_LEN], b[..PAD_LEN]);
        assert_eq!(strip_pad(&a).unwrap(), b"abc");
        assert!(matches!(strip_pad(&[0u8; 7]), Err(TokenError::Deserialize(_))));
        assert!(strip_pad(&[0u8; PAD_LEN]).unwrap().is_empty());
    }

    #[test]
    fn decode_with_any_falls_back_to_older_key() {
        let codec = test_codec();
        let old_id = codec.keys().get().unwrap().id();
        let token = codec.encode(b"marker").unwrap();
        codec.keys().rotate().unwrap();

        let decoded = codec
            .decode_with_any(&token, |plain| {
                if plain == b"marker" {
                    Ok(plain.to_vec())
                } else {
                    Err(TokenError::InvalidToken)
                }
            })
            .unwrap();
        assert_eq!(decoded.value, b"marker");
        assert_eq!(decoded.key_id, old_id);
        assert!(!decoded.newest);
    }

    #[test]
    fn decode_with_any_returns_last_rejection() {
        let codec = test_codec();
        let token = codec.encode(b"marker").unwrap();
        let result: Result<Decoded<()>, _> = codec
            .decode_with_any(&token, |_| Err(TokenError::Deserialize("nope".into())));
        assert!(matches!(result, Err(TokenError::Deserialize(_))));
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary_payloads(
            key_len in prop::sample::select(crate::keys::VALID_KEY_LENS.to_vec()),
            key_byte in any::<u8>(),
            payload in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let key = vec![key_byte; key_len];
            let token = seal(&key, &payload).unwrap();
            prop_assert_eq!(open(&key, &token).unwrap(), payload);
        }

        #[test]
        fn arbitrary_text_never_panics(token in ".{0,128}") {
            let _ = open(TEST_KEY, &token);
        }
    }
}
