//! Crumb token library
//!
//! Stateless, symmetric-key tokens for web sessions. Nothing is stored
//! server-side: a token is valid while it decrypts under a key in the ring
//! and its embedded timestamp is inside the allowed window.
//!
//! ## Token kinds
//!
//! - **Login token**: session cookie carrying `{issued_at, subject_id}` as CBOR
//! - **Nonce**: CSRF token carrying only a varint issue time
//!
//! ## Crypto primitives
//!
//! - **Encryption**: AES-128/192/256 in CFB mode, 16-byte random IV per token
//! - **Pad**: 8 random bytes before every payload
//! - **Encoding**: standard base64 of `IV || ciphertext`
//!
//! The scheme provides confidentiality but no integrity tag: a flipped
//! ciphertext bit flips the same plaintext bit. Structured parsing rejects
//! most corrupted tokens, not all of them.

pub mod clock;
pub mod codec;
pub mod error;
pub mod keys;
pub mod login;
pub mod nonce;
pub mod rotation;
pub mod service;
pub mod window;

#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use codec::{BLOCK_SIZE, Decoded, PAD_LEN, TokenCodec};
pub use error::TokenError;
pub use keys::{KeyEntry, KeyManager, MissingKeyPolicy};
pub use login::LoginClaims;
pub use rotation::{RotationSchedule, rotate_and_retire, spawn_key_rotation};
pub use service::{ResolvedLogin, TokenPolicy, TokenService};
pub use window::{DEFAULT_LOGIN_MAX_AGE, DEFAULT_NONCE_MAX_AGE, TimeWindow};
