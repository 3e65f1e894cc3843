//! Cookie key management.
//!
//! A [`KeyManager`] owns an ordered key ring (newest first). Tokens are always
//! encrypted under the newest key; decoding may fall back to older keys until
//! they are retired. The manager is an ordinary value injected into whatever
//! issues tokens, so tests and independent key domains never share state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::clock::{Clock, SystemClock};
use crate::error::TokenError;

/// Length of keys produced by [`KeyManager::generate`] (AES-128).
pub const GENERATED_KEY_LEN: usize = 16;

/// Key lengths accepted by [`KeyManager::set`], selecting AES-128/192/256.
pub const VALID_KEY_LENS: [usize; 3] = [16, 24, 32];

/// What [`KeyManager::get`] does when no key has been installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingKeyPolicy {
    /// Generate a process-lifetime key on first use. Every token issued under
    /// it becomes unverifiable after a restart; suitable for development only.
    #[default]
    GenerateEphemeral,
    /// Refuse to issue or verify tokens until a key is configured.
    FailClosed,
}

/// One installed key.
pub struct KeyEntry {
    id: u32,
    key: Zeroizing<Vec<u8>>,
    created_at: i64,
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("id", &self.id)
            .field("len", &self.key.len())
            .field("created_at", &self.created_at)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl KeyEntry {
    /// Identifier unique within the owning manager.
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Raw key bytes. Handle with care.
    pub fn bytes(&self) -> &[u8] {
        &self.key
    }

    /// Unix seconds at which the key was installed.
    pub const fn created_at(&self) -> i64 {
        self.created_at
    }
}

#[derive(Default)]
struct Ring {
    entries: Vec<Arc<KeyEntry>>,
    next_id: u32,
}

impl Ring {
    fn push_front(&mut self, key: Zeroizing<Vec<u8>>, created_at: i64) -> Arc<KeyEntry> {
        let entry = Arc::new(KeyEntry {
            id: self.next_id,
            key,
            created_at,
        });
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.insert(0, Arc::clone(&entry));
        entry
    }
}

/// Thread-safe owner of the cookie key ring.
pub struct KeyManager {
    ring: RwLock<Ring>,
    policy: MissingKeyPolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("keys", &self.ring.read().entries.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new(MissingKeyPolicy::default())
    }
}

impl KeyManager {
    /// Create an empty manager using the system clock.
    pub fn new(policy: MissingKeyPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Create an empty manager stamping keys with the given clock.
    pub fn with_clock(policy: MissingKeyPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            ring: RwLock::new(Ring::default()),
            policy,
            clock,
        }
    }

    /// Create a fail-closed manager holding `key`.
    pub fn from_key(key: &[u8]) -> Result<Self, TokenError> {
        let manager = Self::new(MissingKeyPolicy::FailClosed);
        manager.set(key)?;
        Ok(manager)
    }

    pub const fn policy(&self) -> MissingKeyPolicy {
        self.policy
    }

    /// The clock used for key timestamps, shared with token schemas.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Generate a fresh random key and make it the only key.
    pub fn generate(&self) -> Result<Vec<u8>, TokenError> {
        let key = random_key()?;
        let out = key.to_vec();
        let entry = self.replace(key);
        info!(key_id = entry.id, "Generated new cookie key");
        Ok(out)
    }

    /// Replace the whole ring with `key`.
    pub fn set(&self, key: &[u8]) -> Result<(), TokenError> {
        validate_key_len(key.len())?;
        let entry = self.replace(Zeroizing::new(key.to_vec()));
        info!(key_id = entry.id, key_len = key.len(), "Cookie key installed");
        Ok(())
    }

    /// Return the newest key, applying the [`MissingKeyPolicy`] if there is none.
    pub fn get(&self) -> Result<Arc<KeyEntry>, TokenError> {
        let current = self.ring.read().entries.first().cloned();
        if let Some(entry) = current {
            return Ok(entry);
        }
        if self.policy == MissingKeyPolicy::FailClosed {
            return Err(TokenError::KeyNotConfigured);
        }

        let key = random_key()?;
        let mut ring = self.ring.write();
        // Another caller may have installed a key while we were unlocked.
        if let Some(entry) = ring.entries.first() {
            return Ok(Arc::clone(entry));
        }
        let entry = ring.push_front(key, self.clock.now_unix());
        warn!(
            key_id = entry.id,
            "No cookie key configured; generated an ephemeral key. \
             Tokens issued under it will not verify after a restart"
        );
        Ok(entry)
    }

    /// Snapshot of every installed key, newest first.
    ///
    /// Applies the [`MissingKeyPolicy`] when the ring is empty.
    pub fn ring(&self) -> Result<Vec<Arc<KeyEntry>>, TokenError> {
        let snapshot = self.ring.read().entries.clone();
        if snapshot.is_empty() {
            return self.get().map(|entry| vec![entry]);
        }
        Ok(snapshot)
    }

    /// Generate a new key in front of the ring, keeping older keys for decoding.
    pub fn rotate(&self) -> Result<u32, TokenError> {
        let key = random_key()?;
        let id = self.push(key);
        info!(key_id = id, "Rotated cookie key");
        Ok(id)
    }

    /// Install `key` in front of the ring, keeping older keys for decoding.
    pub fn install(&self, key: &[u8]) -> Result<u32, TokenError> {
        validate_key_len(key.len())?;
        let id = self.push(Zeroizing::new(key.to_vec()));
        info!(key_id = id, key_len = key.len(), "Cookie key added to ring");
        Ok(id)
    }

    /// Drop every key except the newest that was created more than
    /// `retention` ago. Returns the number of keys removed.
    pub fn retire_older_than(&self, retention: Duration) -> usize {
        let retention = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);
        let cutoff = self.clock.now_unix().saturating_sub(retention);

        let mut ring = self.ring.write();
        let before = ring.entries.len();
        let mut position = 0usize;
        ring.entries.retain(|entry| {
            let keep = position == 0 || entry.created_at >= cutoff;
            position += 1;
            keep
        });
        let removed = before - ring.entries.len();
        drop(ring);

        if removed > 0 {
            info!(removed, cutoff, "Retired old cookie keys");
        }
        removed
    }

    /// Number of installed keys.
    pub fn len(&self) -> usize {
        self.ring.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.read().entries.is_empty()
    }

    fn replace(&self, key: Zeroizing<Vec<u8>>) -> Arc<KeyEntry> {
        let now = self.clock.now_unix();
        let mut ring = self.ring.write();
        ring.entries.clear();
        ring.push_front(key, now)
    }

    fn push(&self, key: Zeroizing<Vec<u8>>) -> u32 {
        let now = self.clock.now_unix();
        self.ring.write().push_front(key, now).id
    }
}

/// Check that `len` selects a supported AES variant.
pub fn validate_key_len(len: usize) -> Result<(), TokenError> {
    match len {
        16 | 24 | 32 => Ok(()),
        actual => Err(TokenError::InvalidKeyLength { actual }),
    }
}

/// Fill `buf` from the operating system's secure random source.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<(), TokenError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| TokenError::EntropyUnavailable(e.to_string()))
}

fn random_key() -> Result<Zeroizing<Vec<u8>>, TokenError> {
    let mut key = Zeroizing::new(vec![0u8; GENERATED_KEY_LEN]);
    fill_random(&mut key)?;
    Ok(key)
}
