//! Periodic cookie key rotation.
//!
//! Each tick installs a fresh key in front of the ring and retires keys past
//! the retention window. Tokens still on an older key keep verifying until
//! that key is retired; callers re-issue them when
//! [`ResolvedLogin::needs_reissue`](crate::service::ResolvedLogin::needs_reissue)
//! reports it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::error::TokenError;
use crate::keys::KeyManager;
use crate::window::DEFAULT_LOGIN_MAX_AGE;

/// How often keys rotate and how long retired keys stay usable for decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSchedule {
    pub interval: Duration,
    /// Should be at least the login token lifetime, or live sessions are
    /// dropped when their key is retired.
    pub retention: Duration,
}

impl Default for RotationSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            retention: DEFAULT_LOGIN_MAX_AGE,
        }
    }
}

/// Result of one rotation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationOutcome {
    pub new_key_id: u32,
    pub retired: usize,
}

/// Rotate once, then retire keys older than the retention window.
pub fn rotate_and_retire(
    keys: &KeyManager,
    schedule: &RotationSchedule,
) -> Result<RotationOutcome, TokenError> {
    let new_key_id = keys.rotate()?;
    let retired = keys.retire_older_than(schedule.retention);
    Ok(RotationOutcome {
        new_key_id,
        retired,
    })
}

/// Spawn a background task rotating keys every `schedule.interval` until
/// `shutdown` changes.
pub fn spawn_key_rotation(
    keys: Arc<KeyManager>,
    schedule: RotationSchedule,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = schedule.interval.as_secs(),
            retention_secs = schedule.retention.as_secs(),
            "Cookie key rotation started"
        );

        let mut timer = tokio::time::interval(schedule.interval);
        // Skip the first immediate tick; the current key is fresh at startup.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match rotate_and_retire(&keys, &schedule) {
                        Ok(outcome) => info!(
                            key_id = outcome.new_key_id,
                            retired = outcome.retired,
                            "Cookie key rotated"
                        ),
                        Err(e) => error!(error = %e, "Cookie key rotation failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Cookie key rotation shutting down");
                    return;
                }
            }
        }
    })
}
