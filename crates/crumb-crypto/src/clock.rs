//! Time source abstraction.
//!
//! Token validity depends on wall-clock seconds, so every component that
//! stamps or checks a timestamp takes a [`Clock`] instead of calling
//! `SystemTime::now()` directly. Tests drive a [`ManualClock`].

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current unix time in whole seconds.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Real time source backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        #[allow(clippy::cast_possible_wrap)]
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        secs
    }
}

/// Settable clock for tests and simulations.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct ManualClock {
    now: std::sync::atomic::AtomicI64,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    pub const fn new(now: i64) -> Self {
        Self {
            now: std::sync::atomic::AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}
