//! Time-window validation of embedded issue timestamps.

use std::time::Duration;

use crate::error::TokenError;

/// Default lifetime of a CSRF nonce.
pub const DEFAULT_NONCE_MAX_AGE: Duration = Duration::from_secs(300);

/// Default lifetime of a login token, matching the 14-day login cookie.
pub const DEFAULT_LOGIN_MAX_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Accepts timestamps with `0 <= now - issued_at < max_age`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    max_age: i64,
}

impl TimeWindow {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age: i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub const fn from_secs(max_age: i64) -> Self {
        Self { max_age }
    }

    pub const fn max_age_secs(&self) -> i64 {
        self.max_age
    }

    pub fn check(&self, issued_at: i64, now: i64) -> Result<(), TokenError> {
        let age = now.saturating_sub(issued_at);
        if age < 0 {
            return Err(TokenError::IssuedInFuture {
                skew: age.saturating_neg(),
            });
        }
        if age >= self.max_age {
            return Err(TokenError::Expired {
                age,
                max_age: self.max_age,
            });
        }
        Ok(())
    }

    pub fn contains(&self, issued_at: i64, now: i64) -> bool {
        self.check(issued_at, now).is_ok()
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_MAX_AGE)
    }
}
