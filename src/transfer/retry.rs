//! Bounded retry for transient gateway failures.

use std::time::Duration;

/// Statuses a gateway returns while the origin is briefly unavailable.
const TRANSIENT_STATUSES: [u16; 2] = [502, 504];

/// How many times a request is sent and how long to wait in between.
///
/// `max_attempts` counts every request, the first one included. The wait
/// before attempt `n + 1` is `n * delay_unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay_unit: Duration) -> Self {
        Self {
            max_attempts,
            delay_unit,
        }
    }

    /// A policy that sends each request once.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Effective attempt budget; a request is always sent at least once.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_unit.saturating_mul(attempt)
    }
}

/// Returns true for statuses worth retrying.
pub fn is_transient(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}
