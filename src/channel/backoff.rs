//! Capped exponential reconnect backoff.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// First retry delay.
const DEFAULT_INITIAL: Duration = Duration::from_secs(1);

/// Longest retry delay.
const DEFAULT_MAX: Duration = Duration::from_secs(30);

/// Growth factor between retries.
const DEFAULT_MULTIPLIER: u32 = 2;

// ============================================================================
// BackoffPolicy
// ============================================================================

/// Retry delay configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Factor applied after each failed retry.
    pub multiplier: u32,
}

impl BackoffPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        Self {
            initial,
            max,
            multiplier,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL, DEFAULT_MAX, DEFAULT_MULTIPLIER)
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Running backoff state for one channel.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: BackoffPolicy,
    current: Option<Duration>,
}

impl Backoff {
    pub(crate) const fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    /// Returns the delay for the next retry and advances.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.policy.initial,
            Some(previous) => previous.saturating_mul(self.policy.multiplier.max(1)),
        }
        .min(self.policy.max);

        self.current = Some(delay);
        delay
    }

    /// Forgets past failures.
    #[inline]
    pub(crate) fn reset(&mut self) {
        self.current = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
