//! Type-safe identifiers for channel entities.
//!
//! Newtype wrappers keep connection generations and wire subscription ids
//! from being mixed up with plain integers.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Generation`] | Tags one connection attempt; stale callbacks are discarded |
//! | [`SubscriptionId`] | Wire-level `id` header of a SUBSCRIBE frame |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Generation
// ============================================================================

/// Monotonically increasing tag of a connection attempt.
///
/// Every asynchronous completion (transport opened, frame received, link
/// closed) carries the generation it was started under. The supervisor
/// compares it against its current generation and ignores anything older.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    /// The generation before any attempt was made.
    pub const ZERO: Self = Self(0);

    /// Creates a generation from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the next generation, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Process-wide counter for subscription ids.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Wire-level subscription identifier.
///
/// Rendered as `sub-<n>` in SUBSCRIBE / UNSUBSCRIBE frames. A fresh id is
/// allocated whenever a destination becomes active, so a handle from an
/// earlier incarnation of the same destination never matches the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocates the next subscription id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Reserved id for the personal notifications subscription.
    #[inline]
    #[must_use]
    pub const fn personal() -> Self {
        Self(0)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the value used in the frame `id` header.
    #[must_use]
    pub fn wire_id(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
