//! Dispatch router.
//!
//! Routes decoded messages to their subscription handler. Messages on the
//! personal notifications destination also drive the alerting sink and the
//! cache invalidator.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::protocol::{Message, Notification};

use super::registry::{Delivery, SharedRegistry};

// ============================================================================
// Constants
// ============================================================================

/// Cache tag invalidated for every personal notification.
pub const NOTIFICATIONS_TAG: &str = "notifications";

// ============================================================================
// Sinks
// ============================================================================

/// Receives a human-readable summary of each personal notification.
pub trait AlertSink: Send + Sync + 'static {
    /// Shows `summary` to the user.
    fn alert(&self, summary: &str);
}

/// Receives domain tags whose cached data became stale.
pub trait CacheInvalidator: Send + Sync + 'static {
    /// Marks everything tagged `tag` as stale.
    fn invalidate(&self, tag: &str);
}

impl<F> AlertSink for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn alert(&self, summary: &str) {
        self(summary);
    }
}

impl<F> CacheInvalidator for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn invalidate(&self, tag: &str) {
        self(tag);
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl AlertSink for NoopSink {
    fn alert(&self, _summary: &str) {}
}

impl CacheInvalidator for NoopSink {
    fn invalidate(&self, _tag: &str) {}
}

// ============================================================================
// DispatchOutcome
// ============================================================================

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct DispatchOutcome {
    /// An application handler ran.
    pub(crate) delivered: bool,
    /// The alerting sink and cache invalidator were driven.
    pub(crate) notified: bool,
}

// ============================================================================
// DispatchRouter
// ============================================================================

/// Routes messages to handlers and sinks.
pub(crate) struct DispatchRouter {
    registry: SharedRegistry,
    personal: String,
    alerts: Arc<dyn AlertSink>,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl DispatchRouter {
    pub(crate) fn new(
        registry: SharedRegistry,
        personal: impl Into<String>,
        alerts: Arc<dyn AlertSink>,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            registry,
            personal: personal.into(),
            alerts,
            invalidator,
        }
    }

    /// Dispatches one message.
    pub(crate) fn dispatch(&self, message: &Message) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        if message.destination == self.personal {
            outcome.notified = self.notify(message);
        }

        // Registry lock is released before the handler runs.
        let slot = self.registry.lock().slot(&message.destination);
        match slot {
            Some(slot) => {
                outcome.delivered = slot.deliver(message) == Delivery::Delivered;
            }
            None if !outcome.notified => {
                trace!(destination = %message.destination, "No handler for destination");
            }
            None => {}
        }

        outcome
    }

    /// Decodes a personal notification and drives both sinks.
    fn notify(&self, message: &Message) -> bool {
        let notification = match Notification::from_message(message) {
            Ok(n) => n,
            Err(e) => {
                warn!(destination = %message.destination, error = %e, "Dropping malformed notification");
                return false;
            }
        };

        debug!(id = ?notification.id, kind = ?notification.kind, "Notification received");

        let summary = notification.summary();
        let alerted = catch_unwind(AssertUnwindSafe(|| self.alerts.alert(&summary))).is_ok();
        if !alerted {
            error!("Alert sink panicked");
        }

        let invalidated = catch_unwind(AssertUnwindSafe(|| {
            self.invalidator.invalidate(NOTIFICATIONS_TAG);
        }))
        .is_ok();
        if !invalidated {
            error!("Cache invalidator panicked");
        }

        alerted && invalidated
    }
}

impl fmt::Debug for DispatchRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRouter")
            .field("personal", &self.personal)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
