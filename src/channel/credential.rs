//! Credential bridge.
//!
//! Turns the external credential lifecycle into supervisor commands, one per
//! event, dropping identical events that arrive in quick succession.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::supervisor::SupervisorHandle;

// ============================================================================
// Credential
// ============================================================================

/// Opaque bearer token.
///
/// `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Wraps a token.
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

// ============================================================================
// CredentialEvent
// ============================================================================

/// Change in the session credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    /// First credential of a session.
    Issued(Credential),
    /// Credential rotated.
    Refreshed(Credential),
    /// Credential no longer valid.
    Expired,
    /// Session ended.
    Cleared,
}

impl CredentialEvent {
    /// Returns the event kind for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Issued(_) => "issued",
            Self::Refreshed(_) => "refreshed",
            Self::Expired => "expired",
            Self::Cleared => "cleared",
        }
    }
}

// ============================================================================
// CredentialBridge
// ============================================================================

/// Forwards credential events to the supervisor.
#[derive(Debug)]
pub(crate) struct CredentialBridge {
    handle: SupervisorHandle,
    window: Duration,
    last: Option<(CredentialEvent, Instant)>,
}

impl CredentialBridge {
    pub(crate) fn new(handle: SupervisorHandle, window: Duration) -> Self {
        Self {
            handle,
            window,
            last: None,
        }
    }

    /// Returns `false` if `event` repeats the previous one within the window.
    pub(crate) fn accept(&mut self, event: &CredentialEvent, now: Instant) -> bool {
        if let Some((previous, at)) = &self.last
            && previous == event
            && now.saturating_duration_since(*at) < self.window
        {
            return false;
        }

        self.last = Some((event.clone(), now));
        true
    }

    /// Consumes `events` until the source or the supervisor goes away.
    pub(crate) fn spawn(mut self, mut events: mpsc::UnboundedReceiver<CredentialEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = events.recv() => event,
                    () = self.handle.closed() => None,
                };

                let Some(event) = event else {
                    break;
                };

                if !self.accept(&event, Instant::now()) {
                    trace!(kind = event.kind(), "Dropping duplicate credential event");
                    continue;
                }

                debug!(kind = event.kind(), "Credential event");
                if self.handle.apply(event).is_err() {
                    break;
                }
            }

            debug!("Credential bridge stopped");
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
