//! Connection state and readiness flag.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::debug;

// ============================================================================
// ConnectionState
// ============================================================================

/// Observable state of the channel.
///
/// ```text
/// Disconnected ──► Connecting ──► Connected
///      ▲               │   ▲          │
///      │               ▼   │          ▼
///      └──────────── Reconnecting ◄───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No credential, or the session ended.
    #[default]
    Disconnected,
    /// A transport is opening or the CONNECT handshake is in flight.
    Connecting,
    /// Handshake done and every subscription replayed.
    Connected,
    /// Waiting to retry after a failure or credential rotation.
    Reconnecting,
}

impl ConnectionState {
    /// Returns the lowercase name used in logs.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ChannelStatus
// ============================================================================

/// State shared between the supervisor and channel handles.
///
/// Only the supervisor writes; everyone else reads.
#[derive(Debug)]
pub(crate) struct ChannelStatus {
    state: watch::Sender<ConnectionState>,
    ready: AtomicBool,
}

impl ChannelStatus {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            ready: AtomicBool::new(false),
        }
    }

    /// Publishes a new state if it differs from the current one.
    pub(crate) fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "Connection state changed");
            *current = next;
            true
        });
    }

    #[inline]
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[inline]
    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    #[inline]
    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
