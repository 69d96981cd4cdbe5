//! Frame transport layer.
//!
//! A transport moves encoded frames between the client and the broker. It is
//! a replaceable leaf behind a minimal contract:
//!
//! | Operation | Rust shape |
//! |-----------|------------|
//! | connect | [`Connector::open`] |
//! | send | [`FrameLink::send`] |
//! | onMessage | [`FrameSink::deliver`] with [`TransportEvent`] |
//! | close | [`FrameLink::close`] |
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   FrameLink (commands)   ┌──────────────────┐
//! │  Supervisor      │─────────────────────────►│  Transport task  │◄──► Broker
//! │  (driver loop)   │◄─────────────────────────│  (one per link)  │
//! └──────────────────┘   FrameSink (events)     └──────────────────┘
//! ```
//!
//! Each link owns its own I/O task. The sink is tagged by the supervisor with
//! the generation of the attempt that opened it, so events from a link the
//! supervisor already abandoned are recognized and dropped.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket transport and event loop |
//! | `fallback` | Ordered fallback across transport variants |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket transport and event loop.
pub mod connection;

/// Ordered fallback across transport variants.
pub mod fallback;

/// In-memory transport for tests.
#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::WebSocketConnector;
pub use fallback::FallbackConnector;

// ============================================================================
// TransportEvent
// ============================================================================

/// Event reported by a transport to its sink.
#[derive(Debug)]
pub enum TransportEvent {
    /// A text message arrived. May hold several frames or a partial one.
    Text(String),
    /// The remote end closed the link.
    Closed {
        /// Close reason, if the remote sent one.
        reason: Option<String>,
    },
    /// The link failed.
    Failed(Error),
}

// ============================================================================
// FrameSink
// ============================================================================

/// Callback receiving everything a transport observes.
#[derive(Clone)]
pub struct FrameSink {
    deliver: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl FrameSink {
    /// Creates a sink from a callback.
    pub fn new(deliver: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Delivers an event.
    #[inline]
    pub fn deliver(&self, event: TransportEvent) {
        (self.deliver)(event);
    }
}

impl fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSink").finish_non_exhaustive()
    }
}

// ============================================================================
// FrameLink
// ============================================================================

/// Command sent from a [`FrameLink`] to its transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Send an encoded frame or heart-beat.
    Send(String),
    /// Close the link.
    Close,
}

/// Outbound half of an open transport.
///
/// Sending never blocks. Dropping the link closes it.
#[derive(Debug)]
pub struct FrameLink {
    tx: mpsc::UnboundedSender<LinkCommand>,
    closed: Arc<AtomicBool>,
}

/// Transport-side end of a [`FrameLink`].
#[derive(Debug)]
pub struct LinkReceiver {
    rx: mpsc::UnboundedReceiver<LinkCommand>,
    closed: Arc<AtomicBool>,
}

impl FrameLink {
    /// Creates a link and the receiver its transport task drains.
    #[must_use]
    pub fn channel() -> (Self, LinkReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                tx,
                closed: Arc::clone(&closed),
            },
            LinkReceiver { rx, closed },
        )
    }

    /// Queues text for the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the link was closed or its
    /// transport task has exited.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.tx
            .send(LinkCommand::Send(text.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the link. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(LinkCommand::Close);
        }
    }

    /// Returns `true` once the link was closed locally or its task exited.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

impl Drop for FrameLink {
    fn drop(&mut self) {
        self.close();
    }
}

impl LinkReceiver {
    /// Receives the next command. `None` once the link is dropped.
    pub async fn recv(&mut self) -> Option<LinkCommand> {
        self.rx.recv().await
    }

    /// Returns `true` once the owning link was closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens transports to the broker endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a link to `endpoint`. Everything received on it goes to `sink`.
    async fn open(&self, endpoint: &Url, sink: FrameSink) -> Result<FrameLink>;

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "transport"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_send_and_close() {
        let (link, mut rx) = FrameLink::channel();
        link.send("CONNECT").expect("send");
        assert_eq!(rx.recv().await, Some(LinkCommand::Send("CONNECT".into())));

        link.close();
        link.close();
        assert!(link.is_closed());
        assert!(rx.is_closed());
        assert_eq!(rx.recv().await, Some(LinkCommand::Close));
        assert!(matches!(link.send("x"), Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_drop_closes_link() {
        let (link, mut rx) = FrameLink::channel();
        drop(link);
        assert!(rx.is_closed());
        assert_eq!(rx.recv().await, Some(LinkCommand::Close));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (link, rx) = FrameLink::channel();
        drop(rx);
        assert!(link.is_closed());
        assert!(link.send("x").is_err());
    }

    #[test]
    fn test_sink_delivers() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = FrameSink::new(move |event| {
            if let TransportEvent::Text(text) = event {
                seen_clone.lock().push(text);
            }
        });
        sink.deliver(TransportEvent::Text("a".into()));
        sink.clone().deliver(TransportEvent::Text("b".into()));
        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
    }
}
