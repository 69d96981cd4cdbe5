//! WebSocket transport and event loop.
//!
//! [`WebSocketConnector`] dials the broker endpoint and spawns one tokio task
//! per link. The task handles:
//!
//! - Incoming text/binary messages, forwarded to the [`FrameSink`]
//! - Outgoing frames queued on the [`FrameLink`]
//! - Remote close and socket errors, reported once and then exit
//!
//! Ping/pong at the WebSocket layer is answered by tungstenite itself;
//! broker-level heart-beats travel as ordinary text.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{Connector, FrameLink, FrameSink, LinkCommand, LinkReceiver, TransportEvent};

// ============================================================================
// Types
// ============================================================================

/// Client WebSocket stream.
type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WebSocketConnector
// ============================================================================

/// Raw WebSocket transport.
///
/// The bearer credential travels in the broker CONNECT frame, not in the
/// HTTP upgrade, so the connector needs nothing but the endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Creates a WebSocket connector.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Event loop that handles WebSocket I/O for one link.
    async fn run_event_loop(ws_stream: ClientStream, mut commands: LinkReceiver, sink: FrameSink) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming messages from broker
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(len = text.len(), "Text message received");
                            sink.deliver(TransportEvent::Text(text.to_string()));
                        }

                        Some(Ok(Message::Binary(data))) => {
                            match String::from_utf8(data.to_vec()) {
                                Ok(text) => sink.deliver(TransportEvent::Text(text)),
                                Err(e) => {
                                    sink.deliver(TransportEvent::Failed(Error::protocol(format!(
                                        "Binary message is not UTF-8: {e}"
                                    ))));
                                    break;
                                }
                            }
                        }

                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string());
                            debug!(?reason, "WebSocket closed by remote");
                            sink.deliver(TransportEvent::Closed { reason });
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            sink.deliver(TransportEvent::Failed(Error::WebSocket(e)));
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            sink.deliver(TransportEvent::Closed { reason: None });
                            break;
                        }

                        // Ping/Pong/raw frames
                        _ => {}
                    }
                }

                // Commands from the supervisor
                command = commands.recv() => {
                    match command {
                        Some(LinkCommand::Send(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(error = %e, "Failed to send frame");
                                sink.deliver(TransportEvent::Failed(Error::WebSocket(e)));
                                break;
                            }
                        }

                        Some(LinkCommand::Close) | None => {
                            debug!("Closing WebSocket link");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!("WebSocket event loop terminated");
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Url, sink: FrameSink) -> Result<FrameLink> {
        debug!(endpoint = %endpoint, "Opening WebSocket");

        let (ws_stream, response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| Error::connection(format!("WebSocket connect failed: {e}")))?;

        info!(endpoint = %endpoint, status = %response.status(), "WebSocket connection established");

        let (link, commands) = FrameLink::channel();
        tokio::spawn(Self::run_event_loop(ws_stream, commands, sink));

        Ok(link)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

// ============================================================================
// Tests
// ============================================================================
