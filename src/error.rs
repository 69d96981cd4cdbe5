//! Error types for the realtime channel.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use realtime_channel::{Error, RealtimeChannel, Result};
//!
//! fn announce(channel: &RealtimeChannel) -> Result<()> {
//!     channel.publish("/app/presence", "online")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::HeartbeatTimeout`] |
//! | Protocol | [`Error::Protocol`], [`Error::BrokerError`], [`Error::AuthenticationRejected`] |
//! | Application | [`Error::Payload`], [`Error::HandlerPanicked`], [`Error::NotConnected`] |
//! | Fatal | [`Error::GenerationExhausted`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Transport and protocol errors never reach application code directly;
/// the supervisor logs them and decides whether to retry. Application code
/// sees configuration errors and [`Error::NotConnected`].
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when channel configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt or handshake did not finish in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Transport closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No inbound traffic within the negotiated heart-beat window.
    #[error("No heartbeat received for {elapsed_ms}ms")]
    HeartbeatTimeout {
        /// Milliseconds since the last inbound frame.
        elapsed_ms: u64,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed frame or protocol violation.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Broker sent an ERROR frame.
    #[error("Broker error: {message}")]
    BrokerError {
        /// Message reported by the broker.
        message: String,
    },

    /// Broker rejected the bearer credential.
    ///
    /// The channel waits for a new credential instead of retrying.
    #[error("Authentication rejected: {message}")]
    AuthenticationRejected {
        /// Message reported by the broker.
        message: String,
    },

    // ========================================================================
    // Application Errors
    // ========================================================================
    /// Message payload could not be decoded.
    #[error("Malformed payload on {destination}: {message}")]
    Payload {
        /// Destination the message arrived on.
        destination: String,
        /// Description of the decoding failure.
        message: String,
    },

    /// A subscription handler panicked.
    #[error("Handler for {destination} panicked")]
    HandlerPanicked {
        /// Destination whose handler panicked.
        destination: String,
    },

    /// Operation requires a ready connection.
    #[error("Channel is not connected")]
    NotConnected,

    // ========================================================================
    // Fatal Errors
    // ========================================================================
    /// Generation counter overflowed.
    ///
    /// Triggers a full rebuild of the supervisor's attempt state.
    #[error("Connection generation counter exhausted")]
    GenerationExhausted,

    /// Supervisor task is gone.
    #[error("Channel closed")]
    ChannelClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Endpoint URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a heartbeat timeout error.
    #[inline]
    pub fn heartbeat_timeout(elapsed_ms: u64) -> Self {
        Self::HeartbeatTimeout { elapsed_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a broker error.
    #[inline]
    pub fn broker(message: impl Into<String>) -> Self {
        Self::BrokerError {
            message: message.into(),
        }
    }

    /// Creates an authentication rejection.
    #[inline]
    pub fn authentication_rejected(message: impl Into<String>) -> Self {
        Self::AuthenticationRejected {
            message: message.into(),
        }
    }

    /// Creates a payload error.
    #[inline]
    pub fn payload(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Payload {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Creates a handler panic error.
    #[inline]
    pub fn handler_panicked(destination: impl Into<String>) -> Self {
        Self::HandlerPanicked {
            destination: destination.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::HeartbeatTimeout { .. }
        )
    }

    /// Returns `true` if this is a transport-level error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::HeartbeatTimeout { .. }
                | Self::WebSocket(_)
                | Self::Io(_)
        )
    }

    /// Returns `true` if the broker rejected the credential.
    #[inline]
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationRejected { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors are retried with backoff using the last known
    /// credential.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_connection_error()
            || matches!(self, Self::Protocol { .. } | Self::BrokerError { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
