//! Realtime Channel - Authenticated push notifications over a STOMP-style broker.
//!
//! This library keeps one authenticated broker connection alive for the
//! lifetime of a user session and routes pushed messages to application
//! handlers.
//!
//! # Architecture
//!
//! The channel follows a single-owner model:
//!
//! - **Supervisor**: One driver task owns the transport, the protocol state
//!   and the retry timer
//! - **Handles**: [`RealtimeChannel`] clones only enqueue commands and read
//!   shared state
//!
//! Key design principles:
//!
//! - At most one live connection per channel, tagged with a generation
//! - Events from superseded attempts are discarded
//! - Every active subscription is replayed after each connect
//! - A handler never runs after its unsubscribe returns
//!
//! # Quick Start
//!
//! ```no_run
//! use realtime_channel::{CredentialEvent, Message, RealtimeChannel, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let channel = RealtimeChannel::builder()
//!         .endpoint("wss://tracker.example.com/ws")
//!         .alert_sink(|summary: &str| println!("alert: {summary}"))
//!         .cache_invalidator(|tag: &str| println!("stale: {tag}"))
//!         .build()?;
//!
//!     // Subscriptions survive reconnects and credential rotation
//!     channel.subscribe("/topic/project.42", |message: &Message| {
//!         println!("update on {}", message.destination);
//!     })?;
//!
//!     // Connecting is driven by the credential lifecycle
//!     channel.handle_credential(CredentialEvent::Issued("token".into()))?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channel`] | Supervisor, registry, dispatch and credential bridge |
//! | [`client`] | [`RealtimeChannel`] handle and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Broker frame codec and message types |
//! | [`transport`] | Frame transport and WebSocket connector |
//!
//! # Features
//!
//! - **Credential-driven**: Connects on issue, reconnects on rotation, stops on sign-out
//! - **Resilient**: Capped exponential backoff and heart-beat liveness
//! - **Pluggable transport**: Any [`Connector`] can carry frames

// ============================================================================
// Modules
// ============================================================================

/// Connection lifecycle, subscriptions and routing.
///
/// - [`ConnectionState`] - Observable connection state
/// - [`CredentialEvent`] - Credential lifecycle input
/// - [`SubscriptionHandle`] - Token returned by subscribe
pub mod channel;

/// Channel handle and configuration.
///
/// Use [`RealtimeChannel::builder()`] to create a configured channel.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Broker protocol frames and messages.
pub mod protocol;

/// Frame transport.
///
/// Carries text frames between the supervisor and the broker.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channel::{
    AlertSink, BackoffPolicy, CacheInvalidator, ConnectionState, Credential, CredentialEvent,
    Handler, NOTIFICATIONS_TAG, NoopSink, SubscriptionHandle,
};

// Client types
pub use client::{ChannelBuilder, ChannelOptions, DEFAULT_PERSONAL_DESTINATION, RealtimeChannel};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Generation, SubscriptionId};

// Protocol types
pub use protocol::{Frame, FrameCommand, HeartBeat, Message, Notification};

// Transport types
pub use transport::{Connector, FallbackConnector, FrameLink, FrameSink, TransportEvent, WebSocketConnector};
