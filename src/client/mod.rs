//! Application-facing channel handle.
//!
//! This module provides the entry point for realtime messaging.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RealtimeChannel`] | Subscribe, publish and observe the connection |
//! | [`ChannelBuilder`] | Fluent configuration builder |
//! | [`ChannelOptions`] | Heart-beat, timeout and backoff tunables |
//!
//! # Example
//!
//! ```no_run
//! use realtime_channel::{ConnectionState, CredentialEvent, Message, RealtimeChannel, Result};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<()> {
//! let channel = RealtimeChannel::builder()
//!     .endpoint("wss://tracker.example.com/ws")
//!     .build()?;
//!
//! channel.subscribe("/topic/project.42", |message: &Message| {
//!     println!("{}", message.destination);
//! })?;
//!
//! channel.handle_credential(CredentialEvent::Issued("token".into()))?;
//! channel
//!     .wait_for_state(ConnectionState::Connected, Duration::from_secs(10))
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for channel configuration.
pub mod builder;

/// Core channel implementation.
pub mod core;

/// Channel options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ChannelBuilder;
pub use core::RealtimeChannel;
pub use options::{ChannelOptions, DEFAULT_PERSONAL_DESTINATION, MAX_INTERVAL};
