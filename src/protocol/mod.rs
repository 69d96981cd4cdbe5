//! Broker protocol types.
//!
//! This module defines the frame codec spoken over the transport and the
//! message types handed to application code.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `CONNECT` | Client → Broker | Authenticate with bearer token, negotiate heart-beats |
//! | `CONNECTED` | Broker → Client | Connect acknowledgment |
//! | `SUBSCRIBE` / `UNSUBSCRIBE` | Client → Broker | Manage wire subscriptions |
//! | `SEND` | Client → Broker | Publish |
//! | `MESSAGE` | Broker → Client | Pushed event on a destination |
//! | `ERROR` | Broker → Client | Failure, possibly credential rejection |
//! | `DISCONNECT` | Client → Broker | Graceful close |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame encoding, incremental decoding, heart-beats |
//! | `message` | Decoded messages and notification records |

// ============================================================================
// Submodules
// ============================================================================

/// Frame codec.
pub mod frame;

/// Message and notification types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Decoded, Frame, FrameCommand, FrameDecoder, HeartBeat, NegotiatedHeartBeat};
pub use message::{Message, Notification};
