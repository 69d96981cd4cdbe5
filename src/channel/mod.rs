//! Connection lifecycle, subscriptions and routing.
//!
//! Everything between the transport and the application lives here.
//!
//! # Architecture
//!
//! ```text
//! credential source ──► CredentialBridge ──┐
//!                                          ▼
//! RealtimeChannel ── commands ──► Supervisor (driver task) ◄── attempt events ── Transport
//!        │                             │
//!        ▼                             ▼
//! SubscriptionRegistry ◄──────── DispatchRouter ──► handlers, alert sink, cache invalidator
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backoff` | Capped exponential reconnect delays |
//! | `credential` | Credential events and the bridge that forwards them |
//! | `dispatch` | Routes messages to handlers and sinks |
//! | `registry` | Destination → handler map with delivery gating |
//! | `state` | Observable connection state |
//! | `supervisor` | Single driver loop owning the connection |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect backoff.
pub mod backoff;

/// Credential events and bridge.
pub mod credential;

/// Dispatch router and sinks.
pub mod dispatch;

/// Subscription registry.
pub mod registry;

/// Connection state.
pub mod state;

/// Connection supervisor.
pub(crate) mod supervisor;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::BackoffPolicy;
pub use credential::{Credential, CredentialEvent};
pub use dispatch::{AlertSink, CacheInvalidator, NOTIFICATIONS_TAG, NoopSink};
pub use registry::{Handler, SubscriptionHandle};
pub use state::ConnectionState;
