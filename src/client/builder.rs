//! Builder pattern for channel configuration.
//!
//! Provides a fluent API for configuring and creating [`RealtimeChannel`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use realtime_channel::{CredentialEvent, RealtimeChannel};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> realtime_channel::Result<()> {
//! let (credentials, rx) = mpsc::unbounded_channel();
//!
//! let channel = RealtimeChannel::builder()
//!     .endpoint("https://tracker.example.com/ws")
//!     .alert_sink(|summary: &str| println!("{summary}"))
//!     .credential_events(rx)
//!     .build()?;
//!
//! let _ = credentials.send(CredentialEvent::Issued("token".into()));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use url::Url;

use crate::channel::{AlertSink, CacheInvalidator, CredentialEvent, NoopSink};
use crate::error::{Error, Result};
use crate::transport::{Connector, WebSocketConnector};

use super::core::RealtimeChannel;
use super::options::{ChannelOptions, parse_endpoint};

// ============================================================================
// ChannelBuilder
// ============================================================================

/// Builder for configuring a [`RealtimeChannel`].
///
/// Use [`RealtimeChannel::builder()`] to create a new builder.
#[derive(Default)]
pub struct ChannelBuilder {
    /// Broker endpoint URL.
    endpoint: Option<String>,
    /// Supervisor tunables.
    options: ChannelOptions,
    /// Transport; WebSocket when unset.
    connector: Option<Arc<dyn Connector>>,
    /// Receives notification summaries.
    alerts: Option<Arc<dyn AlertSink>>,
    /// Receives stale cache tags.
    invalidator: Option<Arc<dyn CacheInvalidator>>,
    /// Credential lifecycle source.
    credentials: Option<mpsc::UnboundedReceiver<CredentialEvent>>,
}

// ============================================================================
// ChannelBuilder Implementation
// ============================================================================

impl ChannelBuilder {
    /// Creates a builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the broker endpoint.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - `ws`, `wss`, `http` or `https` URL
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Replaces the supervisor options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the transport.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Sets a shared transport.
    #[inline]
    #[must_use]
    pub fn shared_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the sink for personal notification summaries.
    #[inline]
    #[must_use]
    pub fn alert_sink(mut self, sink: impl AlertSink) -> Self {
        self.alerts = Some(Arc::new(sink));
        self
    }

    /// Sets the cache invalidator driven by personal notifications.
    #[inline]
    #[must_use]
    pub fn cache_invalidator(mut self, invalidator: impl CacheInvalidator) -> Self {
        self.invalidator = Some(Arc::new(invalidator));
        self
    }

    /// Sets the credential lifecycle source.
    ///
    /// The channel spawns one bridge that consumes it for the lifetime of
    /// the channel.
    #[inline]
    #[must_use]
    pub fn credential_events(mut self, events: mpsc::UnboundedReceiver<CredentialEvent>) -> Self {
        self.credentials = Some(events);
        self
    }

    /// Builds the channel and spawns its supervisor.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the endpoint is missing or invalid
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Config`] if called outside a tokio runtime
    pub fn build(self) -> Result<RealtimeChannel> {
        let endpoint = self.validate_endpoint()?;
        self.options.validate()?;

        if Handle::try_current().is_err() {
            return Err(Error::config(
                "RealtimeChannel must be built inside a tokio runtime",
            ));
        }

        Ok(RealtimeChannel::new(
            endpoint,
            self.options,
            self.connector
                .unwrap_or_else(|| Arc::new(WebSocketConnector::new())),
            self.alerts.unwrap_or_else(|| Arc::new(NoopSink)),
            self.invalidator.unwrap_or_else(|| Arc::new(NoopSink)),
            self.credentials,
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ChannelBuilder {
    /// Validates the endpoint configuration.
    fn validate_endpoint(&self) -> Result<Url> {
        let raw = self.endpoint.as_deref().ok_or_else(|| {
            Error::config(
                "Endpoint is required. Use .endpoint() to set it.\n\
                 Example: RealtimeChannel::builder().endpoint(\"wss://host/ws\")",
            )
        })?;

        parse_endpoint(raw)
    }
}

impl fmt::Debug for ChannelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("endpoint", &self.endpoint)
            .field("options", &self.options)
            .field("connector", &self.connector.as_ref().map(|c| c.name()))
            .field("credentials", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
