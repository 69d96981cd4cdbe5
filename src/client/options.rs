//! Channel configuration.
//!
//! Tunables for the connection supervisor: heart-beats, timeouts, backoff
//! and the personal notifications destination.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use realtime_channel::ChannelOptions;
//!
//! let options = ChannelOptions::new()
//!     .with_heart_beat(5_000, 5_000)
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_personal_destination("/user/queue/alerts");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::channel::BackoffPolicy;
use crate::error::{Error, Result};
use crate::protocol::HeartBeat;

// ============================================================================
// Constants
// ============================================================================

/// Default personal notifications destination.
pub const DEFAULT_PERSONAL_DESTINATION: &str = "/user/queue/notifications";

/// Default heart-beat interval in both directions, in milliseconds.
const DEFAULT_HEART_BEAT_MS: u64 = 10_000;

/// Missed inbound intervals tolerated before the link is declared dead.
const DEFAULT_HEARTBEAT_GRACE: u32 = 2;

/// Time allowed for the transport to open and the broker to acknowledge.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identical credential events closer than this are collapsed.
const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(250);

/// Longest accepted connect timeout, backoff delay or heart-beat interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(86_400);

// ============================================================================
// ChannelOptions
// ============================================================================

/// Supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Virtual host sent in CONNECT. Defaults to the endpoint host.
    pub host: Option<String>,

    /// Destination auto-subscribed on every connect.
    pub personal_destination: String,

    /// Heart-beat intervals advertised in CONNECT.
    pub heart_beat: HeartBeat,

    /// Inbound silence tolerated, as a multiple of the negotiated interval.
    pub heartbeat_grace: u32,

    /// Deadline for transport open and for CONNECT acknowledgment.
    pub connect_timeout: Duration,

    /// Reconnect delays.
    pub backoff: BackoffPolicy,

    /// Window in which identical credential events are dropped.
    pub credential_dedup_window: Duration,
}

// ============================================================================
// Constructors
// ============================================================================

impl ChannelOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: None,
            personal_destination: DEFAULT_PERSONAL_DESTINATION.to_string(),
            heart_beat: HeartBeat::new(DEFAULT_HEART_BEAT_MS, DEFAULT_HEART_BEAT_MS),
            heartbeat_grace: DEFAULT_HEARTBEAT_GRACE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff: BackoffPolicy::default(),
            credential_dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ChannelOptions {
    /// Sets the CONNECT virtual host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the personal notifications destination.
    #[inline]
    #[must_use]
    pub fn with_personal_destination(mut self, destination: impl Into<String>) -> Self {
        self.personal_destination = destination.into();
        self
    }

    /// Sets heart-beat intervals in milliseconds. Zero disables a direction.
    #[inline]
    #[must_use]
    pub fn with_heart_beat(mut self, outgoing_ms: u64, incoming_ms: u64) -> Self {
        self.heart_beat = HeartBeat::new(outgoing_ms, incoming_ms);
        self
    }

    /// Sets the inbound heart-beat grace factor.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_grace(mut self, factor: u32) -> Self {
        self.heartbeat_grace = factor;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reconnect backoff policy.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the credential de-duplication window.
    #[inline]
    #[must_use]
    pub fn with_credential_dedup_window(mut self, window: Duration) -> Self {
        self.credential_dedup_window = window;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ChannelOptions {
    /// Checks the options for values the supervisor cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !self.personal_destination.starts_with('/') {
            return Err(Error::config(format!(
                "Personal destination must be an absolute path, got {:?}",
                self.personal_destination
            )));
        }

        if self.heartbeat_grace == 0 {
            return Err(Error::config("Heart-beat grace factor must be at least 1"));
        }

        if self.connect_timeout.is_zero() || self.connect_timeout > MAX_INTERVAL {
            return Err(Error::config(format!(
                "Connect timeout must be within (0, {MAX_INTERVAL:?}], got {:?}",
                self.connect_timeout
            )));
        }

        if self.backoff.max > MAX_INTERVAL {
            return Err(Error::config(format!(
                "Backoff max must not exceed {MAX_INTERVAL:?}, got {:?}",
                self.backoff.max
            )));
        }

        let longest_beat = self.heart_beat.outgoing_ms.max(self.heart_beat.incoming_ms);
        if u128::from(longest_beat) > MAX_INTERVAL.as_millis() {
            return Err(Error::config(format!(
                "Heart-beat interval must not exceed {MAX_INTERVAL:?}, got {longest_beat}ms"
            )));
        }

        if self.backoff.initial.is_zero() || self.backoff.max < self.backoff.initial {
            return Err(Error::config(format!(
                "Backoff must satisfy 0 < initial <= max, got initial={:?} max={:?}",
                self.backoff.initial, self.backoff.max
            )));
        }

        Ok(())
    }

    /// Returns the CONNECT host, falling back to the endpoint host.
    pub(crate) fn resolve_host(&self, endpoint: &Url) -> String {
        self.host
            .clone()
            .or_else(|| endpoint.host_str().map(str::to_string))
            .unwrap_or_else(|| "/".to_string())
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Parses a broker endpoint, mapping `http(s)` to `ws(s)`.
///
/// # Errors
///
/// Returns [`Error::Config`] for unparseable URLs or unsupported schemes.
pub(crate) fn parse_endpoint(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| Error::config(format!("Invalid endpoint {raw:?}: {e}")))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(Error::config(format!(
                "Unsupported endpoint scheme {other:?}, expected ws, wss, http or https"
            )));
        }
    };

    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(Error::config(format!("Cannot use {raw:?} as a WebSocket endpoint")));
    }

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ChannelOptions::new();
        assert_eq!(options.personal_destination, DEFAULT_PERSONAL_DESTINATION);
        assert_eq!(options.heart_beat, HeartBeat::new(10_000, 10_000));
        assert_eq!(options.heartbeat_grace, 2);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.credential_dedup_window, Duration::from_millis(250));
        assert_eq!(options, ChannelOptions::default());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let options = ChannelOptions::new()
            .with_host("tracker")
            .with_heart_beat(0, 5_000)
            .with_heartbeat_grace(3)
            .with_personal_destination("/user/queue/alerts");

        assert_eq!(options.host.as_deref(), Some("tracker"));
        assert_eq!(options.heart_beat, HeartBeat::new(0, 5_000));
        assert_eq!(options.heartbeat_grace, 3);
        assert_eq!(options.personal_destination, "/user/queue/alerts");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ChannelOptions::new().with_heartbeat_grace(0).validate().is_err());
        assert!(ChannelOptions::new().with_connect_timeout(Duration::ZERO).validate().is_err());
        assert!(ChannelOptions::new().with_personal_destination("queue").validate().is_err());

        let inverted = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(1), 2);
        assert!(ChannelOptions::new().with_backoff(inverted).validate().is_err());
    }

    #[test]
    fn test_validate_bounds_intervals() {
        let err = ChannelOptions::new()
            .with_connect_timeout(Duration::MAX)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let endless = BackoffPolicy::new(Duration::from_secs(1), Duration::MAX, 2);
        assert!(ChannelOptions::new().with_backoff(endless).validate().is_err());

        assert!(ChannelOptions::new().with_heart_beat(u64::MAX, 0).validate().is_err());

        let at_limit = ChannelOptions::new()
            .with_connect_timeout(MAX_INTERVAL)
            .with_backoff(BackoffPolicy::new(Duration::from_secs(1), MAX_INTERVAL, 2));
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_parse_endpoint_maps_http() {
        assert_eq!(parse_endpoint("http://host/ws").expect("url").as_str(), "ws://host/ws");
        assert_eq!(parse_endpoint("https://host/ws").expect("url").scheme(), "wss");
        assert_eq!(parse_endpoint("wss://host/ws").expect("url").scheme(), "wss");
    }

    #[test]
    fn test_parse_endpoint_rejects() {
        assert!(matches!(parse_endpoint("not a url"), Err(Error::Config { .. })));
        assert!(matches!(parse_endpoint("ftp://host"), Err(Error::Config { .. })));
    }

    #[test]
    fn test_resolve_host() {
        let url = parse_endpoint("ws://broker.example:8080/ws").expect("url");
        assert_eq!(ChannelOptions::new().resolve_host(&url), "broker.example");
        assert_eq!(ChannelOptions::new().with_host("vh").resolve_host(&url), "vh");
    }
}
