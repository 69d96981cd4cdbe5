//! Ordered fallback across transport variants.
//!
//! Tries each connector in turn and returns the first link that opens. The
//! supervisor never sees which variant won.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{Connector, FrameLink, FrameSink};

// ============================================================================
// FallbackConnector
// ============================================================================

/// Connector that falls back through a list of transports.
///
/// # Example
///
/// ```ignore
/// let connector = FallbackConnector::new()
///     .with(WebSocketConnector::new())
///     .with(long_polling);
/// ```
#[derive(Default, Clone)]
pub struct FallbackConnector {
    connectors: Vec<Arc<dyn Connector>>,
}

impl FallbackConnector {
    /// Creates an empty fallback chain.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transport variant.
    #[must_use]
    pub fn with(mut self, connector: impl Connector) -> Self {
        self.connectors.push(Arc::new(connector));
        self
    }

    /// Appends a shared transport variant.
    #[must_use]
    pub fn with_shared(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push(connector);
        self
    }

    /// Returns the number of variants.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    /// Returns `true` if no variant is configured.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl fmt::Debug for FallbackConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.connectors.iter().map(|c| c.name()).collect();
        f.debug_struct("FallbackConnector")
            .field("connectors", &names)
            .finish()
    }
}

#[async_trait]
impl Connector for FallbackConnector {
    async fn open(&self, endpoint: &Url, sink: FrameSink) -> Result<FrameLink> {
        let mut last_error = None;

        for connector in &self.connectors {
            match connector.open(endpoint, sink.clone()).await {
                Ok(link) => {
                    debug!(transport = connector.name(), "Transport opened");
                    return Ok(link);
                }
                Err(e) => {
                    warn!(transport = connector.name(), error = %e, "Transport failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::config("No transport configured")))
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

// ============================================================================
// Tests
// ============================================================================
