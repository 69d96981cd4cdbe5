//! Realtime channel handle.
//!
//! [`RealtimeChannel`] is the single owned entry point the application
//! passes to whatever needs to subscribe, publish or observe the connection.
//! Clones share one supervisor; dropping the last clone shuts it down.
//!
//! # Example
//!
//! ```no_run
//! use realtime_channel::{CredentialEvent, Message, RealtimeChannel};
//!
//! # async fn example() -> realtime_channel::Result<()> {
//! let channel = RealtimeChannel::builder()
//!     .endpoint("wss://tracker.example.com/ws")
//!     .build()?;
//!
//! channel.handle_credential(CredentialEvent::Issued("token".into()))?;
//!
//! let handle = channel.subscribe("/topic/project.42", |message: &Message| {
//!     println!("{} bytes", message.payload.len());
//! })?;
//!
//! channel.unsubscribe(&handle);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::channel::credential::CredentialBridge;
use crate::channel::dispatch::DispatchRouter;
use crate::channel::registry::{Handler, SharedRegistry, SubscriptionRegistry};
use crate::channel::state::ChannelStatus;
use crate::channel::supervisor::{JSON_CONTENT_TYPE, Supervisor, SupervisorHandle};
use crate::channel::{AlertSink, CacheInvalidator, ConnectionState, CredentialEvent, SubscriptionHandle};
use crate::error::{Error, Result};
use crate::protocol::{Frame, Message};
use crate::transport::Connector;

use super::builder::ChannelBuilder;
use super::options::ChannelOptions;

// ============================================================================
// Constants
// ============================================================================

/// Content type of text publishes.
const TEXT_CONTENT_TYPE: &str = "text/plain;charset=utf-8";

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the channel.
pub(crate) struct ChannelInner {
    /// Broker endpoint.
    endpoint: Url,

    /// Destination subscribed on every connect.
    personal_destination: String,

    /// Subscriptions, shared with the supervisor.
    registry: SharedRegistry,

    /// State published by the supervisor.
    status: Arc<ChannelStatus>,

    /// Command queue of the supervisor.
    supervisor: SupervisorHandle,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.supervisor.shutdown();
    }
}

// ============================================================================
// RealtimeChannel
// ============================================================================

/// Authenticated realtime connection to the broker.
///
/// The channel:
/// - Connects when a credential is issued and reconnects on rotation
/// - Retries transient failures with capped backoff
/// - Replays every subscription after each successful connect
#[derive(Clone)]
pub struct RealtimeChannel {
    /// Shared inner state.
    pub(crate) inner: Arc<ChannelInner>,
}

// ============================================================================
// RealtimeChannel - Constructor
// ============================================================================

impl RealtimeChannel {
    /// Creates the channel and spawns its supervisor.
    ///
    /// Must run inside a tokio runtime; [`ChannelBuilder::build`] checks.
    pub(crate) fn new(
        endpoint: Url,
        options: ChannelOptions,
        connector: Arc<dyn Connector>,
        alerts: Arc<dyn AlertSink>,
        invalidator: Arc<dyn CacheInvalidator>,
        credentials: Option<mpsc::UnboundedReceiver<CredentialEvent>>,
    ) -> Self {
        let personal_destination = options.personal_destination.clone();
        let dedup_window = options.credential_dedup_window;

        let registry = SubscriptionRegistry::shared(personal_destination.clone());
        let status = Arc::new(ChannelStatus::new());
        let router = DispatchRouter::new(
            Arc::clone(&registry),
            personal_destination.clone(),
            alerts,
            invalidator,
        );

        let (supervisor, handle) = Supervisor::new(
            endpoint.clone(),
            options,
            connector,
            Arc::clone(&registry),
            router,
            Arc::clone(&status),
        );
        supervisor.spawn();

        if let Some(events) = credentials {
            CredentialBridge::new(handle.clone(), dedup_window).spawn(events);
        }

        debug!(endpoint = %endpoint, "Realtime channel created");

        Self {
            inner: Arc::new(ChannelInner {
                endpoint,
                personal_destination,
                registry,
                status,
                supervisor: handle,
            }),
        }
    }

    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }
}

// ============================================================================
// RealtimeChannel - Subscriptions
// ============================================================================

impl RealtimeChannel {
    /// Subscribes `handler` to `destination`.
    ///
    /// Subscribing again to the same destination replaces the handler and
    /// returns the same handle. The wire SUBSCRIBE is sent now if the
    /// channel is ready, otherwise on the next connect.
    ///
    /// Handlers run on the connection's driver task and must not block. A
    /// handler that outlives the broker's heart-beat window makes the
    /// connection look silent and forces a reconnect; hand long work off to
    /// a spawned task or a queue.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `destination` is empty
    /// - [`Error::ChannelClosed`] if the channel was closed
    pub fn subscribe<F>(&self, destination: &str, handler: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.subscribe_handler(destination, Arc::new(handler))
    }

    /// Subscribes a handler receiving JSON-decoded payloads.
    ///
    /// Payloads that fail to decode are logged and dropped.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn subscribe_json<T, F>(&self, destination: &str, handler: F) -> Result<SubscriptionHandle>
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(destination, move |message: &Message| match message.json::<T>() {
            Ok(value) => handler(value),
            Err(e) => warn!(destination = %message.destination, error = %e, "Dropping undecodable message"),
        })
    }

    fn subscribe_handler(&self, destination: &str, handler: Handler) -> Result<SubscriptionHandle> {
        if destination.trim().is_empty() {
            return Err(Error::config("Destination must not be empty"));
        }

        let handle = self.inner.registry.lock().insert(destination, handler);
        if let Err(e) = self.inner.supervisor.subscribe(destination) {
            let removed = self.inner.registry.lock().remove(&handle);
            if let Some(removed) = removed {
                removed.slot.quiesce();
            }
            return Err(e);
        }

        Ok(handle)
    }

    /// Removes the subscription behind `handle`.
    ///
    /// When this returns, the handler is not running and will not run
    /// again. Safe to call from inside the handler and during reconnects.
    /// Returns `false` if the handle was already unsubscribed or replaced by
    /// a newer subscription to the same destination.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.inner.registry.lock().remove(handle);
        let Some(removed) = removed else {
            return false;
        };

        // Registry lock is released; wait out an in-flight delivery.
        removed.slot.quiesce();

        let _ = self
            .inner
            .supervisor
            .unsubscribe(handle.destination(), removed.slot.id(), removed.wire);
        true
    }

    /// Returns the number of registered subscriptions.
    #[inline]
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Returns `true` if `destination` has a subscription.
    #[inline]
    #[must_use]
    pub fn is_subscribed(&self, destination: &str) -> bool {
        self.inner.registry.lock().contains(destination)
    }

    /// Returns subscribed destinations in subscription order.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> {
        self.inner.registry.lock().destinations()
    }
}

// ============================================================================
// RealtimeChannel - Publishing
// ============================================================================

impl RealtimeChannel {
    /// Publishes a text body to `destination`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the channel is not ready
    /// - [`Error::ChannelClosed`] if the channel was closed
    pub fn publish(&self, destination: &str, body: impl Into<String>) -> Result<()> {
        self.publish_frame(Frame::send(destination, TEXT_CONTENT_TYPE, body))
    }

    /// Publishes `value` as JSON to `destination`.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if serialization fails
    /// - [`Error::NotConnected`] if the channel is not ready
    /// - [`Error::ChannelClosed`] if the channel was closed
    pub fn publish_json<T: Serialize>(&self, destination: &str, value: &T) -> Result<()> {
        let body = serde_json::to_string(value)?;
        self.publish_frame(Frame::send(destination, JSON_CONTENT_TYPE, body))
    }

    fn publish_frame(&self, frame: Frame) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotConnected);
        }
        self.inner.supervisor.publish(frame)
    }
}

// ============================================================================
// RealtimeChannel - Lifecycle
// ============================================================================

impl RealtimeChannel {
    /// Feeds a credential event directly to the supervisor.
    ///
    /// Unlike events from [`ChannelBuilder::credential_events`], these are
    /// not de-duplicated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the channel was closed.
    pub fn handle_credential(&self, event: CredentialEvent) -> Result<()> {
        self.inner.supervisor.apply(event)
    }

    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.status.state()
    }

    /// Returns `true` once connected and every subscription is replayed.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.status.is_ready()
    }

    /// Returns a receiver observing state transitions.
    #[inline]
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status.subscribe()
    }

    /// Waits until the channel reaches `state`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if `state` is not reached in time
    /// - [`Error::ChannelClosed`] if the channel shut down
    pub async fn wait_for_state(&self, state: ConnectionState, within: Duration) -> Result<()> {
        let mut rx = self.watch_state();
        let ms = u64::try_from(within.as_millis()).unwrap_or(u64::MAX);

        timeout(within, async {
            rx.wait_for(|current| *current == state)
                .await
                .map(|_| ())
                .map_err(|_| Error::ChannelClosed)
        })
        .await
        .map_err(|_| Error::connection_timeout(ms))?
    }

    /// Returns the broker endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Returns the personal notifications destination.
    #[inline]
    #[must_use]
    pub fn personal_destination(&self) -> &str {
        &self.inner.personal_destination
    }

    /// Shuts the supervisor down and waits for it to exit.
    ///
    /// Subscriptions stay registered but no connection is made again.
    pub async fn close(&self) {
        self.inner.supervisor.shutdown();
        self.inner.supervisor.closed().await;
        debug!("Realtime channel closed");
    }
}

// ============================================================================
// RealtimeChannel - Display
// ============================================================================

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("state", &self.state())
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use serde::Deserialize;
    use tokio::time::sleep;

    use crate::channel::BackoffPolicy;
    use crate::protocol::FrameCommand;
    use crate::transport::testing::{MockConnector, MockLink, init_tracing, wait_until};

    const PERSONAL: &str = "/user/queue/notifications";
    const WAIT: Duration = Duration::from_secs(5);

    fn options() -> ChannelOptions {
        ChannelOptions::new().with_backoff(BackoffPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            2,
        ))
    }

    fn channel_with(connector: &Arc<MockConnector>, options: ChannelOptions) -> RealtimeChannel {
        init_tracing();
        RealtimeChannel::builder()
            .endpoint("ws://broker.test/ws")
            .options(options)
            .shared_connector(connector.clone())
            .build()
            .expect("build")
    }

    fn channel(connector: &Arc<MockConnector>) -> RealtimeChannel {
        channel_with(connector, options())
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Message) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        (count, move |_: &Message| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Acknowledges link `index` and waits for the channel to be ready.
    async fn accept(channel: &RealtimeChannel, connector: &MockConnector, index: usize) -> Arc<MockLink> {
        let link = connector.link(index).await;
        link.wait_for_frames(FrameCommand::Connect, 1).await;
        link.accept();
        channel
            .wait_for_state(ConnectionState::Connected, WAIT)
            .await
            .expect("connected");
        link
    }

    async fn connected(channel: &RealtimeChannel, connector: &MockConnector) -> Arc<MockLink> {
        channel
            .handle_credential(CredentialEvent::Issued("t1".into()))
            .expect("issue");
        accept(channel, connector, 0).await
    }

    #[tokio::test]
    async fn test_message_invokes_handler_once() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        let link = connected(&channel, &connector).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        channel
            .subscribe("/topic/notifications", move |m: &Message| {
                seen_clone.lock().push(m.text().expect("utf8").to_string());
            })
            .expect("subscribe");

        link.wait_for_frames(FrameCommand::Subscribe, 2).await;
        link.push_message("/topic/notifications", r#"{"taskId":1}"#);

        wait_until(|| seen.lock().len() == 1).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), vec![r#"{"taskId":1}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_double_refresh_yields_one_reconnect() {
        let connector = Arc::new(MockConnector::new());
        let (credentials, events) = mpsc::unbounded_channel();
        init_tracing();
        let channel = RealtimeChannel::builder()
            .endpoint("ws://broker.test/ws")
            .options(options())
            .shared_connector(connector.clone())
            .credential_events(events)
            .build()
            .expect("build");

        channel.subscribe("/topic/a", |_: &Message| {}).expect("a");
        channel.subscribe("/topic/b", |_: &Message| {}).expect("b");
        credentials
            .send(CredentialEvent::Issued("t1".into()))
            .expect("issue");
        let first = accept(&channel, &connector, 0).await;
        first.wait_for_frames(FrameCommand::Subscribe, 3).await;

        connector.set_open_delay(Duration::from_millis(50));
        credentials
            .send(CredentialEvent::Refreshed("t2".into()))
            .expect("refresh");
        sleep(Duration::from_millis(5)).await;
        credentials
            .send(CredentialEvent::Refreshed("t3".into()))
            .expect("refresh");

        let second = accept(&channel, &connector, 1).await;
        let subscribed = second.wait_for_frames(FrameCommand::Subscribe, 3).await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(connector.link_count(), 2);
        assert_eq!(subscribed.len(), 3);
        assert_eq!(second.subscribed_destinations(), vec![PERSONAL, "/topic/a", "/topic/b"]);
        assert_eq!(
            second.frames_of(FrameCommand::Connect)[0].header("Authorization"),
            Some("Bearer t3")
        );
        assert!(first.is_closed());
        assert_eq!(connector.live_links(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_refresh_events_are_collapsed() {
        let connector = Arc::new(MockConnector::new());
        let (credentials, events) = mpsc::unbounded_channel();
        init_tracing();
        let channel = RealtimeChannel::builder()
            .endpoint("ws://broker.test/ws")
            .options(options())
            .shared_connector(connector.clone())
            .credential_events(events)
            .build()
            .expect("build");

        credentials
            .send(CredentialEvent::Issued("t1".into()))
            .expect("issue");
        accept(&channel, &connector, 0).await;

        credentials
            .send(CredentialEvent::Refreshed("t2".into()))
            .expect("refresh");
        credentials
            .send(CredentialEvent::Refreshed("t2".into()))
            .expect("refresh");

        accept(&channel, &connector, 1).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(connector.live_links(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_during_backoff_cancels_retry() {
        let connector = Arc::new(MockConnector::new());
        connector.fail_next(1);
        let channel = channel_with(&connector, ChannelOptions::new());
        channel.subscribe("/topic/a", |_: &Message| {}).expect("a");

        channel
            .handle_credential(CredentialEvent::Issued("t1".into()))
            .expect("issue");
        channel
            .wait_for_state(ConnectionState::Reconnecting, WAIT)
            .await
            .expect("backoff");
        assert_eq!(connector.attempts(), 1);

        channel
            .handle_credential(CredentialEvent::Cleared)
            .expect("clear");
        channel
            .wait_for_state(ConnectionState::Disconnected, WAIT)
            .await
            .expect("disconnected");

        sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(channel.subscription_count(), 0);

        channel
            .handle_credential(CredentialEvent::Issued("t2".into()))
            .expect("issue");
        wait_until(|| connector.attempts() == 2).await;
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_leave_one_connection() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        channel.subscribe("/topic/a", |_: &Message| {}).expect("a");
        connected(&channel, &connector).await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let channel = channel.clone();
            tasks.push(tokio::spawn(async move {
                channel
                    .handle_credential(CredentialEvent::Refreshed(format!("t-{i}").into()))
                    .expect("refresh");
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }

        wait_until(|| connector.link_count() >= 2).await;

        // Acknowledge whatever link is newest until the channel settles.
        tokio::time::timeout(WAIT, async {
            loop {
                let newest = connector.link(connector.link_count() - 1).await;
                newest.accept();
                if channel
                    .wait_for_state(ConnectionState::Connected, Duration::from_millis(100))
                    .await
                    .is_ok()
                {
                    break;
                }
            }
        })
        .await
        .expect("settled");

        let links: Vec<_> = {
            let mut links = Vec::new();
            for i in 0..connector.link_count() {
                links.push(connector.link(i).await);
            }
            links
        };
        let newest = links.last().expect("links").clone();
        for link in &links[..links.len() - 1] {
            link.wait_closed().await;
        }
        assert!(!newest.is_closed());
        assert_eq!(connector.live_links(), 1);
        assert_eq!(newest.subscribed_destinations(), vec![PERSONAL, "/topic/a"]);
    }

    #[tokio::test]
    async fn test_no_delivery_after_unsubscribe() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        let link = connected(&channel, &connector).await;

        let (count, handler) = counter();
        let handle = channel.subscribe("/topic/a", handler).expect("subscribe");
        link.wait_for_frames(FrameCommand::Subscribe, 2).await;

        assert!(channel.unsubscribe(&handle));
        assert!(!channel.unsubscribe(&handle));

        link.push_message("/topic/a", "late");
        let unsubscribed = link.wait_for_frames(FrameCommand::Unsubscribe, 1).await;
        assert_eq!(unsubscribed[0].header("id"), Some(handle.id().wire_id().as_str()));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_can_unsubscribe_itself() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        let link = connected(&channel, &connector).await;

        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));
        let (slot_clone, hits_clone, channel_clone) = (Arc::clone(&slot), Arc::clone(&hits), channel.clone());
        let handle = channel
            .subscribe("/topic/once", move |_: &Message| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = slot_clone.lock().take() {
                    channel_clone.unsubscribe(&handle);
                }
            })
            .expect("subscribe");
        *slot.lock() = Some(handle);
        link.wait_for_frames(FrameCommand::Subscribe, 2).await;

        link.push_message("/topic/once", "1");
        link.push_message("/topic/once", "2");
        link.wait_for_frames(FrameCommand::Unsubscribe, 1).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent_on_the_wire() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        let link = connected(&channel, &connector).await;

        let (first, h1) = counter();
        let (second, h2) = counter();
        let a = channel.subscribe("/topic/a", h1).expect("h1");
        let b = channel.subscribe("/topic/a", h2).expect("h2");
        assert_eq!(a, b);
        assert_eq!(channel.subscription_count(), 1);

        link.wait_for_frames(FrameCommand::Subscribe, 2).await;
        link.push_message("/topic/a", "x");
        wait_until(|| second.load(Ordering::SeqCst) == 1).await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(link.subscribed_destinations(), vec![PERSONAL, "/topic/a"]);
    }

    #[tokio::test]
    async fn test_reconnect_replays_exactly_active_set() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        let first = connected(&channel, &connector).await;

        channel.subscribe("/topic/a", |_: &Message| {}).expect("a");
        let b = channel.subscribe("/topic/b", |_: &Message| {}).expect("b");
        channel.subscribe("/topic/c", |_: &Message| {}).expect("c");
        first.wait_for_frames(FrameCommand::Subscribe, 4).await;

        first.close_remote();
        channel
            .wait_for_state(ConnectionState::Reconnecting, WAIT)
            .await
            .expect("reconnecting");
        assert!(!channel.is_ready());
        assert!(channel.unsubscribe(&b));

        let second = accept(&channel, &connector, 1).await;
        second.wait_for_frames(FrameCommand::Subscribe, 3).await;
        sleep(Duration::from_millis(50)).await;

        assert_eq!(second.subscribed_destinations(), vec![PERSONAL, "/topic/a", "/topic/c"]);
        assert!(second.frames_of(FrameCommand::Unsubscribe).is_empty());
    }

    #[tokio::test]
    async fn test_expired_keeps_subscriptions_for_next_session() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        channel.subscribe("/topic/a", |_: &Message| {}).expect("a");
        connected(&channel, &connector).await;

        channel
            .handle_credential(CredentialEvent::Expired)
            .expect("expire");
        channel
            .wait_for_state(ConnectionState::Disconnected, WAIT)
            .await
            .expect("disconnected");
        assert_eq!(channel.subscription_count(), 1);

        channel
            .handle_credential(CredentialEvent::Issued("t2".into()))
            .expect("issue");
        let second = accept(&channel, &connector, 1).await;
        second.wait_for_frames(FrameCommand::Subscribe, 2).await;
        assert_eq!(second.subscribed_destinations(), vec![PERSONAL, "/topic/a"]);
    }

    #[tokio::test]
    async fn test_personal_notification_reaches_sinks() {
        let connector = Arc::new(MockConnector::new());
        let alerts = Arc::new(Mutex::new(Vec::new()));
        let tags = Arc::new(Mutex::new(Vec::new()));
        let (alerts_clone, tags_clone) = (Arc::clone(&alerts), Arc::clone(&tags));

        init_tracing();
        let channel = RealtimeChannel::builder()
            .endpoint("ws://broker.test/ws")
            .options(options())
            .shared_connector(connector.clone())
            .alert_sink(move |s: &str| alerts_clone.lock().push(s.to_string()))
            .cache_invalidator(move |t: &str| tags_clone.lock().push(t.to_string()))
            .build()
            .expect("build");

        let link = connected(&channel, &connector).await;
        link.push_message(PERSONAL, r#"{"id":"n1","title":"Due soon","message":"T-9 is due"}"#);

        wait_until(|| !tags.lock().is_empty()).await;
        assert_eq!(*alerts.lock(), vec!["Due soon: T-9 is due".to_string()]);
        assert_eq!(*tags.lock(), vec!["notifications".to_string()]);
    }

    #[tokio::test]
    async fn test_publish_requires_ready() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        assert!(matches!(channel.publish("/app/ping", "x"), Err(Error::NotConnected)));

        let link = connected(&channel, &connector).await;

        #[derive(Serialize)]
        struct Ping {
            seq: u32,
        }
        channel.publish("/app/echo", "hello").expect("publish");
        channel.publish_json("/app/ping", &Ping { seq: 3 }).expect("publish json");

        let sent = link.wait_for_frames(FrameCommand::Send, 2).await;
        assert_eq!(sent[0].header("destination"), Some("/app/echo"));
        assert_eq!(sent[0].body_text(), "hello");
        assert_eq!(sent[1].header("content-type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(sent[1].body_text(), r#"{"seq":3}"#);
    }

    #[tokio::test]
    async fn test_subscribe_json_decodes_payload() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Update {
            id: u32,
        }

        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        let link = connected(&channel, &connector).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        channel
            .subscribe_json("/topic/updates", move |u: Update| seen_clone.lock().push(u))
            .expect("subscribe");
        link.wait_for_frames(FrameCommand::Subscribe, 2).await;

        link.push_message("/topic/updates", "garbage");
        link.push_message("/topic/updates", r#"{"id":4}"#);
        wait_until(|| !seen.lock().is_empty()).await;
        assert_eq!(*seen.lock(), vec![Update { id: 4 }]);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_empty_destination() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        let err = channel.subscribe("  ", |_: &Message| {}).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_subscribe_after_supervisor_exit_leaves_no_entry() {
        let (supervisor, commands) = SupervisorHandle::detached();
        drop(commands);

        let channel = RealtimeChannel {
            inner: Arc::new(ChannelInner {
                endpoint: Url::parse("ws://broker.test/ws").expect("url"),
                personal_destination: PERSONAL.to_string(),
                registry: SubscriptionRegistry::shared(PERSONAL),
                status: Arc::new(ChannelStatus::new()),
                supervisor,
            }),
        };

        let err = channel.subscribe("/topic/a", |_: &Message| {}).unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
        assert_eq!(channel.subscription_count(), 0);
        assert!(!channel.is_subscribed("/topic/a"));
    }

    #[tokio::test]
    async fn test_drop_closes_connection() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        let link = connected(&channel, &connector).await;

        let observer = channel.watch_state();
        drop(channel);

        link.wait_closed().await;
        assert_eq!(link.frames_of(FrameCommand::Disconnect).len(), 1);
        assert_eq!(*observer.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_close_stops_supervisor() {
        let connector = Arc::new(MockConnector::new());
        let channel = channel(&connector);
        channel.close().await;

        assert!(matches!(
            channel.subscribe("/topic/a", |_: &Message| {}),
            Err(Error::ChannelClosed)
        ));
        assert!(channel.handle_credential(CredentialEvent::Issued("t".into())).is_err());
    }
}
