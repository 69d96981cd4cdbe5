//! In-memory transport for tests.
//!
//! [`MockConnector`] hands out links whose outbound frames are recorded and
//! whose inbound side is driven by the test through [`MockLink`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{Decoded, Frame, FrameCommand, FrameDecoder};

use super::{Connector, FrameLink, FrameSink, LinkCommand, LinkReceiver, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// How long helpers wait for an expected condition.
pub(crate) const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// MockLink
// ============================================================================

/// One link opened by the [`MockConnector`].
pub(crate) struct MockLink {
    sink: FrameSink,
    frames: Mutex<Vec<Frame>>,
    heartbeats: AtomicUsize,
    closed: AtomicBool,
}

impl MockLink {
    /// Pushes a broker frame to the client.
    pub(crate) fn deliver(&self, frame: &Frame) {
        self.sink.deliver(TransportEvent::Text(frame.encode()));
    }

    /// Pushes raw text to the client.
    pub(crate) fn deliver_raw(&self, text: &str) {
        self.sink.deliver(TransportEvent::Text(text.to_string()));
    }

    /// Acknowledges the CONNECT frame.
    pub(crate) fn accept(&self) {
        self.deliver(&Frame::new(FrameCommand::Connected).with_header("version", "1.2"));
    }

    /// Acknowledges CONNECT with a heart-beat header.
    pub(crate) fn accept_with_heartbeat(&self, heart_beat: &str) {
        self.deliver(
            &Frame::new(FrameCommand::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", heart_beat),
        );
    }

    /// Pushes a MESSAGE frame.
    pub(crate) fn push_message(&self, destination: &str, body: &str) {
        self.deliver(
            &Frame::new(FrameCommand::Message)
                .with_header("destination", destination)
                .with_header("message-id", "m-1")
                .with_body(body),
        );
    }

    /// Simulates the remote end closing the link.
    pub(crate) fn close_remote(&self) {
        self.sink.deliver(TransportEvent::Closed { reason: None });
    }

    /// Simulates a transport failure.
    pub(crate) fn fail(&self, error: Error) {
        self.sink.deliver(TransportEvent::Failed(error));
    }

    /// Returns every frame the client sent on this link.
    pub(crate) fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    /// Returns the frames with the given command.
    pub(crate) fn frames_of(&self, command: FrameCommand) -> Vec<Frame> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }

    /// Returns the destinations of all SUBSCRIBE frames, in order.
    pub(crate) fn subscribed_destinations(&self) -> Vec<String> {
        self.frames_of(FrameCommand::Subscribe)
            .iter()
            .filter_map(|f| f.header("destination").map(str::to_string))
            .collect()
    }

    /// Returns the number of heart-beats the client sent.
    pub(crate) fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    /// Returns `true` once the client closed the link.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Waits until `count` frames with `command` were sent.
    pub(crate) async fn wait_for_frames(&self, command: FrameCommand, count: usize) -> Vec<Frame> {
        wait_until(|| self.frames_of(command).len() >= count).await;
        self.frames_of(command)
    }

    /// Waits until the client closed the link.
    pub(crate) async fn wait_closed(&self) {
        wait_until(|| self.is_closed()).await;
    }
}

/// Drains link commands into the recorded frame list.
async fn pump(link: Arc<MockLink>, mut commands: LinkReceiver) {
    let mut decoder = FrameDecoder::new();
    while let Some(command) = commands.recv().await {
        match command {
            LinkCommand::Send(text) => {
                decoder.push(text.as_bytes()).expect("client frame fits");
                while let Some(item) = decoder.next().expect("client frame is well formed") {
                    match item {
                        Decoded::Heartbeat => {
                            link.heartbeats.fetch_add(1, Ordering::SeqCst);
                        }
                        Decoded::Frame(frame) => link.frames.lock().push(frame),
                    }
                }
            }
            LinkCommand::Close => break,
        }
    }
    link.closed.store(true, Ordering::SeqCst);
}

// ============================================================================
// MockConnector
// ============================================================================

/// Connector backed by in-memory links.
pub(crate) struct MockConnector {
    links: Mutex<Vec<Arc<MockLink>>>,
    opened: Notify,
    attempts: AtomicUsize,
    failures: AtomicUsize,
    open_delay: Mutex<Duration>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self {
            links: Mutex::new(Vec::new()),
            opened: Notify::new(),
            attempts: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            open_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Makes the next `count` opens fail.
    pub(crate) fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Delays every open by `delay`.
    pub(crate) fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    /// Number of open calls so far.
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of links successfully opened.
    pub(crate) fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Number of links the client has not closed.
    pub(crate) fn live_links(&self) -> usize {
        self.links.lock().iter().filter(|l| !l.is_closed()).count()
    }

    /// Waits for the link with the given index to open.
    pub(crate) async fn link(&self, index: usize) -> Arc<MockLink> {
        timeout(WAIT, async {
            loop {
                let notified = self.opened.notified();
                if let Some(link) = self.links.lock().get(index).cloned() {
                    return link;
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("link {index} was not opened in time"))
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _endpoint: &Url, sink: FrameSink) -> Result<FrameLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let refuse = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(Error::connection("mock connection refused"));
        }

        let (link, commands) = FrameLink::channel();
        let mock = Arc::new(MockLink {
            sink,
            frames: Mutex::new(Vec::new()),
            heartbeats: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(pump(Arc::clone(&mock), commands));

        self.links.lock().push(Arc::clone(&mock));
        self.opened.notify_waiters();

        Ok(link)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Polls `condition` until it holds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

/// Installs a test subscriber honoring `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
