//! Connection supervisor.
//!
//! Owns the single connection to the broker. Every lifecycle change goes
//! through one driver task that consumes two queues:
//!
//! - **commands** from channel handles and the credential bridge
//! - **attempt events** from the connect task and the open link
//!
//! Attempt events carry the [`Generation`] they were started under. The
//! generation advances on every attempt and every teardown, so events from
//! an abandoned attempt never match and are dropped. A link they carry is
//! closed on drop.
//!
//! # Phases
//!
//! | Phase | Published state | Leaves on |
//! |-------|-----------------|-----------|
//! | `Idle` | `Disconnected` | credential issued |
//! | `Opening` | `Connecting` | transport open or failure |
//! | `Handshaking` | `Connecting` | CONNECTED, ERROR, timeout |
//! | `Ready` | `Connected` | transport failure, refresh, heart-beat loss |
//! | `Backoff` | `Reconnecting` | timer, refresh, expiry |

// ============================================================================
// Imports
// ============================================================================

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::client::ChannelOptions;
use crate::error::{Error, Result};
use crate::identifiers::{Generation, SubscriptionId};
use crate::protocol::{Decoded, Frame, FrameCommand, FrameDecoder, HeartBeat, Message};
use crate::transport::{Connector, FrameLink, FrameSink, TransportEvent};

use super::backoff::Backoff;
use super::credential::{Credential, CredentialEvent};
use super::dispatch::DispatchRouter;
use super::registry::SharedRegistry;
use super::state::{ChannelStatus, ConnectionState};

// ============================================================================
// Constants
// ============================================================================

/// Content type used for outgoing JSON publishes.
pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";

/// Stand-in for a deadline too far away to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns `now + after`, clamped instead of overflowing.
///
/// Heart-beat intervals come from the broker, so they can be arbitrarily
/// large.
fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

// ============================================================================
// Commands
// ============================================================================

/// Request sent to the driver loop.
#[derive(Debug)]
pub(crate) enum SupervisorCommand {
    /// A credential was issued.
    Start(Credential),
    /// The credential was rotated.
    Refresh(Credential),
    /// The credential is no longer valid. Registry is kept.
    Expire,
    /// The session ended. Registry is cleared.
    Clear,
    /// A registry entry was added or updated.
    Subscribe {
        destination: String,
    },
    /// A registry entry was removed.
    Unsubscribe {
        destination: String,
        id: SubscriptionId,
        wire: Option<Generation>,
    },
    /// Send a frame if the connection is ready.
    Publish(Frame),
    /// Stop the driver loop.
    Shutdown,
}

/// Cloneable sender side of the driver loop.
#[derive(Debug, Clone)]
pub(crate) struct SupervisorHandle {
    tx: mpsc::UnboundedSender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Handle whose commands go to the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<SupervisorCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, command: SupervisorCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::ChannelClosed)
    }

    /// Forwards a credential event.
    pub(crate) fn apply(&self, event: CredentialEvent) -> Result<()> {
        let command = match event {
            CredentialEvent::Issued(credential) => SupervisorCommand::Start(credential),
            CredentialEvent::Refreshed(credential) => SupervisorCommand::Refresh(credential),
            CredentialEvent::Expired => SupervisorCommand::Expire,
            CredentialEvent::Cleared => SupervisorCommand::Clear,
        };
        self.send(command)
    }

    pub(crate) fn subscribe(&self, destination: &str) -> Result<()> {
        self.send(SupervisorCommand::Subscribe {
            destination: destination.to_string(),
        })
    }

    pub(crate) fn unsubscribe(
        &self,
        destination: &str,
        id: SubscriptionId,
        wire: Option<Generation>,
    ) -> Result<()> {
        self.send(SupervisorCommand::Unsubscribe {
            destination: destination.to_string(),
            id,
            wire,
        })
    }

    pub(crate) fn publish(&self, frame: Frame) -> Result<()> {
        self.send(SupervisorCommand::Publish(frame))
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(SupervisorCommand::Shutdown);
    }

    /// Resolves once the driver loop has exited.
    pub(crate) async fn closed(&self) {
        self.tx.closed().await;
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Attempt Events
// ============================================================================

/// Completion reported by an attempt's tasks.
#[derive(Debug)]
pub(crate) enum AttemptEvent {
    /// The connect task finished.
    Opened {
        generation: Generation,
        result: Result<FrameLink>,
    },
    /// The link reported something.
    Transport {
        generation: Generation,
        event: TransportEvent,
    },
}

impl AttemptEvent {
    fn generation(&self) -> Generation {
        match self {
            Self::Opened { generation, .. } | Self::Transport { generation, .. } => *generation,
        }
    }
}

// ============================================================================
// Phase
// ============================================================================

/// Heart-beat bookkeeping for a ready connection.
#[derive(Debug, Clone, Copy)]
struct Liveness {
    send_every: Option<Duration>,
    next_send: Option<Instant>,
    expect_within: Option<Duration>,
    last_inbound: Instant,
}

impl Liveness {
    fn new(client: HeartBeat, server: HeartBeat, grace: u32, now: Instant) -> Self {
        let negotiated = HeartBeat::negotiate(client, server);
        Self {
            send_every: negotiated.send_every,
            next_send: negotiated.send_every.map(|every| deadline_after(now, every)),
            expect_within: negotiated.expect_every.map(|every| every.saturating_mul(grace)),
            last_inbound: now,
        }
    }

    fn silence_deadline(&self) -> Option<Instant> {
        self.expect_within
            .map(|within| deadline_after(self.last_inbound, within))
    }

    fn deadline(&self) -> Option<Instant> {
        match (self.next_send, self.silence_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[derive(Debug)]
enum Phase {
    Idle,
    Opening,
    Handshaking { deadline: Instant, superseded: bool },
    Ready(Liveness),
    Backoff { deadline: Instant },
}

// ============================================================================
// Supervisor
// ============================================================================

/// Driver loop state. Owned by exactly one task.
pub(crate) struct Supervisor {
    endpoint: Url,
    host: String,
    options: ChannelOptions,
    connector: Arc<dyn Connector>,
    registry: SharedRegistry,
    router: DispatchRouter,
    status: Arc<ChannelStatus>,

    commands: mpsc::UnboundedReceiver<SupervisorCommand>,
    events_tx: mpsc::UnboundedSender<AttemptEvent>,
    events_rx: mpsc::UnboundedReceiver<AttemptEvent>,

    generation: Generation,
    credential: Option<Credential>,
    phase: Phase,
    link: Option<FrameLink>,
    connecting: Option<JoinHandle<()>>,
    decoder: FrameDecoder,
    backoff: Backoff,
}

// ============================================================================
// Supervisor - Constructor
// ============================================================================

impl Supervisor {
    /// Creates a supervisor and the handle that drives it.
    pub(crate) fn new(
        endpoint: Url,
        options: ChannelOptions,
        connector: Arc<dyn Connector>,
        registry: SharedRegistry,
        router: DispatchRouter,
        status: Arc<ChannelStatus>,
    ) -> (Self, SupervisorHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let host = options.resolve_host(&endpoint);
        let backoff = Backoff::new(options.backoff);

        let supervisor = Self {
            endpoint,
            host,
            options,
            connector,
            registry,
            router,
            status,
            commands,
            events_tx,
            events_rx,
            generation: Generation::ZERO,
            credential: None,
            phase: Phase::Idle,
            link: None,
            connecting: None,
            decoder: FrameDecoder::new(),
            backoff,
        };

        (supervisor, SupervisorHandle { tx })
    }

    /// Spawns the driver loop.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

// ============================================================================
// Supervisor - Driver Loop
// ============================================================================

impl Supervisor {
    async fn run(mut self) {
        debug!(endpoint = %self.endpoint, transport = self.connector.name(), "Supervisor started");

        loop {
            let deadline = self.deadline();

            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(SupervisorCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }

                () = sleep_until_opt(deadline) => {
                    self.handle_deadline(Instant::now());
                }
            }
        }

        self.end_session(false);
        debug!("Supervisor stopped");
    }

    fn deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Handshaking { deadline, .. } | Phase::Backoff { deadline } => Some(*deadline),
            Phase::Ready(liveness) => liveness.deadline(),
            Phase::Idle | Phase::Opening => None,
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

// ============================================================================
// Supervisor - Commands
// ============================================================================

impl Supervisor {
    pub(crate) fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::Start(credential) => self.start(credential),
            SupervisorCommand::Refresh(credential) => self.refresh(credential),
            SupervisorCommand::Expire => {
                info!("Credential expired, disconnecting");
                self.end_session(false);
            }
            SupervisorCommand::Clear => {
                info!("Credential cleared, ending session");
                self.end_session(true);
            }
            SupervisorCommand::Subscribe { destination } => self.sync_subscribe(&destination),
            SupervisorCommand::Unsubscribe {
                destination,
                id,
                wire,
            } => self.sync_unsubscribe(&destination, id, wire),
            SupervisorCommand::Publish(frame) => self.publish(frame),
            SupervisorCommand::Shutdown => self.end_session(false),
        }
    }

    fn start(&mut self, credential: Credential) {
        if !matches!(self.phase, Phase::Idle) {
            debug!("Credential issued while active, treating as refresh");
            self.refresh(credential);
            return;
        }

        info!("Credential issued, connecting");
        self.credential = Some(credential);
        self.backoff.reset();
        self.begin_attempt();
    }

    fn refresh(&mut self, credential: Credential) {
        if matches!(self.phase, Phase::Idle) {
            self.start(credential);
            return;
        }

        if self.credential.as_ref() == Some(&credential) {
            debug!(generation = %self.generation, "Refresh carries the current credential, ignoring");
            return;
        }

        self.credential = Some(credential);

        if let Phase::Handshaking { superseded, .. } = &mut self.phase {
            debug!(generation = %self.generation, "Handshake in flight, superseding after acknowledgment");
            *superseded = true;
            return;
        }

        match self.phase {
            Phase::Opening => {
                debug!(generation = %self.generation, "Pending attempt will use the refreshed credential");
            }
            Phase::Ready(_) => {
                info!(generation = %self.generation, "Credential refreshed, reconnecting");
                self.status.set_state(ConnectionState::Reconnecting);
                self.teardown();
                self.begin_attempt();
            }
            Phase::Backoff { .. } => {
                info!("Credential refreshed during backoff, retrying now");
                self.backoff.reset();
                self.teardown();
                self.begin_attempt();
            }
            Phase::Idle | Phase::Handshaking { .. } => {}
        }
    }

    fn sync_subscribe(&mut self, destination: &str) {
        if !self.status.is_ready() {
            trace!(destination, "Not ready, subscription waits for replay");
            return;
        }

        let claimed = self.registry.lock().claim(destination, self.generation);
        if let Some(id) = claimed {
            debug!(destination, %id, generation = %self.generation, "Subscribing");
            let frame = Frame::subscribe(&id.wire_id(), destination);
            if let Err(e) = self.send_frame(&frame) {
                self.fail_attempt(e);
            }
        }
    }

    fn sync_unsubscribe(&mut self, destination: &str, id: SubscriptionId, wire: Option<Generation>) {
        if !self.status.is_ready() || wire != Some(self.generation) {
            trace!(destination, %id, "Subscription not live on this connection");
            return;
        }
        if destination == self.options.personal_destination {
            return;
        }

        debug!(destination, %id, generation = %self.generation, "Unsubscribing");
        if let Err(e) = self.send_frame(&Frame::unsubscribe(&id.wire_id())) {
            self.fail_attempt(e);
        }
    }

    fn publish(&mut self, frame: Frame) {
        if !self.status.is_ready() {
            let destination = frame.header("destination").unwrap_or_default();
            warn!(destination, error = %Error::NotConnected, "Dropping publish");
            return;
        }

        if let Err(e) = self.send_frame(&frame) {
            self.fail_attempt(e);
        }
    }
}

// ============================================================================
// Supervisor - Attempts
// ============================================================================

impl Supervisor {
    /// Opens a new transport under a fresh generation.
    fn begin_attempt(&mut self) {
        if self.credential.is_none() {
            warn!("No credential, not connecting");
            self.end_session(false);
            return;
        }

        self.advance_generation();
        let generation = self.generation;

        self.phase = Phase::Opening;
        self.decoder = FrameDecoder::new();
        self.status.set_state(ConnectionState::Connecting);

        let events_tx = self.events_tx.clone();
        let sink = FrameSink::new(move |event| {
            let _ = events_tx.send(AttemptEvent::Transport { generation, event });
        });

        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let connect_timeout = self.options.connect_timeout;
        let events_tx = self.events_tx.clone();

        debug!(%generation, endpoint = %endpoint, "Opening transport");

        self.connecting = Some(tokio::spawn(async move {
            let result = match timeout(connect_timeout, connector.open(&endpoint, sink)).await {
                Ok(result) => result,
                Err(_) => Err(Error::connection_timeout(
                    u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
                )),
            };
            // A rejected send drops the link, which closes it.
            let _ = events_tx.send(AttemptEvent::Opened { generation, result });
        }));
    }

    /// Moves to the next generation, rebuilding attempt state on overflow.
    fn advance_generation(&mut self) {
        match self.generation.next() {
            Some(next) => self.generation = next,
            None => {
                error!(error = %Error::GenerationExhausted, "Rebuilding attempt state");
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                self.events_tx = events_tx;
                self.events_rx = events_rx;
                self.registry.lock().reset_wire();
                self.generation = Generation::new(1);
            }
        }
    }

    /// Closes the link and cancels the in-flight attempt.
    fn teardown(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }

        if let Some(link) = self.link.take() {
            if matches!(self.phase, Phase::Ready(_)) {
                let _ = link.send(Frame::disconnect().encode());
            }
            link.close();
        }

        self.status.set_ready(false);
        self.decoder = FrameDecoder::new();
        self.phase = Phase::Idle;
        self.advance_generation();
    }

    /// Tears down and schedules a retry.
    fn fail_attempt(&mut self, error: Error) {
        warn!(generation = %self.generation, error = %error, "Connection attempt failed");
        self.teardown();

        if self.credential.is_none() {
            self.status.set_state(ConnectionState::Disconnected);
            return;
        }

        let delay = self.backoff.next_delay();
        self.phase = Phase::Backoff {
            deadline: deadline_after(Instant::now(), delay),
        };
        self.status.set_state(ConnectionState::Reconnecting);
        info!(delay = ?delay, "Reconnect scheduled");
    }

    /// Disconnects and forgets the credential.
    fn end_session(&mut self, clear_registry: bool) {
        self.teardown();
        self.credential = None;
        self.backoff.reset();

        if clear_registry {
            let removed = self.registry.lock().clear();
            debug!(count = removed.len(), "Subscriptions cleared");
        }

        self.status.set_state(ConnectionState::Disconnected);
    }
}

// ============================================================================
// Supervisor - Events
// ============================================================================

impl Supervisor {
    pub(crate) fn handle_event(&mut self, event: AttemptEvent) {
        let generation = event.generation();
        if generation != self.generation {
            trace!(%generation, current = %self.generation, "Discarding stale attempt event");
            return;
        }

        match event {
            AttemptEvent::Opened { result, .. } => self.on_opened(result),
            AttemptEvent::Transport { event, .. } => self.on_transport(event),
        }
    }

    fn on_opened(&mut self, result: Result<FrameLink>) {
        self.connecting = None;

        if !matches!(self.phase, Phase::Opening) {
            return;
        }

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                self.fail_attempt(e);
                return;
            }
        };

        let Some(credential) = self.credential.as_ref() else {
            link.close();
            self.end_session(false);
            return;
        };

        let connect = Frame::connect(&self.host, credential.as_str(), self.options.heart_beat);
        if let Err(e) = link.send(connect.encode()) {
            self.fail_attempt(e);
            return;
        }

        debug!(generation = %self.generation, "Transport open, CONNECT sent");
        self.link = Some(link);
        self.phase = Phase::Handshaking {
            deadline: deadline_after(Instant::now(), self.options.connect_timeout),
            superseded: false,
        };
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => self.on_text(&text),
            TransportEvent::Closed { reason } => {
                debug!(generation = %self.generation, ?reason, "Transport closed by remote");
                self.fail_attempt(Error::ConnectionClosed);
            }
            TransportEvent::Failed(e) => self.fail_attempt(e),
        }
    }

    fn on_text(&mut self, text: &str) {
        if let Phase::Ready(liveness) = &mut self.phase {
            liveness.last_inbound = Instant::now();
        }

        if let Err(e) = self.decoder.push(text.as_bytes()) {
            self.fail_attempt(e);
            return;
        }

        let generation = self.generation;
        while generation == self.generation {
            match self.decoder.next() {
                Ok(Some(Decoded::Heartbeat)) => trace!("Heart-beat received"),
                Ok(Some(Decoded::Frame(frame))) => self.on_frame(frame),
                Ok(None) => break,
                Err(e) => {
                    self.fail_attempt(e);
                    break;
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        match frame.command {
            FrameCommand::Connected => self.on_connected(&frame),
            FrameCommand::Message => match Message::from_frame(frame) {
                Ok(message) => {
                    self.router.dispatch(&message);
                }
                Err(e) => warn!(error = %e, "Dropping malformed MESSAGE frame"),
            },
            FrameCommand::Error => {
                let e = frame.to_error();
                if e.is_auth_failure() {
                    warn!(generation = %self.generation, error = %e, "Broker rejected credential");
                    self.end_session(false);
                } else {
                    self.fail_attempt(e);
                }
            }
            FrameCommand::Receipt => {
                trace!(receipt = ?frame.header("receipt-id"), "Receipt received");
            }
            other => warn!(command = %other, "Unexpected frame from broker"),
        }
    }

    fn on_connected(&mut self, frame: &Frame) {
        let Phase::Handshaking { superseded, .. } = self.phase else {
            warn!(generation = %self.generation, "Unexpected CONNECTED frame");
            return;
        };

        if superseded {
            info!(generation = %self.generation, "Connection superseded by newer credential, reconnecting");
            self.status.set_state(ConnectionState::Reconnecting);
            self.teardown();
            self.begin_attempt();
            return;
        }

        let server = frame
            .header("heart-beat")
            .map(str::parse::<HeartBeat>)
            .transpose()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed heart-beat header");
                None
            })
            .unwrap_or_default();

        let replayed = match self.replay() {
            Ok(count) => count,
            Err(e) => {
                self.fail_attempt(e);
                return;
            }
        };

        let liveness = Liveness::new(
            self.options.heart_beat,
            server,
            self.options.heartbeat_grace,
            Instant::now(),
        );
        self.phase = Phase::Ready(liveness);
        self.backoff.reset();
        self.status.set_ready(true);
        self.status.set_state(ConnectionState::Connected);

        info!(
            generation = %self.generation,
            replayed,
            send_every = ?liveness.send_every,
            expect_within = ?liveness.expect_within,
            "Connected"
        );
    }

    /// Subscribes the personal destination and every registry entry.
    fn replay(&self) -> Result<usize> {
        let link = self.link.as_ref().ok_or(Error::ConnectionClosed)?;

        let personal = &self.options.personal_destination;
        link.send(Frame::subscribe(&SubscriptionId::personal().wire_id(), personal).encode())?;

        let count = self.registry.lock().replay(self.generation, |destination, id| {
            link.send(Frame::subscribe(&id.wire_id(), destination).encode())
        })?;

        Ok(count + 1)
    }

    fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send_raw(frame.encode())
    }

    fn send_raw(&self, text: impl Into<String>) -> Result<()> {
        self.link.as_ref().ok_or(Error::NotConnected)?.send(text)
    }
}

// ============================================================================
// Supervisor - Timers
// ============================================================================

/// What a fired deadline asks the supervisor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    HandshakeTimeout,
    Retry,
    Silence(Duration),
    Heartbeat,
    Nothing,
}

impl Supervisor {
    pub(crate) fn handle_deadline(&mut self, now: Instant) {
        let action = match &mut self.phase {
            Phase::Handshaking { deadline, .. } if now >= *deadline => TimerAction::HandshakeTimeout,
            Phase::Backoff { deadline } if now >= *deadline => TimerAction::Retry,
            Phase::Ready(liveness) => match (liveness.silence_deadline(), liveness.next_send) {
                (Some(silence), _) if now >= silence => {
                    TimerAction::Silence(now.saturating_duration_since(liveness.last_inbound))
                }
                (_, Some(next)) if now >= next => {
                    liveness.next_send = liveness.send_every.map(|every| deadline_after(now, every));
                    TimerAction::Heartbeat
                }
                _ => TimerAction::Nothing,
            },
            _ => TimerAction::Nothing,
        };

        match action {
            TimerAction::HandshakeTimeout => {
                let ms = u64::try_from(self.options.connect_timeout.as_millis()).unwrap_or(u64::MAX);
                self.fail_attempt(Error::connection_timeout(ms));
            }
            TimerAction::Retry => {
                debug!("Backoff elapsed, retrying");
                self.begin_attempt();
            }
            TimerAction::Silence(elapsed) => {
                let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                self.fail_attempt(Error::heartbeat_timeout(ms));
            }
            TimerAction::Heartbeat => {
                trace!(generation = %self.generation, "Sending heart-beat");
                if let Err(e) = self.send_raw("\n") {
                    self.fail_attempt(e);
                }
            }
            TimerAction::Nothing => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
