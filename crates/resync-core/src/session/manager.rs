//! Connection manager
//!
//! A [`Session`] keeps one logical connection to a state server alive. It
//! spawns a driver task that owns the state machine, the reconnect and
//! liveness timers, the current transport and the consumer's handler. All
//! transport notifications reach the driver through a single channel, tagged
//! with the [`ConnectionId`] they belong to.

use std::future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::machine::{Action, ConnectionId, ConnectionStatus, Event, Machine, Phase};
use super::message::{
    FrameDecoder, Inbound, StateUpdate, DEFAULT_ACK_TOKEN, DEFAULT_PROBE_TOKEN,
};
use super::target::SessionTarget;
use super::transport::{Link, Transport, WebSocketTransport};
use crate::error::TransportError;

/// Default interval between liveness probes
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest liveness interval a session will run with
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Tunables for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Reconnect delay policy
    pub backoff: Backoff,
    /// Interval between liveness probes while connected
    pub heartbeat_interval: Duration,
    /// Frame sent as a liveness probe
    pub probe_token: String,
    /// Frame the server answers a probe with
    pub ack_token: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            probe_token: DEFAULT_PROBE_TOKEN.to_string(),
            ack_token: DEFAULT_ACK_TOKEN.to_string(),
        }
    }
}

/// Commands sent to the driver task
#[derive(Debug)]
enum SessionCommand {
    Shutdown,
}

enum Lifecycle {
    Idle,
    Running(mpsc::UnboundedSender<SessionCommand>),
    Stopped,
}

/// Stop flag shared by the handle and the driver
///
/// The driver holds the lock across every handler call, so closing the gate
/// waits for a call in progress to return.
#[derive(Debug, Default)]
struct StopGate {
    stopped: Mutex<bool>,
}

impl StopGate {
    fn lock(&self) -> MutexGuard<'_, bool> {
        // A panicking handler must not wedge stop()
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        *self.lock() = true;
    }

    fn is_closed(&self) -> bool {
        *self.lock()
    }
}

/// Handle to one logical session
///
/// Dropping the handle stops the session.
pub struct Session {
    target: SessionTarget,
    options: SessionOptions,
    transport: Arc<dyn Transport>,
    /// Short label used in log lines
    label: String,
    lifecycle: Lifecycle,
    status: Arc<watch::Sender<ConnectionStatus>>,
    status_rx: watch::Receiver<ConnectionStatus>,
    attempt: Arc<AtomicU32>,
    gate: Arc<StopGate>,
}

impl Session {
    /// Create a session in the idle state
    pub fn new(target: SessionTarget, options: SessionOptions, transport: impl Transport) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let label = format!("resync-{}", &uuid::Uuid::new_v4().to_string()[..8]);

        Self {
            target,
            options,
            transport: Arc::new(transport),
            label,
            lifecycle: Lifecycle::Idle,
            status: Arc::new(status_tx),
            status_rx,
            attempt: Arc::new(AtomicU32::new(0)),
            gate: Arc::new(StopGate::default()),
        }
    }

    /// Create a WebSocket session and start it
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<T, F>(target: SessionTarget, options: SessionOptions, on_message: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(StateUpdate<T>) + Send + 'static,
    {
        let mut session = Self::new(target, options, WebSocketTransport);
        session.start(on_message);
        session
    }

    /// Start the session
    ///
    /// `on_message` is called once per snapshot, in the order received.
    /// Returns `false` without doing anything if the session was already
    /// started or stopped. Must be called from within a tokio runtime.
    pub fn start<T, F>(&mut self, on_message: F) -> bool
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(StateUpdate<T>) + Send + 'static,
    {
        if !matches!(self.lifecycle, Lifecycle::Idle) {
            debug!(session = %self.label, "Ignoring start on a session that already ran");
            return false;
        }

        let mut heartbeat_interval = self.options.heartbeat_interval;
        if heartbeat_interval < MIN_HEARTBEAT_INTERVAL {
            warn!(
                session = %self.label,
                "Liveness interval {:?} is too short, using {:?}",
                heartbeat_interval,
                MIN_HEARTBEAT_INTERVAL
            );
            heartbeat_interval = MIN_HEARTBEAT_INTERVAL;
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            label: self.label.clone(),
            url: self.target.url().to_string(),
            probe_token: self.options.probe_token.clone(),
            heartbeat_interval,
            transport: Arc::clone(&self.transport),
            decoder: FrameDecoder::new(&self.options.ack_token),
            machine: Machine::new(self.options.backoff),
            on_message,
            status: Arc::clone(&self.status),
            attempt: Arc::clone(&self.attempt),
            gate: Arc::clone(&self.gate),
            commands: command_rx,
            events_tx,
            events_rx,
            connecting: None,
            current: None,
            reconnect: None,
            heartbeat: None,
            _snapshot: PhantomData,
        };

        info!(session = %self.label, url = %self.target, "Starting session");
        tokio::spawn(driver.run());
        self.lifecycle = Lifecycle::Running(command_tx);
        true
    }

    /// Stop the session
    ///
    /// Cancels any pending reconnect and liveness probe and drops the
    /// transport without waiting for its close handshake. A handler call
    /// already running finishes before this returns, and none begins after.
    /// Calling it again is a no-op.
    pub fn stop(&mut self) {
        self.gate.close();

        match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(commands) => {
                info!(session = %self.label, "Stopping session");
                let _ = commands.send(SessionCommand::Shutdown);
            }
            Lifecycle::Idle | Lifecycle::Stopped => {}
        }

        self.status.send_if_modified(|status| {
            let changed = *status != ConnectionStatus::Stopped;
            *status = ConnectionStatus::Stopped;
            changed
        });
    }

    /// Whether the transport is currently open
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Completed reconnect attempts since the last successful open
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// Label identifying this session in logs
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Notifications from transport tasks
enum TransportEvent {
    Connected(ConnectionId, Link),
    Failed(ConnectionId, TransportError),
    Frame(ConnectionId, String),
    Closed(ConnectionId),
}

/// The open transport
struct LiveConnection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
}

/// Owns all mutable session state; runs as one task
struct Driver<T, F> {
    label: String,
    url: String,
    probe_token: String,
    heartbeat_interval: Duration,
    transport: Arc<dyn Transport>,
    decoder: FrameDecoder,
    machine: Machine,
    on_message: F,
    status: Arc<watch::Sender<ConnectionStatus>>,
    attempt: Arc<AtomicU32>,
    gate: Arc<StopGate>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    /// Connect attempt in flight
    connecting: Option<(ConnectionId, JoinHandle<()>)>,
    current: Option<LiveConnection>,
    reconnect: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
    _snapshot: PhantomData<fn() -> T>,
}

impl<T, F> Driver<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: FnMut(StateUpdate<T>) + Send + 'static,
{
    async fn run(mut self) {
        self.apply(Event::Start);

        while self.machine.phase() != Phase::Disposed {
            tokio::select! {
                biased;

                _ = self.commands.recv() => {
                    // Shutdown, or the handle went away
                    self.apply(Event::Stop);
                }

                Some(event) = self.events_rx.recv() => {
                    self.on_transport_event(event);
                }

                () = wait_reconnect(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.apply(Event::ReconnectElapsed);
                }

                () = wait_heartbeat(&mut self.heartbeat) => {
                    self.apply(Event::HeartbeatTick);
                }
            }
        }

        debug!(session = %self.label, "Session driver finished");
    }

    fn apply(&mut self, event: Event) {
        for action in self.machine.handle(event) {
            self.perform(action);
        }
        self.attempt.store(self.machine.attempt(), Ordering::SeqCst);
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::Connect(id) => {
                info!(
                    session = %self.label,
                    connection = %id,
                    attempt = self.machine.attempt(),
                    "Connecting to {}",
                    self.url
                );
                let connecting = self.transport.connect(&self.url);
                let events = self.events_tx.clone();
                let task = tokio::spawn(async move {
                    let event = match connecting.await {
                        Ok(link) => TransportEvent::Connected(id, link),
                        Err(e) => TransportEvent::Failed(id, e),
                    };
                    let _ = events.send(event);
                });
                self.connecting = Some((id, task));
            }
            Action::Close(id) => {
                if let Some((pending, task)) = self.connecting.take() {
                    if pending == id {
                        task.abort();
                    } else {
                        self.connecting = Some((pending, task));
                    }
                }
                if self.current.as_ref().is_some_and(|conn| conn.id == id) {
                    if let Some(conn) = self.current.take() {
                        debug!(session = %self.label, connection = %id, "Dropping transport");
                        conn.reader.abort();
                    }
                }
            }
            Action::StartHeartbeat => {
                let period = self.heartbeat_interval;
                let mut interval = time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(interval);
            }
            Action::StopHeartbeat => {
                self.heartbeat = None;
            }
            Action::ScheduleReconnect(delay) => {
                info!(session = %self.label, "Reconnecting in {:?}", delay);
                self.reconnect = Some(Box::pin(time::sleep(delay)));
            }
            Action::CancelReconnect => {
                self.reconnect = None;
            }
            Action::SendProbe(id) => {
                if let Some(conn) = self.current.as_ref().filter(|conn| conn.id == id) {
                    debug!(session = %self.label, connection = %id, "Sending liveness probe");
                    // A failed send means the reader is about to report the close
                    let _ = conn.outbound.send(self.probe_token.clone());
                }
            }
            Action::Status(status) => {
                if status != ConnectionStatus::Stopped && self.gate.is_closed() {
                    return;
                }
                info!(session = %self.label, "Connection {}", status);
                self.status.send_replace(status);
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(id, link) => {
                self.clear_connecting(id);
                self.apply(Event::Opened(id));

                if self.machine.open_connection() == Some(id) {
                    self.install(id, link);
                } else {
                    debug!(session = %self.label, connection = %id, "Discarding superseded transport");
                }
            }
            TransportEvent::Failed(id, e) => {
                self.clear_connecting(id);
                let hint = e
                    .recovery_suggestion()
                    .map(|hint| format!(" ({})", hint))
                    .unwrap_or_default();
                if e.is_recoverable() {
                    warn!(session = %self.label, connection = %id, "{}{}", e, hint);
                } else {
                    error!(session = %self.label, connection = %id, "{}{}", e, hint);
                }
                self.apply(Event::Closed(id));
            }
            TransportEvent::Frame(id, frame) => {
                if self.machine.accepts_frames_from(id) {
                    self.deliver(&frame);
                } else {
                    debug!(session = %self.label, connection = %id, "Dropping frame from stale transport");
                }
            }
            TransportEvent::Closed(id) => {
                if self.current.as_ref().is_some_and(|conn| conn.id == id) {
                    self.current = None;
                }
                info!(session = %self.label, connection = %id, "Transport closed");
                self.apply(Event::Closed(id));
            }
        }
    }

    fn clear_connecting(&mut self, id: ConnectionId) {
        if self.connecting.as_ref().is_some_and(|(pending, _)| *pending == id) {
            self.connecting = None;
        }
    }

    /// Start forwarding frames from a freshly opened transport
    fn install(&mut self, id: ConnectionId, link: Link) {
        let Link {
            outbound,
            mut inbound,
        } = link;
        let events = self.events_tx.clone();

        let reader = tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                if events.send(TransportEvent::Frame(id, frame)).is_err() {
                    return;
                }
            }
            let _ = events.send(TransportEvent::Closed(id));
        });

        self.current = Some(LiveConnection {
            id,
            outbound,
            reader,
        });
    }

    fn deliver(&mut self, frame: &str) {
        match self.decoder.decode::<T>(frame) {
            Ok(Inbound::Ack) => {
                debug!(session = %self.label, "Liveness acknowledged");
            }
            Ok(Inbound::StateUpdate(update)) => {
                let stopped = self.gate.lock();
                if *stopped {
                    return;
                }
                (self.on_message)(update);
            }
            Ok(Inbound::Ignored { kind }) => {
                debug!(session = %self.label, "Ignoring '{}' message", kind);
            }
            Err(e) => {
                warn!(session = %self.label, "Dropping inbound frame: {}", e);
            }
        }
    }
}

async fn wait_reconnect(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}

async fn wait_heartbeat(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{Outcome, ScriptedTransport};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicBool;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn target() -> SessionTarget {
        SessionTarget::parse("ws://localhost:8000/ws")
            .unwrap()
            .with_segment("a1b2c3d4")
            .unwrap()
    }

    /// Start a session that forwards snapshot states into a channel
    fn start_session(
        transport: &ScriptedTransport,
    ) -> (Session, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = Session::new(target(), SessionOptions::default(), transport.clone());
        assert!(session.start(move |update: StateUpdate<Value>| {
            let _ = tx.send(update.state);
        }));
        (session, rx)
    }

    async fn wait_for(session: &Session, wanted: ConnectionStatus) {
        let mut status = session.subscribe_status();
        status.wait_for(|s| *s == wanted).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_disconnect_and_recover() {
        let transport = ScriptedTransport::new(Outcome::Accept);
        let (session, mut states) = start_session(&transport);

        wait_for(&session, ConnectionStatus::Connected).await;
        assert!(session.is_connected());
        assert_eq!(transport.urls(), vec!["ws://localhost:8000/ws/a1b2c3d4"]);

        let peer = transport.take_peer();
        peer.push(r#"{"type":"state_update","state":{"pot":40}}"#);
        assert_eq!(states.recv().await.unwrap(), json!({"pot": 40}));

        let closed_at = Instant::now();
        peer.close();
        wait_for(&session, ConnectionStatus::Reconnecting).await;
        assert!(!session.is_connected());
        assert_eq!(transport.attempts().len(), 1);

        wait_for(&session, ConnectionStatus::Connected).await;
        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1] - closed_at, ms(500));
        assert_eq!(session.attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failures_back_off() {
        let transport = ScriptedTransport::new(Outcome::Refuse);
        let (session, _states) = start_session(&transport);

        time::sleep(ms(12_600)).await;

        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 6);
        let delays: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(delays, vec![ms(500), ms(1000), ms(2000), ms(4000), ms(5000)]);
        assert_eq!(session.status(), ConnectionStatus::Reconnecting);
        assert_eq!(session.attempt(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_after_successful_open() {
        let transport = ScriptedTransport::new(Outcome::Accept).then(&[
            Outcome::Refuse,
            Outcome::Refuse,
            Outcome::Refuse,
        ]);
        let (session, _states) = start_session(&transport);

        wait_for(&session, ConnectionStatus::Connected).await;
        assert_eq!(transport.attempts().len(), 4);
        assert_eq!(session.attempt(), 0);

        // The next outage starts again from the base delay
        let closed_at = Instant::now();
        transport.take_peer().close();
        wait_for(&session, ConnectionStatus::Reconnecting).await;
        wait_for(&session, ConnectionStatus::Connected).await;
        assert_eq!(transport.attempts()[4] - closed_at, ms(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_creates_one_transport() {
        let transport = ScriptedTransport::new(Outcome::Hang);
        let (mut session, _states) = start_session(&transport);

        assert!(!session.start(|_: StateUpdate<Value>| {}));
        time::sleep(ms(60_000)).await;
        assert!(!session.start(|_: StateUpdate<Value>| {}));

        assert_eq!(transport.attempts().len(), 1);
        assert_eq!(session.status(), ConnectionStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_stop_is_noop() {
        let transport = ScriptedTransport::new(Outcome::Accept);
        let mut session = Session::new(target(), SessionOptions::default(), transport.clone());

        session.stop();
        assert!(!session.start(|_: StateUpdate<Value>| {}));
        time::sleep(ms(1000)).await;

        assert!(transport.attempts().is_empty());
        assert_eq!(session.status(), ConnectionStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_reconnect() {
        let transport = ScriptedTransport::new(Outcome::Refuse);
        let (mut session, _states) = start_session(&transport);

        wait_for(&session, ConnectionStatus::Reconnecting).await;
        session.stop();
        session.stop();

        time::sleep(ms(60_000)).await;
        assert_eq!(transport.attempts().len(), 1);
        assert_eq!(session.status(), ConnectionStatus::Stopped);
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_connecting() {
        let transport = ScriptedTransport::new(Outcome::Hang);
        let (mut session, _states) = start_session(&transport);

        time::sleep(ms(1000)).await;
        session.stop();
        time::sleep(ms(60_000)).await;

        assert_eq!(transport.attempts().len(), 1);
        assert_eq!(session.status(), ConnectionStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delivery_after_stop() {
        let transport = ScriptedTransport::new(Outcome::Accept);
        let (mut session, mut states) = start_session(&transport);
        wait_for(&session, ConnectionStatus::Connected).await;

        let peer = transport.take_peer();
        peer.push(r#"{"type":"state_update","state":{"pot":10}}"#);
        session.stop();

        // The handler is dropped with the driver without ever being called
        assert!(states.recv().await.is_none());
        time::sleep(ms(10)).await;
        assert!(peer.is_closed_by_client());
        assert_eq!(transport.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_session_stops_it() {
        let transport = ScriptedTransport::new(Outcome::Accept);
        let (session, mut states) = start_session(&transport);
        wait_for(&session, ConnectionStatus::Connected).await;

        let peer = transport.take_peer();
        drop(session);

        assert!(states.recv().await.is_none());
        time::sleep(ms(10)).await;
        assert!(peer.is_closed_by_client());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_state_updates_reach_handler() {
        let transport = ScriptedTransport::new(Outcome::Accept);
        let (session, mut states) = start_session(&transport);
        wait_for(&session, ConnectionStatus::Connected).await;

        let peer = transport.take_peer();
        peer.push("__pong__");
        peer.push("{not json");
        peer.push(r#"{"type":"chat","text":"gg"}"#);
        peer.push(r#"{"state":{"pot":1}}"#);
        peer.push(r#"{"type":"state_update","state":{"pot":20}}"#);
        peer.push(r#"{"type":"state_update","state":{"pot":30}}"#);

        assert_eq!(states.recv().await.unwrap(), json!({"pot": 20}));
        assert_eq!(states.recv().await.unwrap(), json!({"pot": 30}));
        assert!(session.is_connected());
        assert_eq!(transport.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_only_while_open() {
        let transport = ScriptedTransport::new(Outcome::Accept);
        let (mut session, _states) = start_session(&transport);
        wait_for(&session, ConnectionStatus::Connected).await;
        let mut first = transport.take_peer();

        time::sleep(ms(25_000)).await;
        assert_eq!(first.received(), vec!["__ping__", "__ping__"]);

        // Losing the connection cancels probes on it
        first.close();
        wait_for(&session, ConnectionStatus::Reconnecting).await;
        wait_for(&session, ConnectionStatus::Connected).await;
        let mut second = transport.take_peer();

        time::sleep(ms(5_000)).await;
        assert!(second.received().is_empty());
        time::sleep(ms(6_000)).await;
        assert_eq!(second.received(), vec!["__ping__"]);

        session.stop();
        time::sleep(ms(60_000)).await;
        assert!(second.received().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_options() {
        let transport = ScriptedTransport::new(Outcome::Refuse).then(&[Outcome::Accept]);
        let options = SessionOptions {
            backoff: Backoff::new(ms(100), ms(300)),
            heartbeat_interval: ms(1000),
            probe_token: "ping".to_string(),
            ack_token: "pong".to_string(),
        };
        let (tx, mut states) = mpsc::unbounded_channel();
        let mut session = Session::new(target(), options, transport.clone());
        session.start(move |update: StateUpdate<Value>| {
            let _ = tx.send(update.state);
        });

        wait_for(&session, ConnectionStatus::Connected).await;
        let mut peer = transport.take_peer();
        time::sleep(ms(1500)).await;
        assert_eq!(peer.received(), vec!["ping"]);

        peer.push("pong");
        peer.push(r#"{"type":"state_update","state":"flop"}"#);
        assert_eq!(states.recv().await.unwrap(), json!("flop"));

        let closed_at = Instant::now();
        peer.close();
        time::sleep(ms(1050)).await;

        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 5);
        assert_eq!(attempts[1] - closed_at, ms(100));
        let delays: Vec<Duration> = attempts[1..].windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(delays, vec![ms(200), ms(300), ms(300)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_heartbeat_interval_still_recovers() {
        let transport = ScriptedTransport::new(Outcome::Accept);
        let options = SessionOptions {
            heartbeat_interval: Duration::ZERO,
            ..SessionOptions::default()
        };
        let mut session = Session::new(target(), options, transport.clone());
        assert!(session.start(|_: StateUpdate<Value>| {}));

        wait_for(&session, ConnectionStatus::Connected).await;
        let mut first = transport.take_peer();
        time::sleep(ms(5)).await;
        assert!(!first.received().is_empty());

        first.close();
        wait_for(&session, ConnectionStatus::Reconnecting).await;
        wait_for(&session, ConnectionStatus::Connected).await;
        assert_eq!(transport.attempts().len(), 2);

        session.stop();
        assert_eq!(session.status(), ConnectionStatus::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_running_handler() {
        let transport = ScriptedTransport::new(Outcome::Accept);
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicU32::new(0));

        let mut session = Session::new(target(), SessionOptions::default(), transport.clone());
        {
            let entered = Arc::clone(&entered);
            let finished = Arc::clone(&finished);
            let calls = Arc::clone(&calls);
            assert!(session.start(move |_: StateUpdate<Value>| {
                calls.fetch_add(1, Ordering::SeqCst);
                entered.store(true, Ordering::SeqCst);
                std::thread::sleep(ms(100));
                finished.store(true, Ordering::SeqCst);
            }));
        }

        wait_for(&session, ConnectionStatus::Connected).await;
        let peer = transport.take_peer();
        peer.push(r#"{"type":"state_update","state":1}"#);

        time::timeout(ms(5_000), async {
            while !entered.load(Ordering::SeqCst) {
                time::sleep(ms(1)).await;
            }
        })
        .await
        .unwrap();

        // The handler is mid-call; stop() returns only once it is done
        session.stop();
        assert!(finished.load(Ordering::SeqCst));

        peer.push(r#"{"type":"state_update","state":2}"#);
        time::sleep(ms(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
