//! Connection lifecycle state machine
//!
//! Pure and synchronous: the session driver feeds it [`Event`]s and carries
//! out the [`Action`]s it returns. Transport events carry the
//! [`ConnectionId`] they originate from; events from any connection other
//! than the current one are stale and change nothing.
//!
//! ```text
//! Idle --Start--> Connecting --Opened--> Open
//!                   |   ^                  |
//!              Closed   ReconnectElapsed   Closed
//!                   v   |                  |
//!                 Reconnecting <-----------+
//!
//! any --Stop--> Disposed
//! ```

use std::fmt;
use std::time::Duration;

use super::backoff::Backoff;

/// Identity of one transport instance within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection status as seen by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Session not started yet
    Disconnected,
    /// Transport is being established
    Connecting,
    /// Transport is open
    Connected,
    /// Transport lost, reconnect scheduled
    Reconnecting,
    /// Session stopped by the caller
    Stopped,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting(ConnectionId),
    Open(ConnectionId),
    /// No transport; a reconnect timer is pending
    Reconnecting,
    Disposed,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Caller started the session
    Start,
    /// Transport finished its handshake
    Opened(ConnectionId),
    /// Transport failed to connect, errored or closed
    Closed(ConnectionId),
    /// Reconnect timer fired
    ReconnectElapsed,
    /// Liveness timer fired
    HeartbeatTick,
    /// Caller stopped the session
    Stop,
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Begin establishing a new transport
    Connect(ConnectionId),
    /// Tear down a transport without waiting for its close handshake
    Close(ConnectionId),
    StartHeartbeat,
    StopHeartbeat,
    /// Arm the reconnect timer
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// Send one liveness probe on the given transport
    SendProbe(ConnectionId),
    /// Publish a new connection status
    Status(ConnectionStatus),
}

/// Connection lifecycle state machine
#[derive(Debug)]
pub struct Machine {
    phase: Phase,
    /// Completed reconnect attempts since the last successful open
    attempt: u32,
    next_id: u64,
    backoff: Backoff,
}

impl Machine {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            phase: Phase::Idle,
            attempt: 0,
            next_id: 0,
            backoff,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The connection frames may currently be accepted from
    pub fn open_connection(&self) -> Option<ConnectionId> {
        match self.phase {
            Phase::Open(id) => Some(id),
            _ => None,
        }
    }

    /// Whether a frame from `id` should be delivered
    pub fn accepts_frames_from(&self, id: ConnectionId) -> bool {
        self.open_connection() == Some(id)
    }

    /// Apply an event and return the side effects to carry out
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        match (self.phase, event) {
            (Phase::Disposed, _) => Vec::new(),

            (Phase::Idle, Event::Start) => self.begin_connect(),
            (_, Event::Start) => Vec::new(),

            (Phase::Connecting(current), Event::Opened(id)) if current == id => {
                self.phase = Phase::Open(id);
                self.attempt = 0;
                vec![
                    Action::StartHeartbeat,
                    Action::Status(ConnectionStatus::Connected),
                ]
            }
            // A transport nobody is waiting for any more
            (_, Event::Opened(id)) => vec![Action::Close(id)],

            (Phase::Connecting(current), Event::Closed(id)) if current == id => {
                self.schedule_reconnect(Vec::new())
            }
            (Phase::Open(current), Event::Closed(id)) if current == id => {
                self.schedule_reconnect(vec![Action::StopHeartbeat])
            }
            (_, Event::Closed(_)) => Vec::new(),

            (Phase::Reconnecting, Event::ReconnectElapsed) => {
                self.attempt = self.attempt.saturating_add(1);
                self.begin_connect()
            }
            (_, Event::ReconnectElapsed) => Vec::new(),

            (Phase::Open(id), Event::HeartbeatTick) => vec![Action::SendProbe(id)],
            (_, Event::HeartbeatTick) => Vec::new(),

            (phase, Event::Stop) => {
                self.phase = Phase::Disposed;
                let mut actions = match phase {
                    Phase::Connecting(id) => vec![Action::Close(id)],
                    Phase::Open(id) => vec![Action::StopHeartbeat, Action::Close(id)],
                    Phase::Reconnecting => vec![Action::CancelReconnect],
                    Phase::Idle | Phase::Disposed => Vec::new(),
                };
                actions.push(Action::Status(ConnectionStatus::Stopped));
                actions
            }
        }
    }

    fn begin_connect(&mut self) -> Vec<Action> {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.phase = Phase::Connecting(id);
        vec![
            Action::Status(ConnectionStatus::Connecting),
            Action::Connect(id),
        ]
    }

    fn schedule_reconnect(&mut self, mut actions: Vec<Action>) -> Vec<Action> {
        self.phase = Phase::Reconnecting;
        actions.push(Action::Status(ConnectionStatus::Reconnecting));
        actions.push(Action::ScheduleReconnect(self.backoff.delay(self.attempt)));
        actions
    }
}
