//! Self-healing session with a state server
//!
//! Keeps one logical WebSocket connection alive and hands every full state
//! snapshot the server pushes to a consumer callback.
//!
//! ## Protocol
//!
//! 1. Connect to the session target (e.g. `ws://host:8000/ws/<game-id>`)
//! 2. Receive `{"type": "state_update", "state": ...}` envelopes
//! 3. Send `__ping__` every 10 seconds while connected; the server answers
//!    `__pong__`
//! 4. On any close or error, reconnect after 500ms, 1s, 2s, 4s, then every 5s
//!
//! ## Usage
//!
//! ```ignore
//! let target = SessionTarget::parse("ws://localhost:8000/ws")?.with_segment("a1b2c3d4")?;
//! let mut session = Session::connect(target, SessionOptions::default(), |update: StateUpdate<Value>| {
//!     println!("{}", update.state);
//! });
//! // ...
//! session.stop();
//! ```

mod backoff;
mod machine;
mod manager;
mod message;
mod target;
#[cfg(test)]
mod testing;
mod transport;

pub use backoff::{Backoff, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY};
pub use machine::{Action, ConnectionId, ConnectionStatus, Event, Machine, Phase};
pub use manager::{Session, SessionOptions, DEFAULT_HEARTBEAT_INTERVAL};
pub use message::{
    FrameDecoder, Inbound, StateUpdate, DEFAULT_ACK_TOKEN, DEFAULT_PROBE_TOKEN, STATE_UPDATE,
};
pub use target::SessionTarget;
pub use transport::{Link, Transport, WebSocketTransport};
