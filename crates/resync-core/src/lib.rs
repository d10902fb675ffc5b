//! Resync Core Library
//!
//! This crate keeps a client in step with a server that pushes full state
//! snapshots over a WebSocket. It owns the connection lifecycle: connecting,
//! reconnecting with capped exponential backoff, probing liveness while the
//! link is open, and handing every decoded snapshot to the caller.
//!
//! # Architecture
//!
//! - **Machine**: pure state machine deciding what happens on each event
//! - **Session**: async driver that executes the machine's actions on tokio
//! - **Transport**: pluggable connection factory (WebSocket in production)
//!
//! # Quick Start
//!
//! ```text
//! let target = SessionTarget::parse("ws://localhost:8000/ws")?.with_segment("a1b2c3d4")?;
//! let mut session = Session::connect(target, SessionOptions::default(), |update: StateUpdate<Value>| {
//!     println!("{}", update.state);
//! });
//!
//! // Later
//! session.stop();
//! ```
//!
//! # Modules
//!
//! - `session`: Connection manager and its building blocks (main entry point)
//! - `error`: Error types for targets, transports and frames
//! - `config`: Application configuration

pub mod config;
pub mod error;
pub mod session;

pub use config::Config;
pub use error::{FrameError, TargetError, TransportError, TransportResult};
pub use session::{
    Backoff, ConnectionStatus, Session, SessionOptions, SessionTarget, StateUpdate, Transport,
    WebSocketTransport,
};
