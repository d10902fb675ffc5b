//! Wire message types
//!
//! Frames exchanged with the state server. Liveness frames are bare sentinel
//! tokens; everything else is a JSON envelope tagged by its `type` field.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::FrameError;

/// Default outbound liveness probe
pub const DEFAULT_PROBE_TOKEN: &str = "__ping__";

/// Default inbound acknowledgment of a probe
pub const DEFAULT_ACK_TOKEN: &str = "__pong__";

/// Envelope tag for full state snapshots
pub const STATE_UPDATE: &str = "state_update";

/// A full state snapshot pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate<T> {
    pub state: T,
}

/// Untyped envelope as it appears on the wire
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "present")]
    state: Option<Value>,
}

/// Keeps an explicit `null` state distinct from a missing one
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Result of decoding one inbound frame
#[derive(Debug, PartialEq)]
pub enum Inbound<T> {
    /// Probe acknowledgment; never reaches the consumer
    Ack,
    /// Snapshot envelope for the consumer
    StateUpdate(StateUpdate<T>),
    /// Envelope with a tag this client does not handle
    Ignored { kind: String },
}

/// Decodes inbound frames against the configured ack token
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    ack_token: String,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_TOKEN)
    }
}

impl FrameDecoder {
    pub fn new(ack_token: &str) -> Self {
        Self {
            ack_token: ack_token.to_string(),
        }
    }

    /// Decode a text frame
    ///
    /// The ack token is matched exactly before any JSON parsing happens.
    pub fn decode<T: DeserializeOwned>(&self, frame: &str) -> Result<Inbound<T>, FrameError> {
        if frame == self.ack_token {
            return Ok(Inbound::Ack);
        }

        let envelope: RawEnvelope = serde_json::from_str(frame)?;
        let kind = envelope.kind.ok_or(FrameError::MissingType)?;

        if kind != STATE_UPDATE {
            return Ok(Inbound::Ignored { kind });
        }

        let state = envelope
            .state
            .ok_or_else(|| FrameError::MissingState { kind: kind.clone() })?;
        let state = serde_json::from_value(state).map_err(FrameError::Payload)?;

        Ok(Inbound::StateUpdate(StateUpdate { state }))
    }
}
