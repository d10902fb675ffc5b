//! Error types
//!
//! Typed errors for target parsing, transport operations and frame decoding,
//! with descriptive messages and recovery suggestions.

use thiserror::Error;

/// Errors raised while building a session target
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// Address does not use a WebSocket scheme
    #[error("Unsupported scheme in '{address}': expected ws:// or wss://")]
    UnsupportedScheme { address: String },

    /// Address has no host part
    #[error("Missing host in '{address}'")]
    MissingHost { address: String },

    /// Address is not a well-formed URL
    #[error("Invalid address '{address}': {details}")]
    Invalid { address: String, details: String },

    /// Path segment is empty or contains reserved characters
    #[error("Invalid path segment '{segment}': {details}")]
    InvalidSegment { segment: String, details: String },
}

/// Errors that can occur on the underlying transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Failed to connect to '{url}': {details}")]
    Connect { url: String, details: String },

    /// Outbound frame could not be written
    #[error("Failed to send frame: {0}")]
    Send(String),

    /// Inbound stream failed
    #[error("Failed to receive frame: {0}")]
    Receive(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl TransportError {
    /// Check if retrying can succeed without changing the target
    ///
    /// Sessions retry every failure; the distinction only affects logging.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TransportError::WebSocket(tokio_tungstenite::tungstenite::Error::Url(_))
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            TransportError::Connect { .. } => {
                Some("Check that the server is running and the target address is reachable.")
            }
            TransportError::WebSocket(tokio_tungstenite::tungstenite::Error::Url(_)) => {
                Some("Check the target address. It must look like ws://host:port/path.")
            }
            _ => None,
        }
    }
}

/// Errors produced while decoding an inbound frame
#[derive(Error, Debug)]
pub enum FrameError {
    /// Frame is not valid JSON
    #[error("Malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// Envelope has no `type` discriminator
    #[error("Envelope is missing its 'type' field")]
    MissingType,

    /// Snapshot envelope has no `state` payload
    #[error("'{kind}' envelope is missing its 'state' field")]
    MissingState { kind: String },

    /// Snapshot payload does not match the consumer's type
    #[error("Snapshot payload does not match the expected shape: {0}")]
    Payload(serde_json::Error),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
