//! Session target
//!
//! The endpoint a session connects to: a WebSocket base address plus the
//! path segments that route the session on the server (e.g. `/ws/<game-id>`).

use std::fmt;

use url::{ParseError, Url};

use crate::error::TargetError;

/// Immutable connection endpoint for one logical session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionTarget {
    url: Url,
}

impl SessionTarget {
    /// Parse a base address
    ///
    /// Accepts `ws://` and `wss://` addresses with a host. A trailing slash
    /// on the path is dropped; any query string is kept.
    pub fn parse(address: &str) -> Result<Self, TargetError> {
        let address = address.trim();
        let mut url = Url::parse(address).map_err(|e| match e {
            ParseError::EmptyHost => TargetError::MissingHost {
                address: address.to_string(),
            },
            e => TargetError::Invalid {
                address: address.to_string(),
                details: e.to_string(),
            },
        })?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TargetError::UnsupportedScheme {
                address: address.to_string(),
            });
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(TargetError::MissingHost {
                address: address.to_string(),
            });
        }
        if url.fragment().is_some() {
            return Err(TargetError::Invalid {
                address: address.to_string(),
                details: "WebSocket addresses cannot carry a fragment".to_string(),
            });
        }

        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
        }

        Ok(Self { url })
    }

    /// Append a route or identity segment
    ///
    /// Reserved characters other than `/` are percent-encoded.
    pub fn with_segment(mut self, segment: &str) -> Result<Self, TargetError> {
        let segment = segment.trim();
        let invalid = |details: &str| TargetError::InvalidSegment {
            segment: segment.to_string(),
            details: details.to_string(),
        };

        if segment.is_empty() {
            return Err(invalid("segment is empty"));
        }
        if matches!(segment, "." | "..") {
            return Err(invalid("dot segments are not allowed"));
        }
        if segment.contains('/') {
            return Err(invalid("contains '/'"));
        }

        self.url
            .path_segments_mut()
            .map_err(|()| invalid("address cannot take path segments"))?
            .pop_if_empty()
            .push(segment);
        Ok(self)
    }

    /// Full connection URL
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Whether the target uses TLS
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
