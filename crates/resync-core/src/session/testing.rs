//! In-memory transport for session tests
//!
//! [`ScriptedTransport`] answers each connect attempt according to a script
//! and records when it was asked. Accepted connections hand the test a
//! [`ServerPeer`] that plays the server side of the link.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::transport::{Link, Transport};
use crate::error::{TransportError, TransportResult};

/// How a connect attempt is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Accept,
    Refuse,
    /// Never completes
    Hang,
}

#[derive(Debug)]
struct Script {
    queued: VecDeque<Outcome>,
    fallback: Outcome,
    attempts: Vec<(Instant, String)>,
    peers: VecDeque<ServerPeer>,
}

#[derive(Debug, Clone)]
pub(crate) struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Answer every attempt with `fallback`
    pub(crate) fn new(fallback: Outcome) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                queued: VecDeque::new(),
                fallback,
                attempts: Vec::new(),
                peers: VecDeque::new(),
            })),
        }
    }

    /// Answer the next attempts with `outcomes` before falling back
    pub(crate) fn then(self, outcomes: &[Outcome]) -> Self {
        self.script
            .lock()
            .unwrap()
            .queued
            .extend(outcomes.iter().copied());
        self
    }

    /// When each connect attempt happened
    pub(crate) fn attempts(&self) -> Vec<Instant> {
        let script = self.script.lock().unwrap();
        script.attempts.iter().map(|(at, _)| *at).collect()
    }

    /// URLs of each connect attempt
    pub(crate) fn urls(&self) -> Vec<String> {
        let script = self.script.lock().unwrap();
        script.attempts.iter().map(|(_, url)| url.clone()).collect()
    }

    /// Server side of the oldest accepted connection not yet taken
    pub(crate) fn take_peer(&self) -> ServerPeer {
        self.script
            .lock()
            .unwrap()
            .peers
            .pop_front()
            .expect("no accepted connection to take")
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self, url: &str) -> BoxFuture<'static, TransportResult<Link>> {
        let mut script = self.script.lock().unwrap();
        script.attempts.push((Instant::now(), url.to_string()));
        let outcome = script.queued.pop_front().unwrap_or(script.fallback);

        match outcome {
            Outcome::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                script.peers.push_back(ServerPeer {
                    to_client: inbound_tx,
                    from_client: outbound_rx,
                });
                future::ready(Ok(Link {
                    outbound: outbound_tx,
                    inbound: inbound_rx,
                }))
                .boxed()
            }
            Outcome::Refuse => future::ready(Err(TransportError::Connect {
                url: url.to_string(),
                details: "connection refused".to_string(),
            }))
            .boxed(),
            Outcome::Hang => future::pending().boxed(),
        }
    }
}

/// Server end of an accepted connection
#[derive(Debug)]
pub(crate) struct ServerPeer {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerPeer {
    /// Push a frame to the client
    pub(crate) fn push(&self, frame: &str) {
        // The client may already have dropped the link
        let _ = self.to_client.send(frame.to_string());
    }

    /// Frames the client has sent so far
    pub(crate) fn received(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Whether the client has dropped its side of the link
    pub(crate) fn is_closed_by_client(&self) -> bool {
        self.to_client.is_closed()
    }

    /// Close the connection from the server side
    pub(crate) fn close(self) {
        drop(self);
    }
}
