//! Transport layer
//!
//! A [`Transport`] establishes one connection and hands back a [`Link`]: a
//! pair of channels carrying text frames. The link is closed from the session
//! side by dropping it, and from the remote side when `inbound` yields `None`.
//!
//! [`WebSocketTransport`] is the production implementation on top of
//! tokio-tungstenite; each connection gets its own pump task that owns the
//! socket.

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};

/// An established connection
#[derive(Debug)]
pub struct Link {
    /// Frames to send to the server
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames received from the server; `None` once the connection is gone
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Establishes connections for a session
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `url`
    ///
    /// Resolves once the connection is usable. Dropping the future abandons
    /// the attempt.
    fn connect(&self, url: &str) -> BoxFuture<'static, TransportResult<Link>>;
}

/// WebSocket transport backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
    fn connect(&self, url: &str) -> BoxFuture<'static, TransportResult<Link>> {
        let url = url.to_string();
        async move {
            debug!("Connecting to {}", url);
            let (ws_stream, _response) =
                connect_async(url.as_str()).await.map_err(|e| match e {
                    // Retrying cannot fix the address itself
                    tungstenite::Error::Url(_) => TransportError::from(e),
                    e => TransportError::Connect {
                        url: url.clone(),
                        details: e.to_string(),
                    },
                })?;

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(ws_stream, outbound_rx, inbound_tx));

            Ok(Link {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
        }
        .boxed()
    }
}

/// Move frames between the socket and the link until either side goes away
async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<String>,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!("{}", TransportError::Send(e.to_string()));
                            break;
                        }
                    }
                    None => {
                        // Session dropped the link
                        write.close().await.ok();
                        break;
                    }
                }
            }

            msg = read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Dropping binary frame that is not UTF-8");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Server closed connection: {:?}", frame);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("{}", TransportError::Receive(e.to_string()));
                        break;
                    }
                    None => break,
                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => continue,
                };

                if inbound.send(text).is_err() {
                    write.close().await.ok();
                    break;
                }
            }
        }
    }
}
