//! Connection to the live service
//!
//! A [`Connection`] is a pair of channels: outbound [`ClientMessage`]s and
//! inbound [`TransportEvent`]s. [`LiveConnector`] backs it with a WebSocket,
//! one task writing and one reading; tests back it with plain channels.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::protocol::{ClientMessage, ServerMessage, SetupMessage};
use crate::{Error, Result};

/// Something that happened on the connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Setup acknowledged; audio may flow
    Opened,
    /// An inbound message
    Message(ServerMessage),
    /// Remote side closed, with its reason if any
    Closed(Option<String>),
    /// Transport failure
    Failed(String),
}

/// Session-side ends of an open connection
///
/// Dropping it closes the connection: the writer drains anything already
/// queued, then sends a close frame.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Transport-side ends of a [`Connection`]
#[derive(Debug)]
pub struct ConnectionPeer {
    /// Messages the session wants sent, in order
    pub outbound: mpsc::UnboundedReceiver<ClientMessage>,
    /// Events to deliver to the session
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl Connection {
    /// Create a connected session/transport channel pair
    #[must_use]
    pub fn pair() -> (Self, ConnectionPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            ConnectionPeer {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
        )
    }

    /// Queue a message for sending. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the transport has shut down
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| Error::Connection("connection closed".to_string()))
    }

    /// Wait for the next transport event
    ///
    /// A transport that vanished without a word reads as a remote close.
    pub async fn recv(&mut self) -> TransportEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed(None))
    }

    /// Close the connection
    pub fn close(self) {
        drop(self);
        tracing::debug!("connection closed");
    }
}

/// Opens connections to the live service
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and send `setup` as the first message
    ///
    /// The returned connection reports [`TransportEvent::Opened`] once the
    /// service acknowledges setup.
    async fn connect(&self, setup: SetupMessage) -> Result<Connection>;
}

/// WebSocket connector for the live service
pub struct LiveConnector {
    endpoint: Url,
    api_key: SecretString,
}

impl LiveConnector {
    /// Create a connector for `endpoint` authenticating with `api_key`
    #[must_use]
    pub const fn new(endpoint: Url, api_key: SecretString) -> Self {
        Self { endpoint, api_key }
    }

    fn request_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        url
    }
}

#[async_trait]
impl Connector for LiveConnector {
    async fn connect(&self, setup: SetupMessage) -> Result<Connection> {
        tracing::debug!(endpoint = %self.endpoint, model = %setup.model, "connecting to live service");

        let (ws, _response) = connect_async(self.request_url().as_str())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let setup_json = ClientMessage::Setup(setup).to_json()?;
        sink.send(Message::Text(setup_json))
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let (connection, peer) = Connection::pair();
        let ConnectionPeer {
            mut outbound,
            inbound,
        } = peer;

        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize outbound message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    tracing::warn!(error = %e, "live send failed");
                    break;
                }
            }
            let _ = sink.close().await;
            tracing::debug!("live writer finished");
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let parsed = match frame {
                    Ok(Message::Text(text)) => ServerMessage::parse(&text),
                    Ok(Message::Binary(bytes)) => ServerMessage::parse_bytes(&bytes),
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| format!("{}: {}", f.code, f.reason));
                        let _ = inbound.send(TransportEvent::Closed(reason));
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = inbound.send(TransportEvent::Failed(e.to_string()));
                        return;
                    }
                };

                let message = match parsed {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unparsable server message");
                        continue;
                    }
                };

                if message.setup_complete && inbound.send(TransportEvent::Opened).is_err() {
                    return;
                }
                if message != ServerMessage::default()
                    && !is_setup_ack_only(&message)
                    && inbound.send(TransportEvent::Message(message)).is_err()
                {
                    return;
                }
            }
            let _ = inbound.send(TransportEvent::Closed(None));
        });

        Ok(connection)
    }
}

/// Whether a message carries nothing beyond the setup acknowledgement
fn is_setup_ack_only(message: &ServerMessage) -> bool {
    message.setup_complete
        && *message
            == ServerMessage {
                setup_complete: true,
                ..ServerMessage::default()
            }
}
