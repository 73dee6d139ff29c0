use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use parley_types::api::Credential;

use crate::error::GatewayError;

/// One live connection as the bus sees it: text frames in both directions.
/// The connection is gone once `inbound` yields `None`.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// The far end of a [`Link`], held by whatever drives the wire.
pub struct Peer {
    pub to_client: mpsc::UnboundedSender<String>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl Link {
    pub fn pair() -> (Link, Peer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Link {
                outbound: out_tx,
                inbound: in_rx,
            },
            Peer {
                to_client: in_tx,
                from_client: out_rx,
            },
        )
    }
}

/// Opens realtime connections. Implemented over WebSocket for production
/// and by in-memory fakes in tests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, credential: &Credential) -> Result<Link, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub connect_timeout: Duration,
    /// Ping interval. Two missed pongs (~2 intervals) drop the link.
    pub heartbeat: Duration,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            heartbeat: Duration::from_secs(15),
        }
    }
}

pub struct WsTransport {
    config: WsConfig,
}

impl WsTransport {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, credential: &Credential) -> Result<Link, GatewayError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        let auth = HeaderValue::from_str(&credential.header_value())
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (socket, _response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(request))
                .await
                .map_err(|_| GatewayError::Timeout(self.config.connect_timeout))??;

        info!("Gateway connected to {}", self.config.url);

        let (link, peer) = Link::pair();
        tokio::spawn(run_socket(socket, peer, self.config.heartbeat));
        Ok(link)
    }
}

/// Pumps frames between the socket and the bus until either side goes away
/// or the heartbeat times out.
async fn run_socket(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut peer: Peer,
    heartbeat_every: Duration,
) {
    let (mut sink, mut stream) = socket.split();

    let mut heartbeat = tokio::time::interval(heartbeat_every);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            frame = peer.from_client.recv() => {
                // Bus dropped the link (disconnect or shutdown).
                let Some(text) = frame else { break };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if peer.to_client.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => pong_received = true,
                    Some(Ok(Message::Close(frame))) => {
                        info!("Gateway closed the connection: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Gateway read error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if pong_received {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping gateway link", missed_heartbeats);
                        break;
                    }
                }
                pong_received = false;
                if sink.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
    debug!("Gateway socket task finished");
}
