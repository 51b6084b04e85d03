//! Session transports
//!
//! A [`Transport`] opens one full-duplex session to the server and hands
//! back a [`Link`]: a sender for agent messages and a receiver for server
//! messages. The link's receiver ends when the session drops.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{Result, SupervisorError};
use crate::opamp::{decode_frame, encode_frame, AgentToServer, ServerToAgent};

const LINK_CAPACITY: usize = 16;

pub struct Link {
    pub outbound: mpsc::Sender<AgentToServer>,
    pub inbound: mpsc::Receiver<ServerToAgent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Link>;
}

/// OpAMP over WebSocket binary frames
pub struct WsTransport {
    endpoint: String,
    access_token: Option<String>,
}

impl WsTransport {
    pub fn new(endpoint: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_token,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<Link> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| SupervisorError::Session(format!("invalid access token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = connect_async(request).await?;
        debug!(endpoint = %self.endpoint, "opamp session connected");

        let (outbound_tx, outbound_rx) = mpsc::channel(LINK_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(LINK_CAPACITY);
        tokio::spawn(connection_loop(ws, outbound_rx, inbound_tx));

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn connection_loop(
    ws: WsStream,
    mut outbound: mpsc::Receiver<AgentToServer>,
    inbound: mpsc::Sender<ServerToAgent>,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(payload))) => match decode_frame::<ServerToAgent>(&payload) {
                        Ok(msg) => {
                            if inbound.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping undecodable server message"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "opamp session read failed");
                        break;
                    }
                }
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = write.send(Message::Binary(encode_frame(&msg))).await {
                    warn!(error = %e, "opamp session write failed");
                    break;
                }
            }
        }
    }
    debug!("opamp session closed");
}

/// Server half of an in-memory session
pub struct ServerConn {
    pub to_agent: mpsc::Sender<ServerToAgent>,
    pub from_agent: mpsc::Receiver<AgentToServer>,
}

/// In-process transport; each connect hands a [`ServerConn`] to the
/// paired [`MemoryServer`].
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<ServerConn>,
    refuse: Mutex<usize>,
}

pub struct MemoryServer {
    accepted: mpsc::UnboundedReceiver<ServerConn>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                accepted: tx,
                refuse: Mutex::new(0),
            },
            MemoryServer { accepted: rx },
        )
    }

    /// Fail the next `n` connection attempts
    pub fn refuse_next(&self, n: usize) {
        *self.refuse.lock() = n;
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<Link> {
        {
            let mut refuse = self.refuse.lock();
            if *refuse > 0 {
                *refuse -= 1;
                return Err(SupervisorError::Session("connection refused".into()));
            }
        }
        let (outbound_tx, outbound_rx) = mpsc::channel(LINK_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(LINK_CAPACITY);
        self.accepted
            .send(ServerConn {
                to_agent: inbound_tx,
                from_agent: outbound_rx,
            })
            .map_err(|_| SupervisorError::Session("server is gone".into()))?;
        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<ServerConn> {
        self.accepted.recv().await
    }
}
