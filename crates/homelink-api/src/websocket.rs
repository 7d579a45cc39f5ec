//! Outbound WebSocket transport to the remote service.
//!
//! A [`Connector`] opens one connection and hands back a [`Link`]: a pair of
//! channels carrying text frames. The real [`WsConnector`] spawns a pump task
//! that bridges the channels onto a `tokio-tungstenite` stream; tests use
//! [`Link::memory`] to get an in-process peer instead.
//!
//! Dropping the link's `outbound` sender closes the socket. The `inbound`
//! receiver yields `None` once the peer has gone away.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tracing::{debug, info, trace};
use url::Url;

use crate::error::Error;

/// Buffered frames per direction.
const LINK_CAPACITY: usize = 256;

/// Path of the agent endpoint on the remote service.
pub const AGENT_WS_PATH: &str = "/api/v1/agent/ws";

// ── Link ─────────────────────────────────────────────────────────────

/// One open, message-oriented connection.
#[derive(Debug)]
pub struct Link {
    /// Frames to send. Closing this sender closes the connection.
    pub outbound: mpsc::Sender<String>,
    /// Frames received, or the error that ended the connection.
    pub inbound: mpsc::Receiver<Result<String, Error>>,
}

impl Link {
    /// Build a connected in-memory pair: the agent's `Link` and the peer end.
    pub fn memory() -> (Self, MemoryPeer) {
        let (out_tx, out_rx) = mpsc::channel(LINK_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(LINK_CAPACITY);
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            MemoryPeer {
                tx: in_tx,
                rx: out_rx,
            },
        )
    }
}

/// The remote end of an in-memory [`Link`].
#[derive(Debug)]
pub struct MemoryPeer {
    tx: mpsc::Sender<Result<String, Error>>,
    rx: mpsc::Receiver<String>,
}

impl MemoryPeer {
    /// Deliver a text frame to the agent. Returns `false` if the agent hung up.
    pub async fn send(&self, text: impl Into<String>) -> bool {
        self.tx.send(Ok(text.into())).await.is_ok()
    }

    /// Fail the connection with a transport error.
    pub async fn fail(&self, error: Error) -> bool {
        self.tx.send(Err(error)).await.is_ok()
    }

    /// Next frame the agent sent, or `None` once it closed the link.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

// ── Connector ────────────────────────────────────────────────────────

/// Anything that can open a fresh [`Link`] to the remote service.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<Link, Error>> + Send;
}

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, Error> {
        info!(url = %self.url, "connecting to remote service");

        let uri: tungstenite::http::Uri = self
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let request = ClientRequestBuilder::new(uri)
            .with_header("User-Agent", concat!("homelink/", env!("CARGO_PKG_VERSION")));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        debug!("websocket transport open");

        let (out_tx, out_rx) = mpsc::channel(LINK_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(LINK_CAPACITY);
        tokio::spawn(pump(ws_stream, out_rx, in_tx));

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Shuttle frames between the socket and the link channels until either side ends.
async fn pump(
    ws_stream: WsStream,
    mut out_rx: mpsc::Receiver<String>,
    in_tx: mpsc::Sender<Result<String, Error>>,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(text) = outgoing else {
                    // Agent dropped its sender: close politely.
                    let _ = write.close().await;
                    break;
                };
                if let Err(e) = write.send(tungstenite::Message::Text(text.into())).await {
                    let _ = in_tx.send(Err(Error::WebSocketConnect(e.to_string()))).await;
                    break;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if in_tx.send(Ok(text.as_str().to_owned())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((1005, String::new()), |cf| {
                            (u16::from(cf.code), cf.reason.as_str().to_owned())
                        });
                        info!(code, reason = %reason, "websocket close frame received");
                        let _ = in_tx.send(Err(Error::WebSocketClosed { code, reason })).await;
                        break;
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite queues the pong reply itself
                        trace!("websocket ping");
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong, Frame -- ignore
                    }
                    Some(Err(e)) => {
                        let _ = in_tx.send(Err(Error::WebSocketConnect(e.to_string()))).await;
                        break;
                    }
                    None => {
                        debug!("websocket stream ended");
                        break;
                    }
                }
            }
        }
    }
}

// ── URL helpers ──────────────────────────────────────────────────────

/// Derive the agent WebSocket URL from the configured server address.
///
/// `http`/`https` are rewritten to `ws`/`wss`; the agent path is appended
/// to whatever base path the server URL already carries.
pub fn agent_ws_url(server: &Url) -> Result<Url, Error> {
    let mut url = server.clone();
    let scheme = match server.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::WebSocketConnect(format!(
                "unsupported server URL scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot use scheme '{scheme}'")))?;

    let base = server.path().trim_end_matches('/');
    if !base.ends_with(AGENT_WS_PATH) {
        url.set_path(&format!("{base}{AGENT_WS_PATH}"));
    }
    url.set_query(None);
    Ok(url)
}
