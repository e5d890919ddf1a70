//! WebSocket sync server with room-based document routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── /ws/{room_id} ── RoomRegistry ── room task ── DocumentSession
//! Client B ──┘                                        │
//!                                                     ├── operation log + presence
//!                                                     │
//!                                          ┌──────────┴──────────┐
//!                                          ▼                     ▼
//!                                   outbound queue A      outbound queue B
//! ```
//!
//! One task per connection reads the socket; one task per room owns the
//! document. The connection task never touches document state — it decodes
//! frames, forwards commands to the room handle, and drains its own
//! outbound queue back onto the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::protocol::{parse_operation, ClientMessage, ServerMessage};
use crate::registry::RoomRegistry;
use crate::room::{Presence, RoomError};
use crate::sink::SnapshotSink;

/// Server-wide statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub accepted_operations: u64,
    pub active_rooms: usize,
}

/// Identity and routing extracted from the handshake request
/// `GET /ws/{room_id}?user_id=<id>&username=<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectRequest {
    room_id: String,
    user_id: String,
    username: String,
}

impl ConnectRequest {
    fn from_uri(uri: &Uri) -> Result<Self, String> {
        let room_id = uri
            .path()
            .strip_prefix("/ws/")
            .filter(|r| !r.is_empty() && !r.contains('/'))
            .ok_or_else(|| {
                format!("unsupported path {:?}, expected /ws/{{room_id}}", uri.path())
            })?
            .to_string();

        let mut user_id = None;
        let mut username = None;
        if let Some(query) = uri.query() {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                match key.as_ref() {
                    "user_id" => user_id = Some(value.into_owned()),
                    "username" => username = Some(value.into_owned()),
                    _ => {}
                }
            }
        }
        let user_id = user_id
            .filter(|u| !u.is_empty())
            .ok_or_else(|| "missing user_id query parameter".to_string())?;
        let username = username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| "missing username query parameter".to_string())?;

        Ok(Self {
            room_id,
            user_id,
            username,
        })
    }
}

/// The collaborative editing server.
pub struct CollabServer {
    config: Arc<ServerConfig>,
    registry: Arc<RoomRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

impl CollabServer {
    /// Create a server with no persistence collaborator.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_sink_opt(config, None)
    }

    /// Create a server that checkpoints rooms into `sink` on eviction and
    /// seeds new rooms from it.
    pub fn with_sink(config: ServerConfig, sink: Arc<dyn SnapshotSink>) -> Self {
        Self::with_sink_opt(config, Some(sink))
    }

    fn with_sink_opt(config: ServerConfig, sink: Option<Arc<dyn SnapshotSink>>) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(RoomRegistry::new(config.clone(), sink));
        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Current statistics snapshot.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.accepted_operations = self.registry.accepted_operations();
        stats.active_rooms = self.registry.room_count().await;
        stats
    }

    /// Accept WebSocket connections forever. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("sync server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let registry = self.registry.clone();
            let config = self.config.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, registry, config, stats).await {
                    log::debug!("connection error from {addr}: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<RoomRegistry>,
    config: Arc<ServerConfig>,
    stats: Arc<RwLock<ServerStats>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut connect: Option<ConnectRequest> = None;
    let callback = |req: &Request, response: Response| match ConnectRequest::from_uri(req.uri()) {
        Ok(parsed) => {
            connect = Some(parsed);
            Ok(response)
        }
        Err(reason) => {
            log::warn!("rejected handshake from {addr}: {reason}");
            let mut resp = ErrorResponse::new(Some(reason));
            *resp.status_mut() = StatusCode::BAD_REQUEST;
            Err(resp)
        }
    };
    let ws_stream = accept_hdr_async(stream, callback).await?;
    let Some(connect) = connect else {
        return Ok(());
    };
    log::info!(
        "client {} ({}) connected to room {} from {addr}",
        connect.user_id,
        connect.username,
        connect.room_id
    );

    {
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let client_id = Uuid::new_v4();
    let presence = Presence::new(connect.user_id.clone(), connect.username.clone());
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(config.outbound_queue_capacity);

    // Join, retrying if the room evicted between lookup and join.
    let mut joined = None;
    loop {
        let handle = registry.get_or_create(&connect.room_id).await;
        match handle
            .join(client_id, presence.clone(), outbound_tx.clone())
            .await
        {
            Ok(()) => {
                joined = Some(handle);
                break;
            }
            Err(RoomError::RoomClosed) => continue,
            Err(e) => {
                let _ = send_frame(
                    &mut ws_sender,
                    &ServerMessage::Error {
                        message: e.to_string(),
                    },
                )
                .await;
                break;
            }
        }
    }
    // The room holds the only other sender; once it drops this member the
    // outbound queue closes and the loop below ends.
    drop(outbound_tx);

    let Some(handle) = joined else {
        let mut s = stats.write().await;
        s.active_connections -= 1;
        return Ok(());
    };

    // Socket failures break out of this loop rather than returning, so the
    // leave and stats teardown below runs on every exit path.
    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match ClientMessage::decode(&text) {
                            Ok(ClientMessage::Operation { revision, operation }) => {
                                match parse_operation(&operation) {
                                    Ok(op) => {
                                        if handle.submit(client_id, revision, op).await.is_err() {
                                            // Room evicted under us; the client
                                            // must reconnect and resync.
                                            break;
                                        }
                                        None
                                    }
                                    Err(e) => Some(e.to_string()),
                                }
                            }
                            Err(e) => Some(e.to_string()),
                        };
                        if let Some(message) = reply {
                            if !send_frame(&mut ws_sender, &ServerMessage::Error { message }).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let unsupported = ServerMessage::Error {
                            message: "expected text frames".to_string(),
                        };
                        if !send_frame(&mut ws_sender, &unsupported).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("websocket error from {addr}: {e}");
                        break;
                    }
                }
            }

            msg = outbound_rx.recv() => {
                match msg {
                    Some(msg) => {
                        if !send_frame(&mut ws_sender, &msg).await {
                            break;
                        }
                    }
                    // The room dropped this member: backpressure disconnect
                    // or eviction.
                    None => break,
                }
            }
        }
    }

    handle.leave(client_id).await;
    {
        let mut s = stats.write().await;
        s.active_connections -= 1;
    }
    log::info!(
        "client {} disconnected from room {}",
        connect.user_id,
        connect.room_id
    );
    Ok(())
}

/// Encode and write one frame. `false` means the connection is no longer
/// writable and the caller must tear it down.
async fn send_frame(
    sender: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
    msg: &ServerMessage,
) -> bool {
    match msg.encode() {
        Ok(frame) => sender.send(Message::text(frame)).await.is_ok(),
        Err(e) => {
            log::error!("failed to encode outbound frame: {e}");
            false
        }
    }
}
