//! WebSocket client for connecting to the sync server.
//!
//! Thin protocol client: it tracks the highest revision observed from the
//! server and exposes incoming frames as typed [`ClientEvent`]s. Folding
//! operations into a local document copy is the caller's job (see the
//! integration tests, which drive convergence checks through this client).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use scriba_ot::Operation;

use crate::protocol::{decode_server_message, ClientMessage, ServerMessage, WirePresence};

/// Events surfaced by a connected client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Initial snapshot received.
    Init {
        revision: u64,
        content: String,
        presence: Vec<WirePresence>,
    },
    /// An accepted operation (possibly our own, in its transformed form).
    Operation {
        user_id: String,
        revision: u64,
        operation: Operation,
    },
    PresenceUpdate(WirePresence),
    PresenceLeave { user_id: String },
    /// The server rejected one of our frames.
    ServerError { message: String },
    /// The connection ended.
    Disconnected,
}

/// Client-side failures.
#[derive(Debug)]
pub enum ClientError {
    Connect(String),
    Send(String),
    Closed,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {e}"),
            Self::Send(e) => write!(f, "send failed: {e}"),
            Self::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Build the connection URL for a room.
fn room_url(server_addr: &str, room_id: &str, user_id: &str, username: &str) -> String {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("user_id", user_id)
        .append_pair("username", username)
        .finish();
    format!("ws://{server_addr}/ws/{room_id}?{query}")
}

/// A connected protocol client.
pub struct CollabClient {
    writer: mpsc::Sender<Message>,
    last_revision: Arc<AtomicU64>,
}

impl CollabClient {
    /// Connect to `room_id` on the server at `server_addr`
    /// (`host:port`). Returns the client plus the event stream; the first
    /// event is always [`ClientEvent::Init`].
    pub async fn connect(
        server_addr: &str,
        room_id: &str,
        user_id: &str,
        username: &str,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        let url = room_url(server_addr, room_id, user_id, username);
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let last_revision = Arc::new(AtomicU64::new(0));
        let (event_tx, event_rx) = mpsc::channel(64);
        let (writer_tx, mut writer_rx) = mpsc::channel::<Message>(64);

        // Writer task: serializes socket writes.
        tokio::spawn(async move {
            while let Some(msg) = writer_rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // Reader task: decode frames, track revisions, emit events.
        let revision = last_revision.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                let event = match frame {
                    Ok(Message::Text(text)) => match decode_server_message(&text) {
                        Ok(msg) => {
                            if let Some(rev) = revision_of(&msg) {
                                revision.store(rev, Ordering::SeqCst);
                            }
                            Some(event_of(msg))
                        }
                        Err(e) => {
                            log::warn!("undecodable server frame: {e}");
                            None
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => {
                        let _ = event_tx.send(ClientEvent::Disconnected).await;
                        break;
                    }
                    Ok(_) => None,
                };
                if let Some(event) = event {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                writer: writer_tx,
                last_revision,
            },
            event_rx,
        ))
    }

    /// Highest revision observed from the server.
    pub fn revision(&self) -> u64 {
        self.last_revision.load(Ordering::SeqCst)
    }

    /// Submit an operation against the highest observed revision.
    pub async fn send_operation(&self, op: &Operation) -> Result<(), ClientError> {
        self.send_operation_at(self.revision(), op).await
    }

    /// Submit an operation citing an explicit base revision.
    pub async fn send_operation_at(
        &self,
        base_revision: u64,
        op: &Operation,
    ) -> Result<(), ClientError> {
        let operation = serde_json::to_value(op).map_err(|e| ClientError::Send(e.to_string()))?;
        let frame = ClientMessage::Operation {
            revision: base_revision,
            operation,
        }
        .encode()
        .map_err(|e| ClientError::Send(e.to_string()))?;
        self.send_raw(frame).await
    }

    /// Send a raw text frame, bypassing message construction. Used by
    /// tests to exercise the server's rejection paths.
    pub async fn send_raw(&self, frame: String) -> Result<(), ClientError> {
        self.writer
            .send(Message::text(frame))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Cleanly close the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.writer
            .send(Message::Close(None))
            .await
            .map_err(|_| ClientError::Closed)
    }
}

fn revision_of(msg: &ServerMessage) -> Option<u64> {
    match msg {
        ServerMessage::Init { revision, .. } => Some(*revision),
        ServerMessage::Operation { revision, .. } => Some(*revision),
        _ => None,
    }
}

fn event_of(msg: ServerMessage) -> ClientEvent {
    match msg {
        ServerMessage::Init {
            revision,
            content,
            presence,
        } => ClientEvent::Init {
            revision,
            content,
            presence,
        },
        ServerMessage::Operation {
            user_id,
            revision,
            operation,
        } => ClientEvent::Operation {
            user_id,
            revision,
            operation,
        },
        ServerMessage::PresenceUpdate { data } => ClientEvent::PresenceUpdate(data),
        ServerMessage::PresenceLeave { data } => ClientEvent::PresenceLeave {
            user_id: data.user_id,
        },
        ServerMessage::Error { message } => ClientEvent::ServerError { message },
    }
}
