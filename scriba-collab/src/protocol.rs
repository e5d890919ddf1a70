//! JSON wire protocol between clients and the sync server.
//!
//! All frames are WebSocket text messages carrying a single JSON object
//! tagged by `"type"`:
//!
//! ```text
//! server → client   init | presence_update | presence_leave | operation | error
//! client → server   operation
//! ```
//!
//! The `operation` payload inside a client frame is kept as raw JSON and
//! parsed separately, so a malformed operation (say, an insert missing its
//! `value`) produces a precise error for the offending connection instead
//! of a generic envelope failure.

use serde::{Deserialize, Serialize};
use scriba_ot::{Operation, OtError};

/// Presence entry as exposed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePresence {
    pub user_id: String,
    pub username: String,
}

/// `presence_leave` payload: only the departing user is named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveData {
    pub user_id: String,
}

/// Messages emitted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, immediately on connect: the full document snapshot.
    Init {
        revision: u64,
        content: String,
        presence: Vec<WirePresence>,
    },
    /// A new member joined the room.
    PresenceUpdate { data: WirePresence },
    /// A member disconnected.
    PresenceLeave { data: LeaveData },
    /// An accepted, transformed operation — broadcast to every member,
    /// including the submitter.
    Operation {
        user_id: String,
        revision: u64,
        operation: Operation,
    },
    /// Sent only to the offending connection.
    Error { message: String },
}

/// Messages accepted from clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit an edit. `revision` is the highest revision the client has
    /// observed; `operation` is parsed with [`parse_operation`].
    Operation {
        revision: u64,
        operation: serde_json::Value,
    },
}

/// Protocol-level failures.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Serialization(String),
    Deserialization(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl ServerMessage {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Decode a server frame (used by the client library and tests).
pub fn decode_server_message(frame: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(frame).map_err(|e| ProtocolError::Deserialization(e.to_string()))
}

/// Parse the raw `operation` payload of a client frame. Missing or
/// ill-typed fields surface as [`OtError::Invalid`] — the structural
/// validation the engine's error taxonomy names.
pub fn parse_operation(raw: &serde_json::Value) -> Result<Operation, OtError> {
    serde_json::from_value(raw.clone()).map_err(|e| OtError::Invalid(e.to_string()))
}
