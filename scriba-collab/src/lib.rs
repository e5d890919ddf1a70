//! # scriba-collab — real-time collaborative editing backend
//!
//! Server-authoritative multiplayer text editing over WebSockets, built on
//! the [`scriba_ot`] transform engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    JSON over WS     ┌──────────────┐
//! │ CollabClient │ ◄─────────────────► │ CollabServer │
//! │  (per user)  │                     │  (central)   │
//! └──────────────┘                     └──────┬───────┘
//!                                             │
//!                                      ┌──────┴───────┐
//!                                      │ RoomRegistry │
//!                                      └──────┬───────┘
//!                                             │  one task per room
//!                              ┌──────────────┼──────────────┐
//!                              ▼              ▼              ▼
//!                        DocumentSession  DocumentSession  DocumentSession
//!                        (content, rev,   …               …
//!                         op log, presence)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire messages
//! - [`room`] — per-room coordinator task (transform + apply + broadcast)
//! - [`registry`] — lazy room creation and idle eviction
//! - [`server`] — WebSocket listener and connection handling
//! - [`client`] — protocol client used by applications and tests
//! - [`sink`] — checkpoint seam for external persistence

pub mod client;
pub mod config;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod server;
pub mod sink;

pub use client::{ClientError, ClientEvent, CollabClient};
pub use config::ServerConfig;
pub use protocol::{ClientMessage, LeaveData, ProtocolError, ServerMessage, WirePresence};
pub use registry::RoomRegistry;
pub use room::{ClientId, DocumentSession, Presence, RoomError, RoomHandle};
pub use server::{CollabServer, ServerStats};
pub use sink::{MemorySink, Snapshot, SnapshotSink};
