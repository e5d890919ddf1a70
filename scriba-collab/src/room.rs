//! Room coordinator: one owning task per document.
//!
//! Each room task has exclusive ownership of its [`DocumentSession`];
//! connection tasks reach it only through the bounded command channel in
//! [`RoomHandle`]. That single-writer discipline is what makes the
//! revision counter well-defined — submissions are rebased and applied
//! strictly in arrival order, with no locking of shared document state.
//!
//! ```text
//! conn task A ──┐
//! conn task B ──┼── mpsc ──► room task ── DocumentSession
//! conn task C ──┘              │
//!                              └── per-connection outbound queues
//! ```
//!
//! Room lifecycle: created on first join, idle timer armed whenever the
//! member set empties, evicted (task ends, registry entry removed) when
//! the timer expires. An optional [`SnapshotSink`] is offered the final
//! state before eviction and consulted when the room is first created.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use scriba_ot::{apply, transform_against_log, Operation, OtError};

use crate::config::ServerConfig;
use crate::protocol::{LeaveData, ServerMessage, WirePresence};
use crate::sink::{Snapshot, SnapshotSink};

/// Per-connection identity. Distinct from the wire-level `user_id`: one
/// user may hold several connections.
pub type ClientId = Uuid;

/// Presence metadata for one connected client.
#[derive(Debug, Clone)]
pub struct Presence {
    pub user_id: String,
    pub username: String,
    pub joined_at: Instant,
}

impl Presence {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            joined_at: Instant::now(),
        }
    }
}

impl From<&Presence> for WirePresence {
    fn from(p: &Presence) -> Self {
        WirePresence {
            user_id: p.user_id.clone(),
            username: p.username.clone(),
        }
    }
}

/// Coordinator-level failures. Every variant is reported only to the
/// submitting connection; room state is never touched on the error path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// The transform engine rejected the operation.
    Engine(OtError),
    /// The client cited a revision the server has not produced yet.
    ProtocolViolation { base_revision: u64, revision: u64 },
    /// The cited base revision predates the retained operation log.
    StaleRevision {
        base_revision: u64,
        oldest_retained: u64,
    },
    /// The room is at its member limit.
    RoomFull { limit: usize },
    /// The room task has ended (evicted).
    RoomClosed,
}

impl From<OtError> for RoomError {
    fn from(e: OtError) -> Self {
        RoomError::Engine(e)
    }
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "{e}"),
            Self::ProtocolViolation {
                base_revision,
                revision,
            } => write!(
                f,
                "protocol violation: base revision {base_revision} is ahead of \
                 server revision {revision}"
            ),
            Self::StaleRevision {
                base_revision,
                oldest_retained,
            } => write!(
                f,
                "stale revision: base revision {base_revision} predates oldest \
                 retained revision {oldest_retained}"
            ),
            Self::RoomFull { limit } => write!(f, "room is full (limit {limit})"),
            Self::RoomClosed => write!(f, "room closed"),
        }
    }
}

impl std::error::Error for RoomError {}

/// Canonical state of one document.
///
/// `operation_log` entry `i` holds the operation that advanced the
/// document from revision `log_floor + i` to `log_floor + i + 1`; the log
/// is append-only and `log_floor` moves only under explicit compaction or
/// snapshot seeding.
#[derive(Debug)]
pub struct DocumentSession {
    content: String,
    revision: u64,
    log_floor: u64,
    operation_log: VecDeque<Operation>,
    max_log: Option<usize>,
}

impl DocumentSession {
    /// Fresh empty document at revision 0.
    pub fn new(max_log: Option<usize>) -> Self {
        Self {
            content: String::new(),
            revision: 0,
            log_floor: 0,
            operation_log: VecDeque::new(),
            max_log,
        }
    }

    /// Restore from an external checkpoint. The log starts empty at the
    /// checkpointed revision, so older base revisions are stale.
    pub fn from_snapshot(snapshot: Snapshot, max_log: Option<usize>) -> Self {
        Self {
            content: snapshot.content,
            revision: snapshot.revision,
            log_floor: snapshot.revision,
            operation_log: VecDeque::new(),
            max_log,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Oldest base revision a submission may still cite.
    pub fn oldest_retained(&self) -> u64 {
        self.log_floor
    }

    /// Retained log entries, oldest first.
    pub fn log(&self) -> impl Iterator<Item = &Operation> {
        self.operation_log.iter()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            content: self.content.clone(),
            revision: self.revision,
        }
    }

    /// Rebase `op` from `base_revision` onto the current revision, apply
    /// it, and append it to the log. Returns the transformed operation and
    /// the revision it produced. On any error the session is unchanged.
    pub fn submit(
        &mut self,
        base_revision: u64,
        op: Operation,
    ) -> Result<(Operation, u64), RoomError> {
        if base_revision > self.revision {
            return Err(RoomError::ProtocolViolation {
                base_revision,
                revision: self.revision,
            });
        }
        if base_revision < self.log_floor {
            return Err(RoomError::StaleRevision {
                base_revision,
                oldest_retained: self.log_floor,
            });
        }

        let unseen = (base_revision - self.log_floor) as usize;
        let op = transform_against_log(op, self.operation_log.iter().skip(unseen));
        let next = apply(&self.content, &op)?;

        self.content = next;
        self.revision += 1;
        self.operation_log.push_back(op.clone());
        if let Some(max) = self.max_log {
            while self.operation_log.len() > max {
                self.operation_log.pop_front();
                self.log_floor += 1;
            }
        }
        Ok((op, self.revision))
    }
}

struct Member {
    presence: Presence,
    outbound: mpsc::Sender<ServerMessage>,
}

/// Commands accepted by a room task.
pub enum RoomCommand {
    Join {
        client_id: ClientId,
        presence: Presence,
        outbound: mpsc::Sender<ServerMessage>,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Submit {
        client_id: ClientId,
        base_revision: u64,
        op: Operation,
    },
    Leave {
        client_id: ClientId,
    },
}

/// Cheap, cloneable handle to one room's command queue.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Register a connection. On success the room has already queued the
    /// `init` snapshot on `outbound` and announced the join to the other
    /// members.
    pub async fn join(
        &self,
        client_id: ClientId,
        presence: Presence,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<(), RoomError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Join {
                client_id,
                presence,
                outbound,
                reply,
            })
            .await
            .map_err(|_| RoomError::RoomClosed)?;
        reply_rx.await.map_err(|_| RoomError::RoomClosed)?
    }

    /// Queue a submission. The outcome (broadcast or error frame) arrives
    /// on the connection's outbound queue.
    pub async fn submit(
        &self,
        client_id: ClientId,
        base_revision: u64,
        op: Operation,
    ) -> Result<(), RoomError> {
        self.tx
            .send(RoomCommand::Submit {
                client_id,
                base_revision,
                op,
            })
            .await
            .map_err(|_| RoomError::RoomClosed)
    }

    pub async fn leave(&self, client_id: ClientId) {
        let _ = self.tx.send(RoomCommand::Leave { client_id }).await;
    }

    /// True once the room task has ended.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn same_channel(&self, other: &RoomHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Spawn a room task and return its handle. Called by the registry with
/// the shared room map so the task can deregister itself on eviction.
pub(crate) fn spawn_room(
    room_id: String,
    config: Arc<ServerConfig>,
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    sink: Option<Arc<dyn SnapshotSink>>,
    accepted_operations: Arc<AtomicU64>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.room_queue_capacity);
    let handle = RoomHandle { tx };
    tokio::spawn(room_task(
        room_id,
        rx,
        handle.clone(),
        config,
        rooms,
        sink,
        accepted_operations,
    ));
    handle
}

async fn room_task(
    room_id: String,
    mut rx: mpsc::Receiver<RoomCommand>,
    own: RoomHandle,
    config: Arc<ServerConfig>,
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    sink: Option<Arc<dyn SnapshotSink>>,
    accepted_operations: Arc<AtomicU64>,
) {
    let session = match sink.as_ref().and_then(|s| s.load(&room_id)) {
        Some(snapshot) => {
            log::info!(
                "room {room_id} restored from checkpoint at revision {}",
                snapshot.revision
            );
            DocumentSession::from_snapshot(snapshot, config.max_log)
        }
        None => DocumentSession::new(config.max_log),
    };
    let mut room = Room {
        id: room_id,
        session,
        members: HashMap::new(),
        limit: config.max_clients_per_room,
        accepted_operations,
    };

    let idle = tokio::time::sleep(config.idle_eviction);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                let had_members = !room.members.is_empty();
                room.handle(cmd);
                // Arm the idle timer only when the member set transitions
                // to empty; unrelated commands must not extend the window.
                if had_members && room.members.is_empty() {
                    idle.as_mut()
                        .reset(tokio::time::Instant::now() + config.idle_eviction);
                }
            }
            _ = idle.as_mut(), if room.members.is_empty() => {
                log::info!(
                    "room {} idle with no clients, evicting at revision {}",
                    room.id,
                    room.session.revision()
                );
                break;
            }
        }
    }

    if let Some(sink) = &sink {
        sink.store(&room.id, room.session.snapshot());
    }
    let mut rooms_w = rooms.write().await;
    if let Some(current) = rooms_w.get(&room.id) {
        if current.same_channel(&own) {
            rooms_w.remove(&room.id);
        }
    }
}

struct Room {
    id: String,
    session: DocumentSession,
    members: HashMap<ClientId, Member>,
    limit: usize,
    accepted_operations: Arc<AtomicU64>,
}

impl Room {
    fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                client_id,
                presence,
                outbound,
                reply,
            } => {
                if self.members.len() >= self.limit {
                    let _ = reply.send(Err(RoomError::RoomFull { limit: self.limit }));
                    return;
                }
                log::info!(
                    "client {client_id} ({}) joined room {}",
                    presence.username,
                    self.id
                );
                let announcement = WirePresence::from(&presence);
                self.members.insert(client_id, Member { presence, outbound });

                let init = ServerMessage::Init {
                    revision: self.session.revision(),
                    content: self.session.content().to_string(),
                    presence: self
                        .members
                        .values()
                        .map(|m| WirePresence::from(&m.presence))
                        .collect(),
                };
                self.send_to(client_id, init);
                self.broadcast_except(client_id, ServerMessage::PresenceUpdate {
                    data: announcement,
                });
                let _ = reply.send(Ok(()));
            }

            RoomCommand::Submit {
                client_id,
                base_revision,
                op,
            } => {
                if !self.members.contains_key(&client_id) {
                    log::warn!(
                        "room {}: submission from unknown client {client_id} ignored",
                        self.id
                    );
                    return;
                }
                match self.session.submit(base_revision, op) {
                    Ok((op, revision)) => {
                        self.accepted_operations.fetch_add(1, Ordering::Relaxed);
                        let user_id = self
                            .members
                            .get(&client_id)
                            .map(|m| m.presence.user_id.clone())
                            .unwrap_or_default();
                        log::debug!(
                            "room {}: revision {revision} accepted from {user_id}",
                            self.id
                        );
                        self.broadcast(ServerMessage::Operation {
                            user_id,
                            revision,
                            operation: op,
                        });
                    }
                    Err(e) => {
                        log::warn!(
                            "room {}: rejected submission from {client_id}: {e}",
                            self.id
                        );
                        self.send_to(client_id, ServerMessage::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }

            RoomCommand::Leave { client_id } => {
                if let Some(member) = self.members.remove(&client_id) {
                    log::info!("client {client_id} left room {}", self.id);
                    self.broadcast(ServerMessage::PresenceLeave {
                        data: LeaveData {
                            user_id: member.presence.user_id,
                        },
                    });
                }
            }
        }
    }

    fn send_to(&mut self, client_id: ClientId, msg: ServerMessage) {
        let lagged = match self.members.get(&client_id) {
            Some(member) => member.outbound.try_send(msg).is_err(),
            None => false,
        };
        if lagged {
            self.drop_members(vec![client_id]);
        }
    }

    fn broadcast(&mut self, msg: ServerMessage) {
        let mut lagged = Vec::new();
        for (id, member) in &self.members {
            if member.outbound.try_send(msg.clone()).is_err() {
                lagged.push(*id);
            }
        }
        self.drop_members(lagged);
    }

    fn broadcast_except(&mut self, skip: ClientId, msg: ServerMessage) {
        let mut lagged = Vec::new();
        for (id, member) in &self.members {
            if *id == skip {
                continue;
            }
            if member.outbound.try_send(msg.clone()).is_err() {
                lagged.push(*id);
            }
        }
        self.drop_members(lagged);
    }

    /// Force-disconnect members whose outbound queue overflowed or closed.
    /// Dropping the sender ends the connection's write loop; the member's
    /// departure is announced like a normal leave, which may in turn expose
    /// further lagging members.
    fn drop_members(&mut self, mut queue: Vec<ClientId>) {
        while let Some(id) = queue.pop() {
            let Some(member) = self.members.remove(&id) else {
                continue;
            };
            log::warn!(
                "client {id} disconnected from room {}: outbound queue overflow",
                self.id
            );
            let leave = ServerMessage::PresenceLeave {
                data: LeaveData {
                    user_id: member.presence.user_id,
                },
            };
            for (other_id, other) in &self.members {
                if other.outbound.try_send(leave.clone()).is_err() {
                    queue.push(*other_id);
                }
            }
        }
    }
}
