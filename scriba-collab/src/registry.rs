//! Room registry: maps room identifiers to live room tasks.
//!
//! Rooms are created lazily on first connection and remove their own
//! registry entry when they evict, so the registry only ever hands out
//! handles and replaces ones whose task has already ended.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::room::{spawn_room, RoomHandle};
use crate::sink::SnapshotSink;

pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    config: Arc<ServerConfig>,
    sink: Option<Arc<dyn SnapshotSink>>,
    accepted_operations: Arc<AtomicU64>,
}

impl RoomRegistry {
    pub fn new(config: Arc<ServerConfig>, sink: Option<Arc<dyn SnapshotSink>>) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            config,
            sink,
            accepted_operations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the live handle for `room_id`, spawning the room if it does not
    /// exist or its task has already evicted.
    pub async fn get_or_create(&self, room_id: &str) -> RoomHandle {
        // Fast path: read lock.
        {
            let rooms = self.rooms.read().await;
            if let Some(handle) = rooms.get(room_id) {
                if !handle.is_closed() {
                    return handle.clone();
                }
            }
        }

        // Slow path: write lock, double-check, replace dead handles.
        let mut rooms = self.rooms.write().await;
        if let Some(handle) = rooms.get(room_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }
        let handle = spawn_room(
            room_id.to_string(),
            self.config.clone(),
            self.rooms.clone(),
            self.sink.clone(),
            self.accepted_operations.clone(),
        );
        rooms.insert(room_id.to_string(), handle.clone());
        handle
    }

    /// Operations accepted across all rooms, current and evicted.
    pub fn accepted_operations(&self) -> u64 {
        self.accepted_operations.load(Ordering::Relaxed)
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Identifiers of all live rooms.
    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
