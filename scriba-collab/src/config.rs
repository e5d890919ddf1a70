//! Server configuration.

use std::time::Duration;

/// Tunables for [`CollabServer`](crate::server::CollabServer) and the rooms
/// it spawns.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Maximum clients per room; joins over the limit are rejected.
    pub max_clients_per_room: usize,
    /// Command queue depth of each room task.
    pub room_queue_capacity: usize,
    /// Outbound message queue depth per connection. A connection that
    /// falls this far behind is disconnected rather than allowed to block
    /// the room.
    pub outbound_queue_capacity: usize,
    /// How long a room with zero clients is kept before eviction.
    pub idle_eviction: Duration,
    /// Optional operation-log compaction: retain at most this many log
    /// entries. Submissions older than the retained window are rejected
    /// as stale. `None` retains the full history.
    pub max_log: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_clients_per_room: 100,
            room_queue_capacity: 256,
            outbound_queue_capacity: 64,
            idle_eviction: Duration::from_secs(60),
            max_log: None,
        }
    }
}
