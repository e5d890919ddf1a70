//! Checkpoint seam for external persistence.
//!
//! Document state is in-memory per room; durability is the job of an
//! external collaborator. A [`SnapshotSink`] plugged into the server is
//! offered each room's final `(content, revision)` right before idle
//! eviction, and is consulted once when a room is first created so a
//! previously checkpointed document can be restored.

use std::collections::HashMap;
use std::sync::Mutex;

/// A checkpoint of one room's canonical state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub content: String,
    pub revision: u64,
}

/// External persistence collaborator. Implementations must be cheap and
/// non-blocking from the room task's point of view; anything slow belongs
/// behind the implementor's own queue.
pub trait SnapshotSink: Send + Sync {
    /// Restore a previously checkpointed room, if one exists.
    fn load(&self, room_id: &str) -> Option<Snapshot>;

    /// Checkpoint a room that is about to be evicted.
    fn store(&self, room_id: &str, snapshot: Snapshot);
}

/// In-memory sink. Used by tests and as the reference implementation.
#[derive(Default)]
pub struct MemorySink {
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpointed rooms.
    pub fn len(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotSink for MemorySink {
    fn load(&self, room_id: &str) -> Option<Snapshot> {
        self.snapshots
            .lock()
            .ok()
            .and_then(|s| s.get(room_id).cloned())
    }

    fn store(&self, room_id: &str, snapshot: Snapshot) {
        if let Ok(mut s) = self.snapshots.lock() {
            s.insert(room_id.to_string(), snapshot);
        }
    }
}
