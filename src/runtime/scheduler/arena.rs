//! Handle table for queued tasks.
//!
//! Deques carry bare [`TaskId`]s. A node is inserted here right before its
//! handle is enqueued and taken out by whoever wins the handle from a deque or
//! inbox, so every entry corresponds to exactly one queued handle.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::task::{TaskId, TaskNode};

const SHARDS: usize = 64;

#[derive(Debug)]
pub(crate) struct TaskArena {
    shards: Box<[Mutex<HashMap<TaskId, Arc<TaskNode>>>]>,
}

impl TaskArena {
    pub(crate) fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    #[inline]
    fn shard(
        &self,
        id: TaskId,
    ) -> &Mutex<HashMap<TaskId, Arc<TaskNode>>> {
        &self.shards[id.inner() as usize % SHARDS]
    }

    /// Register a node about to be enqueued and return its handle.
    pub(crate) fn insert(
        &self,
        node: Arc<TaskNode>,
    ) -> TaskId {
        let id = node.id();
        self.shard(id).lock().insert(id, node);
        id
    }

    /// Resolve a dequeued handle, removing it from the table.
    pub(crate) fn take(
        &self,
        id: TaskId,
    ) -> Option<Arc<TaskNode>> {
        self.shard(id).lock().remove(&id)
    }

    /// Number of queued tasks.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}
