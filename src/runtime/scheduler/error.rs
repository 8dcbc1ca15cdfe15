//! Scheduler errors

use thiserror::Error;

use super::task::TaskId;

/// Scheduler result
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid worker index {index} (scheduler has {num_workers} workers)")]
    InvalidWorkerIndex {
        /// The requested worker slot
        index: usize,
        /// Number of workers in the pool
        num_workers: usize,
    },

    #[error("Deque of worker {worker} is full ({capacity} live tasks)")]
    CapacityExceeded {
        /// Owner of the full deque
        worker: usize,
        /// Fixed capacity of the deque
        capacity: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("{count} root task(s) panicked: {ids:?}", count = .0.len(), ids = .0)]
    TasksPanicked(Vec<TaskId>),
}
