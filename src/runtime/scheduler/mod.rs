//! Fork-join task scheduler.
//!
//! A fixed pool of worker threads executes a dynamically built tree of
//! [`Task`]s. Each worker owns a lock-free [`Deque`]; running tasks fork
//! children with [`TaskContext::spawn`] and join them with
//! [`TaskContext::wait`], which keeps the worker busy on other ready work
//! instead of blocking its thread.
//!
//! # Architecture
//!
//! - [`Deque`] - per-worker work-stealing deque of task handles
//! - [`Task`] / [`TaskContext`] - application work and its fork/join surface
//! - `worker` - the work loop, the nested wait loop and steal logic
//! - [`Scheduler`] - worker lifecycle, root tasks and placement policies

mod arena;
pub mod deque;
pub mod error;
pub mod placement;
pub mod stats;
pub mod task;
mod worker;

pub use deque::{Age, Deque, Pop};
pub use error::{SchedulerError, SchedulerResult};
pub use placement::{ParsePolicyError, PlacementPolicy};
pub use stats::{SchedulerStats, StatsSnapshot};
pub use task::{FnTask, Task, TaskContext, TaskId, TaskIdGenerator, TaskState};
pub use worker::WorkerState;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use arena::TaskArena;
use placement::PlacementState;
use task::TaskNode;
use worker::{Worker, WorkerLoop};

/// Upper bound on `num_workers`.
pub const MAX_WORKERS: usize = 1024;

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads, 0 for the available hardware parallelism.
    #[serde(default)]
    pub num_workers: usize,
    /// Placement policy.
    #[serde(default)]
    pub policy: PlacementPolicy,
    /// Slots per worker deque, rounded up to a power of two.
    #[serde(default = "default_deque_capacity")]
    pub deque_capacity: usize,
    /// Worker thread name prefix.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Worker thread stack size in bytes.
    #[serde(default)]
    pub stack_size: Option<usize>,
    /// Seed for placement and victim selection.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_deque_capacity() -> usize {
    1024
}

fn default_thread_name() -> String {
    "forkpool-worker".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            policy: PlacementPolicy::default(),
            deque_capacity: default_deque_capacity(),
            thread_name: default_thread_name(),
            stack_size: None,
            rng_seed: None,
        }
    }
}

impl SchedulerConfig {
    /// Config with the given worker count and policy, defaults otherwise.
    pub fn new(
        num_workers: usize,
        policy: PlacementPolicy,
    ) -> Self {
        Self {
            num_workers,
            policy,
            ..Self::default()
        }
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.num_workers > MAX_WORKERS {
            return Err(SchedulerError::InvalidConfig(format!(
                "num_workers = {} exceeds the maximum of {}",
                self.num_workers, MAX_WORKERS
            )));
        }
        if self.deque_capacity < 2 || self.deque_capacity > deque::MAX_CAPACITY {
            return Err(SchedulerError::InvalidConfig(format!(
                "deque_capacity = {} is outside 2..={}",
                self.deque_capacity,
                deque::MAX_CAPACITY
            )));
        }
        if self.thread_name.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        if self.stack_size == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "stack_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker count with 0 resolved to the hardware parallelism.
    pub fn resolved_workers(&self) -> usize {
        if self.num_workers > 0 {
            return self.num_workers;
        }
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// State shared by the scheduler handle and every worker thread.
#[derive(Debug)]
pub(crate) struct Shared {
    config: SchedulerConfig,
    workers: Vec<Arc<Worker>>,
    arena: TaskArena,
    placement: PlacementState,
    stats: SchedulerStats,
}

impl Shared {
    #[inline]
    fn next_worker(&self) -> usize {
        self.placement.next_worker(&self.workers)
    }

    /// Push onto `target`'s deque under its mutex.
    fn push_locked(
        &self,
        target: usize,
        node: Arc<TaskNode>,
    ) -> SchedulerResult<()> {
        let id = self.arena.insert(node);
        if let Err(err) = self.workers[target].push_locked(id) {
            self.arena.take(id);
            return Err(err);
        }
        Ok(())
    }

    /// Move a task to `target`. Never fails: a full deque falls back to the inbox.
    fn push_forced(
        &self,
        target: usize,
        node: Arc<TaskNode>,
    ) {
        let id = self.arena.insert(node);
        let worker = &self.workers[target];
        if self.placement.policy().is_work_stealing() || worker.push_locked(id).is_err() {
            worker.inject(id);
        }
    }

    /// Place a root task on `target`, bypassing the policy.
    fn inject_root(
        &self,
        target: usize,
        node: Arc<TaskNode>,
    ) -> SchedulerResult<()> {
        if self.placement.policy().is_work_stealing() {
            // Only the owner may push; hand it over through the inbox.
            let id = self.arena.insert(node);
            self.workers[target].inject(id);
            Ok(())
        } else {
            self.push_locked(target, node)
        }
    }
}

/// Per-slot thread bookkeeping.
#[derive(Debug, Default)]
struct WorkerSlot {
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    started: AtomicBool,
}

/// Fork-join scheduler.
///
/// Submit root tasks with [`Scheduler::spawn`] and block on them with
/// [`Scheduler::wait`]. Dropping the scheduler stops and joins every worker.
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    slots: Box<[WorkerSlot]>,
    roots: Mutex<Vec<Arc<TaskNode>>>,
}

impl Scheduler {
    /// Create and start a scheduler. `num_workers = 0` matches the hardware.
    pub fn new(
        num_workers: usize,
        policy: PlacementPolicy,
    ) -> SchedulerResult<Self> {
        Self::with_config(SchedulerConfig::new(num_workers, policy))
    }

    /// Create and start a scheduler from a full configuration.
    pub fn with_config(config: SchedulerConfig) -> SchedulerResult<Self> {
        let scheduler = Self::build(config)?;
        scheduler.start_workers()?;
        Ok(scheduler)
    }

    /// Create a scheduler configured from `FORKPOOL_*` environment variables.
    pub fn from_env() -> SchedulerResult<Self> {
        let config = crate::util::config::apply_env_overrides(SchedulerConfig::default())
            .map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;
        Self::with_config(config)
    }

    /// Validate the config and create every worker without starting threads.
    pub(crate) fn build(mut config: SchedulerConfig) -> SchedulerResult<Self> {
        config.validate()?;
        config.num_workers = config.resolved_workers();

        let slots: Box<[WorkerSlot]> = (0..config.num_workers)
            .map(|_| WorkerSlot::default())
            .collect();
        let workers = Self::create_workers(&config, &slots);
        let placement = PlacementState::new(config.policy, config.rng_seed);

        debug!(
            workers = config.num_workers,
            policy = %config.policy,
            deque_capacity = config.deque_capacity,
            "scheduler created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                workers,
                arena: TaskArena::new(),
                placement,
                stats: SchedulerStats::default(),
            }),
            slots,
            roots: Mutex::new(Vec::new()),
        })
    }

    /// Allocate every worker, then wire up the all-to-all victim cache.
    fn create_workers(
        config: &SchedulerConfig,
        slots: &[WorkerSlot],
    ) -> Vec<Arc<Worker>> {
        let workers: Vec<Arc<Worker>> = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| Self::create_worker(index, config.deque_capacity, slot))
            .collect();

        for worker in &workers {
            for peer in &workers {
                if peer.index() != worker.index() {
                    worker.add_victim(peer.deque().clone());
                }
            }
        }

        workers
    }

    fn create_worker(
        index: usize,
        deque_capacity: usize,
        slot: &WorkerSlot,
    ) -> Arc<Worker> {
        let worker = Arc::new(Worker::new(index, deque_capacity));
        worker.set_state(WorkerState::Ready);
        slot.started.store(false, Ordering::Release);
        worker
    }

    /// Start a thread for every slot that is not running. Idempotent.
    pub fn start_workers(&self) -> SchedulerResult<()> {
        for index in 0..self.slots.len() {
            self.start_worker(index)?;
        }
        Ok(())
    }

    fn start_worker(
        &self,
        index: usize,
    ) -> SchedulerResult<()> {
        let slot = &self.slots[index];
        if slot
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let worker = &self.shared.workers[index];
        worker.clear_stop();

        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.shared.config.thread_name, index));
        if let Some(stack_size) = self.shared.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let shared = self.shared.clone();
        match builder.spawn(move || WorkerLoop::new(shared, index).work_loop()) {
            Ok(handle) => {
                *slot.thread.lock() = Some(handle);
                Ok(())
            },
            Err(err) => {
                slot.started.store(false, Ordering::Release);
                Err(SchedulerError::ThreadSpawn(err))
            },
        }
    }

    /// Signal every worker to stop, then join every started thread.
    pub fn stop_workers(&self) {
        for worker in &self.shared.workers {
            worker.stop();
        }

        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(handle) = slot.thread.lock().take() {
                if handle.join().is_err() {
                    warn!(worker = index, "worker thread panicked");
                }
            }
            slot.started.store(false, Ordering::Release);
        }
    }

    /// Stop and join all workers. A later `spawn` or `wait` restarts them.
    pub fn shutdown(&mut self) {
        self.stop_workers();
    }

    /// Submit a root task on worker 0.
    pub fn spawn<T: Task>(
        &self,
        task: T,
    ) -> SchedulerResult<TaskId> {
        self.spawn_on(task, 0)
    }

    /// Submit a root task directly onto `worker_index`, bypassing the policy.
    pub fn spawn_on<T: Task>(
        &self,
        task: T,
        worker_index: usize,
    ) -> SchedulerResult<TaskId> {
        let num_workers = self.num_workers();
        if worker_index >= num_workers {
            return Err(SchedulerError::InvalidWorkerIndex {
                index: worker_index,
                num_workers,
            });
        }

        let node = TaskNode::root(Box::new(task));
        let id = node.id();
        self.shared.inject_root(worker_index, node.clone())?;
        self.roots.lock().push(node);
        self.shared.stats.record_root();
        debug!(task = %id, worker = worker_index, "root task spawned");

        self.start_workers()?;
        Ok(id)
    }

    /// Block until every root submitted so far has finished.
    ///
    /// Fails with [`SchedulerError::TasksPanicked`] when a root's `execute`
    /// panicked; the remaining roots are still waited for.
    pub fn wait(&self) -> SchedulerResult<()> {
        self.start_workers()?;

        let roots = std::mem::take(&mut *self.roots.lock());
        let mut panicked = Vec::new();
        for root in &roots {
            root.wait_finished();
            if root.panicked() {
                panicked.push(root.id());
            }
        }

        if panicked.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::TasksPanicked(panicked))
        }
    }

    /// Worker chosen by the active policy for the next placement.
    pub fn next_worker(&self) -> usize {
        self.shared.next_worker()
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.shared.workers.len()
    }

    #[inline]
    pub fn policy(&self) -> PlacementPolicy {
        self.shared.placement.policy()
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Whether any worker thread is running.
    pub fn is_running(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.started.load(Ordering::Acquire))
    }

    /// Roots submitted but not yet consumed by `wait`.
    pub fn pending_roots(&self) -> usize {
        self.roots.lock().len()
    }

    /// Task handles sitting in deques or inboxes.
    pub fn queued_tasks(&self) -> usize {
        self.shared.arena.len()
    }

    /// Lifecycle state of every worker.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared.workers.iter().map(|w| w.state()).collect()
    }

    /// Get statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

#[cfg(test)]
mod tests;
