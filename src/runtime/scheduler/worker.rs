//! Worker execution engine.
//!
//! [`Worker`] is the per-slot state shared between the scheduler and peers:
//! the deque, an injection inbox and control flags. [`WorkerLoop`] is the
//! thread-local half that runs on the worker's OS thread and owns everything
//! only that thread touches (victim cache, RNG, deferred tasks).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, trace, warn};

use super::deque::{Deque, Pop};
use super::error::SchedulerResult;
use super::task::{panic_message, TaskContext, TaskId, TaskNode, TaskState};
use super::Shared;

/// Worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Ready,
    Running,
    Stopped,
}

impl WorkerState {
    #[inline]
    fn from_u8(val: u8) -> Self {
        match val {
            0 => WorkerState::Created,
            1 => WorkerState::Ready,
            2 => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }

    #[inline]
    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Created => 0,
            WorkerState::Ready => 1,
            WorkerState::Running => 2,
            WorkerState::Stopped => 3,
        }
    }
}

/// Where a ready task should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Whatever the active policy says.
    Default,
    /// A specific worker, bypassing the policy.
    Forced(usize),
}

/// Shared per-slot worker state.
#[derive(Debug)]
pub(crate) struct Worker {
    index: usize,
    deque: Arc<Deque>,
    /// Serializes deque access under the locking policies.
    deque_lock: Mutex<()>,
    /// Tasks handed over by other threads; drained by the owner.
    inbox: SegQueue<TaskId>,
    victims: Mutex<Vec<Arc<Deque>>>,
    stop: AtomicBool,
    state: AtomicU8,
    /// Task currently executing on this worker, 0 when none.
    assigned: AtomicU64,
    /// Innermost task parked in a wait loop here, 0 at the top level.
    parked: AtomicU64,
}

impl Worker {
    pub(crate) fn new(
        index: usize,
        deque_capacity: usize,
    ) -> Self {
        Self {
            index,
            deque: Arc::new(Deque::new(index, deque_capacity)),
            deque_lock: Mutex::new(()),
            inbox: SegQueue::new(),
            victims: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
            state: AtomicU8::new(WorkerState::Created.as_u8()),
            assigned: AtomicU64::new(0),
            parked: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub(crate) fn deque(&self) -> &Arc<Deque> {
        &self.deque
    }

    #[inline]
    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(
        &self,
        state: WorkerState,
    ) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn add_victim(
        &self,
        deque: Arc<Deque>,
    ) {
        self.victims.lock().push(deque);
    }

    #[cfg(test)]
    pub(crate) fn num_victims(&self) -> usize {
        self.victims.lock().len()
    }

    #[inline]
    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn clear_stop(&self) {
        self.stop.store(false, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Currently executing task, if any.
    #[cfg(test)]
    pub(crate) fn assigned(&self) -> Option<TaskId> {
        match self.assigned.load(Ordering::Acquire) {
            0 => None,
            raw => Some(TaskId(raw)),
        }
    }

    #[inline]
    pub(crate) fn swap_assigned(
        &self,
        raw: u64,
    ) -> u64 {
        self.assigned.swap(raw, Ordering::AcqRel)
    }

    #[inline]
    pub(crate) fn swap_parked(
        &self,
        raw: u64,
    ) -> u64 {
        self.parked.swap(raw, Ordering::AcqRel)
    }

    /// Whether `id` is the innermost task parked on this worker.
    #[inline]
    fn is_parked_on(
        &self,
        id: TaskId,
    ) -> bool {
        self.parked.load(Ordering::Acquire) == id.inner()
    }

    /// In the top-level loop with nothing executing.
    #[inline]
    fn is_idle(&self) -> bool {
        self.assigned.load(Ordering::Acquire) == 0 && self.parked.load(Ordering::Acquire) == 0
    }

    /// Approximate queued work, used by the smallest-deque policy.
    pub(crate) fn num_ready_tasks(&self) -> usize {
        self.deque.get_num_tasks() + self.inbox.len()
    }

    /// Hand a task to this worker from any thread.
    #[inline]
    pub(crate) fn inject(
        &self,
        id: TaskId,
    ) {
        self.inbox.push(id);
    }

    /// Push under the deque mutex. Only valid for the locking policies.
    pub(crate) fn push_locked(
        &self,
        id: TaskId,
    ) -> SchedulerResult<()> {
        let _guard = self.deque_lock.lock();
        self.deque.push_bottom(id)
    }

    pub(crate) fn pop_locked(&self) -> Pop {
        let _guard = self.deque_lock.lock();
        self.deque.pop_bottom()
    }
}

/// Thread-local side of a worker.
pub(crate) struct WorkerLoop {
    shared: Arc<Shared>,
    worker: Arc<Worker>,
    index: usize,
    stealing: bool,
    victims: Vec<Arc<Deque>>,
    rng: SmallRng,
    /// Foreign tasks set aside by wait loops, tagged with the wait depth.
    deferred: Vec<(usize, Arc<TaskNode>)>,
    depth: usize,
}

impl WorkerLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        index: usize,
    ) -> Self {
        let worker = shared.workers[index].clone();
        let victims = worker.victims.lock().clone();
        let stealing = shared.placement.policy().is_work_stealing();
        let rng = match shared.config.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(index as u64 + 1)),
            None => SmallRng::from_os_rng(),
        };

        Self {
            shared,
            worker,
            index,
            stealing,
            victims,
            rng,
            deferred: Vec::new(),
            depth: 0,
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Main loop; returns once the stop flag is observed.
    pub(crate) fn work_loop(&mut self) {
        self.worker.set_state(WorkerState::Running);
        debug!(
            worker = self.index,
            victims = self.victims.len(),
            policy = %self.shared.placement.policy(),
            "worker started"
        );

        while !self.worker.is_stopped() {
            self.drain_inbox();
            match self.next_task() {
                Some(node) => self.process(node),
                None if !self.stealing => thread::yield_now(),
                None => {},
            }
        }

        self.worker.set_state(WorkerState::Stopped);
        debug!(worker = self.index, "worker stopped");
    }

    /// Nested loop run while `parked` waits for its children.
    ///
    /// Only descendants of `parked` are executed inline. Anything else is
    /// routed to a worker parked on one of its ancestors, or to an idle one.
    /// With no such worker it is set aside, retried whenever this loop runs
    /// dry, and restored to the local queue when this level returns.
    pub(crate) fn wait_loop(
        &mut self,
        parked: &Arc<TaskNode>,
    ) {
        let previous = self.worker.swap_assigned(0);
        let previous_parked = self.worker.swap_parked(parked.id().inner());
        parked.set_state(TaskState::Waiting);
        self.depth += 1;
        let level = self.depth;
        trace!(worker = self.index, task = %parked.id(), depth = level, "waiting on children");

        while !parked.is_ready() && !self.worker.is_stopped() {
            self.drain_inbox();
            let Some(node) = self.next_task() else {
                self.reroute_deferred();
                if !self.stealing {
                    thread::yield_now();
                }
                continue;
            };

            if node.is_finished() {
                continue;
            }
            if node.is_descendant_of(parked) {
                self.process(node);
            } else {
                self.replace(node);
            }
        }

        self.restore_deferred(level);
        self.depth -= 1;
        parked.set_state(TaskState::Running);
        self.worker.swap_parked(previous_parked);
        self.worker.swap_assigned(previous);
    }

    /// Run a task to completion on this thread. No-op if it already ran.
    pub(crate) fn process(
        &mut self,
        node: Arc<TaskNode>,
    ) {
        if node.is_finished() {
            return;
        }
        let Some(mut job) = node.take_job() else {
            return;
        };

        let previous = self.worker.swap_assigned(node.id().inner());
        node.set_state(TaskState::Running);
        trace!(worker = self.index, task = %node.id(), "executing");

        let outcome = {
            let mut cx = TaskContext::new(self, &node);
            panic::catch_unwind(AssertUnwindSafe(|| job.execute(&mut cx)))
        };
        drop(job);

        if let Err(payload) = outcome {
            node.mark_panicked();
            self.shared.stats.record_panicked();
            error!(
                worker = self.index,
                task = %node.id(),
                "task panicked: {}",
                panic_message(payload.as_ref())
            );
        }

        self.shared.stats.record_executed();
        node.finish_task();
        self.worker.swap_assigned(previous);
    }

    /// Enqueue a newly spawned (or displaced) task.
    pub(crate) fn add_ready_task(
        &mut self,
        node: Arc<TaskNode>,
        placement: Placement,
    ) -> SchedulerResult<()> {
        match placement {
            Placement::Forced(target) => {
                self.shared.push_forced(target, node);
                Ok(())
            },
            Placement::Default if self.stealing => {
                let id = self.shared.arena.insert(node);
                if let Err(err) = self.worker.deque.push_bottom(id) {
                    self.shared.arena.take(id);
                    return Err(err);
                }
                self.shared.stats.record_spawned();
                Ok(())
            },
            Placement::Default => {
                let target = self.shared.next_worker();
                self.shared.push_locked(target, node)?;
                self.shared.stats.record_spawned();
                Ok(())
            },
        }
    }

    /// Try one random victim's top.
    pub(crate) fn steal_task(&mut self) -> Pop {
        if self.victims.is_empty() || !self.stealing {
            return Pop::Empty;
        }

        let victim = &self.victims[self.rng.random_range(0..self.victims.len())];
        let result = victim.pop_top();

        match result {
            Pop::Task(id) => {
                self.shared.stats.record_steal(true, false);
                trace!(worker = self.index, victim = victim.id(), task = %id, "stole task");
            },
            Pop::Abort => self.shared.stats.record_steal(false, true),
            Pop::Empty => self.shared.stats.record_steal(false, false),
        }
        result
    }

    fn pop_local(&self) -> Pop {
        if self.stealing {
            self.worker.deque.pop_bottom()
        } else {
            self.worker.pop_locked()
        }
    }

    fn push_local(
        &self,
        id: TaskId,
    ) -> SchedulerResult<()> {
        if self.stealing {
            self.worker.deque.push_bottom(id)
        } else {
            self.worker.push_locked(id)
        }
    }

    /// Local pop, falling back to a steal.
    fn next_task(&mut self) -> Option<Arc<TaskNode>> {
        let id = match self.pop_local() {
            Pop::Task(id) => Some(id),
            Pop::Empty | Pop::Abort if self.stealing => {
                thread::yield_now();
                self.steal_task().task()
            },
            Pop::Empty | Pop::Abort => None,
        }?;

        let node = self.shared.arena.take(id);
        if node.is_none() {
            warn!(worker = self.index, task = %id, "dequeued a handle with no task");
        }
        node
    }

    /// Move tasks handed over by other threads onto the local deque.
    fn drain_inbox(&mut self) {
        let capacity = self.worker.deque.capacity();
        while self.worker.deque.get_num_tasks() < capacity {
            let Some(id) = self.worker.inbox.pop() else {
                break;
            };
            if let Err(err) = self.push_local(id) {
                warn!(worker = self.index, task = %id, %err, "inbox drain stalled");
                self.worker.inject(id);
                break;
            }
        }
    }

    /// Get a foreign task out of a wait loop's way.
    fn replace(
        &mut self,
        node: Arc<TaskNode>,
    ) {
        match self.route_target(&node) {
            Some(target) => self.send(node, target),
            None => {
                trace!(worker = self.index, task = %node.id(), "deferring foreign task");
                self.shared.stats.record_deferral();
                self.deferred.push((self.depth, node));
            },
        }
    }

    fn send(
        &mut self,
        node: Arc<TaskNode>,
        target: usize,
    ) {
        let id = node.id();
        trace!(worker = self.index, target, task = %id, "re-placing foreign task");
        self.shared.stats.record_replacement();
        if let Err(err) = self.add_ready_task(node, Placement::Forced(target)) {
            warn!(worker = self.index, target, task = %id, %err, "re-placement failed");
        }
    }

    /// Retry deferred tasks whose ancestors are now parked elsewhere.
    fn reroute_deferred(&mut self) {
        let mut i = 0;
        while i < self.deferred.len() {
            match self.route_target(&self.deferred[i].1) {
                Some(target) => {
                    let (_, node) = self.deferred.remove(i);
                    self.send(node, target);
                },
                None => i += 1,
            }
        }
    }

    /// Put everything deferred at `level` back in front of the local queue.
    fn restore_deferred(
        &mut self,
        level: usize,
    ) {
        let (restore, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|(depth, _)| *depth >= level);
        self.deferred = keep;
        // Reversed so the original pop order survives the inbox.
        for (_, node) in restore.into_iter().rev() {
            let id = self.shared.arena.insert(node);
            self.worker.inject(id);
        }
    }

    /// A peer that can run `node` inline: one whose innermost wait is on the
    /// nearest possible ancestor, else one sitting idle in its top-level loop.
    fn route_target(
        &self,
        node: &TaskNode,
    ) -> Option<usize> {
        let workers = &self.shared.workers;
        let mut ancestor = node.parent();
        while let Some(current) = ancestor {
            let id = current.id();
            if let Some(target) = self.peers().find(|&i| workers[i].is_parked_on(id)) {
                return Some(target);
            }
            ancestor = current.parent();
        }
        self.peers().find(|&i| workers[i].is_idle())
    }

    /// Every other worker, starting after this one.
    fn peers(&self) -> impl Iterator<Item = usize> + '_ {
        let n = self.shared.workers.len();
        (1..n).map(move |offset| (self.index + offset) % n)
    }
}
