//! Task definitions for the scheduler.
//!
//! Applications implement [`Task`]; the scheduler wraps every submitted task in
//! a [`TaskNode`] that records its place in the fork/join tree and its
//! completion state. Nodes are addressed through [`TaskId`] handles while they
//! sit in a queue.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use super::error::SchedulerResult;
use super::worker::{Placement, WorkerLoop};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Generator for process-wide unique task IDs.
///
/// IDs start at 1 and are never reused.
#[derive(Debug)]
pub struct TaskIdGenerator {
    next_id: AtomicU64,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Generate the next task ID.
    #[inline]
    pub fn generate(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static TASK_IDS: TaskIdGenerator = TaskIdGenerator::new();

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, not yet picked up.
    Ready,
    /// Currently executing.
    Running,
    /// Parked in a wait loop until its children finish.
    Waiting,
    /// Execution returned (or panicked).
    Finished,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => TaskState::Ready,
            1 => TaskState::Running,
            2 => TaskState::Waiting,
            _ => TaskState::Finished,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Ready => 0,
            TaskState::Running => 1,
            TaskState::Waiting => 2,
            TaskState::Finished => 3,
        }
    }
}

/// A unit of work.
///
/// `execute` runs exactly once, on some worker thread. Inside it the task may
/// fork children with [`TaskContext::spawn`] and join them with
/// [`TaskContext::wait`].
///
/// ```no_run
/// use forkpool::{Scheduler, PlacementPolicy, Task, TaskContext};
///
/// struct Hello;
///
/// impl Task for Hello {
///     fn execute(&mut self, _cx: &mut TaskContext<'_>) {
///         println!("hello from a worker");
///     }
/// }
///
/// let scheduler = Scheduler::new(2, PlacementPolicy::WorkStealing).unwrap();
/// scheduler.spawn(Hello).unwrap();
/// scheduler.wait().unwrap();
/// ```
pub trait Task: Send + 'static {
    /// The task body.
    fn execute(
        &mut self,
        cx: &mut TaskContext<'_>,
    );
}

/// Adapter running a closure as a [`Task`].
pub struct FnTask<F>(Option<F>);

impl<F> FnTask<F>
where
    F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
{
    #[inline]
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F> Task for FnTask<F>
where
    F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
{
    fn execute(
        &mut self,
        cx: &mut TaskContext<'_>,
    ) {
        if let Some(f) = self.0.take() {
            f(cx);
        }
    }
}

/// Scheduler-side record of a task.
pub(crate) struct TaskNode {
    id: TaskId,
    /// Weak so that a subtree never keeps its ancestors alive.
    parent: Option<Weak<TaskNode>>,
    /// Children not yet joined. Finished ones are released by `wait`.
    children: Mutex<SmallVec<[Arc<TaskNode>; 4]>>,
    spawned: AtomicUsize,
    /// Taken out while executing; `None` afterwards.
    job: Mutex<Option<Box<dyn Task>>>,
    state: AtomicU8,
    panicked: AtomicBool,
    finished: Mutex<bool>,
    finished_cv: Condvar,
}

impl std::fmt::Debug for TaskNode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("parent", &self.parent_id())
            .field("state", &self.state())
            .finish()
    }
}

impl TaskNode {
    /// Wrap a root task.
    pub(crate) fn root(job: Box<dyn Task>) -> Arc<Self> {
        Arc::new(Self::with_parent(job, None))
    }

    /// Wrap a task forked by `parent`.
    pub(crate) fn child(
        job: Box<dyn Task>,
        parent: &Arc<TaskNode>,
    ) -> Arc<Self> {
        Arc::new(Self::with_parent(job, Some(Arc::downgrade(parent))))
    }

    fn with_parent(
        job: Box<dyn Task>,
        parent: Option<Weak<TaskNode>>,
    ) -> Self {
        Self {
            id: TASK_IDS.generate(),
            parent,
            children: Mutex::new(SmallVec::new()),
            spawned: AtomicUsize::new(0),
            job: Mutex::new(Some(job)),
            state: AtomicU8::new(TaskState::Ready.as_u8()),
            panicked: AtomicBool::new(false),
            finished: Mutex::new(false),
            finished_cv: Condvar::new(),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub(crate) fn parent(&self) -> Option<Arc<TaskNode>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn parent_id(&self) -> Option<TaskId> {
        self.parent().map(|p| p.id)
    }

    #[inline]
    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(
        &self,
        state: TaskState,
    ) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    #[inline]
    pub(crate) fn panicked(&self) -> bool {
        self.panicked.load(Ordering::Acquire)
    }

    pub(crate) fn mark_panicked(&self) {
        self.panicked.store(true, Ordering::Release);
    }

    /// True once every child has finished.
    pub(crate) fn is_ready(&self) -> bool {
        self.children.lock().iter().all(|child| child.is_finished())
    }

    /// Children spawned over the task's lifetime, joined or not.
    pub(crate) fn num_children(&self) -> usize {
        self.spawned.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn held_children(&self) -> usize {
        self.children.lock().len()
    }

    pub(crate) fn add_child(
        &self,
        child: Arc<TaskNode>,
    ) {
        self.children.lock().push(child);
        self.spawned.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn remove_child(
        &self,
        id: TaskId,
    ) {
        let mut children = self.children.lock();
        let before = children.len();
        children.retain(|child| child.id != id);
        if children.len() < before {
            self.spawned.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Drop finished children so a joined subtree can be freed.
    pub(crate) fn release_finished_children(&self) {
        self.children.lock().retain(|child| !child.is_finished());
    }

    /// Take the job for execution. Yields `Some` at most once.
    pub(crate) fn take_job(&self) -> Option<Box<dyn Task>> {
        self.job.lock().take()
    }

    /// Whether `ancestor` appears on this node's parent chain.
    pub(crate) fn is_descendant_of(
        &self,
        ancestor: &Arc<TaskNode>,
    ) -> bool {
        let mut current = self.parent();
        while let Some(node) = current {
            if Arc::ptr_eq(&node, ancestor) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    /// Mark finished and wake every thread blocked in [`TaskNode::wait_finished`].
    pub(crate) fn finish_task(&self) {
        let mut finished = self.finished.lock();
        *finished = true;
        self.set_state(TaskState::Finished);
        drop(finished);
        self.finished_cv.notify_all();
    }

    /// Block the calling thread until the task finishes.
    ///
    /// Only for threads that are not workers.
    pub(crate) fn wait_finished(&self) {
        let mut finished = self.finished.lock();
        while !*finished {
            self.finished_cv.wait(&mut finished);
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// The view a running task has of its worker.
///
/// Only exists while the task's `execute` is on the stack.
pub struct TaskContext<'a> {
    runner: &'a mut WorkerLoop,
    node: &'a Arc<TaskNode>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        runner: &'a mut WorkerLoop,
        node: &'a Arc<TaskNode>,
    ) -> Self {
        Self { runner, node }
    }

    /// Id of the running task.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.node.id()
    }

    /// Index of the worker executing the task.
    #[inline]
    pub fn worker_index(&self) -> usize {
        self.runner.index()
    }

    /// Id of the task that spawned this one, `None` for roots.
    pub fn parent(&self) -> Option<TaskId> {
        self.node.parent_id()
    }

    /// Number of children spawned so far.
    pub fn num_children(&self) -> usize {
        self.node.num_children()
    }

    /// True once every spawned child has finished.
    pub fn is_ready(&self) -> bool {
        self.node.is_ready()
    }

    /// Fork a child task.
    ///
    /// The child is enqueued according to the scheduler's placement policy.
    /// Fails only when the target deque is full, in which case the child is
    /// dropped without running and is not counted as a child.
    pub fn spawn<T: Task>(
        &mut self,
        task: T,
    ) -> SchedulerResult<TaskId> {
        let child = TaskNode::child(Box::new(task), self.node);
        let id = child.id();
        self.node.add_child(child.clone());

        if let Err(err) = self.runner.add_ready_task(child, Placement::Default) {
            self.node.remove_child(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Fork a closure as a child task.
    pub fn spawn_fn<F>(
        &mut self,
        f: F,
    ) -> SchedulerResult<TaskId>
    where
        F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
    {
        self.spawn(FnTask::new(f))
    }

    /// Join every child spawned so far.
    ///
    /// The worker keeps executing other ready work while the children run.
    /// Returns immediately when there is nothing to wait for. Joined
    /// children are released afterwards; [`num_children`](Self::num_children)
    /// still counts them.
    pub fn wait(&mut self) {
        if !self.node.is_ready() {
            self.runner.wait_loop(self.node);
        }
        self.node.release_finished_children();
    }
}
