//! Work-stealing deque.
//!
//! Follows the Arora, Blumofe and Plaxton deque from "Thread Scheduling for
//! Multiprogrammed Multiprocessors". The owner pushes and pops at the bottom
//! (LIFO), stealers pop from the top (FIFO). The steal cursor is packed with a
//! generation tag into a single 64-bit [`Age`] word so that a stealer holding a
//! stale snapshot can never win a compare-and-swap after the deque has passed
//! through empty.
//!
//! Slots hold [`TaskId`] handles, never task objects, so a racy slot read by a
//! stealer that later loses its CAS is harmless.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use super::error::{SchedulerError, SchedulerResult};
use super::task::TaskId;

/// Largest accepted capacity. Cursor distances are compared as `i32`.
pub const MAX_CAPACITY: usize = 1 << 30;

/// Outcome of a deque pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop {
    /// A task was removed.
    Task(TaskId),
    /// Nothing to take.
    Empty,
    /// Lost a race for the element; try another victim or local work.
    Abort,
}

impl Pop {
    /// The task, if any.
    #[inline]
    pub fn task(self) -> Option<TaskId> {
        match self {
            Pop::Task(id) => Some(id),
            Pop::Empty | Pop::Abort => None,
        }
    }

    #[inline]
    pub fn is_abort(&self) -> bool {
        matches!(self, Pop::Abort)
    }
}

/// Steal cursor paired with a generation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Age {
    /// Bumped every time the deque empties.
    pub tag: u32,
    /// Index of the oldest live task.
    pub top: u32,
}

impl Age {
    #[inline]
    fn pack(self) -> u64 {
        ((self.tag as u64) << 32) | self.top as u64
    }

    #[inline]
    fn unpack(raw: u64) -> Self {
        Self {
            tag: (raw >> 32) as u32,
            top: raw as u32,
        }
    }
}

/// Signed distance `bottom - top`, tolerant of index wrap-around.
#[inline]
fn distance(bottom: u32, top: u32) -> i32 {
    bottom.wrapping_sub(top) as i32
}

/// A bounded work-stealing deque of task handles.
#[derive(Debug)]
pub struct Deque {
    /// Owning worker, used in error reports.
    id: usize,
    slots: Box<[AtomicU64]>,
    mask: usize,
    age: CachePadded<AtomicU64>,
    bottom: CachePadded<AtomicU32>,
}

impl Deque {
    /// Create a deque for worker `id`. `capacity` is rounded up to a power of two.
    pub fn new(
        id: usize,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.clamp(2, MAX_CAPACITY).next_power_of_two();
        let slots = (0..capacity).map(|_| AtomicU64::new(0)).collect();

        Self {
            id,
            slots,
            mask: capacity - 1,
            age: CachePadded::new(AtomicU64::new(Age { tag: 0, top: 0 }.pack())),
            bottom: CachePadded::new(AtomicU32::new(0)),
        }
    }

    /// Owning worker id.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot(
        &self,
        index: u32,
    ) -> &AtomicU64 {
        &self.slots[index as usize & self.mask]
    }

    /// Add a task at the bottom. Owner only.
    ///
    /// Fails with [`SchedulerError::CapacityExceeded`] when every slot holds a
    /// live task; the deque is left untouched in that case.
    pub fn push_bottom(
        &self,
        task: TaskId,
    ) -> SchedulerResult<()> {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let age = Age::unpack(self.age.load(Ordering::Acquire));

        if distance(bottom, age.top) as usize >= self.capacity() {
            return Err(SchedulerError::CapacityExceeded {
                worker: self.id,
                capacity: self.capacity(),
            });
        }

        self.slot(bottom).store(task.inner(), Ordering::Relaxed);
        self.bottom
            .store(bottom.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Remove the most recently pushed task. Owner only.
    pub fn pop_bottom(&self) -> Pop {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let age = Age::unpack(self.age.load(Ordering::Acquire));
        if distance(bottom, age.top) <= 0 {
            return Pop::Empty;
        }

        let bottom = bottom.wrapping_sub(1);
        self.bottom.store(bottom, Ordering::Relaxed);
        // The bottom store must be visible before we read top again.
        fence(Ordering::SeqCst);

        let task = TaskId(self.slot(bottom).load(Ordering::Relaxed));
        let old_age = Age::unpack(self.age.load(Ordering::Relaxed));

        if distance(bottom, old_age.top) > 0 {
            return Pop::Task(task);
        }

        // At most one task was left: reset the cursors and bump the tag.
        self.bottom.store(0, Ordering::Relaxed);
        let new_age = Age {
            tag: old_age.tag.wrapping_add(1),
            top: 0,
        };

        if bottom == old_age.top {
            if self
                .age
                .compare_exchange(
                    old_age.pack(),
                    new_age.pack(),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Pop::Task(task);
            }
            self.age.store(new_age.pack(), Ordering::Release);
            return Pop::Abort;
        }

        // Stealers took the remaining tasks between our first check and the decrement.
        self.age.store(new_age.pack(), Ordering::Release);
        Pop::Abort
    }

    /// Remove the oldest task. Any thread.
    pub fn pop_top(&self) -> Pop {
        let old_age = Age::unpack(self.age.load(Ordering::Acquire));
        fence(Ordering::SeqCst);
        let bottom = self.bottom.load(Ordering::Acquire);

        if distance(bottom, old_age.top) <= 0 {
            return Pop::Empty;
        }

        let task = TaskId(self.slot(old_age.top).load(Ordering::Relaxed));
        let new_age = Age {
            tag: old_age.tag,
            top: old_age.top.wrapping_add(1),
        };

        match self.age.compare_exchange(
            old_age.pack(),
            new_age.pack(),
            Ordering::SeqCst,
            Ordering::Relaxed,
        ) {
            Ok(_) => Pop::Task(task),
            Err(_) => Pop::Abort,
        }
    }

    /// Approximate number of queued tasks. Racy; for heuristics only.
    pub fn get_num_tasks(&self) -> usize {
        let age = Age::unpack(self.age.load(Ordering::Acquire));
        let bottom = self.bottom.load(Ordering::Acquire);
        distance(bottom, age.top).max(0) as usize
    }

    /// Racy emptiness check.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.get_num_tasks() == 0
    }

    /// Current `(bottom, age)` cursors.
    pub fn cursors(&self) -> (u32, Age) {
        (
            self.bottom.load(Ordering::Acquire),
            Age::unpack(self.age.load(Ordering::Acquire)),
        )
    }
}
