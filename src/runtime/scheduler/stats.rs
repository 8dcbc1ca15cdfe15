//! Scheduler counters.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Live scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    roots_spawned: AtomicUsize,
    tasks_spawned: AtomicUsize,
    tasks_executed: AtomicUsize,
    tasks_panicked: AtomicUsize,
    steal_attempts: AtomicUsize,
    steal_successes: AtomicUsize,
    steal_aborts: AtomicUsize,
    replacements: AtomicUsize,
    deferrals: AtomicUsize,
}

impl SchedulerStats {
    #[inline]
    pub fn record_root(&self) {
        self.roots_spawned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_spawned(&self) {
        self.tasks_spawned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_panicked(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a steal attempt and how it ended.
    #[inline]
    pub fn record_steal(
        &self,
        success: bool,
        aborted: bool,
    ) {
        self.steal_attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.steal_successes.fetch_add(1, Ordering::Relaxed);
        } else if aborted {
            self.steal_aborts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A wait loop pushed a foreign task to another worker.
    #[inline]
    pub fn record_replacement(&self) {
        self.replacements.fetch_add(1, Ordering::Relaxed);
    }

    /// A wait loop set a foreign task aside on its own worker.
    #[inline]
    pub fn record_deferral(&self) {
        self.deferrals.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            roots_spawned: self.roots_spawned.load(Ordering::Relaxed),
            tasks_spawned: self.tasks_spawned.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
            steal_successes: self.steal_successes.load(Ordering::Relaxed),
            steal_aborts: self.steal_aborts.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
            deferrals: self.deferrals.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Root tasks submitted through the scheduler.
    pub roots_spawned: usize,
    /// Child tasks forked from running tasks.
    pub tasks_spawned: usize,
    /// Tasks whose `execute` returned or panicked.
    pub tasks_executed: usize,
    /// Tasks whose `execute` panicked.
    pub tasks_panicked: usize,
    pub steal_attempts: usize,
    pub steal_successes: usize,
    /// Steals that lost a race.
    pub steal_aborts: usize,
    /// Tasks moved to another worker by a wait loop.
    pub replacements: usize,
    /// Tasks set aside by a wait loop on a worker without peers.
    pub deferrals: usize,
}

impl StatsSnapshot {
    /// Get steal success rate.
    pub fn steal_success_rate(&self) -> f64 {
        if self.steal_attempts == 0 {
            return 1.0;
        }
        self.steal_successes as f64 / self.steal_attempts as f64
    }
}
