//! forkpool
//!
//! A fork-join task scheduler. A fixed pool of worker threads executes
//! dynamically spawned task trees; each worker owns a lock-free
//! Arora-Blumofe-Plaxton deque and idle workers steal from the top of their
//! peers' deques. A task that waits for its children keeps its worker busy on
//! other ready work instead of blocking it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! use forkpool::{PlacementPolicy, Scheduler, Task, TaskContext};
//!
//! struct Fib {
//!     n: u64,
//!     out: Arc<AtomicU64>,
//! }
//!
//! impl Task for Fib {
//!     fn execute(&mut self, cx: &mut TaskContext<'_>) {
//!         if self.n < 2 {
//!             self.out.store(self.n, Ordering::Relaxed);
//!             return;
//!         }
//!         let (a, b) = (Arc::new(AtomicU64::new(0)), Arc::new(AtomicU64::new(0)));
//!         cx.spawn(Fib { n: self.n - 1, out: a.clone() }).unwrap();
//!         cx.spawn(Fib { n: self.n - 2, out: b.clone() }).unwrap();
//!         cx.wait();
//!         self.out.store(a.load(Ordering::Relaxed) + b.load(Ordering::Relaxed), Ordering::Relaxed);
//!     }
//! }
//!
//! let scheduler = Scheduler::new(4, PlacementPolicy::WorkStealing).unwrap();
//! let out = Arc::new(AtomicU64::new(0));
//! scheduler.spawn(Fib { n: 20, out: out.clone() }).unwrap();
//! scheduler.wait().unwrap();
//! assert_eq!(out.load(Ordering::Relaxed), 6765);
//! ```

#![doc(html_root_url = "https://docs.rs/forkpool")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use runtime::scheduler::{
    FnTask, PlacementPolicy, Scheduler, SchedulerConfig, SchedulerError, SchedulerResult,
    StatsSnapshot, Task, TaskContext, TaskId,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
