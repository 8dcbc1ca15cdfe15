//! Tasks shared by the integration tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use forkpool::{Task, TaskContext};

pub struct FibTask {
    pub n: i64,
    pub out: Arc<AtomicI64>,
}

impl FibTask {
    pub fn new(
        n: i64,
        out: Arc<AtomicI64>,
    ) -> Self {
        Self { n, out }
    }
}

impl Task for FibTask {
    fn execute(
        &mut self,
        cx: &mut TaskContext<'_>,
    ) {
        if self.n < 2 {
            self.out.store(self.n, Ordering::SeqCst);
            return;
        }

        let a = Arc::new(AtomicI64::new(0));
        let b = Arc::new(AtomicI64::new(0));
        cx.spawn(FibTask::new(self.n - 1, a.clone())).unwrap();
        cx.spawn(FibTask::new(self.n - 2, b.clone())).unwrap();
        cx.wait();

        self.out
            .store(a.load(Ordering::SeqCst) + b.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

/// Adds `delta` to every element of `data`, one child per element.
pub struct IncrementTask {
    pub data: Arc<Vec<AtomicI64>>,
    pub delta: i64,
}

impl Task for IncrementTask {
    fn execute(
        &mut self,
        cx: &mut TaskContext<'_>,
    ) {
        for i in 0..self.data.len() {
            let data = self.data.clone();
            let delta = self.delta;
            cx.spawn_fn(move |_| {
                data[i].fetch_add(delta, Ordering::SeqCst);
            })
            .unwrap();
        }
        cx.wait();
    }
}

pub fn fib(n: i64) -> i64 {
    let (mut a, mut b) = (0, 1);
    for _ in 0..n {
        let next = a + b;
        a = b;
        b = next;
    }
    a
}
