//! A single worker must not inline an unrelated root while a task waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use forkpool::{FnTask, PlacementPolicy, Scheduler};

#[test]
fn test_single_worker_runs_unrelated_root_after_wait() {
    let scheduler = Scheduler::new(1, PlacementPolicy::WorkStealing).unwrap();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let started = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    let (log, started_in, release_in) = (order.clone(), started.clone(), release.clone());
    scheduler
        .spawn(FnTask::new(move |cx| {
            let child_log = log.clone();
            cx.spawn_fn(move |_| child_log.lock().unwrap().push("c1"))
                .unwrap();
            started_in.store(true, Ordering::SeqCst);
            while !release_in.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            cx.wait();
            log.lock().unwrap().push("r1-resumed");
        }))
        .unwrap();

    while !started.load(Ordering::SeqCst) {
        thread::yield_now();
    }

    let log = order.clone();
    scheduler
        .spawn(FnTask::new(move |_| log.lock().unwrap().push("r2")))
        .unwrap();
    release.store(true, Ordering::SeqCst);

    scheduler.wait().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["c1", "r1-resumed", "r2"]);
    assert!(scheduler.stats().deferrals >= 1);
}

#[test]
fn test_locking_policy_single_worker_order() {
    let scheduler = Scheduler::new(1, PlacementPolicy::RoundRobin).unwrap();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let started = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    let (log, started_in, release_in) = (order.clone(), started.clone(), release.clone());
    scheduler
        .spawn(FnTask::new(move |cx| {
            let child_log = log.clone();
            cx.spawn_fn(move |_| child_log.lock().unwrap().push("c1"))
                .unwrap();
            started_in.store(true, Ordering::SeqCst);
            while !release_in.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            cx.wait();
            log.lock().unwrap().push("r1-resumed");
        }))
        .unwrap();

    while !started.load(Ordering::SeqCst) {
        thread::yield_now();
    }

    let log = order.clone();
    scheduler
        .spawn(FnTask::new(move |_| log.lock().unwrap().push("r2")))
        .unwrap();
    release.store(true, Ordering::SeqCst);

    scheduler.wait().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["c1", "r1-resumed", "r2"]);
}
