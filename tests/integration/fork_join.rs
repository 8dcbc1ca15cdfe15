//! End-to-end fork/join runs through the public API.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use forkpool::{FnTask, PlacementPolicy, Scheduler, TaskId};

use crate::common::{fib, FibTask, IncrementTask};

#[test]
fn test_fib_every_policy_and_pool_size() {
    for policy in PlacementPolicy::ALL {
        for workers in [1, 2, 4, 8] {
            let scheduler = Scheduler::new(workers, policy).unwrap();
            let out = Arc::new(AtomicI64::new(0));
            scheduler.spawn(FibTask::new(10, out.clone())).unwrap();
            scheduler.wait().unwrap();
            assert_eq!(out.load(Ordering::SeqCst), 55, "{} x {}", policy, workers);
        }
    }
}

#[test]
fn test_increment_and_fib_roots_together() {
    let scheduler = Scheduler::new(4, PlacementPolicy::WorkStealing).unwrap();
    let data: Arc<Vec<AtomicI64>> = Arc::new((0..512).map(|_| AtomicI64::new(10)).collect());
    let out = Arc::new(AtomicI64::new(0));

    scheduler
        .spawn(IncrementTask {
            data: data.clone(),
            delta: 5,
        })
        .unwrap();
    scheduler.spawn_on(FibTask::new(18, out.clone()), 2).unwrap();
    scheduler.wait().unwrap();

    assert!(data.iter().all(|v| v.load(Ordering::SeqCst) == 15));
    assert_eq!(out.load(Ordering::SeqCst), fib(18));
}

#[test]
fn test_scheduler_is_reusable_across_waits() {
    let scheduler = Scheduler::new(3, PlacementPolicy::RoundRobin).unwrap();
    for n in 0..12 {
        let out = Arc::new(AtomicI64::new(-1));
        scheduler.spawn(FibTask::new(n, out.clone())).unwrap();
        scheduler.wait().unwrap();
        assert_eq!(out.load(Ordering::SeqCst), fib(n));
    }
}

#[test]
fn test_task_context_reports_tree_shape() {
    let scheduler = Scheduler::new(2, PlacementPolicy::WorkStealing).unwrap();
    let seen: Arc<Mutex<Vec<(TaskId, Option<TaskId>)>>> = Arc::new(Mutex::new(Vec::new()));
    let children = Arc::new(AtomicUsize::new(0));

    let (seen_in, children_in) = (seen.clone(), children.clone());
    let root = scheduler
        .spawn(FnTask::new(move |cx| {
            seen_in.lock().unwrap().push((cx.id(), cx.parent()));
            for _ in 0..4 {
                let seen = seen_in.clone();
                cx.spawn_fn(move |cx| {
                    assert!(cx.worker_index() < 2);
                    seen.lock().unwrap().push((cx.id(), cx.parent()));
                })
                .unwrap();
            }
            children_in.store(cx.num_children(), Ordering::SeqCst);
            cx.wait();
            assert!(cx.is_ready());
        }))
        .unwrap();
    scheduler.wait().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    assert_eq!(children.load(Ordering::SeqCst), 4);
    assert!(seen.contains(&(root, None)));
    assert_eq!(seen.iter().filter(|(_, parent)| *parent == Some(root)).count(), 4);
}

#[test]
fn test_nested_waits_without_children() {
    let scheduler = Scheduler::new(2, PlacementPolicy::Random).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    scheduler
        .spawn(FnTask::new(move |cx| {
            // Nothing to join: must return immediately.
            cx.wait();
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    scheduler.wait().unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stats_reflect_workload() {
    let scheduler = Scheduler::new(4, PlacementPolicy::WorkStealing).unwrap();
    let out = Arc::new(AtomicI64::new(0));
    scheduler.spawn(FibTask::new(15, out.clone())).unwrap();
    scheduler.wait().unwrap();

    let stats = scheduler.stats();
    assert_eq!(stats.roots_spawned, 1);
    assert_eq!(stats.tasks_executed, stats.tasks_spawned + 1);
    assert_eq!(scheduler.queued_tasks(), 0);
}

#[test]
fn test_increment_two_is_three_every_policy() {
    for policy in PlacementPolicy::ALL {
        let scheduler = Scheduler::new(4, policy).unwrap();
        let value = Arc::new(vec![AtomicI64::new(2)]);
        let out = Arc::new(AtomicI64::new(0));

        scheduler
            .spawn(IncrementTask {
                data: value.clone(),
                delta: 1,
            })
            .unwrap();
        scheduler.spawn(FibTask::new(10, out.clone())).unwrap();
        scheduler.wait().unwrap();

        assert_eq!(value[0].load(Ordering::SeqCst), 3, "policy {}", policy);
        assert_eq!(out.load(Ordering::SeqCst), 55, "policy {}", policy);
    }
}
