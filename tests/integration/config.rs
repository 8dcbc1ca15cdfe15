//! Building schedulers from configuration files.

use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use forkpool::util::config::{load_config, parse_config, ConfigError};
use forkpool::{PlacementPolicy, Scheduler, SchedulerError};

use crate::common::FibTask;

#[test]
fn test_scheduler_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[scheduler]\nnum_workers = 3\npolicy = \"smallest-deque\"\n"
    )
    .unwrap();

    let config = load_config(file.path()).unwrap();
    let scheduler = Scheduler::with_config(config).unwrap();
    assert_eq!(scheduler.num_workers(), 3);
    assert_eq!(scheduler.policy(), PlacementPolicy::SmallestDeque);

    let out = Arc::new(AtomicI64::new(0));
    scheduler.spawn(FibTask::new(12, out.clone())).unwrap();
    scheduler.wait().unwrap();
    assert_eq!(out.load(Ordering::SeqCst), 144);
}

#[test]
fn test_unknown_policy_in_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler]\npolicy = \"fifo\"").unwrap();
    assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
}

#[test]
fn test_invalid_capacity_from_config() {
    let config = parse_config("[scheduler]\ndeque_capacity = 1\n").unwrap();
    assert!(matches!(
        Scheduler::with_config(config),
        Err(SchedulerError::InvalidConfig(_))
    ));
}
