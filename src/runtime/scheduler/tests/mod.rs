//! Scheduler 单元测试
//!
//! 测试任务标识、配置、放置策略以及调度行为


use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::runtime::scheduler::{
    PlacementPolicy, SchedulerConfig, SchedulerError, Task, TaskContext, TaskId, TaskIdGenerator,
    TaskState,
};

/// Computes fib(n) by forking fib(n-1) and fib(n-2).
pub(super) struct FibTask {
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

/// Adds one to every element of `data`, one child per element.
pub(super) struct IncrementTask {
    pub data: Arc<Vec<AtomicI64>>,
}

impl Task for IncrementTask {
    fn execute(
        &mut self,
        cx: &mut TaskContext<'_>,
    ) {
        for i in 0..self.data.len() {
            let data = self.data.clone();
            cx.spawn_fn(move |_| {
                data[i].fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        cx.wait();
    }
}

pub(super) fn fib(n: i64) -> i64 {
    if n < 2 {
        n
    } else {
        fib(n - 1) + fib(n - 2)
    }
}

#[cfg(test)]
mod task_id_tests {
    use super::*;

    #[test]
    fn test_task_id_inner() {
        let id = TaskId(7);
        assert_eq!(id.inner(), 7);
        assert_eq!(id.to_string(), "Task(7)");
    }

    #[test]
    fn test_task_id_generator_is_monotonic() {
        let ids = TaskIdGenerator::new();
        let first = ids.generate();
        let second = ids.generate();
        assert_eq!(first, TaskId(1));
        assert!(second > first);
    }
}

#[cfg(test)]
mod task_state_tests {
    use super::*;

    #[test]
    fn test_task_state_round_trip() {
        for state in [
            TaskState::Ready,
            TaskState::Running,
            TaskState::Waiting,
            TaskState::Finished,
        ] {
            assert_eq!(TaskState::from_u8(state.as_u8()), state);
        }
        assert_eq!(TaskState::from_u8(200), TaskState::Finished);
    }
}

#[cfg(test)]
mod scheduler_config_tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.num_workers, 0);
        assert_eq!(config.policy, PlacementPolicy::WorkStealing);
        assert_eq!(config.deque_capacity, 1024);
        assert_eq!(config.thread_name, "forkpool-worker");
        assert!(config.validate().is_ok());
        assert!(config.resolved_workers() > 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            SchedulerConfig {
                deque_capacity: 1,
                ..SchedulerConfig::default()
            },
            SchedulerConfig {
                num_workers: crate::runtime::scheduler::MAX_WORKERS + 1,
                ..SchedulerConfig::default()
            },
            SchedulerConfig {
                thread_name: String::new(),
                ..SchedulerConfig::default()
            },
            SchedulerConfig {
                stack_size: Some(0),
                ..SchedulerConfig::default()
            },
        ];

        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(SchedulerError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_explicit_workers_resolved_as_is() {
        let config = SchedulerConfig::new(3, PlacementPolicy::Random);
        assert_eq!(config.resolved_workers(), 3);
        assert_eq!(config.policy, PlacementPolicy::Random);
    }
}

#[cfg(test)]
mod placement_tests {
    use super::*;
    use crate::runtime::scheduler::placement::smallest_deque;

    #[test]
    fn test_parse_policy_names() {
        assert_eq!(
            "work_stealing".parse::<PlacementPolicy>(),
            Ok(PlacementPolicy::WorkStealing)
        );
        assert_eq!(
            "Work-Stealing".parse::<PlacementPolicy>(),
            Ok(PlacementPolicy::WorkStealing)
        );
        assert_eq!(
            "round-robin".parse::<PlacementPolicy>(),
            Ok(PlacementPolicy::RoundRobin)
        );
        assert_eq!("random".parse::<PlacementPolicy>(), Ok(PlacementPolicy::Random));
        assert_eq!(
            "smallest_deque".parse::<PlacementPolicy>(),
            Ok(PlacementPolicy::SmallestDeque)
        );
        assert!("lifo".parse::<PlacementPolicy>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for policy in PlacementPolicy::ALL {
            assert_eq!(policy.to_string().parse::<PlacementPolicy>(), Ok(policy));
        }
    }

    #[test]
    fn test_smallest_deque_picks_first_minimum() {
        assert_eq!(smallest_deque([3, 1, 2, 1]), 1);
        assert_eq!(smallest_deque([5, 5, 5]), 0);
        assert_eq!(smallest_deque([4, 0, 0, 9]), 1);
        assert_eq!(smallest_deque(std::iter::empty()), 0);
    }
}

mod error_tests {
    use super::*;

    #[test]
    fn test_tasks_panicked_message_counts_roots() {
        let err = SchedulerError::TasksPanicked(vec![TaskId(3), TaskId(4)]);
        assert!(err.to_string().starts_with("2 root task(s) panicked: "));

        let err = SchedulerError::TasksPanicked(vec![TaskId(9)]);
        assert!(err.to_string().starts_with("1 root task(s) panicked: "));
    }
}
