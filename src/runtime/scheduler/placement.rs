//! Placement policies.
//!
//! Work-stealing keeps spawned children on the spawning worker and lets idle
//! workers pull. The other policies push every child to a worker chosen by
//! [`PlacementState::next_worker`], under the target deque's mutex.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::worker::Worker;

/// How new tasks are distributed across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Children stay local, idle workers steal (default).
    #[default]
    #[serde(alias = "work-stealing")]
    WorkStealing,
    /// Cycle through workers.
    #[serde(alias = "round-robin")]
    RoundRobin,
    /// Uniformly random worker.
    Random,
    /// Worker with the fewest queued tasks.
    #[serde(alias = "smallest-deque")]
    SmallestDeque,
}

impl PlacementPolicy {
    /// Every policy, in declaration order.
    pub const ALL: [PlacementPolicy; 4] = [
        PlacementPolicy::WorkStealing,
        PlacementPolicy::RoundRobin,
        PlacementPolicy::Random,
        PlacementPolicy::SmallestDeque,
    ];

    /// Whether idle workers steal and deques stay lock-free.
    #[inline]
    pub fn is_work_stealing(self) -> bool {
        self == PlacementPolicy::WorkStealing
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlacementPolicy::WorkStealing => "work_stealing",
            PlacementPolicy::RoundRobin => "round_robin",
            PlacementPolicy::Random => "random",
            PlacementPolicy::SmallestDeque => "smallest_deque",
        }
    }
}

impl fmt::Display for PlacementPolicy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown policy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown placement policy `{0}` (expected work_stealing, round_robin, random or smallest_deque)")]
pub struct ParsePolicyError(pub String);

impl FromStr for PlacementPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "work_stealing" | "stealing" => Ok(PlacementPolicy::WorkStealing),
            "round_robin" => Ok(PlacementPolicy::RoundRobin),
            "random" => Ok(PlacementPolicy::Random),
            "smallest_deque" | "smallest" => Ok(PlacementPolicy::SmallestDeque),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}

/// Mutable placement state shared by all workers.
#[derive(Debug)]
pub(crate) struct PlacementState {
    policy: PlacementPolicy,
    cursor: Mutex<usize>,
    rng: Mutex<SmallRng>,
}

impl PlacementState {
    pub(crate) fn new(
        policy: PlacementPolicy,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };

        Self {
            policy,
            cursor: Mutex::new(0),
            rng: Mutex::new(rng),
        }
    }

    #[inline]
    pub(crate) fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    /// Pick the worker that receives the next task.
    pub(crate) fn next_worker(
        &self,
        workers: &[Arc<Worker>],
    ) -> usize {
        let n = workers.len();
        if n <= 1 {
            return 0;
        }

        match self.policy {
            PlacementPolicy::RoundRobin => {
                let mut cursor = self.cursor.lock();
                let index = *cursor % n;
                *cursor = (index + 1) % n;
                index
            },
            PlacementPolicy::Random | PlacementPolicy::WorkStealing => {
                self.rng.lock().random_range(0..n)
            },
            PlacementPolicy::SmallestDeque => {
                smallest_deque(workers.iter().map(|w| w.num_ready_tasks()))
            },
        }
    }
}

/// Index of the smallest count, first occurrence wins. Stops at the first zero.
pub(crate) fn smallest_deque(counts: impl IntoIterator<Item = usize>) -> usize {
    let mut best = 0;
    let mut min = usize::MAX;

    for (index, count) in counts.into_iter().enumerate() {
        if count < min {
            min = count;
            best = index;
            if count == 0 {
                break;
            }
        }
    }

    best
}
