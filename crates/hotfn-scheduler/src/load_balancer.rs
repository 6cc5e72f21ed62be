//! Node selection strategies.
//!
//! A strategy only decides; the [`Scheduler`](crate::Scheduler) holds the
//! fleet lock while it runs and bumps the chosen node's counter, so two
//! concurrent selections never see the same snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};

use crate::error::{SchedulerError, SchedulerResult};

/// Load of one node at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLoad {
    pub id: u32,
    pub in_flight: usize,
}

/// A node selection algorithm.
pub trait Strategy: Send + Sync {
    /// Name reported in load-balancing info.
    fn name(&self) -> &'static str;

    /// Pick an index into `loads`.
    ///
    /// `loads` is sorted by ascending node id and is never empty.
    fn pick(&self, function_name: &str, loads: &[NodeLoad]) -> usize;
}

/// Build a strategy from its configured name.
pub fn strategy_from_name(name: &str) -> SchedulerResult<Box<dyn Strategy>> {
    match name {
        RoundRobin::NAME => Ok(Box::new(RoundRobin::new())),
        LeastInFlight::NAME => Ok(Box::new(LeastInFlight)),
        BoundedHashing::NAME => Ok(Box::new(BoundedHashing::default())),
        other => Err(SchedulerError::UnknownAlgorithm(other.to_string())),
    }
}

/// Round-robin over the fleet using an atomic counter.
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub const NAME: &'static str = "round-robin";

    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Current counter value (for diagnostics).
    pub fn current(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for RoundRobin {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn pick(&self, _function_name: &str, loads: &[NodeLoad]) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % loads.len()
    }
}

/// Fewest in-flight calls wins; ties go to the lowest node id.
pub struct LeastInFlight;

impl LeastInFlight {
    pub const NAME: &'static str = "least-in-flight";
}

impl Strategy for LeastInFlight {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn pick(&self, _function_name: &str, loads: &[NodeLoad]) -> usize {
        least_loaded(loads)
    }
}

fn least_loaded(loads: &[NodeLoad]) -> usize {
    loads
        .iter()
        .enumerate()
        .min_by_key(|(_, load)| (load.in_flight, load.id))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

/// Function-affine hashing with a load bound.
///
/// A function hashes to a home node and stays there, which keeps its
/// containers warm on one worker. When the home node is above
/// `ceil((total + 1) / n * factor)` the walk continues in id order to the
/// next node under the bound.
pub struct BoundedHashing {
    factor: f64,
}

impl BoundedHashing {
    pub const NAME: &'static str = "bounded-hashing";

    pub fn with_factor(factor: f64) -> Self {
        Self {
            factor: factor.max(1.0),
        }
    }

    fn bound(&self, loads: &[NodeLoad]) -> usize {
        let total: usize = loads.iter().map(|l| l.in_flight).sum();
        let avg = (total + 1) as f64 / loads.len() as f64;
        (avg * self.factor).ceil() as usize
    }
}

impl Default for BoundedHashing {
    fn default() -> Self {
        Self::with_factor(1.25)
    }
}

impl Strategy for BoundedHashing {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn pick(&self, function_name: &str, loads: &[NodeLoad]) -> usize {
        let home = (function_hash(function_name) % loads.len() as u64) as usize;
        let bound = self.bound(loads);

        (0..loads.len())
            .map(|step| (home + step) % loads.len())
            .find(|&idx| loads[idx].in_flight < bound)
            .unwrap_or_else(|| least_loaded(loads))
    }
}

fn function_hash(function_name: &str) -> u64 {
    let digest = Sha256::digest(function_name.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
