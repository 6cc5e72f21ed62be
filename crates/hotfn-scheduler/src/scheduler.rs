//! Scheduler — picks a worker node per invocation and tracks in-flight load.
//!
//! The `Scheduler`:
//! - Owns the worker fleet, fixed at construction
//! - Runs the configured strategy against a consistent in-flight snapshot
//! - Checks out one unit of credit per selection and takes it back on `finished`
//! - Measures how long each selection took

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use hotfn_core::WorkerNode;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::load_balancer::{NodeLoad, Strategy};

/// Result of a successful selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub node: WorkerNode,
    pub algorithm: &'static str,
    /// Wall-clock time spent inside `select`.
    pub latency: Duration,
}

impl Selection {
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// Read-only view of one node for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub id: u32,
    pub url: String,
    pub in_flight: usize,
}

/// Selects worker nodes and owns their in-flight counters.
pub struct Scheduler {
    /// Sorted by ascending id.
    nodes: Vec<WorkerNode>,
    /// `in_flight[i]` belongs to `nodes[i]`.
    in_flight: Mutex<Vec<usize>>,
    strategy: Box<dyn Strategy>,
}

impl Scheduler {
    pub fn new(mut nodes: Vec<WorkerNode>, strategy: Box<dyn Strategy>) -> Self {
        nodes.sort_by_key(|n| n.id);
        let in_flight = Mutex::new(vec![0; nodes.len()]);
        info!(
            nodes = nodes.len(),
            algorithm = strategy.name(),
            "scheduler initialized"
        );
        Self {
            nodes,
            in_flight,
            strategy,
        }
    }

    pub fn algorithm(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn nodes(&self) -> &[WorkerNode] {
        &self.nodes
    }

    /// Choose a node for `function_name` and check out one unit of credit.
    ///
    /// Every `Ok` must be paired with exactly one [`finished`](Self::finished).
    pub fn select(&self, function_name: &str) -> SchedulerResult<Selection> {
        let started = Instant::now();
        if self.nodes.is_empty() {
            return Err(SchedulerError::NoAvailableNode);
        }

        let idx = {
            let mut counts = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            let loads: Vec<NodeLoad> = self
                .nodes
                .iter()
                .zip(counts.iter())
                .map(|(node, &in_flight)| NodeLoad {
                    id: node.id,
                    in_flight,
                })
                .collect();
            let idx = self.strategy.pick(function_name, &loads) % loads.len();
            counts[idx] += 1;
            idx
        };
        let latency = started.elapsed();

        let node = self.nodes[idx].clone();
        debug!(
            function = function_name,
            node_id = node.id,
            latency_us = latency.as_micros() as u64,
            "node selected"
        );
        Ok(Selection {
            node,
            algorithm: self.strategy.name(),
            latency,
        })
    }

    /// Return the credit checked out by a previous `select`.
    pub fn finished(&self, node_id: u32, function_name: &str) {
        let Some(idx) = self.index_of(node_id) else {
            warn!(node_id, function = function_name, "finished called for unknown node");
            return;
        };
        let mut counts = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if counts[idx] == 0 {
            warn!(node_id, function = function_name, "finished without matching select");
            return;
        }
        counts[idx] -= 1;
        debug!(node_id, function = function_name, in_flight = counts[idx], "node released");
    }

    /// Scoped form of `select`: the guard calls `finished` when dropped.
    pub fn select_guarded(self: &Arc<Self>, function_name: &str) -> SchedulerResult<InFlightGuard> {
        let selection = self.select(function_name)?;
        Ok(InFlightGuard {
            scheduler: Arc::clone(self),
            selection,
            function_name: function_name.to_string(),
        })
    }

    /// Current in-flight count of a node.
    pub fn in_flight(&self, node_id: u32) -> Option<usize> {
        let idx = self.index_of(node_id)?;
        let counts = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Some(counts[idx])
    }

    pub fn snapshot(&self) -> Vec<NodeStatus> {
        let counts = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        self.nodes
            .iter()
            .zip(counts.iter())
            .map(|(node, &in_flight)| NodeStatus {
                id: node.id,
                url: node.url.clone(),
                in_flight,
            })
            .collect()
    }

    fn index_of(&self, node_id: u32) -> Option<usize> {
        self.nodes.binary_search_by_key(&node_id, |n| n.id).ok()
    }
}

/// In-flight credit on one node, returned when dropped.
pub struct InFlightGuard {
    scheduler: Arc<Scheduler>,
    selection: Selection,
    function_name: String,
}

impl InFlightGuard {
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn node(&self) -> &WorkerNode {
        &self.selection.node
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.scheduler
            .finished(self.selection.node.id, &self.function_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{LeastInFlight, RoundRobin};

    fn fleet(n: u32) -> Vec<WorkerNode> {
        (0..n)
            .map(|i| WorkerNode::new(i, format!("http://10.0.0.{}:8222", i + 1)))
            .collect()
    }

    fn least_in_flight(n: u32) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(fleet(n), Box::new(LeastInFlight)))
    }

    #[test]
    fn empty_fleet_has_no_available_node() {
        let scheduler = Scheduler::new(Vec::new(), Box::new(RoundRobin::new()));
        assert_eq!(
            scheduler.select("f").unwrap_err(),
            SchedulerError::NoAvailableNode
        );
    }

    #[test]
    fn select_checks_out_credit_and_finished_returns_it() {
        let scheduler = least_in_flight(2);
        let sel = scheduler.select("f").unwrap();
        assert_eq!(sel.node.id, 0);
        assert_eq!(scheduler.in_flight(0), Some(1));

        scheduler.finished(sel.node.id, "f");
        assert_eq!(scheduler.in_flight(0), Some(0));
    }

    #[test]
    fn least_in_flight_spreads_concurrent_selections() {
        let scheduler = least_in_flight(3);
        let a = scheduler.select("a").unwrap();
        let b = scheduler.select("b").unwrap();
        let c = scheduler.select("c").unwrap();

        let mut ids = vec![a.node.id, b.node.id, c.node.id];
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn nodes_are_ordered_by_id() {
        let nodes = vec![
            WorkerNode::new(5, "http://c:1"),
            WorkerNode::new(1, "http://a:1"),
            WorkerNode::new(3, "http://b:1"),
        ];
        let scheduler = Scheduler::new(nodes, Box::new(LeastInFlight));
        // All idle: lowest id wins.
        assert_eq!(scheduler.select("f").unwrap().node.id, 1);
        let ids: Vec<u32> = scheduler.snapshot().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn guard_releases_on_drop() {
        let scheduler = least_in_flight(1);
        {
            let guard = scheduler.select_guarded("f").unwrap();
            assert_eq!(guard.node().id, 0);
            assert_eq!(scheduler.in_flight(0), Some(1));
        }
        assert_eq!(scheduler.in_flight(0), Some(0));
    }

    #[test]
    fn guard_releases_on_error_path() {
        fn failing_forward(scheduler: &Arc<Scheduler>) -> Result<(), String> {
            let _guard = scheduler.select_guarded("f").map_err(|e| e.to_string())?;
            Err("worker unreachable".to_string())
        }

        let scheduler = least_in_flight(2);
        assert!(failing_forward(&scheduler).is_err());
        assert!(scheduler.snapshot().iter().all(|s| s.in_flight == 0));
    }

    #[test]
    fn finished_for_unknown_node_is_ignored() {
        let scheduler = least_in_flight(1);
        scheduler.finished(42, "f");
        scheduler.finished(0, "f"); // no matching select
        assert_eq!(scheduler.in_flight(0), Some(0));
    }

    #[test]
    fn selection_latency_is_measured() {
        let scheduler = least_in_flight(3);
        let sel = scheduler.select("f").unwrap();
        assert_eq!(sel.algorithm, "least-in-flight");
        assert!(sel.latency_ms() >= 0.0);
        assert!(sel.latency < Duration::from_secs(1));
    }

    #[test]
    fn credits_balance_under_concurrency() {
        use std::thread;

        let scheduler = least_in_flight(4);
        let mut handles = vec![];
        for t in 0..8 {
            let scheduler = scheduler.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let name = format!("fn-{}", (t + i) % 5);
                    let guard = scheduler.select_guarded(&name).unwrap();
                    assert!(scheduler.in_flight(guard.node().id).unwrap() >= 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert!(scheduler.snapshot().iter().all(|s| s.in_flight == 0));
    }

    #[tokio::test]
    async fn guard_moves_into_spawned_task() {
        let scheduler = least_in_flight(2);
        let guard = scheduler.select_guarded("f").unwrap();
        let node_id = guard.node().id;

        tokio::spawn(async move {
            let _guard = guard;
            tokio::task::yield_now().await;
        })
        .await
        .unwrap();

        assert_eq!(scheduler.in_flight(node_id), Some(0));
    }
}
