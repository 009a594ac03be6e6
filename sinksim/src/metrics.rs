//! Metrics collection for simulation analysis.

use hashbrown::{HashMap, HashSet};
use sinktree::{LinkAddr, Metric, Timestamp};

/// Tree position of one node at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    pub is_sink: bool,
    pub parent: LinkAddr,
    pub hop_count: u8,
    pub metric: Metric,
    pub epoch: u16,
}

/// A snapshot of tree state at a point in time.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    pub nodes: HashMap<LinkAddr, NodeState>,
}

impl TreeSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            nodes: HashMap::new(),
        }
    }

    pub fn record_node(&mut self, addr: LinkAddr, state: NodeState) {
        self.nodes.insert(addr, state);
    }

    pub fn sink(&self) -> Option<LinkAddr> {
        self.nodes
            .iter()
            .find(|(_, s)| s.is_sink)
            .map(|(&addr, _)| addr)
    }

    pub fn parent_of(&self, addr: LinkAddr) -> Option<LinkAddr> {
        self.nodes
            .get(&addr)
            .map(|s| s.parent)
            .filter(|p| !p.is_null())
    }

    /// Parent chain from `addr` up to the sink, both ends included.
    ///
    /// `None` if the chain ends at a disconnected node, leaves the snapshot,
    /// or cycles.
    pub fn path_to_sink(&self, addr: LinkAddr) -> Option<Vec<LinkAddr>> {
        let mut path = vec![addr];
        let mut seen = HashSet::new();
        let mut current = addr;
        loop {
            let state = self.nodes.get(&current)?;
            if state.is_sink {
                return Some(path);
            }
            if !seen.insert(current) || state.parent.is_null() {
                return None;
            }
            current = state.parent;
            path.push(current);
        }
    }

    /// Number of parent links between `addr` and the sink.
    pub fn depth(&self, addr: LinkAddr) -> Option<usize> {
        self.path_to_sink(addr).map(|p| p.len() - 1)
    }

    /// Every node reaches the sink through its parent chain.
    pub fn all_connected(&self) -> bool {
        self.nodes
            .keys()
            .all(|&addr| self.path_to_sink(addr).is_some())
    }

    /// Nodes whose parent chain does not reach the sink, sorted.
    pub fn disconnected(&self) -> Vec<LinkAddr> {
        let mut result: Vec<LinkAddr> = self
            .nodes
            .keys()
            .copied()
            .filter(|&addr| self.path_to_sink(addr).is_none())
            .collect();
        result.sort();
        result
    }

    /// True if following parent pointers from some node revisits a node.
    pub fn has_loop(&self) -> bool {
        self.nodes.keys().any(|&start| {
            let mut seen = HashSet::new();
            let mut current = start;
            while let Some(parent) = self.parent_of(current) {
                if !seen.insert(current) {
                    return true;
                }
                current = parent;
            }
            false
        })
    }

    pub fn max_depth(&self) -> usize {
        self.nodes
            .keys()
            .filter_map(|&addr| self.depth(addr))
            .max()
            .unwrap_or(0)
    }

    /// Advertised hop counts match the actual depth of every connected node.
    pub fn hop_counts_consistent(&self) -> bool {
        self.nodes.iter().all(|(&addr, state)| match self.depth(addr) {
            Some(depth) => usize::from(state.hop_count) == depth,
            None => true,
        })
    }
}

/// Application data that reached its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub time: Timestamp,
    pub at: LinkAddr,
    pub source: LinkAddr,
    pub hops: u8,
    pub payload: Vec<u8>,
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    pub broadcasts_sent: u64,
    pub unicasts_sent: u64,
    /// Unicasts that exhausted every MAC retransmission.
    pub unicasts_failed: u64,
    /// Frames delivered to a receiver.
    pub frames_delivered: u64,
    /// Transmissions lost to link loss or inactive links.
    pub frames_lost: u64,
    pub parent_changes: u64,
    pub disconnections: u64,
    pub deliveries: Vec<Delivery>,
    /// Tree snapshots taken at intervals.
    pub snapshots: Vec<TreeSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: TreeSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// True if the first snapshot at or after `time` has every node connected.
    pub fn converged_by(&self, time: Timestamp) -> bool {
        self.snapshots
            .iter()
            .find(|s| s.time >= time)
            .is_some_and(|s| s.all_connected())
    }

    /// Time of the first snapshot with every node connected.
    pub fn convergence_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.all_connected())
            .map(|s| s.time)
    }

    pub fn latest_snapshot(&self) -> Option<&TreeSnapshot> {
        self.snapshots.last()
    }

    /// Deliveries received by `addr`, in time order.
    pub fn delivered_to(&self, addr: LinkAddr) -> Vec<&Delivery> {
        self.deliveries.iter().filter(|d| d.at == addr).collect()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
    /// Whether simulation ended due to event queue exhaustion (vs time limit).
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Every node is connected to the sink in the final snapshot.
    pub fn converged(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| s.all_connected())
    }

    pub fn final_snapshot(&self) -> Option<&TreeSnapshot> {
        self.metrics.latest_snapshot()
    }

    pub fn final_max_depth(&self) -> usize {
        self.metrics
            .latest_snapshot()
            .map(|s| s.max_depth())
            .unwrap_or(0)
    }
}
