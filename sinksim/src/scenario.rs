//! Scenario builder for setting up and running simulations.

use sinktree::{Duration, LinkAddr, Timestamp};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::{Link, Topology};

/// Address of the `index`-th node of a scenario. Node 0 is the sink.
pub fn node_addr(index: usize) -> LinkAddr {
    let n = index + 1;
    LinkAddr::new((n & 0xFF) as u8, (n >> 8) as u8)
}

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    FullyConnected,
    Chain,
    /// Node 0 (the sink) is the hub.
    Star,
    Grid { width: usize },
    Custom(Topology),
}

/// Builder for simulation scenarios.
///
/// Nodes are referred to by index; [`node_addr`] maps an index to its
/// address.
pub struct ScenarioBuilder {
    num_nodes: usize,
    seed: u64,
    /// Topology type to generate (must be explicitly specified).
    topology_type: Option<TopologyType>,
    /// Properties of every generated link.
    link: Link,
    /// Per-link overrides applied after generation.
    overrides: Vec<(usize, usize, Link)>,
    actions: Vec<(Timestamp, ScenarioAction)>,
    sends: Vec<(Timestamp, usize, usize, Vec<u8>)>,
    snapshot_interval: Option<Duration>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a new scenario with the specified number of nodes.
    ///
    /// Note: You MUST specify a topology before calling build().
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            topology_type: None,
            link: Link::default(),
            overrides: Vec::new(),
            actions: Vec::new(),
            sends: Vec::new(),
            snapshot_interval: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = Some(TopologyType::Custom(topo));
        self
    }

    pub fn fully_connected(mut self) -> Self {
        self.topology_type = Some(TopologyType::FullyConnected);
        self
    }

    pub fn chain_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Chain);
        self
    }

    pub fn star_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Star);
        self
    }

    pub fn grid_topology(mut self, width: usize) -> Self {
        self.topology_type = Some(TopologyType::Grid { width });
        self
    }

    /// Signal strength of every generated link.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.link.rssi = rssi;
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.link.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.link.delay = delay;
        self
    }

    /// Add or replace the link between nodes `a` and `b`.
    pub fn link(mut self, a: usize, b: usize, link: Link) -> Self {
        self.overrides.push((a, b, link));
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    pub fn disable_link_at(mut self, time: Timestamp, a: usize, b: usize) -> Self {
        self.actions.push((
            time,
            ScenarioAction::DisableLink {
                a: node_addr(a),
                b: node_addr(b),
            },
        ));
        self
    }

    pub fn enable_link_at(mut self, time: Timestamp, a: usize, b: usize) -> Self {
        self.actions.push((
            time,
            ScenarioAction::EnableLink {
                a: node_addr(a),
                b: node_addr(b),
            },
        ));
        self
    }

    /// Schedule a network partition; groups are lists of node indices.
    pub fn partition_at(mut self, time: Timestamp, groups: Vec<Vec<usize>>) -> Self {
        let groups = groups
            .into_iter()
            .map(|g| g.into_iter().map(node_addr).collect())
            .collect();
        self.actions
            .push((time, ScenarioAction::Partition { groups }));
        self
    }

    pub fn heal_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::HealPartition));
        self
    }

    pub fn snapshot_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::TakeSnapshot));
        self
    }

    /// Application send from node `from` to node `to`.
    pub fn send_at(mut self, time: Timestamp, from: usize, to: usize, payload: &[u8]) -> Self {
        self.sends.push((time, from, to, payload.to_vec()));
        self
    }

    /// Build the simulator with all nodes and topology.
    ///
    /// # Panics
    ///
    /// If no topology was chosen.
    pub fn build(self) -> (Simulator, Vec<LinkAddr>) {
        let addrs: Vec<LinkAddr> = (0..self.num_nodes).map(node_addr).collect();

        let mut topo = match self.topology_type {
            Some(TopologyType::FullyConnected) => Topology::fully_connected(&addrs, &self.link),
            Some(TopologyType::Chain) => Topology::chain(&addrs, &self.link),
            Some(TopologyType::Star) => Topology::star(&addrs, &self.link),
            Some(TopologyType::Grid { width }) => Topology::grid(&addrs, width, &self.link),
            Some(TopologyType::Custom(t)) => t,
            None => panic!(
                "Topology must be explicitly specified. \
                Use .fully_connected(), .chain_topology(), .star_topology(), \
                .grid_topology() or .topology()"
            ),
        };
        for (a, b, link) in self.overrides {
            topo.add_link(node_addr(a), node_addr(b), link);
        }

        let mut sim = Simulator::new(self.seed).with_topology(topo);
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        for (i, &addr) in addrs.iter().enumerate() {
            let node_seed = self.seed.wrapping_add(i as u64 * 1000);
            sim.add_node(addr, i == 0, node_seed);
        }
        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }
        for (time, from, to, payload) in self.sends {
            sim.schedule_send(time, node_addr(from), node_addr(to), payload);
        }

        (sim, addrs)
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_for(duration)
    }

    /// Build and run until the specified time.
    pub fn run_until(self, time: Timestamp) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_until(time)
    }
}
