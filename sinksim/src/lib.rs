//! sinksim - Discrete event network simulator for the sinktree routing protocol.
//!
//! This crate provides a deterministic, discrete-event simulator for testing
//! sinktree networks without real-time delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: No real-time delays, deterministic ordering
//! - **Multiple nodes in single process**: Every node owns its own table
//! - **Configurable topology**: Fully connected, chain, star, grid, or custom
//! - **Link properties**: RSSI, per-transmission loss, delay, up/down state
//! - **MAC model**: Unicasts are retried up to three times and the outcome
//!   is reported back to the sender
//! - **Scenario builder**: Scheduled link failures, partitions, application sends
//! - **Metrics collection**: Tree snapshots, frame counts, deliveries
//!
//! # Example
//!
//! ```
//! use sinksim::{Duration, ScenarioBuilder};
//!
//! // A 4-node chain with the sink at one end
//! let result = ScenarioBuilder::new(4)
//!     .with_seed(42)
//!     .chain_topology()
//!     .run_for(Duration::from_secs(10));
//!
//! assert!(result.converged());
//! assert_eq!(result.final_max_depth(), 3);
//! ```
//!
//! # Architecture
//!
//! The simulator uses a priority queue of events ordered by (time, sequence_number).
//! The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Process event (call node handlers)
//! 4. Collect outgoing frames, deliveries and protocol events
//! 5. Route frames through the topology and queue the node's next timer
//!
//! Nodes are driven through their synchronous handlers
//! (`handle_transport_event`, `handle_timer`) instead of the async `run()` loop.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{Delivery, NodeState, SimMetrics, SimulationResult, TreeSnapshot};
pub use node::SimNode;
pub use scenario::{node_addr, ScenarioBuilder};
pub use sim::Simulator;
pub use sinktree::{Duration, LinkAddr, Timestamp};
pub use topology::{Link, Topology};

#[cfg(test)]
mod tests {
    use sinktree::EntryKind;

    use super::*;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_single_sink() {
        let result = ScenarioBuilder::new(1)
            .chain_topology()
            .run_for(Duration::from_secs(5));

        let snapshot = result.final_snapshot().unwrap();
        assert_eq!(snapshot.sink(), Some(node_addr(0)));
        assert_eq!(snapshot.nodes[&node_addr(0)].epoch, 1);
        assert!(result.converged());
        assert_eq!(result.metrics.broadcasts_sent, 1);
    }

    /// Five nodes in a line, the sink at one end: depth grows by one per hop.
    #[test]
    fn test_chain_hop_counts() {
        init_logging();
        let result = ScenarioBuilder::new(5)
            .with_seed(42)
            .chain_topology()
            .with_snapshot_interval(Duration::from_secs(1))
            .run_for(Duration::from_secs(30));

        assert!(result.converged(), "chain should connect every node");
        let snapshot = result.final_snapshot().unwrap();
        assert!(!snapshot.has_loop());
        assert!(snapshot.hop_counts_consistent());
        for i in 0..5 {
            assert_eq!(snapshot.nodes[&node_addr(i)].hop_count, i as u8);
            assert_eq!(snapshot.depth(node_addr(i)), Some(i));
        }
        assert!(result.metrics.converged_by(Timestamp::from_secs(5)));
    }

    /// Topology reports climb the chain until the sink routes to every node.
    #[test]
    fn test_sink_learns_descendants() {
        init_logging();
        let (mut sim, nodes) = ScenarioBuilder::new(5)
            .with_seed(7)
            .chain_topology()
            .build();
        sim.run_for(Duration::from_secs(30));

        let sink = sim.node(&nodes[0]).unwrap().inner();
        let table = sink.table();
        assert_eq!(table.get(&nodes[1]).unwrap().kind, EntryKind::Child);
        for &member in &nodes[2..] {
            let entry = table.get(&member).unwrap();
            assert_eq!(entry.kind, EntryKind::Descendant);
            assert_eq!(entry.next_hop, nodes[1]);
            assert!(entry.advertised.is_infinite());
        }
        assert!(sink.buffer().is_empty());

        // Intermediate nodes know their own subtree only.
        let middle = sim.node(&nodes[2]).unwrap().inner().table();
        assert_eq!(middle.get(&nodes[3]).unwrap().kind, EntryKind::Child);
        assert_eq!(middle.lookup(&nodes[4], LinkAddr::NULL), nodes[3]);
        assert_eq!(middle.lookup(&nodes[1], LinkAddr::NULL), nodes[1]);
    }

    /// Data goes up by default route and comes back down through reported
    /// subtree entries.
    #[test]
    fn test_data_delivery_both_directions() {
        init_logging();
        let result = ScenarioBuilder::new(4)
            .with_seed(3)
            .chain_topology()
            .send_at(Timestamp::from_secs(20), 3, 0, b"up")
            .send_at(Timestamp::from_secs(25), 0, 3, b"down")
            .run_for(Duration::from_secs(30));

        let at_sink = result.metrics.delivered_to(node_addr(0));
        assert_eq!(at_sink.len(), 1);
        assert_eq!(at_sink[0].source, node_addr(3));
        assert_eq!(at_sink[0].hops, 3);
        assert_eq!(at_sink[0].payload, b"up".to_vec());

        let at_leaf = result.metrics.delivered_to(node_addr(3));
        assert_eq!(at_leaf.len(), 1);
        assert_eq!(at_leaf[0].source, node_addr(0));
        assert_eq!(at_leaf[0].hops, 3);
        assert_eq!(at_leaf[0].payload, b"down".to_vec());
        assert_eq!(result.metrics.unicasts_failed, 0);
    }

    /// Diamond: node 3 reaches the sink through 1 or 2. When its link to 1
    /// dies, the failed unicast moves it to 2.
    #[test]
    fn test_diamond_reparents_after_link_failure() {
        init_logging();
        let slow = Link::new().with_delay(Duration::from_millis(500));
        let result = ScenarioBuilder::new(4)
            .with_seed(11)
            .topology(Topology::new())
            .link(0, 1, Link::new())
            .link(0, 2, Link::new())
            .link(1, 3, Link::new().with_rssi(-40))
            // 2's beacon reaches 3 only after 1's.
            .link(2, 3, slow.with_rssi(-40))
            .disable_link_at(Timestamp::from_secs(20), 1, 3)
            .send_at(Timestamp::from_secs(22), 3, 0, b"first")
            .send_at(Timestamp::from_secs(25), 3, 0, b"second")
            .snapshot_at(Timestamp::from_secs(19))
            .run_for(Duration::from_secs(30));

        let before = &result.metrics.snapshots[0];
        assert_eq!(before.time, Timestamp::from_secs(19));
        assert_eq!(before.parent_of(node_addr(3)), Some(node_addr(1)));

        let after = result.final_snapshot().unwrap();
        assert_eq!(after.parent_of(node_addr(3)), Some(node_addr(2)));
        assert_eq!(after.nodes[&node_addr(3)].hop_count, 2);
        assert!(after.all_connected());
        assert!(!after.has_loop());

        // The first packet died with the link, the second took the new path.
        assert_eq!(result.metrics.unicasts_failed, 1);
        let at_sink = result.metrics.delivered_to(node_addr(0));
        assert_eq!(at_sink.len(), 1);
        assert_eq!(at_sink[0].payload, b"second".to_vec());
        assert_eq!(at_sink[0].hops, 2);
    }

    #[test]
    fn test_grid_is_loop_free() {
        init_logging();
        let result = ScenarioBuilder::new(16)
            .with_seed(5)
            .grid_topology(4)
            .with_snapshot_interval(Duration::from_secs(2))
            .run_for(Duration::from_secs(40));

        assert!(result.converged());
        for snapshot in &result.metrics.snapshots {
            assert!(!snapshot.has_loop(), "loop at {:?}", snapshot.time);
        }
        let depth = result.final_max_depth();
        assert!((6..=15).contains(&depth), "depth {}", depth);
    }

    #[test]
    fn test_star_all_children_of_sink() {
        let (mut sim, nodes) = ScenarioBuilder::new(6).star_topology().build();
        let result = sim.run_for(Duration::from_secs(10));

        assert!(result.converged());
        let snapshot = result.final_snapshot().unwrap();
        for &spoke in &nodes[1..] {
            assert_eq!(snapshot.parent_of(spoke), Some(nodes[0]));
        }
        let sink = sim.node(&nodes[0]).unwrap().inner();
        let children = sink
            .table()
            .iter()
            .filter(|(_, e)| e.kind == EntryKind::Child)
            .count();
        assert_eq!(children, 5);
    }

    /// The sink's second beacon starts epoch 2 and the tree is rebuilt.
    #[test]
    fn test_new_epoch_rebuilds_tree() {
        init_logging();
        let result = ScenarioBuilder::new(3)
            .with_seed(9)
            .chain_topology()
            .run_for(Duration::from_secs(70));

        let snapshot = result.final_snapshot().unwrap();
        assert!(snapshot.nodes.values().all(|s| s.epoch == 2));
        assert!(result.converged());
        assert!(!snapshot.has_loop());
    }

    #[test]
    fn test_partitioned_node_disconnects() {
        init_logging();
        let result = ScenarioBuilder::new(3)
            .with_seed(13)
            .chain_topology()
            .partition_at(Timestamp::from_secs(10), vec![vec![0, 1], vec![2]])
            .send_at(Timestamp::from_secs(12), 2, 0, b"lost")
            .run_for(Duration::from_secs(20));

        let snapshot = result.final_snapshot().unwrap();
        assert_eq!(snapshot.disconnected(), [node_addr(2)]);
        assert_eq!(result.metrics.disconnections, 1);
        assert!(result.metrics.deliveries.is_empty());
    }
}
