#![forbid(unsafe_code)]
//! sinktree - Sink-rooted tree routing for low-power multi-hop wireless networks
//!
//! Every node selects one parent among its radio neighbors so that the parent
//! links form a tree rooted at a single sink. Data flows up the tree by
//! default; each node also learns which addresses live in its subtree from
//! topology reports sent by its children, which lets packets flow down.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. Tables and
//! buffers are `Vec`s with capacity limits enforced at runtime.
//!
//! # Key Properties
//!
//! - The sink periodically starts a new epoch by broadcasting a beacon;
//!   beacons are re-broadcast down the tree as nodes adopt parents
//! - Parent selection minimizes a path metric: the parent's advertised
//!   metric plus the estimated transmission count (ETX) of the link
//! - A hysteresis threshold suppresses parent flapping
//! - Children report subtree additions and removals upward in fragments
//! - Failed unicasts invalidate the next hop at once; a lost parent is
//!   replaced by the best remaining neighbor
//!
//! # Example (basic usage)
//!
//! ```ignore
//! use sinktree::{DefaultConfig, LinkAddr, Node};
//! use sinktree::traits::test_impls::{MockClock, MockRandom, MockTransport};
//!
//! let node = Node::<_, _, _, DefaultConfig>::new(
//!     MockTransport::new(),
//!     MockRandom::new(),
//!     MockClock::new(),
//!     LinkAddr::new(2, 0),
//!     false,
//! );
//!
//! // Nodes other than the sink start disconnected
//! assert!(!node.is_connected());
//! assert!(node.metric().is_infinite());
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use sinktree::{Node, Transport, Random, Clock, OutgoingData};
//!
//! // Implement traits for your platform...
//!
//! // let mut node = Node::new(transport, random, clock, addr, is_sink);
//!
//! // spawn(async move {
//! //     node.run().await;
//! // });
//!
//! // node.outgoing().send(OutgoingData { destination, payload }).await;
//! // let data = node.incoming().receive().await;
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Core types (LinkAddr, TopologyDelta, Event, Error)
//! - [`metric`] - Q12.4 path metric, ETX estimation, parent hysteresis
//! - [`wire`] - Beacon, unicast header and topology report formats
//! - [`table`] - Routing table of neighbors, parent, children, descendants
//! - [`report`] - Outgoing topology buffer and fragmented reporting
//! - [`traits`] - Transport, Random, Clock traits
//! - [`node`] - Main Node struct and public API
//! - [`tree`] - Epochs, beacons and parent selection
//! - [`routing`] - Data routing, delivery status, parent re-selection
//! - [`timers`] - One-shot protocol timers
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Compile-time protocol configuration

#![no_std]

extern crate alloc;

pub mod config;
pub mod metric;
pub mod node;
pub mod report;
pub mod routing;
pub mod table;
pub mod time;
pub mod timers;
pub mod traits;
pub mod tree;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{DefaultConfig, NodeConfig, NullRdcConfig};
pub use metric::Metric;
pub use node::Node;
pub use report::TopologyBuffer;
pub use table::{Entry, Freshness, RoutingTable};
pub use time::{Duration, Timestamp};
pub use timers::TimerKind;
pub use traits::{
    Clock, Frame, IncomingData, OutgoingData, Random, Transport, TransportEvent,
};
pub use types::{
    DeliveryStatus, EntryKind, Error, Event, LinkAddr, NodeMetrics, Payload, Status,
    TopologyDelta,
};
pub use wire::{Beacon, Decode, DecodeError, Encode, Unicast};

// Re-export constants
pub use types::{HOPS_UNKNOWN, LINK_ADDR_LEN};

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::traits::test_impls::{MockClock, MockRandom, MockTransport};

    /// Type alias for test nodes using default config.
    type TestNode = Node<MockTransport, MockRandom, MockClock, DefaultConfig>;

    /// Strong enough for the best link estimate.
    const STRONG: i16 = -30;

    fn addr(n: u8) -> LinkAddr {
        LinkAddr::new(n, 0)
    }

    fn node(n: u8, sink: bool) -> TestNode {
        let mut node: TestNode = Node::new(
            MockTransport::new(),
            MockRandom::with_seed(u64::from(n)),
            MockClock::new(),
            addr(n),
            sink,
        );
        node.initialize(Timestamp::ZERO);
        node
    }

    /// Fire the given timer and return what the node transmitted.
    fn fire(node: &mut TestNode, kind: TimerKind) -> (Timestamp, Vec<Frame>) {
        let at = node.timer_deadline(kind).expect("timer armed");
        node.handle_timer(at);
        (at, node.transport().take_sent())
    }

    fn broadcast_payload(frames: &[Frame]) -> Vec<u8> {
        frames
            .iter()
            .find_map(|f| match f {
                Frame::Broadcast(data) => Some(data.clone()),
                Frame::Unicast { .. } => None,
            })
            .expect("a broadcast")
    }

    fn hear(node: &mut TestNode, from: LinkAddr, data: Vec<u8>, now: Timestamp) {
        node.handle_transport_event(
            TransportEvent::Broadcast {
                from,
                data,
                rssi: STRONG,
            },
            now,
        );
    }

    /// Sink, A one hop away, B two hops away through A.
    fn chain() -> (TestNode, TestNode, TestNode) {
        let mut sink = node(1, true);
        let mut a = node(2, false);
        let mut b = node(3, false);

        let (t, frames) = fire(&mut sink, TimerKind::Beacon);
        hear(&mut a, sink.addr(), broadcast_payload(&frames), t);

        let (t, frames) = fire(&mut a, TimerKind::Beacon);
        let beacon = broadcast_payload(&frames);
        hear(&mut sink, a.addr(), beacon.clone(), t);
        hear(&mut b, a.addr(), beacon, t);

        let (t, frames) = fire(&mut b, TimerKind::Beacon);
        hear(&mut a, b.addr(), broadcast_payload(&frames), t);

        (sink, a, b)
    }

    #[test]
    fn test_sink_beacon_adopted() {
        let mut sink = node(1, true);
        let mut a = node(2, false);

        let (t, frames) = fire(&mut sink, TimerKind::Beacon);
        let beacon = Beacon::decode_from_slice(&broadcast_payload(&frames)).unwrap();
        assert_eq!(beacon.epoch, 1);
        assert_eq!(beacon.metric, Metric::ZERO);
        assert_eq!(beacon.hop_count, 0);
        assert!(beacon.parent.is_null());

        hear(&mut a, sink.addr(), broadcast_payload(&frames), t);
        assert_eq!(a.parent(), sink.addr());
        assert_eq!(a.metric(), Metric::encode(1.0));
        assert_eq!(a.hop_count(), 1);
        assert_eq!(a.epoch(), 1);
        assert_eq!(
            a.events().try_receive().ok(),
            Some(Event::EpochStarted { epoch: 1 })
        );
        assert_eq!(
            a.events().try_receive().ok(),
            Some(Event::ParentChanged {
                parent: sink.addr(),
                metric: Metric::encode(1.0),
                hops: 1,
            })
        );
    }

    #[test]
    fn test_forwarded_beacon_builds_second_hop() {
        let (sink, a, b) = chain();

        assert_eq!(b.parent(), a.addr());
        assert_eq!(b.hop_count(), 2);
        assert_eq!(b.metric(), Metric::encode(2.0));

        assert_eq!(a.table().get(&b.addr()).unwrap().kind, EntryKind::Child);
        let queued: Vec<TopologyDelta> = a.buffer().iter().copied().collect();
        assert_eq!(queued, [TopologyDelta::add(b.addr())]);

        assert_eq!(sink.table().get(&a.addr()).unwrap().kind, EntryKind::Child);
        assert!(sink.buffer().is_empty());
    }

    #[test]
    fn test_reports_reach_sink_and_route_down() {
        let (mut sink, mut a, mut b) = chain();

        // A reports B to the sink.
        let (t, frames) = fire(&mut a, TimerKind::Report);
        let Frame::Unicast { to, data } = &frames[0] else {
            panic!("expected report");
        };
        assert_eq!(*to, sink.addr());
        sink.handle_transport_event(
            TransportEvent::Unicast {
                from: a.addr(),
                data: data.clone(),
                rssi: STRONG,
            },
            t,
        );
        assert_eq!(sink.table().lookup(&b.addr(), LinkAddr::NULL), a.addr());
        assert!(a.buffer().is_empty());

        // Data from the sink to B goes through A.
        sink.send(b.addr(), b"down").unwrap();
        let frames = sink.transport().take_sent();
        let Frame::Unicast { to, data } = &frames[0] else {
            panic!("expected data");
        };
        assert_eq!(*to, a.addr());
        a.handle_transport_event(
            TransportEvent::Unicast {
                from: sink.addr(),
                data: data.clone(),
                rssi: STRONG,
            },
            t,
        );
        let frames = a.transport().take_sent();
        let Frame::Unicast { to, data } = &frames[0] else {
            panic!("expected forwarded data");
        };
        assert_eq!(*to, b.addr());
        b.handle_transport_event(
            TransportEvent::Unicast {
                from: a.addr(),
                data: data.clone(),
                rssi: STRONG,
            },
            t,
        );
        let delivered = b.incoming().try_receive().unwrap();
        assert_eq!(delivered.source, sink.addr());
        assert_eq!(delivered.hops, 2);
        assert_eq!(delivered.payload, b"down".to_vec());
    }

    #[test]
    fn test_failed_unicast_disconnects_lone_node() {
        let mut sink = node(1, true);
        let mut a = node(2, false);
        let (t, frames) = fire(&mut sink, TimerKind::Beacon);
        hear(&mut a, sink.addr(), broadcast_payload(&frames), t);
        while a.events().try_receive().is_ok() {}

        a.send(sink.addr(), b"up").unwrap();
        a.handle_transport_event(
            TransportEvent::Sent {
                status: DeliveryStatus::NoAck,
                transmissions: 3,
            },
            t,
        );

        assert!(a.parent().is_null());
        assert!(!a.is_connected());
        assert!(!a.table().contains(&sink.addr()));
        assert_eq!(a.events().try_receive().ok(), Some(Event::Disconnected));
    }

    #[test]
    fn test_child_report_creates_descendant() {
        let (_sink, mut a, b) = chain();
        let x = addr(9);
        let data = wire::encode_report(
            &wire::UnicastHeader {
                packet_type: wire::PacketType::Report,
                source: b.addr(),
                destination: a.addr(),
                hop_count: 0,
            },
            &[TopologyDelta::add(x)],
        );
        a.handle_transport_event(
            TransportEvent::Unicast {
                from: b.addr(),
                data,
                rssi: STRONG,
            },
            Timestamp::from_secs(3),
        );

        let entry = a.table().get(&x).unwrap();
        assert_eq!(entry.kind, EntryKind::Descendant);
        assert_eq!(entry.next_hop, b.addr());
        assert!(entry.advertised.is_infinite());
        assert_eq!(a.buffer().iter().last(), Some(&TopologyDelta::add(x)));
    }
}
