//! Tree formation and maintenance.
//!
//! This module handles:
//! - Beacon creation (epoch start at the sink, forwarding elsewhere)
//! - Beacon processing: neighbor discovery, parent adoption, child classification
//! - Epoch resets
//!
//! Loops are avoided structurally: Child and Descendant entries carry an
//! infinite advertised metric, which never passes the [`is_preferred`] test.

use log::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::metric::{etx_from_signal, is_preferred, Metric};
use crate::node::Node;
use crate::table::{Entry, Freshness};
use crate::time::Timestamp;
use crate::timers::TimerKind;
use crate::traits::{Clock, Random, Transport};
use crate::types::{EntryKind, Event, LinkAddr, TopologyDelta, HOPS_UNKNOWN};
use crate::wire::{Beacon, Decode, Encode};

/// True if `candidate` is a later epoch than `current`, in serial-number
/// arithmetic. A node that never saw an epoch (0) accepts any other value.
pub fn is_newer_epoch(candidate: u16, current: u16) -> bool {
    if current == 0 {
        return candidate != 0;
    }
    let diff = candidate.wrapping_sub(current);
    diff != 0 && diff < 0x8000
}

/// The epoch after `epoch`; 0 is skipped on wrap-around.
fn next_epoch(epoch: u16) -> u16 {
    match epoch.wrapping_add(1) {
        0 => 1,
        e => e,
    }
}

impl<T, R, Clk, Cfg> Node<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Beacon timer callback.
    ///
    /// At the sink this starts a new epoch and re-arms itself; elsewhere it
    /// forwards the current tree position once.
    pub(crate) fn beacon_timer(&mut self, now: Timestamp) {
        if self.is_sink() {
            let epoch = next_epoch(self.epoch());
            self.reset(epoch, now);
            self.timers_mut()
                .set(TimerKind::Beacon, now + Cfg::BEACON_INTERVAL);
        }
        self.send_beacon();
    }

    /// Broadcast our tree position.
    pub(crate) fn send_beacon(&mut self) {
        let beacon = Beacon {
            epoch: self.epoch(),
            metric: self.metric(),
            hop_count: self.hop_count(),
            parent: self.parent(),
        };
        if self.broadcast(beacon.encode_to_vec()) {
            self.metrics_mut().beacons_sent += 1;
            trace!(
                "beacon epoch {} metric {} hops {}",
                beacon.epoch,
                beacon.metric.decode(),
                beacon.hop_count
            );
        } else {
            warn!("beacon dropped, transport queue full");
        }
    }

    /// Start tree-building round `epoch` from scratch.
    pub(crate) fn reset(&mut self, epoch: u16, now: Timestamp) {
        info!("node {} entering epoch {}", self.addr(), epoch);

        self.table_mut().demote_all();
        self.set_parent(LinkAddr::NULL);
        if self.is_sink() {
            self.set_position(Metric::ZERO, 0);
        } else {
            self.set_position(Metric::INFINITE, HOPS_UNKNOWN);
        }
        self.set_epoch(epoch);
        self.buffer_mut().flush();

        self.timers_mut()
            .set(TimerKind::Cleanup, now + Cfg::CLEANUP_INTERVAL);
        self.run_cleanup(now);

        self.push_event(Event::EpochStarted { epoch });
    }

    /// Handle a received beacon.
    pub(crate) fn handle_beacon(&mut self, from: LinkAddr, data: &[u8], rssi: i16, now: Timestamp) {
        if from == self.addr() || from.is_null() {
            return;
        }
        if rssi < Cfg::RSSI_LOW_THRESHOLD {
            trace!("beacon from {} too weak ({} dBm)", from, rssi);
            self.metrics_mut().beacons_dropped += 1;
            return;
        }
        let beacon = match Beacon::decode_from_slice(data) {
            Ok(b) => b,
            Err(e) => {
                warn!("malformed beacon from {}: {}", from, e);
                self.metrics_mut().malformed += 1;
                return;
            }
        };
        self.metrics_mut().beacons_received += 1;

        if !self.is_sink() && is_newer_epoch(beacon.epoch, self.epoch()) {
            self.reset(beacon.epoch, now);
        }

        let entry = self.table_mut().get_or_insert_with(from, || {
            Entry::neighbor(from, etx_from_signal::<Cfg>(rssi), rssi, now)
        });
        let Some(entry) = entry else {
            self.metrics_mut().beacons_dropped += 1;
            return;
        };
        entry.freshness = Freshness::At(now);
        entry.last_rssi = rssi;
        entry.hop_count = beacon.hop_count;
        if matches!(entry.kind, EntryKind::Neighbor | EntryKind::Parent) {
            entry.advertised = beacon.metric;
        }
        let kind = entry.kind;
        let candidate = entry.path_metric();

        let names_us = beacon.parent == self.addr();
        let from_parent = from == self.parent();

        if self.is_sink() {
            self.classify_sender(from, kind, &beacon);
            return;
        }

        if from_parent && names_us {
            // Our parent routes through us.
            warn!("loop with parent {}, re-selecting", from);
            if let Some(entry) = self.table_mut().get_mut(&from) {
                entry.kind = EntryKind::Child;
                entry.advertised = Metric::INFINITE;
            }
            self.set_parent(LinkAddr::NULL);
            self.change_parent(now);
        } else if !names_us
            && !beacon.metric.is_infinite()
            && is_preferred::<Cfg>(candidate, self.metric().decode())
        {
            self.adopt_parent(from, &beacon, candidate, now);
        } else if from_parent {
            self.set_position(
                Metric::encode(candidate),
                beacon.hop_count.saturating_add(1),
            );
        } else {
            self.classify_sender(from, kind, &beacon);
        }
    }

    /// Track whether a non-parent sender is one of our children.
    fn classify_sender(&mut self, from: LinkAddr, kind: EntryKind, beacon: &Beacon) {
        if beacon.parent == self.addr() {
            if kind != EntryKind::Child {
                if let Some(entry) = self.table_mut().get_mut(&from) {
                    entry.kind = EntryKind::Child;
                    entry.next_hop = from;
                    entry.advertised = Metric::INFINITE;
                }
                debug!("{} joined as child", from);
                self.queue_delta(TopologyDelta::add(from));
            }
        } else if kind == EntryKind::Child {
            if let Some(entry) = self.table_mut().get_mut(&from) {
                entry.kind = EntryKind::Neighbor;
                entry.advertised = beacon.metric;
            }
            debug!("{} left, now a neighbor", from);
            self.buffer_mut().remove_address(&from);
        }
    }

    /// Switch to `from` as parent after a preferred beacon.
    fn adopt_parent(&mut self, from: LinkAddr, beacon: &Beacon, candidate: f32, now: Timestamp) {
        let old = self.parent();
        if !old.is_null() && old != from {
            if let Some(entry) = self.table_mut().get_mut(&old) {
                entry.kind = EntryKind::Neighbor;
            }
        }
        if let Some(entry) = self.table_mut().get_mut(&from) {
            entry.kind = EntryKind::Parent;
            entry.next_hop = from;
        }

        let metric = Metric::encode(candidate);
        let hops = beacon.hop_count.saturating_add(1);
        self.set_parent(from);
        self.set_position(metric, hops);

        let forward = Cfg::beacon_forward_delay(self.random_mut());
        let report = Cfg::report_base_delay(hops, self.random_mut());
        self.timers_mut().set(TimerKind::Beacon, now + forward);
        self.timers_mut().set(TimerKind::Report, now + report);

        if old != from {
            if !old.is_null() {
                self.resync_topology();
            }
            info!(
                "node {} parent {} metric {} hops {}",
                self.addr(),
                from,
                metric.decode(),
                hops
            );
            self.push_event(Event::ParentChanged {
                parent: from,
                metric,
                hops,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    use crate::config::DefaultConfig;
    use crate::traits::test_impls::{MockClock, MockRandom, MockTransport};
    use crate::traits::{Frame, TransportEvent};
    use crate::types::Status;

    type TestNode = Node<MockTransport, MockRandom, MockClock, DefaultConfig>;

    /// Above the high reference: link ETX 1.
    const STRONG: i16 = -30;

    fn addr(n: u8) -> LinkAddr {
        LinkAddr::new(n, 0)
    }

    fn node(n: u8, sink: bool) -> TestNode {
        let mut node: TestNode = Node::new(
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
            addr(n),
            sink,
        );
        node.initialize(Timestamp::ZERO);
        node
    }

    fn beacon_bytes(epoch: u16, metric: f32, hops: u8, parent: LinkAddr) -> Vec<u8> {
        Beacon {
            epoch,
            metric: Metric::encode(metric),
            hop_count: hops,
            parent,
        }
        .encode_to_vec()
    }

    fn deliver(node: &mut TestNode, from: LinkAddr, data: Vec<u8>, now: Timestamp) {
        node.handle_transport_event(
            TransportEvent::Broadcast {
                from,
                data,
                rssi: STRONG,
            },
            now,
        );
    }

    fn sent_beacons(node: &TestNode) -> Vec<Beacon> {
        node.transport()
            .take_sent()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Broadcast(data) => Beacon::decode_from_slice(&data).ok(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_epoch_ordering() {
        assert!(is_newer_epoch(2, 1));
        assert!(!is_newer_epoch(1, 1));
        assert!(!is_newer_epoch(1, 2));
        assert!(is_newer_epoch(40_000, 0));
        assert!(is_newer_epoch(1, u16::MAX));
        assert_eq!(next_epoch(u16::MAX), 1);
    }

    #[test]
    fn test_sink_beacon_starts_epoch() {
        let mut sink = node(1, true);
        let now = Timestamp::from_secs(1);
        sink.handle_timer(now);

        assert_eq!(sink.epoch(), 1);
        let beacons = sent_beacons(&sink);
        assert_eq!(beacons.len(), 1);
        assert_eq!(beacons[0].epoch, 1);
        assert_eq!(beacons[0].metric, Metric::ZERO);
        assert_eq!(beacons[0].hop_count, 0);
        assert!(beacons[0].parent.is_null());
        assert_eq!(
            sink.timer_deadline(TimerKind::Beacon),
            Some(now + DefaultConfig::BEACON_INTERVAL)
        );
        assert_eq!(
            sink.events().try_receive().ok(),
            Some(Event::EpochStarted { epoch: 1 })
        );
    }

    #[test]
    fn test_first_beacon_adopts_sink() {
        let mut a = node(2, false);
        let now = Timestamp::from_secs(1);
        deliver(&mut a, addr(1), beacon_bytes(1, 0.0, 0, LinkAddr::NULL), now);

        assert_eq!(a.parent(), addr(1));
        assert_eq!(a.hop_count(), 1);
        assert!((a.metric().decode() - 1.0).abs() <= 1.0 / 16.0);
        assert_eq!(a.epoch(), 1);
        assert_eq!(a.table().get(&addr(1)).unwrap().kind, EntryKind::Parent);
        assert!(a.timer_deadline(TimerKind::Beacon).is_some());
        assert!(a.timer_deadline(TimerKind::Report).is_some());

        // The forward carries our new position.
        let forward = a.timer_deadline(TimerKind::Beacon).unwrap();
        a.handle_timer(forward);
        let beacons = sent_beacons(&a);
        assert_eq!(beacons[0].parent, addr(1));
        assert_eq!(beacons[0].hop_count, 1);
        assert_eq!(beacons[0].epoch, 1);
    }

    #[test]
    fn test_weak_beacon_dropped() {
        let mut a = node(2, false);
        a.handle_transport_event(
            TransportEvent::Broadcast {
                from: addr(1),
                data: beacon_bytes(1, 0.0, 0, LinkAddr::NULL),
                rssi: -90,
            },
            Timestamp::ZERO,
        );
        assert!(a.table().is_empty());
        assert_eq!(a.metrics().beacons_dropped, 1);
    }

    #[test]
    fn test_malformed_beacon_dropped() {
        let mut a = node(2, false);
        deliver(&mut a, addr(1), alloc::vec![1, 2, 3], Timestamp::ZERO);
        assert!(a.table().is_empty());
        assert_eq!(a.metrics().malformed, 1);
    }

    #[test]
    fn test_child_classified_once() {
        let mut a = node(2, false);
        let now = Timestamp::from_secs(1);
        deliver(&mut a, addr(1), beacon_bytes(1, 0.0, 0, LinkAddr::NULL), now);

        for _ in 0..3 {
            deliver(&mut a, addr(3), beacon_bytes(1, 2.0, 2, addr(2)), now);
        }
        let child = a.table().get(&addr(3)).unwrap();
        assert_eq!(child.kind, EntryKind::Child);
        assert!(child.advertised.is_infinite());
        let adds: Vec<_> = a.buffer().iter().filter(|d| d.status == Status::Add).collect();
        assert_eq!(adds.len(), 1);
        assert_eq!(adds[0].addr, addr(3));
    }

    #[test]
    fn test_departed_child_pruned() {
        let mut a = node(2, false);
        let now = Timestamp::from_secs(1);
        deliver(&mut a, addr(1), beacon_bytes(1, 0.0, 0, LinkAddr::NULL), now);
        deliver(&mut a, addr(3), beacon_bytes(1, 2.0, 2, addr(2)), now);
        deliver(&mut a, addr(3), beacon_bytes(1, 2.0, 2, addr(4)), now);

        let entry = a.table().get(&addr(3)).unwrap();
        assert_eq!(entry.kind, EntryKind::Neighbor);
        assert!(!entry.advertised.is_infinite());
        assert!(a.buffer().is_empty());
    }

    #[test]
    fn test_child_never_becomes_parent() {
        let mut a = node(2, false);
        let now = Timestamp::from_secs(1);
        // A poor path through 5 first.
        deliver(&mut a, addr(5), beacon_bytes(1, 300.0, 6, addr(9)), now);
        assert_eq!(a.parent(), addr(5));
        // 3 is our child and advertises an excellent metric.
        deliver(&mut a, addr(3), beacon_bytes(1, 0.5, 1, addr(2)), now);
        deliver(&mut a, addr(3), beacon_bytes(1, 0.0, 1, addr(2)), now);
        assert_eq!(a.parent(), addr(5));
        assert_eq!(a.table().get(&addr(3)).unwrap().kind, EntryKind::Child);
    }

    #[test]
    fn test_better_parent_switch_resyncs() {
        let mut a = node(2, false);
        let now = Timestamp::from_secs(1);
        deliver(&mut a, addr(5), beacon_bytes(1, 300.0, 6, addr(9)), now);
        deliver(&mut a, addr(3), beacon_bytes(1, 302.0, 7, addr(2)), now);
        a.buffer_mut().flush();

        deliver(&mut a, addr(1), beacon_bytes(1, 0.0, 0, LinkAddr::NULL), now);
        assert_eq!(a.parent(), addr(1));
        assert_eq!(a.hop_count(), 1);
        assert_eq!(a.table().get(&addr(5)).unwrap().kind, EntryKind::Neighbor);
        let queued: Vec<LinkAddr> = a.buffer().iter().map(|d| d.addr).collect();
        assert_eq!(queued, [addr(3)]);
    }

    #[test]
    fn test_parent_update_tracks_metric() {
        let mut a = node(2, false);
        let now = Timestamp::from_secs(1);
        deliver(&mut a, addr(5), beacon_bytes(1, 3.0, 2, addr(9)), now);
        deliver(&mut a, addr(5), beacon_bytes(1, 4.0, 3, addr(9)), now);
        assert_eq!(a.parent(), addr(5));
        assert_eq!(a.hop_count(), 4);
        assert!((a.metric().decode() - 5.0).abs() <= 1.0 / 16.0);
    }

    #[test]
    fn test_parent_loop_triggers_reselection() {
        let mut a = node(2, false);
        let now = Timestamp::from_secs(1);
        deliver(&mut a, addr(5), beacon_bytes(1, 3.0, 2, addr(9)), now);
        deliver(&mut a, addr(6), beacon_bytes(1, 3.5, 2, addr(9)), now);
        assert_eq!(a.parent(), addr(5));

        deliver(&mut a, addr(5), beacon_bytes(1, 5.0, 3, addr(2)), now);
        assert_eq!(a.parent(), addr(6));
        assert_eq!(a.table().get(&addr(5)).unwrap().kind, EntryKind::Child);
    }

    #[test]
    fn test_newer_epoch_resets() {
        let mut a = node(2, false);
        let now = Timestamp::from_secs(1);
        deliver(&mut a, addr(5), beacon_bytes(1, 3.0, 2, addr(9)), now);
        deliver(&mut a, addr(3), beacon_bytes(1, 5.0, 4, addr(2)), now);

        // Epoch 2 from a neighbor with no path yet.
        deliver(&mut a, addr(6), beacon_bytes(2, 4095.9375, 255, LinkAddr::NULL), now);
        assert_eq!(a.epoch(), 2);
        assert!(a.parent().is_null());
        assert!(a.metric().is_infinite());
        assert!(a.buffer().is_empty());
        assert_eq!(a.table().get(&addr(5)).unwrap().kind, EntryKind::Neighbor);
        assert_eq!(a.table().get(&addr(3)).unwrap().kind, EntryKind::Neighbor);
    }

    #[test]
    fn test_sink_never_adopts() {
        let mut sink = node(1, true);
        let now = Timestamp::from_secs(1);
        sink.handle_timer(now);
        deliver(&mut sink, addr(2), beacon_bytes(5, 0.0, 0, LinkAddr::NULL), now);
        assert!(sink.parent().is_null());
        assert_eq!(sink.epoch(), 1);
        assert_eq!(sink.metric(), Metric::ZERO);

        deliver(&mut sink, addr(3), beacon_bytes(1, 1.0, 1, addr(1)), now);
        assert_eq!(sink.table().get(&addr(3)).unwrap().kind, EntryKind::Child);
        assert!(sink.buffer().is_empty());
    }
}
