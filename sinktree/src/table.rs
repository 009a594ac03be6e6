//! Routing/neighbor table.
//!
//! One entry per known address, bounded by a fixed capacity. The table never
//! evicts: when it is full, new addresses are rejected and existing entries are
//! kept. Entries live in insertion order so that "first seen wins" tie-breaks
//! are deterministic.
//!
//! Removal during a scan is done in two passes (collect keys, then remove), see
//! [`RoutingTable::cleanup_sweep`].

use alloc::vec::Vec;

use log::{debug, trace, warn};

use crate::metric::{combine, Metric};
use crate::report::TopologyBuffer;
use crate::time::{Duration, Timestamp};
use crate::types::{EntryKind, LinkAddr, Status, TopologyDelta};

/// Entry age, with two sentinels that ignore the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Last refreshed at this instant.
    At(Timestamp),
    /// Never expires (Descendants learned from reports).
    AlwaysValid,
    /// Expired regardless of the clock (failed link, epoch reset).
    AlwaysInvalid,
}

impl Freshness {
    /// Valid while less than `window` has elapsed since the last refresh.
    pub fn is_valid(self, now: Timestamp, window: Duration) -> bool {
        match self {
            Freshness::At(t) => now - t < window,
            Freshness::AlwaysValid => true,
            Freshness::AlwaysInvalid => false,
        }
    }
}

/// A routing table entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub kind: EntryKind,
    pub freshness: Freshness,
    /// Own address, except for Descendants where it is the owning Child.
    pub next_hop: LinkAddr,
    /// Hop count from the entry's last beacon.
    pub hop_count: u8,
    /// Metric the neighbor broadcasts; infinite for Child and Descendant entries.
    pub advertised: Metric,
    pub etx: f32,
    pub tx_count: u16,
    pub ack_count: u16,
    /// Signal strength of the last beacon, in dBm.
    pub last_rssi: i16,
}

impl Entry {
    /// A directly heard node.
    pub fn neighbor(addr: LinkAddr, etx: f32, rssi: i16, now: Timestamp) -> Self {
        Entry {
            kind: EntryKind::Neighbor,
            freshness: Freshness::At(now),
            next_hop: addr,
            hop_count: crate::types::HOPS_UNKNOWN,
            advertised: Metric::INFINITE,
            etx,
            tx_count: 0,
            ack_count: 0,
            last_rssi: rssi,
        }
    }

    /// A one-hop node that chose us as its parent.
    pub fn child(addr: LinkAddr, now: Timestamp) -> Self {
        Entry {
            kind: EntryKind::Child,
            ..Entry::neighbor(addr, crate::metric::ETX_WORST, i16::MIN, now)
        }
    }

    /// A subtree member reachable through `via`.
    pub fn descendant(via: LinkAddr) -> Self {
        Entry {
            kind: EntryKind::Descendant,
            freshness: Freshness::AlwaysValid,
            ..Entry::neighbor(via, crate::metric::ETX_WORST, i16::MIN, Timestamp::ZERO)
        }
    }

    /// Path cost through this entry.
    pub fn path_metric(&self) -> f32 {
        combine(self.advertised.decode(), self.etx)
    }

    pub fn is_valid(&self, now: Timestamp, window: Duration) -> bool {
        self.freshness.is_valid(now, window)
    }

    /// Account one MAC-level delivery attempt. When the transmission counter
    /// would overflow both counters are halved, keeping their ratio.
    pub fn record_transmission(&mut self, transmissions: u8, acked: bool) {
        let tx = u16::from(transmissions);
        if self.tx_count.checked_add(tx).is_none() || (acked && self.ack_count == u16::MAX) {
            self.tx_count /= 2;
            self.ack_count /= 2;
        }
        self.tx_count = self.tx_count.saturating_add(tx);
        if acked {
            self.ack_count = self.ack_count.saturating_add(1);
        }
    }
}

/// Bounded routing table keyed by link address.
#[derive(Clone, Debug)]
pub struct RoutingTable {
    entries: Vec<(LinkAddr, Entry)>,
    capacity: usize,
}

impl RoutingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains(&self, addr: &LinkAddr) -> bool {
        self.position(addr).is_some()
    }

    pub fn get(&self, addr: &LinkAddr) -> Option<&Entry> {
        self.entries.iter().find(|(a, _)| a == addr).map(|(_, e)| e)
    }

    pub fn get_mut(&mut self, addr: &LinkAddr) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|(a, _)| a == addr)
            .map(|(_, e)| e)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (LinkAddr, &Entry)> {
        self.entries.iter().map(|(a, e)| (*a, e))
    }

    /// Existing entry for `addr`, or a new one from `make`. `None` when the
    /// address is unknown and the table is full.
    pub fn get_or_insert_with<F>(&mut self, addr: LinkAddr, make: F) -> Option<&mut Entry>
    where
        F: FnOnce() -> Entry,
    {
        let idx = match self.position(&addr) {
            Some(idx) => idx,
            None => {
                if self.is_full() {
                    warn!("routing table full, rejecting {}", addr);
                    return None;
                }
                self.entries.push((addr, make()));
                self.entries.len() - 1
            }
        };
        Some(&mut self.entries[idx].1)
    }

    pub fn remove(&mut self, addr: &LinkAddr) -> Option<Entry> {
        let idx = self.position(addr)?;
        Some(self.entries.remove(idx).1)
    }

    /// Next hop toward `destination`, or `fallback` (the parent) when unknown.
    pub fn lookup(&self, destination: &LinkAddr, fallback: LinkAddr) -> LinkAddr {
        self.get(destination)
            .map(|e| e.next_hop)
            .unwrap_or(fallback)
    }

    /// Mark the entry fresh; no-op for unknown addresses.
    pub fn refresh(&mut self, addr: &LinkAddr, now: Timestamp) {
        if let Some(entry) = self.get_mut(addr) {
            if entry.freshness != Freshness::AlwaysValid {
                entry.freshness = Freshness::At(now);
            }
        }
    }

    /// Remove every entry routed through `child` (the child included) and
    /// record one Remove delta per removed address in `buffer`, if given.
    /// Returns the number removed.
    pub fn remove_subtree(
        &mut self,
        child: &LinkAddr,
        mut buffer: Option<&mut TopologyBuffer>,
    ) -> usize {
        let doomed: Vec<LinkAddr> = self
            .entries
            .iter()
            .filter(|(_, e)| e.next_hop == *child)
            .map(|(a, _)| *a)
            .collect();

        for addr in &doomed {
            self.remove(addr);
            if let Some(buffer) = buffer.as_deref_mut() {
                buffer.push(TopologyDelta::remove(*addr));
            }
        }
        debug!("removed subtree of {} ({} entries)", child, doomed.len());
        doomed.len()
    }

    /// Periodic stale-entry removal. Returns true if the Parent entry was removed.
    ///
    /// Descendants are only retired here when forced invalid; the clock never
    /// expires them.
    pub fn cleanup_sweep(
        &mut self,
        now: Timestamp,
        window: Duration,
        mut buffer: Option<&mut TopologyBuffer>,
    ) -> bool {
        let stale: Vec<(LinkAddr, EntryKind)> = self
            .entries
            .iter()
            .filter(|(_, e)| match e.kind {
                EntryKind::Descendant => e.freshness == Freshness::AlwaysInvalid,
                _ => !e.is_valid(now, window),
            })
            .map(|(a, e)| (*a, e.kind))
            .collect();

        let mut parent_lost = false;
        for (addr, kind) in stale {
            match kind {
                EntryKind::Child => {
                    self.remove_subtree(&addr, buffer.as_deref_mut());
                }
                EntryKind::Parent => {
                    self.remove(&addr);
                    parent_lost = true;
                }
                EntryKind::Neighbor | EntryKind::Descendant => {
                    self.remove(&addr);
                }
            }
            trace!("expired {:?} {}", kind, addr);
        }
        parent_lost
    }

    /// Merge a child's topology report.
    ///
    /// Each delta is queued in `buffer` for our own parent and then applied to
    /// the table. Once the buffer is full the rest of the report is skipped
    /// and counted as dropped. Without a buffer (at the sink) every delta is
    /// applied. Returns `false` if the report was refused: it came from
    /// `parent`, or the reporter could not be stored.
    pub fn apply_topology_report(
        &mut self,
        own: LinkAddr,
        parent: LinkAddr,
        reporter: LinkAddr,
        deltas: &[TopologyDelta],
        mut buffer: Option<&mut TopologyBuffer>,
        now: Timestamp,
    ) -> bool {
        if !parent.is_null() && reporter == parent {
            warn!("topology report from parent {} dropped", reporter);
            return false;
        }

        let mut created = false;
        let Some(entry) = self.get_or_insert_with(reporter, || {
            created = true;
            Entry::child(reporter, now)
        }) else {
            return false;
        };
        entry.freshness = Freshness::At(now);
        if created || entry.kind != EntryKind::Child {
            debug!("{} reports to us, now a child", reporter);
            entry.kind = EntryKind::Child;
            entry.next_hop = reporter;
            entry.advertised = Metric::INFINITE;
            if let Some(buffer) = buffer.as_deref_mut() {
                buffer.push(TopologyDelta::add(reporter));
            }
        }

        for (i, delta) in deltas.iter().enumerate() {
            if let Some(buffer) = buffer.as_deref_mut() {
                if !buffer.push(*delta) {
                    buffer.count_dropped(deltas.len() - i - 1);
                    break;
                }
            }

            let addr = delta.addr;
            if addr == own || addr == reporter || addr == parent || addr.is_null() {
                continue;
            }
            match delta.status {
                Status::Add => {
                    let Some(entry) =
                        self.get_or_insert_with(addr, || Entry::descendant(reporter))
                    else {
                        continue;
                    };
                    entry.kind = EntryKind::Descendant;
                    entry.next_hop = reporter;
                    entry.freshness = Freshness::AlwaysValid;
                    entry.advertised = Metric::INFINITE;
                }
                Status::Remove => {
                    let routed_via_reporter = self
                        .get(&addr)
                        .map(|e| e.kind == EntryKind::Descendant && e.next_hop == reporter)
                        .unwrap_or(false);
                    if routed_via_reporter {
                        self.remove(&addr);
                    }
                }
            }
        }
        true
    }

    /// New epoch: Descendants are forced invalid, Child and Parent become Neighbor.
    pub fn demote_all(&mut self) {
        for (_, entry) in self.entries.iter_mut() {
            match entry.kind {
                EntryKind::Descendant => entry.freshness = Freshness::AlwaysInvalid,
                EntryKind::Child | EntryKind::Parent => entry.kind = EntryKind::Neighbor,
                EntryKind::Neighbor => {}
            }
        }
    }

    /// Addresses of all Child and Descendant entries.
    pub fn subtree_members(&self) -> impl Iterator<Item = LinkAddr> + '_ {
        self.entries
            .iter()
            .filter(|(_, e)| matches!(e.kind, EntryKind::Child | EntryKind::Descendant))
            .map(|(a, _)| *a)
    }

    /// Neighbor with the lowest path metric; the earliest entry wins ties.
    /// Entries advertising an infinite metric are never candidates.
    pub fn best_candidate(&self) -> Option<(LinkAddr, f32)> {
        let mut best: Option<(LinkAddr, f32)> = None;
        for (addr, entry) in &self.entries {
            if entry.kind != EntryKind::Neighbor || entry.advertised.is_infinite() {
                continue;
            }
            let metric = entry.path_metric();
            if best.map_or(true, |(_, m)| metric < m) {
                best = Some((*addr, metric));
            }
        }
        best
    }

    fn position(&self, addr: &LinkAddr) -> Option<usize> {
        self.entries.iter().position(|(a, _)| a == addr)
    }
}
