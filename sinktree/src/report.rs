//! Topology buffer and report protocol.
//!
//! Subtree membership changes are queued as [`TopologyDelta`]s and streamed to
//! the parent in fragments of at most [`max_entries_per_fragment`] entries.
//! A batch is sent fragment by fragment at [`NodeConfig::FRAGMENT_INTERVAL`];
//! once the whole batch is out the buffer is flushed and the report timer
//! falls back to the per-depth [`NodeConfig::report_interval`].

use alloc::vec::Vec;

use log::{debug, trace, warn};

use crate::config::NodeConfig;
use crate::node::Node;
use crate::time::Timestamp;
use crate::timers::TimerKind;
use crate::traits::{Clock, Random, Transport};
use crate::types::{LinkAddr, TopologyDelta};
use crate::wire::{encode_report, max_entries_per_fragment, PacketType, UnicastHeader};

/// Bounded queue of unreported subtree changes, with a send offset.
#[derive(Clone, Debug)]
pub struct TopologyBuffer {
    deltas: Vec<TopologyDelta>,
    capacity: usize,
    offset: usize,
    dropped: u32,
}

impl TopologyBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            deltas: Vec::with_capacity(capacity),
            capacity,
            offset: 0,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the first delta not yet sent in the current batch.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Deltas lost to overflow since creation.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopologyDelta> {
        self.deltas.iter()
    }

    /// Append a delta. Returns false (and counts the loss) when full.
    pub fn push(&mut self, delta: TopologyDelta) -> bool {
        if self.deltas.len() >= self.capacity {
            self.dropped = self.dropped.saturating_add(1);
            warn!("topology buffer full, dropping {:?}", delta);
            return false;
        }
        self.deltas.push(delta);
        true
    }

    /// Count `n` deltas lost without being offered to the buffer.
    pub(crate) fn count_dropped(&mut self, n: usize) {
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        self.dropped = self.dropped.saturating_add(n);
    }

    /// Drop every pending delta about `addr`.
    pub fn remove_address(&mut self, addr: &LinkAddr) {
        let before_offset = self.deltas[..self.offset]
            .iter()
            .filter(|d| d.addr == *addr)
            .count();
        self.deltas.retain(|d| d.addr != *addr);
        self.offset -= before_offset;
    }

    pub fn flush(&mut self) {
        self.deltas.clear();
        self.offset = 0;
    }

    /// The next fragment: up to `max` deltas from the send offset.
    pub fn fragment(&self, max: usize) -> &[TopologyDelta] {
        let end = self.deltas.len().min(self.offset.saturating_add(max));
        &self.deltas[self.offset..end]
    }

    /// Mark `sent` deltas as transmitted. Returns true if more remain.
    pub fn advance(&mut self, sent: usize) -> bool {
        self.offset = self.deltas.len().min(self.offset + sent);
        self.offset < self.deltas.len()
    }

    /// Replace the contents with one Add per address (full resync).
    pub fn rebuild<I>(&mut self, members: I)
    where
        I: IntoIterator<Item = LinkAddr>,
    {
        self.flush();
        for addr in members {
            self.push(TopologyDelta::add(addr));
        }
    }
}

impl<T, R, Clk, Cfg> Node<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Report timer callback. Every non-sink path re-arms the timer; at the
    /// sink it only flushes and stays disarmed.
    pub(crate) fn report_timer(&mut self, now: Timestamp) {
        let idle = now + Cfg::report_interval(self.hop_count());

        if self.is_sink() {
            self.buffer_mut().flush();
            return;
        }
        if self.buffer().is_empty() {
            self.timers_mut().set(TimerKind::Report, idle);
            return;
        }
        let parent = self.parent();
        if parent.is_null() {
            trace!("report deferred, disconnected");
            self.timers_mut().set(TimerKind::Report, idle);
            return;
        }

        let budget = self.transport().mtu().min(Cfg::REPORT_PAYLOAD_BUDGET);
        let max = max_entries_per_fragment(budget);
        if max == 0 {
            warn!("payload budget {} too small for reports", budget);
            self.buffer_mut().flush();
            self.timers_mut().set(TimerKind::Report, idle);
            return;
        }

        let header = UnicastHeader {
            packet_type: PacketType::Report,
            source: self.addr(),
            destination: parent,
            hop_count: 0,
        };
        let fragment = self.buffer().fragment(max);
        let count = fragment.len();
        let frame = encode_report(&header, fragment);

        if self.unicast(parent, frame).is_err() {
            warn!("report fragment to {} rejected, retrying", parent);
            self.timers_mut()
                .set(TimerKind::Report, now + Cfg::FRAGMENT_INTERVAL);
            return;
        }
        self.metrics_mut().reports_sent += 1;
        debug!(
            "sent report fragment of {} deltas to {} (offset {})",
            count,
            parent,
            self.buffer().offset()
        );

        if self.buffer_mut().advance(count) {
            self.timers_mut()
                .set(TimerKind::Report, now + Cfg::FRAGMENT_INTERVAL);
        } else {
            self.buffer_mut().flush();
            self.timers_mut().set(TimerKind::Report, idle);
        }
    }

    /// Reload the buffer with the whole subtree for a new parent.
    pub(crate) fn resync_topology(&mut self) {
        let members: Vec<LinkAddr> = self.table().subtree_members().collect();
        debug!("resync: reporting {} subtree members", members.len());
        self.buffer_mut().rebuild(members);
    }

    /// Queue a delta for the parent. The sink has nobody to report to.
    pub(crate) fn queue_delta(&mut self, delta: TopologyDelta) {
        if !self.is_sink() {
            self.buffer_mut().push(delta);
        }
    }
}
