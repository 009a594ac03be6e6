//! Node implementation - the main protocol state machine.
//!
//! The Node struct owns the connection state (parent, metric, hop count,
//! epoch), the routing table and the topology buffer, and provides an async
//! `run()` method that drives the protocol. It is fully event-driven:
//! - Incoming frames and delivery reports trigger protocol handling
//! - Application sends via the outgoing channel trigger forwarding
//! - One-shot timers trigger beacons, reports and table cleanup
//!
//! Every trigger is handled by a synchronous method that runs to completion,
//! so the same handlers can be driven directly by a simulator.
//!
//! # Usage
//!
//! ```ignore
//! let mut node = Node::<_, _, _, DefaultConfig>::new(transport, random, clock, addr, false);
//!
//! // Spawn the node's run loop
//! spawn(async move {
//!     node.run().await;
//! });
//!
//! // Send data toward the sink (or any known node)
//! node.outgoing().send(OutgoingData { destination, payload }).await;
//!
//! // Receive data addressed to this node
//! let data = node.incoming().receive().await;
//! ```

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::marker::PhantomData;

use embassy_sync::channel::Channel;
use log::{debug, info, warn};

use crate::config::{DefaultConfig, NodeConfig};
use crate::metric::Metric;
use crate::report::TopologyBuffer;
use crate::table::RoutingTable;
use crate::time::Timestamp;
use crate::timers::{TimerKind, Timers};
use crate::traits::{
    AppInChannel, AppOutChannel, Clock, EventChannel, Frame, IncomingData, OutgoingData, Random,
    Transport, TransportEvent, TRANSPORT_QUEUE_SIZE,
};
use crate::types::{Error, Event, LinkAddr, NodeMetrics, HOPS_UNKNOWN};

/// The main protocol node.
///
/// Generic over:
/// - `T`: Transport implementation
/// - `R`: Random number generator
/// - `Clk`: Clock/timer implementation
/// - `Cfg`: compile-time protocol configuration
///
/// The node is fully event-driven. Call `run()` to start the main loop.
pub struct Node<T, R, Clk, Cfg = DefaultConfig> {
    // Dependencies (injected)
    transport: T,
    random: R,
    clock: Clk,

    // Application-level channels
    app_incoming: AppInChannel,
    app_outgoing: AppOutChannel,
    events: EventChannel,

    // Identity
    addr: LinkAddr,
    sink: bool,

    // Tree position
    parent: LinkAddr,
    metric: Metric,
    hop_count: u8,
    epoch: u16,

    table: RoutingTable,
    buffer: TopologyBuffer,

    /// Next hops of unicasts still waiting for their delivery status, oldest
    /// first. The MAC reports statuses in transmission order.
    in_flight: VecDeque<LinkAddr>,

    timers: Timers,
    metrics: NodeMetrics,

    _config: PhantomData<Cfg>,
}

impl<T, R, Clk, Cfg> Node<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Create a node. The sink starts connected with metric 0 and hop count 0;
    /// every other node starts disconnected.
    pub fn new(transport: T, random: R, clock: Clk, addr: LinkAddr, sink: bool) -> Self {
        let (metric, hop_count) = if sink {
            (Metric::ZERO, 0)
        } else {
            (Metric::INFINITE, HOPS_UNKNOWN)
        };

        Self {
            transport,
            random,
            clock,

            app_incoming: Channel::new(),
            app_outgoing: Channel::new(),
            events: Channel::new(),

            addr,
            sink,

            parent: LinkAddr::NULL,
            metric,
            hop_count,
            epoch: 0,

            table: RoutingTable::new(Cfg::TABLE_CAPACITY),
            buffer: TopologyBuffer::new(Cfg::TABLE_CAPACITY),

            in_flight: VecDeque::with_capacity(TRANSPORT_QUEUE_SIZE),

            timers: Timers::new(),
            metrics: NodeMetrics::default(),

            _config: PhantomData,
        }
    }

    /// Arm the start-up timers: the cleanup sweep, and at the sink the
    /// first beacon.
    pub fn initialize(&mut self, now: Timestamp) {
        self.timers
            .set(TimerKind::Cleanup, now + Cfg::CLEANUP_INTERVAL);
        if self.sink {
            self.timers
                .set(TimerKind::Beacon, now + Cfg::FIRST_BEACON_DELAY);
        }
        info!(
            "node {} started{}",
            self.addr,
            if self.sink { " as sink" } else { "" }
        );
    }

    /// This node's link address.
    pub fn addr(&self) -> LinkAddr {
        self.addr
    }

    pub fn is_sink(&self) -> bool {
        self.sink
    }

    /// Current parent, [`LinkAddr::NULL`] when disconnected (and at the sink).
    pub fn parent(&self) -> LinkAddr {
        self.parent
    }

    /// True if the node can route toward the sink.
    pub fn is_connected(&self) -> bool {
        self.sink || !self.parent.is_null()
    }

    /// Path metric to the sink.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    /// Tree-building round this node belongs to.
    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    /// Read-only view of the routing table.
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Subtree changes not yet reported to the parent.
    pub fn buffer(&self) -> &TopologyBuffer {
        &self.buffer
    }

    /// Channel for receiving data addressed to this node.
    pub fn incoming(&self) -> &AppInChannel {
        &self.app_incoming
    }

    /// Channel for data the application wants sent.
    pub fn outgoing(&self) -> &AppOutChannel {
        &self.app_outgoing
    }

    /// Channel for protocol events.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Get the transport reference.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get the clock reference.
    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    /// Protocol counters for monitoring.
    pub fn metrics(&self) -> NodeMetrics {
        NodeMetrics {
            deltas_dropped: self.buffer.dropped(),
            ..self.metrics
        }
    }

    /// Deadline of one timer, if armed.
    pub fn timer_deadline(&self, kind: TimerKind) -> Option<Timestamp> {
        self.timers.deadline(kind)
    }

    /// Earliest armed timer deadline.
    pub fn next_wake(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Run the node's main loop.
    ///
    /// Arms the start-up timers, then waits forever for the next incoming
    /// frame, application send, or timer deadline and dispatches it.
    ///
    /// Call this from an async task/executor.
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select3, Either3};

        let now = self.clock.now();
        self.initialize(now);

        loop {
            let wake = self
                .next_wake()
                .unwrap_or_else(|| self.clock.now() + Cfg::CLEANUP_INTERVAL);

            let result = select3(
                self.transport.incoming().receive(),
                self.app_outgoing.receive(),
                self.clock.sleep_until(wake),
            )
            .await;

            match result {
                Either3::First(event) => {
                    let now = self.clock.now();
                    self.handle_transport_event(event, now);
                }
                Either3::Second(data) => {
                    let now = self.clock.now();
                    self.handle_app_send(data, now);
                }
                Either3::Third(()) => {
                    let now = self.clock.now();
                    self.handle_timer(now);
                }
            }
        }
    }

    /// Dispatch one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Timestamp) {
        match event {
            TransportEvent::Broadcast { from, data, rssi } => {
                self.handle_beacon(from, &data, rssi, now);
            }
            TransportEvent::Unicast { from, data, .. } => {
                self.handle_unicast(from, &data, now);
            }
            TransportEvent::Sent {
                status,
                transmissions,
            } => {
                self.handle_delivery_status(status, transmissions, now);
            }
        }
    }

    /// Handle an application send request.
    pub fn handle_app_send(&mut self, data: OutgoingData, _now: Timestamp) {
        let OutgoingData {
            destination,
            payload,
        } = data;
        if let Err(e) = self.send(destination, &payload) {
            warn!("send to {} failed: {}", destination, e);
        }
    }

    /// Fire every timer due at `now`, earliest first.
    pub fn handle_timer(&mut self, now: Timestamp) {
        while let Some(kind) = self.timers.take_due(now) {
            match kind {
                TimerKind::Beacon => self.beacon_timer(now),
                TimerKind::Report => self.report_timer(now),
                TimerKind::Cleanup => self.cleanup_timer(now),
            }
        }
    }

    fn cleanup_timer(&mut self, now: Timestamp) {
        self.run_cleanup(now);
        self.timers
            .set(TimerKind::Cleanup, now + Cfg::CLEANUP_INTERVAL);
    }

    /// Sweep stale entries; re-select a parent if ours was among them.
    pub(crate) fn run_cleanup(&mut self, now: Timestamp) {
        // The sink reports to nobody, so its removals are not queued.
        let buffer = (!self.sink).then_some(&mut self.buffer);
        let parent_lost = self
            .table
            .cleanup_sweep(now, Cfg::ENTRY_EXPIRATION, buffer);
        if parent_lost {
            debug!("parent {} expired", self.parent);
            self.parent = LinkAddr::NULL;
            self.change_parent(now);
        }
    }

    /// Queue a unicast frame and remember its next hop for the delivery report.
    ///
    /// If statuses stop arriving, the oldest unanswered next hop is forgotten
    /// once a full transport queue's worth of frames is pending.
    pub(crate) fn unicast(&mut self, to: LinkAddr, data: Vec<u8>) -> Result<(), Error> {
        self.transport
            .outgoing()
            .try_send(Frame::Unicast { to, data })
            .map_err(|_| Error::Rejected)?;
        if self.in_flight.len() >= TRANSPORT_QUEUE_SIZE {
            self.in_flight.pop_front();
        }
        self.in_flight.push_back(to);
        Ok(())
    }

    /// Queue a broadcast frame. Returns false if the transport queue is full.
    pub(crate) fn broadcast(&mut self, data: Vec<u8>) -> bool {
        self.transport
            .outgoing()
            .try_send(Frame::Broadcast(data))
            .is_ok()
    }

    /// Push an event to the events channel.
    pub(crate) fn push_event(&mut self, event: Event) {
        let _ = self.events.try_send(event);
    }

    /// Push delivered data to the app_incoming channel.
    pub(crate) fn push_incoming_data(&mut self, data: IncomingData) {
        if self.app_incoming.try_send(data).is_err() {
            warn!("application queue full, dropping data");
        }
    }

    // --- Internal accessors for other modules ---

    pub(crate) fn table_mut(&mut self) -> &mut RoutingTable {
        &mut self.table
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut TopologyBuffer {
        &mut self.buffer
    }

    pub(crate) fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut NodeMetrics {
        &mut self.metrics
    }

    pub(crate) fn random_mut(&mut self) -> &mut R {
        &mut self.random
    }

    /// Next hop the incoming delivery status belongs to.
    pub(crate) fn take_unicast_target(&mut self) -> Option<LinkAddr> {
        self.in_flight.pop_front()
    }

    /// Apply a topology report to the table and queue its deltas.
    pub(crate) fn merge_report(
        &mut self,
        reporter: LinkAddr,
        deltas: &[crate::types::TopologyDelta],
        now: Timestamp,
    ) -> bool {
        let (own, parent) = (self.addr, self.parent);
        let buffer = (!self.sink).then_some(&mut self.buffer);
        self.table
            .apply_topology_report(own, parent, reporter, deltas, buffer, now)
    }

    pub(crate) fn set_parent(&mut self, parent: LinkAddr) {
        self.parent = parent;
    }

    pub(crate) fn set_position(&mut self, metric: Metric, hop_count: u8) {
        self.metric = metric;
        self.hop_count = hop_count;
    }

    pub(crate) fn set_epoch(&mut self, epoch: u16) {
        self.epoch = epoch;
    }

    /// Attach to `parent` at depth `hops` without exchanging beacons.
    #[cfg(test)]
    pub(crate) fn join_for_test(&mut self, parent: LinkAddr, hops: u8) {
        use crate::table::Entry;
        use crate::types::EntryKind;

        let entry = self
            .table
            .get_or_insert_with(parent, || Entry::neighbor(parent, 1.0, -40, Timestamp::ZERO));
        if let Some(entry) = entry {
            entry.kind = EntryKind::Parent;
            entry.advertised = Metric::encode(f32::from(hops - 1));
            entry.hop_count = hops - 1;
        }
        self.parent = parent;
        self.metric = Metric::encode(f32::from(hops));
        self.hop_count = hops;
        self.epoch = 1;
    }
}
