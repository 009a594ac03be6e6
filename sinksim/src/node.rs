//! SimNode wrapper for simulated sinktree nodes.

use std::cell::Cell;
use std::future::{ready, Ready};

use embassy_sync::channel::Channel;
use sinktree::config::{DefaultConfig, NodeConfig};
use sinktree::traits::{Clock, Random, Transport, TransportInChannel, TransportOutChannel};
use sinktree::{
    DeliveryStatus, Duration, Event, Frame, IncomingData, LinkAddr, Metric, Node, OutgoingData,
    Timestamp, TransportEvent,
};

/// Transport backed by plain queues; the simulator moves frames between nodes.
pub struct SimTransport {
    mtu: usize,
    outgoing: TransportOutChannel,
    incoming: TransportInChannel,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::with_mtu(DefaultConfig::REPORT_PAYLOAD_BUDGET)
    }

    pub fn with_mtu(mtu: usize) -> Self {
        Self {
            mtu,
            outgoing: Channel::new(),
            incoming: Channel::new(),
        }
    }

    /// Take all queued frames in send order.
    pub fn take_sent(&self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outgoing.try_receive() {
            frames.push(frame);
        }
        frames
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn outgoing(&self) -> &TransportOutChannel {
        &self.outgoing
    }

    fn incoming(&self) -> &TransportInChannel {
        &self.incoming
    }
}

/// Clock for simulation.
///
/// Time is controlled externally by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::at(Timestamp::ZERO)
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }

    pub fn advance(&self, duration: Duration) {
        self.current.set(self.current.get() + duration);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Deterministic LCG for protocol jitter.
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn new() -> Self {
        Self { state: 12345 }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Default for SimRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let range = max.saturating_sub(min);
        if range == 0 {
            return min;
        }
        min + (self.state >> 33) % range
    }
}

/// Type alias for simulated nodes.
pub type SimNodeInner = Node<SimTransport, SimRandom, SimClock, DefaultConfig>;

/// Wrapper around a sinktree Node for simulation.
pub struct SimNode {
    inner: SimNodeInner,
    /// When the node was created.
    pub created_at: Timestamp,
}

impl SimNode {
    /// Create a node; `seed` drives its jitter.
    pub fn new(addr: LinkAddr, sink: bool, seed: u64, created_at: Timestamp) -> Self {
        let inner = Node::new(
            SimTransport::new(),
            SimRandom::with_seed(seed),
            SimClock::at(created_at),
            addr,
            sink,
        );
        Self { inner, created_at }
    }

    pub fn addr(&self) -> LinkAddr {
        self.inner.addr()
    }

    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut SimNodeInner {
        &mut self.inner
    }

    pub fn is_sink(&self) -> bool {
        self.inner.is_sink()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn parent(&self) -> LinkAddr {
        self.inner.parent()
    }

    pub fn hop_count(&self) -> u8 {
        self.inner.hop_count()
    }

    pub fn metric(&self) -> Metric {
        self.inner.metric()
    }

    pub fn epoch(&self) -> u16 {
        self.inner.epoch()
    }

    /// Earliest armed protocol timer.
    pub fn next_wake(&self) -> Option<Timestamp> {
        self.inner.next_wake()
    }

    /// Arm the start-up timers.
    pub fn initialize(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.initialize(now);
    }

    pub fn handle_broadcast(&mut self, from: LinkAddr, data: Vec<u8>, rssi: i16, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner
            .handle_transport_event(TransportEvent::Broadcast { from, data, rssi }, now);
    }

    pub fn handle_unicast(&mut self, from: LinkAddr, data: Vec<u8>, rssi: i16, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner
            .handle_transport_event(TransportEvent::Unicast { from, data, rssi }, now);
    }

    pub fn handle_sent(&mut self, status: DeliveryStatus, transmissions: u8, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_transport_event(
            TransportEvent::Sent {
                status,
                transmissions,
            },
            now,
        );
    }

    pub fn handle_timer(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_timer(now);
    }

    /// Send application data to `destination`.
    pub fn app_send(&mut self, destination: LinkAddr, payload: Vec<u8>, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_app_send(
            OutgoingData {
                destination,
                payload,
            },
            now,
        );
    }

    /// Take all frames queued for the radio.
    pub fn take_outgoing(&self) -> Vec<Frame> {
        self.inner.transport().take_sent()
    }

    /// Take all data delivered to this node's application.
    pub fn take_delivered(&self) -> Vec<IncomingData> {
        let mut delivered = Vec::new();
        while let Ok(data) = self.inner.incoming().try_receive() {
            delivered.push(data);
        }
        delivered
    }

    /// Take all protocol events.
    pub fn take_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.inner.events().try_receive() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simnode_creation() {
        let sink = SimNode::new(LinkAddr::new(1, 0), true, 1, Timestamp::ZERO);
        assert!(sink.is_sink());
        assert!(sink.is_connected());
        assert_eq!(sink.hop_count(), 0);

        let node = SimNode::new(LinkAddr::new(2, 0), false, 2, Timestamp::ZERO);
        assert!(!node.is_connected());
        assert!(node.metric().is_infinite());
    }

    #[test]
    fn test_sink_first_beacon() {
        let mut sink = SimNode::new(LinkAddr::new(1, 0), true, 1, Timestamp::ZERO);
        sink.initialize(Timestamp::ZERO);
        assert_eq!(sink.next_wake(), Some(Timestamp::from_secs(1)));

        sink.handle_timer(Timestamp::from_secs(1));
        let frames = sink.take_outgoing();
        assert!(matches!(frames.as_slice(), [Frame::Broadcast(_)]));
        assert_eq!(sink.epoch(), 1);
        assert_eq!(sink.take_events(), [Event::EpochStarted { epoch: 1 }]);
    }

    #[test]
    fn test_sim_random_stays_in_range() {
        let mut rng = SimRandom::with_seed(7);
        for _ in 0..100 {
            let v = rng.gen_range(10, 20);
            assert!((10..20).contains(&v));
        }
        assert_eq!(rng.gen_range(5, 5), 5);
    }
}
