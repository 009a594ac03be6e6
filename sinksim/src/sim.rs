//! Discrete event simulator for sinktree networks.

use std::collections::{BinaryHeap, VecDeque};

use hashbrown::{HashMap, HashSet};
use log::{debug, trace};
use sinktree::{DeliveryStatus, Duration, Event as NodeEvent, Frame, LinkAddr, Timestamp};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{Delivery, NodeState, SimMetrics, SimulationResult, TreeSnapshot};
use crate::node::SimNode;
use crate::topology::Topology;

/// MAC transmissions per unicast, the first attempt included.
pub const MAX_TRANSMISSIONS: u8 = 3;

/// Discrete event simulator for sinktree networks.
pub struct Simulator {
    nodes: HashMap<LinkAddr, SimNode>,
    topology: Topology,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    /// Next sequence number for event ordering.
    next_seq: u64,
    /// RNG state for packet loss.
    rng_state: u64,
    /// Timer fire currently queued for each node; other fires are stale.
    pending_wake: HashMap<LinkAddr, Timestamp>,
    /// Unicasts waiting for their sender's MAC, oldest first.
    mac_queue: HashMap<LinkAddr, VecDeque<(LinkAddr, Vec<u8>)>>,
    /// Senders with a unicast whose delivery status is not yet handled.
    mac_busy: HashSet<LinkAddr>,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
}

impl Simulator {
    /// Create a new simulator with given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng_state: seed,
            pending_wake: HashMap::new(),
            mac_queue: HashMap::new(),
            mac_busy: HashSet::new(),
            snapshot_interval: None,
            next_snapshot: None,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Record a tree snapshot every `interval`.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Add and start a node. `seed` drives its protocol jitter.
    pub fn add_node(&mut self, addr: LinkAddr, sink: bool, seed: u64) -> LinkAddr {
        let mut node = SimNode::new(addr, sink, seed, self.current_time);
        node.initialize(self.current_time);
        self.nodes.insert(addr, node);
        self.after_handler(addr);
        addr
    }

    pub fn node(&self, addr: &LinkAddr) -> Option<&SimNode> {
        self.nodes.get(addr)
    }

    pub fn node_mut(&mut self, addr: &LinkAddr) -> Option<&mut SimNode> {
        self.nodes.get_mut(addr)
    }

    /// All node addresses, sorted.
    pub fn node_ids(&self) -> Vec<LinkAddr> {
        let mut ids: Vec<LinkAddr> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Queue an application send.
    pub fn schedule_send(&mut self, time: Timestamp, from: LinkAddr, to: LinkAddr, payload: Vec<u8>) {
        self.schedule(time, Event::AppSend { from, to, payload });
    }

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while self
            .event_queue
            .peek()
            .is_some_and(|event| event.time <= end_time)
        {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        self.advance_time(end_time);
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        let now = self.current_time;
        match event {
            Event::BroadcastDelivery {
                to,
                from,
                data,
                rssi,
            } => {
                if let Some(node) = self.nodes.get_mut(&to) {
                    node.handle_broadcast(from, data, rssi, now);
                    self.metrics.frames_delivered += 1;
                }
                self.after_handler(to);
            }
            Event::UnicastDelivery {
                to,
                from,
                data,
                rssi,
            } => {
                if let Some(node) = self.nodes.get_mut(&to) {
                    node.handle_unicast(from, data, rssi, now);
                    self.metrics.frames_delivered += 1;
                }
                self.after_handler(to);
            }
            Event::SentStatus {
                node,
                status,
                transmissions,
            } => {
                self.mac_busy.remove(&node);
                if let Some(n) = self.nodes.get_mut(&node) {
                    n.handle_sent(status, transmissions, now);
                }
                self.after_handler(node);
            }
            Event::TimerFire { node } => self.fire_timer(node),
            Event::AppSend { from, to, payload } => {
                if let Some(node) = self.nodes.get_mut(&from) {
                    node.app_send(to, payload, now);
                }
                self.after_handler(from);
            }
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn fire_timer(&mut self, addr: LinkAddr) {
        let now = self.current_time;
        if self.pending_wake.get(&addr) != Some(&now) {
            trace!("stale timer fire for {}", addr);
            return;
        }
        self.pending_wake.remove(&addr);
        if let Some(node) = self.nodes.get_mut(&addr) {
            node.handle_timer(now);
        }
        self.after_handler(addr);
    }

    /// Route a node's output, record its deliveries and events, and keep
    /// exactly one timer fire queued for its next deadline.
    fn after_handler(&mut self, addr: LinkAddr) {
        let Some(node) = self.nodes.get(&addr) else {
            return;
        };
        let frames = node.take_outgoing();
        let delivered = node.take_delivered();
        let events = node.take_events();
        let wake = node.next_wake();

        for data in delivered {
            debug!("{} received {} bytes from {}", addr, data.payload.len(), data.source);
            self.metrics.deliveries.push(Delivery {
                time: self.current_time,
                at: addr,
                source: data.source,
                hops: data.hops,
                payload: data.payload,
            });
        }
        for event in events {
            match event {
                NodeEvent::ParentChanged { .. } => self.metrics.parent_changes += 1,
                NodeEvent::Disconnected => self.metrics.disconnections += 1,
                NodeEvent::EpochStarted { .. } => {}
            }
            debug!("{} at {} ms: {:?}", addr, self.current_time.as_millis(), event);
        }
        for frame in frames {
            match frame {
                Frame::Broadcast(data) => self.route_broadcast(addr, data),
                Frame::Unicast { to, data } => {
                    self.mac_queue.entry(addr).or_default().push_back((to, data));
                }
            }
        }
        self.start_next_unicast(addr);

        if let Some(wake) = wake {
            let wake = wake.max(self.current_time);
            if self.pending_wake.get(&addr) != Some(&wake) {
                self.pending_wake.insert(addr, wake);
                self.schedule(wake, Event::TimerFire { node: addr });
            }
        }
    }

    /// Deliver a broadcast to every active neighbor that does not lose it.
    fn route_broadcast(&mut self, sender: LinkAddr, data: Vec<u8>) {
        self.metrics.broadcasts_sent += 1;
        let now = self.current_time;

        for neighbor in self.topology.neighbors(sender) {
            let Some((rssi, delay, loss_rate)) = self
                .topology
                .get_link(sender, neighbor)
                .map(|l| (l.rssi, l.delay, l.loss_rate))
            else {
                continue;
            };
            if self.lost(loss_rate) {
                self.metrics.frames_lost += 1;
                continue;
            }
            self.schedule(
                now + delay,
                Event::BroadcastDelivery {
                    to: neighbor,
                    from: sender,
                    data: data.clone(),
                    rssi,
                },
            );
        }
    }

    /// Hand the sender's next queued unicast to the MAC, one at a time.
    fn start_next_unicast(&mut self, sender: LinkAddr) {
        if self.mac_busy.contains(&sender) {
            return;
        }
        let Some((to, data)) = self
            .mac_queue
            .get_mut(&sender)
            .and_then(|queue| queue.pop_front())
        else {
            return;
        };
        self.mac_busy.insert(sender);
        self.route_unicast(sender, to, data);
    }

    /// Transmit a unicast with up to [`MAX_TRANSMISSIONS`] attempts, then
    /// report the outcome to the sender.
    fn route_unicast(&mut self, sender: LinkAddr, to: LinkAddr, data: Vec<u8>) {
        self.metrics.unicasts_sent += 1;
        let now = self.current_time;
        let link = self
            .topology
            .get_link(sender, to)
            .filter(|l| l.active)
            .map(|l| (l.rssi, l.delay, l.loss_rate));
        let per_attempt = link.map_or(Duration::from_millis(5), |(_, delay, _)| delay);

        for attempt in 1..=MAX_TRANSMISSIONS {
            let at = now + per_attempt * u64::from(attempt);
            match link {
                Some((rssi, _, loss_rate)) if !self.lost(loss_rate) => {
                    self.schedule(
                        at,
                        Event::UnicastDelivery {
                            to,
                            from: sender,
                            data,
                            rssi,
                        },
                    );
                    self.schedule(
                        at,
                        Event::SentStatus {
                            node: sender,
                            status: DeliveryStatus::Ok,
                            transmissions: attempt,
                        },
                    );
                    return;
                }
                _ => self.metrics.frames_lost += 1,
            }
        }

        debug!("unicast {} -> {} failed", sender, to);
        self.metrics.unicasts_failed += 1;
        self.schedule(
            now + per_attempt * u64::from(MAX_TRANSMISSIONS),
            Event::SentStatus {
                node: sender,
                status: DeliveryStatus::NoAck,
                transmissions: MAX_TRANSMISSIONS,
            },
        );
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        debug!("t={} ms: {:?}", self.current_time.as_millis(), action);
        match action {
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::DisableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { a, b, rate } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Record every node's tree position.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = TreeSnapshot::new(self.current_time);
        for (&addr, node) in &self.nodes {
            snapshot.record_node(
                addr,
                NodeState {
                    is_sink: node.is_sink(),
                    parent: node.parent(),
                    hop_count: node.hop_count(),
                    metric: node.metric(),
                    epoch: node.epoch(),
                },
            );
        }
        self.metrics.add_snapshot(snapshot);
    }

    /// Draw against `loss_rate`; true means the transmission is lost.
    fn lost(&mut self, loss_rate: f64) -> bool {
        loss_rate > 0.0 && self.random_f64() < loss_rate
    }

    /// Generate a random f64 in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        ((self.rng_state >> 11) as f64) / ((1u64 << 53) as f64)
    }
}
