//! Event types and priority queue for discrete event simulation.

use std::cmp::Ordering;

use sinktree::{DeliveryStatus, LinkAddr, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<LinkAddr>> },
    /// Heal all partitions (restore full connectivity).
    HealPartition,
    /// Disable the link between two nodes.
    DisableLink { a: LinkAddr, b: LinkAddr },
    /// Enable the link between two nodes.
    EnableLink { a: LinkAddr, b: LinkAddr },
    /// Set loss rate on a link.
    SetLossRate { a: LinkAddr, b: LinkAddr, rate: f64 },
    /// Take a tree snapshot for metrics.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// A beacon reaches one neighbor.
    BroadcastDelivery {
        to: LinkAddr,
        from: LinkAddr,
        data: Vec<u8>,
        rssi: i16,
    },
    /// A unicast frame reaches its addressee.
    UnicastDelivery {
        to: LinkAddr,
        from: LinkAddr,
        data: Vec<u8>,
        rssi: i16,
    },
    /// The MAC reports the outcome of a unicast back to its sender.
    SentStatus {
        node: LinkAddr,
        status: DeliveryStatus,
        transmissions: u8,
    },
    /// Fire due timers for a node.
    TimerFire { node: LinkAddr },
    /// Application sends data from one node to another.
    AppSend {
        from: LinkAddr,
        to: LinkAddr,
        payload: Vec<u8>,
    },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Implement ordering for min-heap (BinaryHeap is max-heap, so we reverse).
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earlier time first, then lower sequence number.
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(n: u8) -> Event {
        Event::TimerFire {
            node: LinkAddr::new(n, 0),
        }
    }

    #[test]
    fn test_event_ordering() {
        let e1 = ScheduledEvent::new(Timestamp::from_secs(10), SequenceNumber::new(1), timer(1));
        let e2 = ScheduledEvent::new(Timestamp::from_secs(5), SequenceNumber::new(2), timer(1));

        // e2 has earlier time, so it should be "greater" in min-heap terms
        assert!(e2 > e1);
    }

    #[test]
    fn test_same_time_sequence_ordering() {
        let e1 = ScheduledEvent::new(Timestamp::from_secs(10), SequenceNumber::new(1), timer(1));
        let e2 = ScheduledEvent::new(Timestamp::from_secs(10), SequenceNumber::new(2), timer(2));

        // Same time, e1 has lower sequence, so e1 should be processed first
        assert!(e1 > e2);
    }

    #[test]
    fn test_heap_pops_in_time_order() {
        let mut heap = std::collections::BinaryHeap::new();
        for (seq, secs) in [(0, 3), (1, 1), (2, 2), (3, 1)] {
            heap.push(ScheduledEvent::new(
                Timestamp::from_secs(secs),
                SequenceNumber::new(seq),
                timer(1),
            ));
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq.value())).collect();
        assert_eq!(order, [1, 3, 2, 0]);
    }
}
