//! Core types and constants for the sinktree protocol.

use alloc::vec::Vec;
use core::fmt;

use crate::metric::Metric;

/// Hop count advertised by a node that has no path to the sink.
pub const HOPS_UNKNOWN: u8 = u8::MAX;

/// Length of a link-layer address in bytes.
pub const LINK_ADDR_LEN: usize = 2;

/// Application payload carried by Data packets.
pub type Payload = Vec<u8>;

/// Two-byte link-layer address, unique within one network.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LinkAddr(pub [u8; LINK_ADDR_LEN]);

impl LinkAddr {
    /// Reserved "no address" value.
    pub const NULL: LinkAddr = LinkAddr([0, 0]);

    pub const fn new(hi: u8, lo: u8) -> Self {
        LinkAddr([hi, lo])
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0[0] == 0 && self.0[1] == 0
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; LINK_ADDR_LEN] {
        &self.0
    }
}

impl fmt::Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}", self.0[0], self.0[1])
    }
}

impl fmt::Debug for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkAddr({})", self)
    }
}

/// Role of a routing table entry relative to this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Next hop toward the sink. At most one entry has this kind.
    Parent,
    /// One-hop neighbor that selected this node as its parent.
    Child,
    /// Multi-hop member of a child's subtree, learned from topology reports.
    Descendant,
    /// Any other node heard directly.
    Neighbor,
}

/// Subtree membership change carried in topology reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Remove = 0,
    Add = 1,
}

impl Status {
    pub fn from_u8(v: u8) -> Option<Status> {
        match v {
            0 => Some(Status::Remove),
            1 => Some(Status::Add),
            _ => None,
        }
    }
}

/// One (address, status) entry of a topology report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopologyDelta {
    pub addr: LinkAddr,
    pub status: Status,
}

impl TopologyDelta {
    pub const fn add(addr: LinkAddr) -> Self {
        Self {
            addr,
            status: Status::Add,
        }
    }

    pub const fn remove(addr: LinkAddr) -> Self {
        Self {
            addr,
            status: Status::Remove,
        }
    }
}

/// Outcome of the most recent unicast as reported by the MAC layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Acknowledged by the receiver.
    Ok,
    /// No acknowledgment after all retransmissions.
    NoAck,
}

/// Protocol notifications for the application.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A new parent was adopted.
    ParentChanged { parent: LinkAddr, metric: Metric, hops: u8 },
    /// No parent candidate is left; sends fail until a beacon reconnects us.
    Disconnected,
    /// A higher epoch was observed (or started, at the sink) and the tree is rebuilt.
    EpochStarted { epoch: u16 },
}

/// Error type for application-facing operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// No parent and not the sink.
    Disconnected,
    /// Next hop resolved to the null address.
    NoRoute,
    /// Transport refused the frame (outgoing queue full).
    Rejected,
    /// Header plus payload exceed the transport MTU.
    MessageTooLarge,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Disconnected => write!(f, "node is disconnected from the sink tree"),
            Error::NoRoute => write!(f, "no route to destination"),
            Error::Rejected => write!(f, "transport rejected the frame"),
            Error::MessageTooLarge => write!(f, "message too large"),
        }
    }
}

/// Protocol counters for monitoring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeMetrics {
    pub beacons_sent: u32,
    pub beacons_received: u32,
    /// Beacons discarded for weak signal or table exhaustion.
    pub beacons_dropped: u32,
    pub reports_sent: u32,
    pub reports_received: u32,
    pub data_sent: u32,
    pub data_forwarded: u32,
    pub data_delivered: u32,
    /// Data packets dropped for path length or missing route.
    pub data_dropped: u32,
    pub malformed: u32,
    pub unicast_acked: u32,
    pub unicast_failed: u32,
    /// Topology deltas lost to buffer overflow.
    pub deltas_dropped: u32,
}
