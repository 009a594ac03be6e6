//! Collaborators the node is generic over.
//!
//! A [`Transport`] stands in for the radio and its MAC (ContikiMAC, an
//! always-on radio, or the simulator), a [`Clock`] for the platform timer and
//! [`Random`] for the jitter source.

use alloc::vec::Vec;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{DeliveryStatus, Event, LinkAddr, Payload};

/// Depth of both transport queues.
pub(crate) const TRANSPORT_QUEUE_SIZE: usize = 16;

/// Depth of the application data queues.
pub(crate) const APP_QUEUE_SIZE: usize = 8;

/// Depth of the protocol event queue.
pub(crate) const EVENT_QUEUE_SIZE: usize = 16;

/// Raw mutex behind every channel.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Something the radio delivered to the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A broadcast (beacon) frame.
    Broadcast {
        from: LinkAddr,
        data: Vec<u8>,
        /// Signal strength in dBm.
        rssi: i16,
    },
    /// A unicast frame addressed to this node.
    Unicast {
        from: LinkAddr,
        data: Vec<u8>,
        rssi: i16,
    },
    /// Outcome of the most recent unicast.
    Sent {
        status: DeliveryStatus,
        /// MAC transmissions used, retries included.
        transmissions: u8,
    },
}

/// A frame queued for the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Broadcast(Vec<u8>),
    Unicast { to: LinkAddr, data: Vec<u8> },
}

/// Incoming transport event channel type.
pub type TransportInChannel = Channel<ChannelMutex, TransportEvent, TRANSPORT_QUEUE_SIZE>;

/// Outgoing frame channel type.
pub type TransportOutChannel = Channel<ChannelMutex, Frame, TRANSPORT_QUEUE_SIZE>;

/// Data packet delivered to this node (application level).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingData {
    /// Originator of the packet.
    pub source: LinkAddr,
    /// Hops travelled.
    pub hops: u8,
    pub payload: Payload,
}

/// Application payload handed to the node for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingData {
    pub destination: LinkAddr,
    pub payload: Payload,
}

/// Payloads delivered to this node.
pub type AppInChannel = Channel<ChannelMutex, IncomingData, APP_QUEUE_SIZE>;

/// Payloads queued by the application.
pub type AppOutChannel = Channel<ChannelMutex, OutgoingData, APP_QUEUE_SIZE>;

/// Tree notifications for the application.
pub type EventChannel = Channel<ChannelMutex, Event, EVENT_QUEUE_SIZE>;

/// Transport trait for radio/MAC backends.
///
/// Provides two channels:
/// - `outgoing()`: frames the node wants transmitted
/// - `incoming()`: received frames and delivery reports
///
/// # Usage Contract
///
/// - Radio ISR → `incoming().try_send(TransportEvent::Broadcast { .. })`
/// - MAC after the last retry → `incoming().try_send(TransportEvent::Sent { .. })`
/// - Protocol task → `outgoing().try_send(frame)`; a full queue means the
///   frame was rejected
/// - Transmit task → `outgoing().receive()`
///
/// ```ignore
/// use sinktree::traits::test_impls::MockTransport;
/// use sinktree::traits::{Frame, Transport};
/// use sinktree::LinkAddr;
///
/// let radio = MockTransport::new();
/// radio
///     .outgoing()
///     .try_send(Frame::Unicast { to: LinkAddr::new(1, 0), data: vec![1, 2, 3] })
///     .unwrap();
/// assert_eq!(radio.take_sent().len(), 1);
/// ```
pub trait Transport {
    /// Largest frame payload the link accepts, in bytes.
    fn mtu(&self) -> usize;

    /// Channel for frames to transmit.
    fn outgoing(&self) -> &TransportOutChannel;

    /// Channel for received frames and delivery status.
    fn incoming(&self) -> &TransportInChannel;
}

/// Millisecond time source.
///
/// Only [`Node::run`](crate::Node::run) touches the clock; the synchronous
/// handlers take `now` as an argument.
///
/// ```ignore
/// use sinktree::traits::test_impls::MockClock;
/// use sinktree::{Clock, Duration, Timestamp};
///
/// let clock = MockClock::at(Timestamp::from_secs(1));
/// clock.advance(Duration::from_millis(500));
/// assert_eq!(clock.now(), Timestamp::from_millis(1500));
/// ```
///
/// On hardware with embassy-time:
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = embassy_time::Timer;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Returned by [`sleep_until`](Clock::sleep_until).
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Milliseconds since start.
    fn now(&self) -> Timestamp;

    /// Resolves once `time` has passed.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Jitter source for beacon forwarding and report timers.
pub trait Random {
    /// Uniform value in `[min, max)`; `min` when the range is empty.
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use core::cell::Cell;
    use core::future::{ready, Ready};

    use super::*;
    use crate::config::{DefaultConfig, NodeConfig};
    use crate::time::Duration;

    /// Mock transport with inspectable queues.
    pub struct MockTransport {
        mtu: usize,
        outgoing: TransportOutChannel,
        incoming: TransportInChannel,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::with_mtu(DefaultConfig::REPORT_PAYLOAD_BUDGET)
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
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

    impl Transport for MockTransport {
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

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
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

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // Tests advance time manually.
            ready(())
        }
    }

    /// Mock random for testing (deterministic LCG).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            self.state = self
                .state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1);
            let range = max.saturating_sub(min);
            if range == 0 {
                return min;
            }
            min + (self.state >> 33) % range
        }
    }
}
