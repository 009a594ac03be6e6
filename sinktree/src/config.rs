//! Compile-time protocol configuration.
//!
//! Every tunable of the protocol is an associated constant of [`NodeConfig`],
//! selected through the last type parameter of [`Node`](crate::Node). Nothing
//! here is mutable at runtime.
//!
//! Two configurations ship with the crate, matching the two radio duty-cycling
//! modes the protocol was tuned for:
//!
//! | Config | Radio | Beacon forward delay | Relay delay |
//! |--------|-------|---------------------:|------------:|
//! | `DefaultConfig` | ContikiMAC (32 Hz channel check) | 125 ms + 8·rand(36 ms) | 100 ms + 4·rand(36 ms) |
//! | `NullRdcConfig` | always-on | 100 ms + rand(125 ms) | 100 ms + rand(100 ms) |
//!
//! The jitter spreads beacon forwards and report relays of sibling nodes over
//! several radio wake-up slots so they do not collide.
//!
//! # Example
//!
//! ```ignore
//! use sinktree::{Node, NodeConfig, DefaultConfig, NullRdcConfig};
//!
//! let node = Node::<_, _, _, NullRdcConfig>::new(transport, random, clock, addr, false);
//!
//! struct Dense;
//! impl NodeConfig for Dense {
//!     const TABLE_CAPACITY: usize = 64;
//!     // ... remaining constants
//! }
//! ```

use crate::time::Duration;
use crate::traits::Random;

/// Configuration trait for compile-time protocol tuning.
pub trait NodeConfig {
    /// Maximum routing table entries; also bounds the topology buffer.
    const TABLE_CAPACITY: usize;

    /// An entry not refreshed for this long is stale.
    const ENTRY_EXPIRATION: Duration;

    /// Period of the sink's beacon flood (one epoch).
    const BEACON_INTERVAL: Duration;

    /// Delay between sink start-up and its first beacon.
    const FIRST_BEACON_DELAY: Duration;

    /// Period of the stale-entry sweep.
    const CLEANUP_INTERVAL: Duration;

    /// Spacing between fragments of one topology report batch.
    const FRAGMENT_INTERVAL: Duration;

    /// Signal strength (dBm) at or above which a link is assumed perfect (ETX 1).
    const RSSI_HIGH_REF: i16;

    /// Beacons weaker than this (dBm) are discarded; links this weak get ETX 10.
    const RSSI_LOW_THRESHOLD: i16;

    /// Weight of the previous ETX in the exponential moving average, in [0, 1].
    /// A value of 1 disables transmission-based estimation.
    const ETX_ALPHA: f32;

    /// Smallest metric improvement that can trigger a parent change.
    const MIN_IMPROVEMENT: f32;

    /// Hysteresis scale: the required improvement is `IMPROVEMENT_SCALE / current`.
    const IMPROVEMENT_SCALE: f32;

    /// Data packets that travelled more hops than this are dropped.
    const MAX_PATH_LENGTH: u8;

    /// Bytes available to a unicast frame after link-layer overhead.
    const REPORT_PAYLOAD_BUDGET: usize;

    const BEACON_FORWARD_BASE: Duration;
    const BEACON_FORWARD_JITTER_RANGE: Duration;
    const BEACON_FORWARD_JITTER_SCALE: u64;

    /// Divided by the hop count: deeper nodes send their first report sooner.
    const REPORT_BASE_SPAN: Duration;
    const REPORT_BASE_JITTER_RANGE: Duration;
    const REPORT_BASE_JITTER_SCALE: u64;

    const REPORT_RELAY_BASE: Duration;
    const REPORT_RELAY_JITTER_RANGE: Duration;
    const REPORT_RELAY_JITTER_SCALE: u64;

    /// Base period of the per-node report timer.
    fn report_offset() -> Duration {
        Self::BEACON_INTERVAL / 3
    }

    /// Report period at depth `hops`: `offset * (1 + 1/hops)`.
    fn report_interval(hops: u8) -> Duration {
        let offset = Self::report_offset();
        offset + offset / u64::from(hops.max(1))
    }

    /// Delay before re-broadcasting a beacon after adopting a parent.
    fn beacon_forward_delay<R: Random>(rng: &mut R) -> Duration {
        Self::BEACON_FORWARD_BASE
            + jitter(
                rng,
                Self::BEACON_FORWARD_JITTER_RANGE,
                Self::BEACON_FORWARD_JITTER_SCALE,
            )
    }

    /// Delay of the first report after adopting a parent at depth `hops`.
    fn report_base_delay<R: Random>(hops: u8, rng: &mut R) -> Duration {
        Self::REPORT_BASE_SPAN / u64::from(hops.max(1))
            + jitter(
                rng,
                Self::REPORT_BASE_JITTER_RANGE,
                Self::REPORT_BASE_JITTER_SCALE,
            )
    }

    /// Delay before relaying a child's report upward.
    fn report_relay_delay<R: Random>(rng: &mut R) -> Duration {
        Self::REPORT_RELAY_BASE
            + jitter(
                rng,
                Self::REPORT_RELAY_JITTER_RANGE,
                Self::REPORT_RELAY_JITTER_SCALE,
            )
    }
}

fn jitter<R: Random>(rng: &mut R, range: Duration, scale: u64) -> Duration {
    Duration::from_millis(rng.gen_range(0, range.as_millis())) * scale
}

/// ContikiMAC channel check interval: 1/32 s plus 5 ms guard.
const CHANNEL_CHECK_INTERVAL: Duration = Duration::from_millis(1000 / 32 + 5);

/// Timings for a ContikiMAC duty-cycled radio.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl NodeConfig for DefaultConfig {
    const TABLE_CAPACITY: usize = 32;
    const ENTRY_EXPIRATION: Duration = Duration::from_secs(60);
    const BEACON_INTERVAL: Duration = Duration::from_secs(60);
    const FIRST_BEACON_DELAY: Duration = Duration::from_secs(1);
    const CLEANUP_INTERVAL: Duration = Duration::from_secs(15);
    const FRAGMENT_INTERVAL: Duration = Duration::from_millis(20);
    const RSSI_HIGH_REF: i16 = -35;
    const RSSI_LOW_THRESHOLD: i16 = -85;
    const ETX_ALPHA: f32 = 0.9;
    const MIN_IMPROVEMENT: f32 = 0.3;
    const IMPROVEMENT_SCALE: f32 = 100.0;
    const MAX_PATH_LENGTH: u8 = 40;
    const REPORT_PAYLOAD_BUDGET: usize = 128 - 9;

    const BEACON_FORWARD_BASE: Duration = Duration::from_millis(125);
    const BEACON_FORWARD_JITTER_RANGE: Duration = CHANNEL_CHECK_INTERVAL;
    const BEACON_FORWARD_JITTER_SCALE: u64 = 8;

    const REPORT_BASE_SPAN: Duration = Duration::from_secs(5);
    const REPORT_BASE_JITTER_RANGE: Duration = CHANNEL_CHECK_INTERVAL;
    const REPORT_BASE_JITTER_SCALE: u64 = 4;

    const REPORT_RELAY_BASE: Duration = Duration::from_millis(100);
    const REPORT_RELAY_JITTER_RANGE: Duration = CHANNEL_CHECK_INTERVAL;
    const REPORT_RELAY_JITTER_SCALE: u64 = 4;
}

/// Timings for an always-on radio.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRdcConfig;

impl NodeConfig for NullRdcConfig {
    const TABLE_CAPACITY: usize = 32;
    const ENTRY_EXPIRATION: Duration = Duration::from_secs(60);
    const BEACON_INTERVAL: Duration = Duration::from_secs(60);
    const FIRST_BEACON_DELAY: Duration = Duration::from_secs(1);
    const CLEANUP_INTERVAL: Duration = Duration::from_secs(15);
    const FRAGMENT_INTERVAL: Duration = Duration::from_millis(20);
    const RSSI_HIGH_REF: i16 = -35;
    const RSSI_LOW_THRESHOLD: i16 = -85;
    const ETX_ALPHA: f32 = 0.9;
    const MIN_IMPROVEMENT: f32 = 0.3;
    const IMPROVEMENT_SCALE: f32 = 100.0;
    const MAX_PATH_LENGTH: u8 = 40;
    const REPORT_PAYLOAD_BUDGET: usize = 128 - 9;

    const BEACON_FORWARD_BASE: Duration = Duration::from_millis(100);
    const BEACON_FORWARD_JITTER_RANGE: Duration = Duration::from_millis(125);
    const BEACON_FORWARD_JITTER_SCALE: u64 = 1;

    const REPORT_BASE_SPAN: Duration = Duration::from_secs(5);
    const REPORT_BASE_JITTER_RANGE: Duration = Duration::from_millis(100);
    const REPORT_BASE_JITTER_SCALE: u64 = 4;

    const REPORT_RELAY_BASE: Duration = Duration::from_millis(100);
    const REPORT_RELAY_JITTER_RANGE: Duration = Duration::from_millis(100);
    const REPORT_RELAY_JITTER_SCALE: u64 = 1;
}
