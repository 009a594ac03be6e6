//! Link-quality metric engine.
//!
//! Path cost is the sum of per-link ETX values along the path to the sink.
//! It is carried on the wire and stored in the routing table as an unsigned
//! Q12.4 fixed-point value whose all-ones pattern means "unreachable".
//!
//! Loop avoidance relies on that sentinel: children and descendants are stored
//! with [`Metric::INFINITE`], and [`is_preferred`] can never pick a path whose
//! cost starts at the sentinel.

use crate::config::NodeConfig;

/// Fractional bits of the fixed-point encoding.
pub const METRIC_FRAC_BITS: u32 = 4;

const METRIC_SCALE: f32 = (1u32 << METRIC_FRAC_BITS) as f32;

/// ETX of a link at or above the high signal reference.
pub const ETX_BEST: f32 = 1.0;

/// ETX of a link at or below the low signal threshold.
pub const ETX_WORST: f32 = 10.0;

/// Path metric in Q12.4 fixed point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Metric(u16);

impl Metric {
    /// The sink's own metric.
    pub const ZERO: Metric = Metric(0);

    /// Unreachable; also the saturation value of [`Metric::encode`].
    pub const INFINITE: Metric = Metric(u16::MAX);

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Metric(raw)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_infinite(self) -> bool {
        self.0 == u16::MAX
    }

    /// Round-to-nearest conversion. Values at or beyond the representable
    /// range, and NaN, saturate to [`Metric::INFINITE`]; negatives clamp to zero.
    pub fn encode(value: f32) -> Metric {
        if value.is_nan() || value >= u16::MAX as f32 / METRIC_SCALE {
            return Metric::INFINITE;
        }
        if value <= 0.0 {
            return Metric::ZERO;
        }
        // value * 16 + 0.5 < 65535, so the cast cannot wrap.
        Metric((value * METRIC_SCALE + 0.5) as u16)
    }

    /// Exact conversion back to a real value (granularity 1/16).
    #[inline]
    pub fn decode(self) -> f32 {
        self.0 as f32 / METRIC_SCALE
    }
}

/// Estimate link ETX from a signal strength reading (dBm).
///
/// Clamps to 1.0 above the high reference and 10.0 below the low threshold;
/// linear in between.
pub fn etx_from_signal<C: NodeConfig>(rssi: i16) -> f32 {
    if rssi > C::RSSI_HIGH_REF {
        return ETX_BEST;
    }
    if rssi < C::RSSI_LOW_THRESHOLD {
        return ETX_WORST;
    }
    let span = (C::RSSI_HIGH_REF - C::RSSI_LOW_THRESHOLD) as f32;
    let offset = (C::RSSI_HIGH_REF - rssi) as f32;
    ETX_BEST + (offset / span) * (ETX_WORST - ETX_BEST)
}

/// Refresh a link's ETX after a unicast.
///
/// Without any acknowledgment yet (or with smoothing disabled) the estimate
/// falls back to signal strength; otherwise the raw `tx/ack` ratio is blended
/// into `old_etx` by exponential smoothing.
pub fn update_etx<C: NodeConfig>(tx_count: u16, ack_count: u16, old_etx: f32, rssi: i16) -> f32 {
    if ack_count == 0 || C::ETX_ALPHA >= 1.0 {
        return etx_from_signal::<C>(rssi);
    }
    let ratio = f32::from(tx_count) / f32::from(ack_count);
    let smoothed = C::ETX_ALPHA * old_etx + (1.0 - C::ETX_ALPHA) * ratio;
    smoothed.max(0.0)
}

/// Path cost through a neighbor: its advertised metric plus the link ETX.
#[inline]
pub fn combine(advertised: f32, etx: f32) -> f32 {
    advertised + etx
}

/// Improvement a candidate must beat `current` by. Infinite when `current <= 0`.
pub fn improvement_threshold<C: NodeConfig>(current: f32) -> f32 {
    if current <= 0.0 {
        return f32::INFINITY;
    }
    let dynamic = C::IMPROVEMENT_SCALE / current;
    if dynamic > C::MIN_IMPROVEMENT {
        dynamic
    } else {
        C::MIN_IMPROVEMENT
    }
}

/// Hysteresis test gating every parent change.
///
/// True only if `candidate` improves on `current` by more than
/// [`improvement_threshold`], which shrinks as `current` grows.
pub fn is_preferred<C: NodeConfig>(candidate: f32, current: f32) -> bool {
    if current <= 0.0 || candidate.is_nan() {
        return false;
    }
    candidate + improvement_threshold::<C>(current) < current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultConfig;

    type C = DefaultConfig;

    #[test]
    fn test_etx_from_signal_clamps() {
        assert_eq!(etx_from_signal::<C>(-20), 1.0);
        assert_eq!(etx_from_signal::<C>(-35), 1.0);
        assert_eq!(etx_from_signal::<C>(-85), 10.0);
        assert_eq!(etx_from_signal::<C>(-100), 10.0);
        let mid = etx_from_signal::<C>(-60);
        assert!((mid - 5.5).abs() < 1e-4);
    }

    #[test]
    fn test_etx_from_signal_monotonic() {
        let mut prev = etx_from_signal::<C>(-20);
        for rssi in (-100..-20).rev() {
            let etx = etx_from_signal::<C>(rssi);
            assert!(etx >= prev, "etx must not improve as signal weakens");
            prev = etx;
        }
    }

    #[test]
    fn test_update_etx_falls_back_without_acks() {
        let etx = update_etx::<C>(5, 0, 3.0, -35);
        assert_eq!(etx, 1.0);
    }

    #[test]
    fn test_update_etx_smooths_ratio() {
        // 0.9 * 1.0 + 0.1 * (4 / 2)
        let etx = update_etx::<C>(4, 2, 1.0, -35);
        assert!((etx - 1.1).abs() < 1e-5);
        assert!(update_etx::<C>(0, 1, 0.0, -35) >= 0.0);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut m = 0.0f32;
        while m < 4095.0 {
            let decoded = Metric::encode(m).decode();
            assert!((decoded - m).abs() <= 1.0 / 16.0, "{} -> {}", m, decoded);
            m += 0.37;
        }
    }

    #[test]
    fn test_encode_saturates() {
        assert_eq!(Metric::encode(4095.9375), Metric::INFINITE);
        assert_eq!(Metric::encode(1.0e9), Metric::INFINITE);
        assert_eq!(Metric::encode(f32::NAN), Metric::INFINITE);
        assert_eq!(Metric::encode(-3.0), Metric::ZERO);
        assert!(!Metric::encode(4095.0).is_infinite());
        assert_eq!(Metric::encode(1.0).raw(), 16);
        assert_eq!(Metric::from_raw(0x0018).decode(), 1.5);
    }

    #[test]
    fn test_is_preferred_rejects_non_improvements() {
        for &(a, b) in &[(5.0, 5.0), (6.0, 5.0), (1.0, 1.0), (4095.0, 10.0)] {
            assert!(!is_preferred::<C>(a, b));
        }
        assert!(!is_preferred::<C>(0.0, 0.0));
        assert!(!is_preferred::<C>(-1.0, 0.0));
    }

    #[test]
    fn test_is_preferred_monotonic() {
        let current = 500.0;
        let mut became_true = false;
        let mut a = current;
        while a >= 0.0 {
            let preferred = is_preferred::<C>(a, current);
            if became_true {
                assert!(preferred, "must stay preferred as candidate decreases");
            }
            became_true |= preferred;
            a -= 0.05;
        }
        assert!(became_true);
    }

    #[test]
    fn test_threshold_shrinks_with_current() {
        assert_eq!(improvement_threshold::<C>(10.0), 10.0);
        assert_eq!(improvement_threshold::<C>(1000.0), 0.3);
        assert!(improvement_threshold::<C>(0.0).is_infinite());
    }

    #[test]
    fn test_infinite_path_never_preferred() {
        let infinite = Metric::INFINITE.decode();
        assert!(!is_preferred::<C>(combine(infinite, 1.0), infinite));
        assert!(is_preferred::<C>(combine(0.0, 1.0), infinite));
    }
}
