//! One-shot protocol timers.
//!
//! Each timer is a single optional deadline. Arming overwrites the previous
//! deadline; there is no periodic mode. [`Timers::take_due`] clears a timer
//! before its callback runs, so a callback that does not re-arm stops it.

use crate::time::Timestamp;

/// The protocol's timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimerKind {
    /// Sink: start a new epoch. Other nodes: forward the parent's beacon.
    Beacon,
    /// Send the next topology report fragment.
    Report,
    /// Stale entry sweep.
    Cleanup,
}

const ALL: [TimerKind; 3] = [TimerKind::Beacon, TimerKind::Report, TimerKind::Cleanup];

#[derive(Clone, Debug, Default)]
pub struct Timers {
    deadlines: [Option<Timestamp>; 3],
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` for `at`, replacing any earlier deadline.
    pub fn set(&mut self, kind: TimerKind, at: Timestamp) {
        self.deadlines[kind as usize] = Some(at);
    }

    pub fn clear(&mut self, kind: TimerKind) {
        self.deadlines[kind as usize] = None;
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Timestamp> {
        self.deadlines[kind as usize]
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Disarm and return the earliest timer due at `now`. Ties fire in
    /// Beacon, Report, Cleanup order.
    pub fn take_due(&mut self, now: Timestamp) -> Option<TimerKind> {
        let kind = ALL
            .iter()
            .copied()
            .filter_map(|k| self.deadline(k).filter(|at| *at <= now).map(|at| (at, k)))
            .min()
            .map(|(_, k)| k)?;
        self.clear(kind);
        Some(kind)
    }
}
