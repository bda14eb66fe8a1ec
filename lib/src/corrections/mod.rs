//! The correction routines the scheduler interleaves with acquisitions, and
//! the counters that decide when each one is due.

pub mod drift;
pub mod emission;
pub mod focus;

use crate::error::Result;
use crate::hardware::SharedMicroscope;
use crate::Match;

/// A limit, a running value and the comparison that must keep holding.
///
/// The counter fires exactly when the comparison stops holding: a scan
/// counter in [`Match::NoHigher`] mode fires once more scans than the limit
/// have run, the emission counter in [`Match::NoLower`] mode fires when the
/// reading sags below its floor.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionCounter {
    limit: f64,
    current: f64,
    mode: Match,
}

impl CorrectionCounter {
    /// Creates a counter with a starting value.
    pub fn new(limit: f64, mode: Match, start: f64) -> CorrectionCounter {
        CorrectionCounter {
            limit,
            current: start,
            mode,
        }
    }

    /// The configured limit.
    #[inline]
    pub fn limit(&self) -> f64 {
        self.limit
    }

    /// The running value.
    #[inline]
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Replaces the limit.
    pub fn set_limit(&mut self, limit: f64) {
        self.limit = limit;
    }

    /// Replaces the running value.
    pub fn set_current(&mut self, current: f64) {
        self.current = current;
    }

    /// Adds to the running value.
    pub fn increase(&mut self, by: f64) {
        self.current += by;
    }

    /// Subtracts from the running value.
    pub fn decrease(&mut self, by: f64) {
        self.current -= by;
    }

    /// Whether the counter needs a reset, i.e. the comparison no longer
    /// holds.
    pub fn needs_reset(&self) -> bool {
        !self.mode.compare(self.current, self.limit)
    }
}

/// What a correction run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionOutcome {
    /// The routine ran; nothing for the scheduler to apply.
    Ran,
    /// The routine decided it had nothing to do.
    Skipped,
    /// A stage translation every pending region must be shifted by.
    Shift {
        /// Horizontal shift in survey pixels.
        dx: i32,
        /// Vertical shift in survey pixels.
        dy: i32,
    },
}

/// One correction routine as the scheduler sees it: asked before every scan
/// whether it needs to run, told after every scan that one happened.
pub trait Correction: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the correction needs to run now.
    fn query(&mut self) -> bool;

    /// Runs the correction. The scheduler holds off scanning for the
    /// duration, so the routine has exclusive hardware access.
    fn run(&mut self, mic: &SharedMicroscope) -> Result<CorrectionOutcome>;

    /// Notification that one acquisition completed.
    fn scan_performed(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_counter_fires_past_the_limit() {
        let mut counter = CorrectionCounter::new(3.0, Match::NoHigher, 0.0);
        for _ in 0..3 {
            counter.increase(1.0);
            assert!(!counter.needs_reset());
        }
        counter.increase(1.0);
        assert!(counter.needs_reset());
        counter.set_current(0.0);
        assert!(!counter.needs_reset());
    }

    #[test]
    fn emission_counter_fires_below_the_floor() {
        let mut counter = CorrectionCounter::new(3.5, Match::NoLower, 4.5);
        assert!(!counter.needs_reset());
        counter.decrease(0.9);
        assert!(!counter.needs_reset());
        counter.decrease(0.2);
        assert!(counter.needs_reset());
    }

    #[test]
    fn exact_counter_fires_on_any_mismatch() {
        let counter = CorrectionCounter::new(2.0, Match::Exact, 2.0);
        assert!(!counter.needs_reset());
        let drifted = CorrectionCounter::new(2.0, Match::Exact, 2.5);
        assert!(drifted.needs_reset());
    }

    #[test]
    fn match_signs() {
        assert_eq!(Match::NoLower.sign(), ">=");
        assert_eq!(Match::Exact.sign(), "==");
        assert_eq!(Match::NoHigher.sign(), "<=");
    }
}
