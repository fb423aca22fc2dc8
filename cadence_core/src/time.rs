// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic host time and time sources.
//!
//! [`HostTime`] represents a point in time as monotonic microsecond ticks.
//! [`Duration`] is a span in the same units. Both are plain integers so that
//! comparisons and arithmetic are exact; conversions to and from fractional
//! milliseconds are provided because budgets and rates are expressed in
//! milliseconds throughout the crate.
//!
//! [`TimeSource`] abstracts "what time is it now". The scheduler, batcher,
//! and tracker all measure wall-clock cost through a shared source, which
//! makes every timing decision reproducible under [`ManualTimeSource`].

use core::cell::Cell;
use core::fmt;
use core::ops::{Add, Sub};
use std::rc::Rc;
use std::time::Instant;

/// Microsecond ticks per millisecond.
const TICKS_PER_MS: f64 = 1000.0;

/// A point in time expressed as monotonic microsecond ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub u64);

impl HostTime {
    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Creates a host time from fractional milliseconds.
    ///
    /// Negative and non-finite inputs clamp to zero.
    #[inline]
    #[must_use]
    pub fn from_millis_f64(ms: f64) -> Self {
        Self(millis_to_ticks(ms))
    }

    /// Returns this time as fractional milliseconds.
    #[inline]
    #[must_use]
    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_MS
    }

    /// Returns the duration between `self` and an earlier time, or zero if
    /// `earlier` is after `self`.
    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Checked addition of a duration.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, duration: Duration) -> Option<Self> {
        match self.0.checked_add(duration.0) {
            Some(t) => Some(Self(t)),
            None => None,
        }
    }
}

impl Add<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for HostTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({}us)", self.0)
    }
}

/// A duration in microsecond ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub u64);

impl Duration {
    /// A zero-length duration.
    pub const ZERO: Self = Self(0);

    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Creates a duration from whole milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1000))
    }

    /// Creates a duration from whole seconds.
    #[inline]
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000))
    }

    /// Creates a duration from fractional milliseconds.
    ///
    /// Negative and non-finite inputs clamp to zero.
    #[inline]
    #[must_use]
    pub fn from_millis_f64(ms: f64) -> Self {
        Self(millis_to_ticks(ms))
    }

    /// Returns this duration as fractional milliseconds.
    #[inline]
    #[must_use]
    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_MS
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Add for Duration {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl Sub for Duration {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({}us)", self.0)
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "input is clamped to a finite non-negative value before the cast"
)]
fn millis_to_ticks(ms: f64) -> u64 {
    if !ms.is_finite() || ms <= 0.0 {
        return 0;
    }
    (ms * TICKS_PER_MS).round() as u64
}

/// Reads the current monotonic time.
///
/// Every component that measures cost holds an `Rc<dyn TimeSource>`; they
/// all share one source so measurements are mutually consistent.
pub trait TimeSource {
    /// Returns the current time.
    fn now(&self) -> HostTime;
}

impl fmt::Debug for dyn TimeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeSource").field("now", &self.now()).finish()
    }
}

/// A [`TimeSource`] backed by [`std::time::Instant`].
///
/// Times are reported relative to the moment the source was created.
#[derive(Clone, Copy, Debug)]
pub struct StdTimeSource {
    origin: Instant,
}

impl StdTimeSource {
    /// Creates a source whose zero point is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for StdTimeSource {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u64 microseconds covers over 500,000 years of uptime"
    )]
    fn now(&self) -> HostTime {
        HostTime(self.origin.elapsed().as_micros() as u64)
    }
}

/// A manually advanced [`TimeSource`].
///
/// Clones share the same underlying time, so a handle kept by a test (or by a
/// simulated task) can advance the clock seen by the scheduler. Time never
/// moves on its own.
///
/// ```
/// use cadence_core::time::{Duration, ManualTimeSource, TimeSource};
///
/// let time = ManualTimeSource::new();
/// let seen_by_scheduler = time.clone();
/// time.advance(Duration::from_millis(16));
/// assert_eq!(seen_by_scheduler.now().ticks(), 16_000);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ManualTimeSource {
    now: Rc<Cell<u64>>,
}

impl ManualTimeSource {
    /// Creates a source starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by.0));
    }

    /// Moves time forward by fractional milliseconds.
    pub fn advance_ms(&self, ms: f64) {
        self.advance(Duration::from_millis_f64(ms));
    }

    /// Jumps to `to`. Moving backwards is ignored; the source stays monotonic.
    pub fn set(&self, to: HostTime) {
        if to.0 > self.now.get() {
            self.now.set(to.0);
        }
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> HostTime {
        HostTime(self.now.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_conversions() {
        assert_eq!(Duration::from_millis_f64(16.67).ticks(), 16_670);
        assert_eq!(Duration::from_millis(2).ticks(), 2_000);
        assert_eq!(Duration::from_secs(5).ticks(), 5_000_000);
        assert!((Duration(1_500).as_millis_f64() - 1.5).abs() < 1e-9);
        assert_eq!(HostTime::from_millis_f64(1.0), HostTime(1_000));
    }

    #[test]
    fn invalid_millis_clamp_to_zero() {
        assert_eq!(Duration::from_millis_f64(-3.0), Duration::ZERO);
        assert_eq!(Duration::from_millis_f64(f64::NAN), Duration::ZERO);
        assert_eq!(Duration::from_millis_f64(f64::INFINITY), Duration::ZERO);
    }

    #[test]
    fn host_time_duration_ops() {
        let t = HostTime(1000);
        let d = Duration(200);
        assert_eq!((t + d).ticks(), 1200);
        assert_eq!(t.saturating_duration_since(HostTime(1500)), Duration::ZERO);
        assert_eq!(t - HostTime(400), Duration(600));
        assert_eq!(Duration(100) - Duration(300), Duration::ZERO, "saturates");
    }

    #[test]
    fn manual_source_is_shared_and_monotonic() {
        let time = ManualTimeSource::new();
        let other = time.clone();
        time.advance_ms(2.5);
        assert_eq!(other.now(), HostTime(2_500));

        other.set(HostTime(1_000));
        assert_eq!(time.now(), HostTime(2_500), "set never moves backwards");

        other.set(HostTime(9_000));
        assert_eq!(time.now(), HostTime(9_000));
    }

    #[test]
    fn std_source_does_not_go_backwards() {
        let time = StdTimeSource::new();
        let a = time.now();
        let b = time.now();
        assert!(b >= a, "Instant-based source must be monotonic");
    }
}
