// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Synchronized logical clock shared by every task of a scheduler.
//!
//! [`SharedClock`] turns raw frame timestamps into a logical timeline:
//!
//! ```text
//! current_time += (now - last_frame) * time_scale   (0 while paused)
//! ```
//!
//! Effects read time from the clock instead of the wall clock, so pausing or
//! slowing the clock freezes or slows every effect together, and periodic
//! helpers such as [`SharedClock::sin`] stay phase-locked across consumers.

use core::f64::consts::TAU;

use crate::time::HostTime;

/// A copy of the clock state taken after a tick.
///
/// Handed to tasks through [`FrameContext`](crate::task::FrameContext) so they
/// can compute phase-locked values without borrowing the scheduler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockSnapshot {
    /// Logical elapsed time in milliseconds.
    pub current_time_ms: f64,
    /// Logical delta of the last tick in milliseconds.
    pub delta_ms: f64,
    /// Ticks since the last reset.
    pub frame_count: u64,
    /// Current time scale.
    pub time_scale: f64,
    /// Whether the clock is paused.
    pub paused: bool,
}

impl ClockSnapshot {
    /// Normalized position within a cycle of `cycle_ms`, in `[0, 1)`.
    ///
    /// Returns `0.0` for non-positive or non-finite cycle lengths.
    #[must_use]
    pub fn phase(&self, cycle_ms: f64) -> f64 {
        phase_at(self.current_time_ms, cycle_ms)
    }

    /// Sine of the current phase within `cycle_ms`, in `[-1, 1]`.
    #[must_use]
    pub fn sin(&self, cycle_ms: f64) -> f64 {
        (self.phase(cycle_ms) * TAU).sin()
    }

    /// Cosine of the current phase within `cycle_ms`, in `[-1, 1]`.
    #[must_use]
    pub fn cos(&self, cycle_ms: f64) -> f64 {
        (self.phase(cycle_ms) * TAU).cos()
    }

    /// Breathing curve in `[0, 1]`: `0.5 + 0.5 * sin`.
    #[must_use]
    pub fn pulse(&self, cycle_ms: f64) -> f64 {
        0.5 + 0.5 * self.sin(cycle_ms)
    }
}

fn phase_at(time_ms: f64, cycle_ms: f64) -> f64 {
    if !cycle_ms.is_finite() || cycle_ms <= 0.0 {
        return 0.0;
    }
    time_ms.rem_euclid(cycle_ms) / cycle_ms
}

/// Logical clock advanced once per scheduler pass.
///
/// `current_time` never decreases while unpaused: a timestamp earlier than
/// the previous one contributes a zero delta rather than a negative one.
#[derive(Clone, Debug)]
pub struct SharedClock {
    start: Option<HostTime>,
    last_frame: Option<HostTime>,
    current_time_ms: f64,
    delta_ms: f64,
    frame_count: u64,
    time_scale: f64,
    paused: bool,
}

impl Default for SharedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedClock {
    /// Creates a clock at time zero with a time scale of 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start: None,
            last_frame: None,
            current_time_ms: 0.0,
            delta_ms: 0.0,
            frame_count: 0,
            time_scale: 1.0,
            paused: false,
        }
    }

    /// Advances the clock to `now` and returns the resulting snapshot.
    ///
    /// The first tick after construction or [`reset`](Self::reset) anchors
    /// the timeline and contributes no elapsed time.
    pub fn tick(&mut self, now: HostTime) -> ClockSnapshot {
        let raw_ms = match self.last_frame {
            Some(last) => now.saturating_duration_since(last).as_millis_f64(),
            None => {
                self.start = Some(now);
                0.0
            }
        };
        self.last_frame = Some(now.max(self.last_frame.unwrap_or(now)));

        self.delta_ms = if self.paused {
            0.0
        } else {
            raw_ms * self.time_scale
        };
        self.current_time_ms += self.delta_ms;
        self.frame_count += 1;
        self.snapshot()
    }

    /// Returns the current state without advancing.
    #[must_use]
    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            current_time_ms: self.current_time_ms,
            delta_ms: self.delta_ms,
            frame_count: self.frame_count,
            time_scale: self.time_scale,
            paused: self.paused,
        }
    }

    /// Logical elapsed time in milliseconds.
    #[must_use]
    pub fn current_time_ms(&self) -> f64 {
        self.current_time_ms
    }

    /// Logical delta of the last tick in milliseconds.
    #[must_use]
    pub fn delta_ms(&self) -> f64 {
        self.delta_ms
    }

    /// Ticks since the last reset.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Host time of the first tick since the last reset.
    #[must_use]
    pub fn start(&self) -> Option<HostTime> {
        self.start
    }

    /// Current time scale.
    #[must_use]
    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Sets the time scale. Negative values clamp to zero; non-finite values
    /// are ignored.
    pub fn set_time_scale(&mut self, scale: f64) {
        if scale.is_finite() {
            self.time_scale = scale.max(0.0);
        }
    }

    /// Freezes logical time. Ticks keep counting frames.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resumes logical time from where it was paused.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Whether the clock is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Restarts the timeline at zero. The time scale and pause flag are kept.
    pub fn reset(&mut self) {
        self.start = None;
        self.last_frame = None;
        self.current_time_ms = 0.0;
        self.delta_ms = 0.0;
        self.frame_count = 0;
    }

    /// Normalized position within a cycle of `cycle_ms`, in `[0, 1)`.
    #[must_use]
    pub fn phase(&self, cycle_ms: f64) -> f64 {
        self.snapshot().phase(cycle_ms)
    }

    /// Sine of the current phase within `cycle_ms`.
    #[must_use]
    pub fn sin(&self, cycle_ms: f64) -> f64 {
        self.snapshot().sin(cycle_ms)
    }

    /// Cosine of the current phase within `cycle_ms`.
    #[must_use]
    pub fn cos(&self, cycle_ms: f64) -> f64 {
        self.snapshot().cos(cycle_ms)
    }

    /// Breathing curve in `[0, 1]` within `cycle_ms`.
    #[must_use]
    pub fn pulse(&self, cycle_ms: f64) -> f64 {
        self.snapshot().pulse(cycle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> HostTime {
        HostTime(v * 1000)
    }

    #[test]
    fn first_tick_anchors_timeline() {
        let mut clock = SharedClock::new();
        let snap = clock.tick(ms(500));
        assert_eq!(snap.frame_count, 1);
        assert_eq!(snap.current_time_ms, 0.0);
        assert_eq!(clock.start(), Some(ms(500)));

        let snap = clock.tick(ms(516));
        assert!((snap.delta_ms - 16.0).abs() < 1e-9);
        assert!((snap.current_time_ms - 16.0).abs() < 1e-9);
    }

    #[test]
    fn current_time_is_monotonic_while_unpaused() {
        let mut clock = SharedClock::new();
        let stamps = [0, 16, 33, 20, 50, 50, 49, 100];
        let mut previous = 0.0;
        for s in stamps {
            let snap = clock.tick(ms(s));
            assert!(
                snap.current_time_ms >= previous,
                "time went backwards at {s}: {} < {previous}",
                snap.current_time_ms
            );
            previous = snap.current_time_ms;
        }
        assert!((previous - 100.0).abs() < 1e-9, "out-of-order stamps add nothing");
    }

    #[test]
    fn zero_time_scale_freezes_time() {
        let mut clock = SharedClock::new();
        clock.tick(ms(0));
        clock.tick(ms(16));
        let frozen = clock.current_time_ms();

        clock.set_time_scale(0.0);
        for i in 2..12 {
            clock.tick(ms(i * 16));
        }
        assert_eq!(clock.current_time_ms(), frozen);
        assert_eq!(clock.frame_count(), 12);
    }

    #[test]
    fn time_scale_rescales_delta() {
        let mut clock = SharedClock::new();
        clock.set_time_scale(0.5);
        clock.tick(ms(0));
        let snap = clock.tick(ms(20));
        assert!((snap.delta_ms - 10.0).abs() < 1e-9);

        clock.set_time_scale(-2.0);
        assert_eq!(clock.time_scale(), 0.0, "negative scale clamps to zero");
        clock.set_time_scale(f64::NAN);
        assert_eq!(clock.time_scale(), 0.0, "NaN is ignored");
    }

    #[test]
    fn pause_zeroes_delta_but_counts_frames() {
        let mut clock = SharedClock::new();
        clock.tick(ms(0));
        clock.tick(ms(10));
        clock.pause();
        let snap = clock.tick(ms(30));
        assert_eq!(snap.delta_ms, 0.0);
        assert!(snap.paused);
        assert_eq!(snap.frame_count, 3);
        assert!((snap.current_time_ms - 10.0).abs() < 1e-9);

        clock.resume();
        let snap = clock.tick(ms(40));
        assert!((snap.delta_ms - 10.0).abs() < 1e-9, "resume picks up from last frame");
    }

    #[test]
    fn reset_then_tick_starts_over() {
        let mut clock = SharedClock::new();
        for i in 0..5 {
            clock.tick(ms(i * 16));
        }
        clock.reset();
        let snap = clock.tick(ms(1_000));
        assert_eq!(snap.frame_count, 1);
        assert!(snap.current_time_ms.abs() < 1e-9);
    }

    #[test]
    fn phase_helpers_are_locked_to_logical_time() {
        let mut clock = SharedClock::new();
        clock.tick(ms(0));
        clock.tick(ms(250));
        assert!((clock.phase(1000.0) - 0.25).abs() < 1e-9);
        assert!((clock.sin(1000.0) - 1.0).abs() < 1e-9);
        assert!(clock.cos(1000.0).abs() < 1e-9);
        assert!((clock.pulse(1000.0) - 1.0).abs() < 1e-9);
        assert_eq!(clock.phase(0.0), 0.0, "degenerate cycle");

        clock.tick(ms(1_250));
        assert!((clock.phase(1000.0) - 0.25).abs() < 1e-9, "wraps every cycle");
    }
}
