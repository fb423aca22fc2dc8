// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Task identity, priority, and the [`Task`] capability interface.
//!
//! Effect routines register a [`Task`] with a scheduler. The scheduler calls
//! [`Task::tick`] at most once per pass, handing it a [`FrameContext`] with
//! the synchronized clock and shared per-frame signals, plus a
//! [`StyleWriter`] through which all render-surface mutations must go.
//! Tasks that adapt their own workload implement
//! [`Task::on_mode_change`].

use core::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::batch::StyleWriter;
use crate::clock::ClockSnapshot;
use crate::error::TaskError;
use crate::time::HostTime;

/// Name of a registered task.
///
/// Cheap to clone; reports and errors carry copies.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Arc<str>);

impl TaskId {
    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({:?})", &*self.0)
    }
}

/// Scheduling tier. Lower tiers run first within a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Always runs, even when the budget is exhausted.
    Critical,
    /// Runs when due; may push the pass over budget.
    Normal,
    /// Skipped whenever the remaining budget cannot cover it.
    Background,
}

/// Global quality mode chosen by the master scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    /// Full frame budget and ideal task intervals.
    #[default]
    Quality,
    /// Reduced frame budget and stretched background intervals.
    Performance,
}

impl PerformanceMode {
    /// Lowercase name, as used in settings and broadcast events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Performance => "performance",
        }
    }

    /// Parses `"quality"` or `"performance"`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "quality" => Some(Self::Quality),
            "performance" => Some(Self::Performance),
            _ => None,
        }
    }
}

/// Externally supplied per-frame signals shared by every task.
///
/// The music-analysis pipeline and the page host update these between
/// frames; the scheduler copies them into each [`FrameContext`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameSignals {
    /// Scroll position as a fraction of the scrollable range, `0.0..=1.0`.
    pub scroll_ratio: f64,
    /// Current beat intensity, `0.0..=1.0`.
    pub beat_intensity: f64,
}

/// Everything a task sees when it is ticked.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext {
    /// Host time of the pass.
    pub now: HostTime,
    /// Logical clock delta for this pass, in milliseconds (zero while paused).
    pub delta_ms: f64,
    /// Wall time since this task last ran, in milliseconds (zero on its first run).
    pub since_last_run_ms: f64,
    /// Clock state after this pass's tick.
    pub clock: ClockSnapshot,
    /// Mode the scheduler is currently in.
    pub mode: PerformanceMode,
    /// Shared external signals.
    pub signals: FrameSignals,
}

/// A unit of periodic work registered with a scheduler.
pub trait Task {
    /// Performs one update. All render-surface writes go through `out`.
    ///
    /// Returning an error disables the task for the rest of the session.
    fn tick(&mut self, frame: &FrameContext, out: &mut dyn StyleWriter) -> Result<(), TaskError>;

    /// Called when the master scheduler switches [`PerformanceMode`].
    fn on_mode_change(&mut self, mode: PerformanceMode) {
        _ = mode;
    }
}

/// A [`Task`] built from a closure. See [`from_fn`].
pub struct FnTask<F>(F);

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").finish_non_exhaustive()
    }
}

/// Wraps a closure as a [`Task`] without a mode-change hook.
///
/// ```
/// use cadence_core::task::{from_fn, Task};
///
/// let mut task = from_fn(|frame, out| {
///     let glow = frame.clock.pulse(2_000.0);
///     out.enqueue("--fx-glow", &format!("{glow:.3}"), None);
///     Ok(())
/// });
/// # let _ = &mut task;
/// ```
pub fn from_fn<F>(f: F) -> FnTask<F>
where
    F: FnMut(&FrameContext, &mut dyn StyleWriter) -> Result<(), TaskError>,
{
    FnTask(f)
}

impl<F> Task for FnTask<F>
where
    F: FnMut(&FrameContext, &mut dyn StyleWriter) -> Result<(), TaskError>,
{
    fn tick(&mut self, frame: &FrameContext, out: &mut dyn StyleWriter) -> Result<(), TaskError> {
        (self.0)(frame, out)
    }
}
