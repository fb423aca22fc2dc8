// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Low-frequency timer scheduler.
//!
//! Runs the same registry and budget model as the master
//! [`Scheduler`](crate::scheduler::Scheduler), driven by a coarse fixed-rate
//! tick instead of the frame callback. Suited to work that must keep running
//! while the surface is hidden and frames stop (analysis smoothing, idle
//! drifts). It keeps its own clock.
//!
//! Timer passes do not flush the batcher; writes made here request their own
//! flush through [`WriteBatcher::take_flush_request`](crate::batch::WriteBatcher::take_flush_request).

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::batch::StyleWriter;
use crate::clock::SharedClock;
use crate::error::{RegistryError, TaskError};
use crate::registry::{IntervalTuning, Pass, PassReport, Registration, TaskInfo, TaskRegistry};
use crate::scheduler::LoopSignal;
use crate::task::{FrameSignals, PerformanceMode, Priority, Task, TaskId};
use crate::time::{Duration, HostTime, TimeSource};

/// Configuration for the [`TimerScheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Period of the driving tick.
    pub tick_interval_ms: f64,
    /// Task budget per tick.
    pub tick_budget_ms: f64,
    /// Interval multiplier for background tasks in performance mode.
    pub background_stretch: f64,
    /// Adaptive interval knobs.
    pub intervals: IntervalTuning,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50.0,
            tick_budget_ms: 10.0,
            background_stretch: 2.0,
            intervals: IntervalTuning::default(),
        }
    }
}

/// Fixed-rate scheduler for low-frequency tasks.
#[derive(Debug)]
pub struct TimerScheduler {
    config: TimerConfig,
    registry: TaskRegistry,
    clock: SharedClock,
    mode: PerformanceMode,
    time: Rc<dyn TimeSource>,
    last_tick: Option<HostTime>,
}

impl TimerScheduler {
    /// Creates a timer scheduler with no tasks.
    #[must_use]
    pub fn new(config: TimerConfig, time: Rc<dyn TimeSource>) -> Self {
        Self {
            registry: TaskRegistry::new(config.intervals),
            clock: SharedClock::new(),
            mode: PerformanceMode::Quality,
            time,
            last_tick: None,
            config,
        }
    }

    /// Registers a task.
    pub fn register(
        &mut self,
        id: impl Into<TaskId>,
        priority: Priority,
        target_rate: f64,
        task: impl Task + 'static,
    ) -> Result<LoopSignal, RegistryError> {
        self.register_with(Registration::new(id, priority, target_rate), Box::new(task))
    }

    /// Registers a task with full [`Registration`] parameters.
    pub fn register_with(
        &mut self,
        registration: Registration,
        task: Box<dyn Task>,
    ) -> Result<LoopSignal, RegistryError> {
        let was_empty = self.registry.is_empty();
        self.registry.register(registration, task, 1.0)?;
        Ok(if was_empty {
            LoopSignal::Start
        } else {
            LoopSignal::Unchanged
        })
    }

    /// Removes a task.
    pub fn unregister(&mut self, id: impl Into<TaskId>) -> Result<LoopSignal, RegistryError> {
        self.registry.unregister(&id.into())?;
        if self.registry.is_empty() {
            self.last_tick = None;
            return Ok(LoopSignal::Stop);
        }
        Ok(LoopSignal::Unchanged)
    }

    /// Enables or disables a task.
    pub fn set_enabled(&mut self, id: impl Into<TaskId>, enabled: bool) -> Result<(), RegistryError> {
        self.registry.set_enabled(&id.into(), enabled)
    }

    /// Whether any task is registered, i.e. whether the tick is needed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.registry.is_empty()
    }

    /// Period of the driving tick.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis_f64(self.config.tick_interval_ms)
    }

    /// Runs one pass unconditionally.
    pub fn tick(
        &mut self,
        now: HostTime,
        out: &mut dyn StyleWriter,
        signals: FrameSignals,
    ) -> PassReport {
        self.last_tick = Some(now);
        let clock = self.clock.tick(now);
        let pass = Pass {
            now,
            budget_ms: self.config.tick_budget_ms,
            clock,
            mode: self.mode,
            signals,
            background_stretch: self.config.background_stretch,
            time: &*self.time,
        };
        let report = self.registry.run_pass(&pass, out);
        if report.over_budget() {
            tracing::debug!(
                spent_ms = report.spent_ms,
                budget_ms = report.budget_ms,
                "timer tick over budget"
            );
        }
        report
    }

    /// Runs a pass if a tick interval has elapsed since the last one, less
    /// the registry's jitter tolerance so an early host timer still counts.
    pub fn poll(
        &mut self,
        now: HostTime,
        out: &mut dyn StyleWriter,
        signals: FrameSignals,
    ) -> Option<PassReport> {
        if !self.is_running() {
            return None;
        }
        if let Some(last) = self.last_tick {
            let due_ms = self.config.tick_interval_ms - self.config.intervals.jitter_tolerance_ms;
            if now.saturating_duration_since(last).as_millis_f64() < due_ms {
                return None;
            }
        }
        Some(self.tick(now, out, signals))
    }

    /// Follows the master scheduler's mode. Tasks are notified on change;
    /// returns those disabled because their hook failed.
    pub fn set_mode(&mut self, mode: PerformanceMode) -> Vec<(TaskId, TaskError)> {
        if mode == self.mode {
            return Vec::new();
        }
        self.mode = mode;
        self.registry.notify_mode(mode)
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> PerformanceMode {
        self.mode
    }

    /// The timer clock.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Mutable access to the timer clock.
    pub fn clock_mut(&mut self) -> &mut SharedClock {
        &mut self.clock
    }

    /// Snapshot of one task.
    #[must_use]
    pub fn task_info(&self, id: impl Into<TaskId>) -> Option<TaskInfo> {
        self.registry.info(&id.into())
    }

    /// Snapshots of every task in execution order.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.registry.infos()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::batch::TargetId;
    use crate::task::from_fn;
    use crate::time::ManualTimeSource;

    #[derive(Default)]
    struct Recorder(Vec<(String, String)>);

    impl StyleWriter for Recorder {
        fn enqueue(&mut self, property: &str, value: &str, _: Option<TargetId>) {
            self.0.push((property.to_owned(), value.to_owned()));
        }
    }

    fn timer() -> (TimerScheduler, ManualTimeSource) {
        let time = ManualTimeSource::new();
        let sched = TimerScheduler::new(TimerConfig::default(), Rc::new(time.clone()));
        (sched, time)
    }

    #[test]
    fn poll_respects_tick_interval() {
        let (mut sched, time) = timer();
        let mut out = Recorder::default();
        assert!(sched.poll(time.now(), &mut out, FrameSignals::default()).is_none(), "idle");

        sched
            .register(
                "drift",
                Priority::Normal,
                20.0,
                from_fn(|frame, out| {
                    out.enqueue("--fx-drift", &format!("{:.0}", frame.clock.current_time_ms), None);
                    Ok(())
                }),
            )
            .unwrap();

        assert!(sched.poll(time.now(), &mut out, FrameSignals::default()).is_some());
        time.advance_ms(30.0);
        assert!(sched.poll(time.now(), &mut out, FrameSignals::default()).is_none());
        time.advance_ms(20.0);
        assert!(sched.poll(time.now(), &mut out, FrameSignals::default()).is_some());
        assert_eq!(
            out.0,
            [
                ("--fx-drift".to_owned(), "0".to_owned()),
                ("--fx-drift".to_owned(), "50".to_owned())
            ],
            "the timer has its own clock"
        );
    }

    #[test]
    fn tick_budget_skips_background_work() {
        let (mut sched, time) = timer();
        let mut out = Recorder::default();
        for name in ["a", "b"] {
            let t = time.clone();
            sched
                .register(
                    name,
                    Priority::Normal,
                    20.0,
                    from_fn(move |_, _| {
                        t.advance_ms(6.0);
                        Ok(())
                    }),
                )
                .unwrap();
        }
        sched
            .register("idle", Priority::Background, 20.0, from_fn(|_, _| Ok(())))
            .unwrap();

        let report = sched.tick(time.now(), &mut out, FrameSignals::default());
        assert_eq!(report.budget_ms, 10.0);
        assert!(report.over_budget());
        assert!(report.was_skipped("idle"));
        assert_eq!(sched.task_info("idle").unwrap().skipped_frames, 1);
    }

    #[test]
    fn mode_changes_reach_tasks_once() {
        struct Watcher(Rc<RefCell<Vec<PerformanceMode>>>);
        impl Task for Watcher {
            fn tick(
                &mut self,
                _: &crate::task::FrameContext,
                _: &mut dyn StyleWriter,
            ) -> Result<(), crate::error::TaskError> {
                Ok(())
            }
            fn on_mode_change(&mut self, mode: PerformanceMode) {
                self.0.borrow_mut().push(mode);
            }
        }

        let (mut sched, _) = timer();
        let seen = Rc::new(RefCell::new(Vec::new()));
        sched
            .register("w", Priority::Normal, 1.0, Watcher(Rc::clone(&seen)))
            .unwrap();
        assert!(sched.set_mode(PerformanceMode::Performance).is_empty());
        assert!(sched.set_mode(PerformanceMode::Performance).is_empty());
        assert_eq!(*seen.borrow(), [PerformanceMode::Performance]);
    }

    #[test]
    fn failing_mode_hooks_are_reported() {
        struct Brittle;
        impl Task for Brittle {
            fn tick(
                &mut self,
                _: &crate::task::FrameContext,
                _: &mut dyn StyleWriter,
            ) -> Result<(), TaskError> {
                Ok(())
            }
            fn on_mode_change(&mut self, _: PerformanceMode) {
                panic!("no low-power variant");
            }
        }

        let (mut sched, _) = timer();
        sched.register("brittle", Priority::Normal, 1.0, Brittle).unwrap();
        let disabled = sched.set_mode(PerformanceMode::Performance);
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].0, TaskId::from("brittle"));
        assert!(!sched.task_info("brittle").unwrap().enabled);
    }

    #[test]
    fn slightly_early_ticks_still_run() {
        let (mut sched, time) = timer();
        let mut out = Recorder::default();
        sched
            .register("drift", Priority::Normal, 20.0, from_fn(|_, _| Ok(())))
            .unwrap();
        assert!(sched.poll(time.now(), &mut out, FrameSignals::default()).is_some());
        time.advance_ms(49.5);
        assert!(
            sched.poll(time.now(), &mut out, FrameSignals::default()).is_some(),
            "within the jitter tolerance"
        );
        time.advance_ms(48.0);
        assert!(sched.poll(time.now(), &mut out, FrameSignals::default()).is_none());
    }

    #[test]
    fn unregistering_last_task_stops_the_tick() {
        let (mut sched, _) = timer();
        sched
            .register("x", Priority::Normal, 1.0, from_fn(|_, _| Ok(())))
            .unwrap();
        assert_eq!(sched.unregister("x").unwrap(), LoopSignal::Stop);
        assert!(!sched.is_running());
        assert!(sched.unregister("x").is_err());
    }
}
