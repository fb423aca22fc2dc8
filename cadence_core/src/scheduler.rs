// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Master frame scheduler with adaptive quality mode.
//!
//! The [`Scheduler`] owns the per-frame pass. Each call to
//! [`Scheduler::run_frame`]:
//!
//! 1. ticks the [`SharedClock`],
//! 2. runs due tasks in priority order against the current frame budget
//!    (see [`registry`](crate::registry) for the admission rules),
//! 3. flushes the [`WriteBatcher`] exactly once,
//! 4. measures the whole frame and feeds the quality-mode window.
//!
//! # Quality mode
//!
//! With [`ModePolicy::Adaptive`] the scheduler looks back over each
//! evaluation window (5 s by default). A high dropped-frame rate or a high
//! average frame cost switches to [`PerformanceMode::Performance`], which
//! shrinks the frame budget and stretches background intervals. A low drop
//! rate together with a low average cost switches back. Every switch is
//! delivered to each task through [`Task::on_mode_change`] and reported in
//! [`FrameReport::mode_change`].
//!
//! A mode can also be pinned with [`Scheduler::force_mode`]; while pinned the
//! window is still measured but never acted on.
//!
//! # Usage
//!
//! ```rust,ignore
//! scheduler.register("aurora", Priority::Normal, 30.0, aurora)?;
//! // In the host's frame callback:
//! let report = scheduler.run_frame(now, &mut batcher, signals);
//! ```

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::batch::{FlushReport, WriteBatcher};
use crate::clock::SharedClock;
use crate::error::{RegistryError, TaskError};
use crate::registry::{IntervalTuning, Pass, PassReport, Registration, TaskInfo, TaskRegistry};
use crate::stats::Ema;
use crate::surface::RenderSurface;
use crate::task::{FrameSignals, PerformanceMode, Priority, Task, TaskId};
use crate::time::{HostTime, TimeSource};

/// Controls how the scheduler switches [`PerformanceMode`].
///
/// Passed to the [`Scheduler`] via [`SchedulerConfig::mode_policy`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModePolicy {
    /// Switch automatically at the end of every evaluation window.
    Adaptive {
        /// Dropped-frame fraction above which performance mode is entered.
        degrade_drop_rate: f64,
        /// Average frame cost above which performance mode is entered.
        degrade_avg_ms: f64,
        /// Dropped-frame fraction below which quality mode may return.
        recover_drop_rate: f64,
        /// Average frame cost below which quality mode may return.
        recover_avg_ms: f64,
    },
    /// Stay in [`SchedulerConfig::initial_mode`] unless forced.
    ///
    /// Frame costs are still tracked, but the mode never changes on its own.
    Fixed,
}

impl Default for ModePolicy {
    fn default() -> Self {
        Self::Adaptive {
            degrade_drop_rate: 0.10,
            degrade_avg_ms: 20.0,
            recover_drop_rate: 0.02,
            recover_avg_ms: 10.0,
        }
    }
}

/// Configuration for the [`Scheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Task budget per frame in quality mode.
    pub quality_budget_ms: f64,
    /// Task budget per frame in performance mode.
    pub performance_budget_ms: f64,
    /// Frames costing more than this count as dropped.
    pub dropped_frame_ms: f64,
    /// Length of the mode evaluation window.
    pub evaluation_window_ms: f64,
    /// Interval multiplier for background tasks in performance mode.
    pub background_stretch: f64,
    /// EMA smoothing factor for the reported average frame cost.
    pub ema_alpha: f64,
    /// Mode at startup.
    pub initial_mode: PerformanceMode,
    /// Multiplier applied to every registered target rate.
    pub rate_scale: f64,
    /// Policy for switching modes.
    pub mode_policy: ModePolicy,
    /// Adaptive interval knobs.
    pub intervals: IntervalTuning,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quality_budget_ms: 16.0,
            performance_budget_ms: 12.0,
            dropped_frame_ms: 16.67,
            evaluation_window_ms: 5_000.0,
            background_stretch: 2.0,
            ema_alpha: 0.1,
            initial_mode: PerformanceMode::Quality,
            rate_scale: 1.0,
            mode_policy: ModePolicy::default(),
            intervals: IntervalTuning::default(),
        }
    }
}

/// Whether the host should start or stop its frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopSignal {
    /// The first task was registered; start requesting frames.
    Start,
    /// The last task was removed; stop requesting frames.
    Stop,
    /// Nothing to do.
    Unchanged,
}

/// Everything that happened in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    /// Clock frame number of this frame.
    pub frame: u64,
    /// Host timestamp the frame was run for.
    pub now: HostTime,
    /// Task pass details.
    pub tasks: PassReport,
    /// The end-of-frame batch flush.
    pub flush: FlushReport,
    /// Measured cost of the whole frame, flush included.
    pub frame_cost_ms: f64,
    /// Whether the frame cost exceeded the dropped-frame threshold.
    pub dropped: bool,
    /// Mode in effect after this frame.
    pub mode: PerformanceMode,
    /// Set when this frame switched modes.
    pub mode_change: Option<PerformanceMode>,
}

/// A mode change made through [`Scheduler::force_mode`].
#[derive(Clone, Debug, PartialEq)]
pub struct ModeSwitch {
    /// Mode now in effect.
    pub mode: PerformanceMode,
    /// Tasks disabled because their mode hook failed.
    pub disabled: Vec<(TaskId, TaskError)>,
}

impl FrameReport {
    /// Whether task cost exceeded the frame budget.
    #[must_use]
    pub fn over_budget(&self) -> bool {
        self.tasks.over_budget()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ModeWindow {
    started: Option<HostTime>,
    frames: u32,
    dropped: u32,
    cost_sum_ms: f64,
}

/// Master scheduler driven by the host's per-frame callback.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    registry: TaskRegistry,
    clock: SharedClock,
    mode: PerformanceMode,
    forced: Option<PerformanceMode>,
    time: Rc<dyn TimeSource>,
    window: ModeWindow,
    frame_cost: Ema,
    dropped_total: u64,
}

impl Scheduler {
    /// Creates a scheduler with no tasks.
    #[must_use]
    pub fn new(config: SchedulerConfig, time: Rc<dyn TimeSource>) -> Self {
        Self {
            registry: TaskRegistry::new(config.intervals),
            clock: SharedClock::new(),
            mode: config.initial_mode,
            forced: None,
            time,
            window: ModeWindow::default(),
            frame_cost: Ema::new(config.ema_alpha),
            dropped_total: 0,
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
        self.registry
            .register(registration, task, self.config.rate_scale)?;
        Ok(if was_empty {
            LoopSignal::Start
        } else {
            LoopSignal::Unchanged
        })
    }

    /// Removes a task. It will not run again.
    pub fn unregister(&mut self, id: impl Into<TaskId>) -> Result<LoopSignal, RegistryError> {
        self.registry.unregister(&id.into())?;
        Ok(if self.registry.is_empty() {
            LoopSignal::Stop
        } else {
            LoopSignal::Unchanged
        })
    }

    /// Enables or disables a task.
    pub fn set_enabled(&mut self, id: impl Into<TaskId>, enabled: bool) -> Result<(), RegistryError> {
        self.registry.set_enabled(&id.into(), enabled)
    }

    /// Whether any task is registered, i.e. whether frames are needed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.registry.is_empty()
    }

    /// Runs one frame: clock tick, task pass, and the batch flush.
    pub fn run_frame<S: RenderSurface>(
        &mut self,
        now: HostTime,
        batcher: &mut WriteBatcher<S>,
        signals: FrameSignals,
    ) -> FrameReport {
        let start = self.time.now();
        let clock = self.clock.tick(now);
        let pass = Pass {
            now,
            budget_ms: self.frame_budget_ms(),
            clock,
            mode: self.mode,
            signals,
            background_stretch: self.config.background_stretch,
            time: &*self.time,
        };
        let mut tasks = self.registry.run_pass(&pass, batcher);
        let flush = batcher.flush();

        let frame_cost_ms = self.time.now().saturating_duration_since(start).as_millis_f64();
        let dropped = frame_cost_ms > self.config.dropped_frame_ms;
        if tasks.over_budget() {
            tracing::debug!(
                frame = clock.frame_count,
                spent_ms = tasks.spent_ms,
                budget_ms = tasks.budget_ms,
                "frame over budget"
            );
        }

        let mode_change = self.observe_frame(now, frame_cost_ms, dropped);
        if let Some(mode) = mode_change {
            tasks.disabled.extend(self.switch_mode(mode, "adaptive"));
        }

        FrameReport {
            frame: clock.frame_count,
            now,
            tasks,
            flush,
            frame_cost_ms,
            dropped,
            mode: self.mode,
            mode_change,
        }
    }

    /// Pins the mode, or releases it to the policy with `None`.
    ///
    /// Returns the switch if this changed the mode. Tasks are notified of
    /// the change immediately; any whose hook fails are disabled and listed.
    pub fn force_mode(&mut self, mode: Option<PerformanceMode>) -> Option<ModeSwitch> {
        self.forced = mode;
        let target = mode?;
        if target == self.mode {
            return None;
        }
        let disabled = self.switch_mode(target, "forced");
        Some(ModeSwitch {
            mode: target,
            disabled,
        })
    }

    /// The pinned mode, if any.
    #[must_use]
    pub fn forced_mode(&self) -> Option<PerformanceMode> {
        self.forced
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> PerformanceMode {
        self.mode
    }

    /// Task budget for the current mode.
    #[must_use]
    pub fn frame_budget_ms(&self) -> f64 {
        match self.mode {
            PerformanceMode::Quality => self.config.quality_budget_ms,
            PerformanceMode::Performance => self.config.performance_budget_ms,
        }
    }

    /// Smoothed frame cost.
    #[must_use]
    pub fn average_frame_cost_ms(&self) -> f64 {
        self.frame_cost.get()
    }

    /// Frames whose cost exceeded the dropped-frame threshold.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_total
    }

    /// The shared clock.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Mutable access to the shared clock (pause, time scale, reset).
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

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn observe_frame(
        &mut self,
        now: HostTime,
        cost_ms: f64,
        dropped: bool,
    ) -> Option<PerformanceMode> {
        self.frame_cost.update(cost_ms);
        if dropped {
            self.dropped_total += 1;
        }

        let started = *self.window.started.get_or_insert(now);
        self.window.frames += 1;
        self.window.cost_sum_ms += cost_ms;
        if dropped {
            self.window.dropped += 1;
        }
        if now.saturating_duration_since(started).as_millis_f64() < self.config.evaluation_window_ms {
            return None;
        }

        let frames = f64::from(self.window.frames);
        let drop_rate = f64::from(self.window.dropped) / frames;
        let avg_ms = self.window.cost_sum_ms / frames;
        self.window = ModeWindow {
            started: Some(now),
            ..ModeWindow::default()
        };

        if self.forced.is_some() {
            return None;
        }
        let ModePolicy::Adaptive {
            degrade_drop_rate,
            degrade_avg_ms,
            recover_drop_rate,
            recover_avg_ms,
        } = self.config.mode_policy
        else {
            return None;
        };

        let target = match self.mode {
            PerformanceMode::Quality if drop_rate > degrade_drop_rate || avg_ms > degrade_avg_ms => {
                PerformanceMode::Performance
            }
            PerformanceMode::Performance
                if drop_rate < recover_drop_rate && avg_ms < recover_avg_ms =>
            {
                PerformanceMode::Quality
            }
            _ => return None,
        };
        tracing::debug!(drop_rate, avg_ms, "evaluation window closed");
        Some(target)
    }

    /// Switches mode and notifies every task. Returns tasks disabled by a
    /// panicking hook.
    fn switch_mode(
        &mut self,
        mode: PerformanceMode,
        reason: &'static str,
    ) -> Vec<(TaskId, TaskError)> {
        tracing::debug!(from = self.mode.as_str(), to = mode.as_str(), reason, "mode switch");
        self.mode = mode;
        // Frames of the old mode say nothing about the new one.
        self.window = ModeWindow::default();
        self.registry.notify_mode(mode)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::batch::{BatchConfig, StyleWriter, TargetId};
    use crate::surface::MemorySurface;
    use crate::task::FrameContext;
    use crate::time::ManualTimeSource;

    struct Fixture {
        time: ManualTimeSource,
        sched: Scheduler,
        batcher: WriteBatcher<MemorySurface>,
    }

    impl Fixture {
        fn new(config: SchedulerConfig) -> Self {
            let time = ManualTimeSource::new();
            let shared: Rc<dyn TimeSource> = Rc::new(time.clone());
            Self {
                sched: Scheduler::new(config, Rc::clone(&shared)),
                batcher: WriteBatcher::new(MemorySurface::new(), BatchConfig::default(), shared),
                time,
            }
        }

        fn frame(&mut self) -> FrameReport {
            let now = self.time.now();
            self.sched
                .run_frame(now, &mut self.batcher, FrameSignals::default())
        }
    }

    /// Costs a fixed amount and writes one property.
    struct Effect {
        time: ManualTimeSource,
        cost: Rc<RefCell<f64>>,
        property: &'static str,
        modes: Rc<RefCell<Vec<PerformanceMode>>>,
    }

    impl Effect {
        fn new(time: &ManualTimeSource, cost_ms: f64, property: &'static str) -> Self {
            Self {
                time: time.clone(),
                cost: Rc::new(RefCell::new(cost_ms)),
                property,
                modes: Rc::default(),
            }
        }
    }

    impl Task for Effect {
        fn tick(&mut self, frame: &FrameContext, out: &mut dyn StyleWriter) -> Result<(), TaskError> {
            self.time.advance_ms(*self.cost.borrow());
            out.enqueue(self.property, &frame.clock.frame_count.to_string(), None);
            Ok(())
        }

        fn on_mode_change(&mut self, mode: PerformanceMode) {
            self.modes.borrow_mut().push(mode);
        }
    }

    #[test]
    fn loop_starts_and_stops_with_registry() {
        let mut fx = Fixture::new(SchedulerConfig::default());
        assert!(!fx.sched.is_running());
        let first = fx
            .sched
            .register("a", Priority::Normal, 60.0, Effect::new(&fx.time, 0.0, "--fx-a"))
            .unwrap();
        assert_eq!(first, LoopSignal::Start);
        let second = fx
            .sched
            .register("b", Priority::Normal, 60.0, Effect::new(&fx.time, 0.0, "--fx-b"))
            .unwrap();
        assert_eq!(second, LoopSignal::Unchanged);
        assert_eq!(fx.sched.unregister("a").unwrap(), LoopSignal::Unchanged);
        assert_eq!(fx.sched.unregister("b").unwrap(), LoopSignal::Stop);
        assert!(!fx.sched.is_running());
    }

    #[test]
    fn frame_flushes_batch_exactly_once() {
        let mut fx = Fixture::new(SchedulerConfig::default());
        fx.sched
            .register("a", Priority::Normal, 60.0, Effect::new(&fx.time, 1.0, "--fx-a"))
            .unwrap();
        fx.sched
            .register("b", Priority::Normal, 60.0, Effect::new(&fx.time, 1.0, "--fx-b"))
            .unwrap();

        let report = fx.frame();
        assert_eq!(report.tasks.ran.len(), 2);
        assert_eq!(report.flush.writes, 2);
        assert_eq!(fx.batcher.stats().flushes, 1);
        assert_eq!(fx.batcher.pending_len(), 0, "nothing left after frame end");
        assert_eq!(
            fx.batcher.surface().property(TargetId::ROOT, "--fx-a"),
            Some("1")
        );
    }

    #[test]
    fn performance_mode_uses_the_smaller_budget() {
        let config = SchedulerConfig {
            initial_mode: PerformanceMode::Performance,
            ..SchedulerConfig::default()
        };
        let mut fx = Fixture::new(config);
        for name in ["n1", "n2", "n3"] {
            fx.sched
                .register(name, Priority::Normal, 60.0, Effect::new(&fx.time, 5.0, "--fx-n"))
                .unwrap();
        }
        fx.sched
            .register("bg", Priority::Background, 60.0, Effect::new(&fx.time, 1.0, "--fx-bg"))
            .unwrap();

        let report = fx.frame();
        assert_eq!(report.tasks.budget_ms, 12.0);
        assert_eq!(report.tasks.ran.len(), 3);
        assert!(report.over_budget());
        assert!(report.tasks.was_skipped("bg"));
        assert_eq!(fx.sched.task_info("bg").unwrap().skipped_frames, 1);
    }

    #[test]
    fn sustained_heavy_frames_switch_to_performance_and_back() {
        let mut fx = Fixture::new(SchedulerConfig::default());
        let effect = Effect::new(&fx.time, 25.0, "--fx-heavy");
        let cost = Rc::clone(&effect.cost);
        let modes = Rc::clone(&effect.modes);
        fx.sched
            .register("heavy", Priority::Critical, 60.0, effect)
            .unwrap();

        let mut switched = None;
        for _ in 0..400 {
            let report = fx.frame();
            fx.time.advance_ms(5.0);
            if report.mode_change.is_some() {
                switched = report.mode_change;
                break;
            }
        }
        assert_eq!(switched, Some(PerformanceMode::Performance));
        assert_eq!(fx.sched.mode(), PerformanceMode::Performance);
        assert_eq!(fx.sched.frame_budget_ms(), 12.0);
        assert_eq!(*modes.borrow(), [PerformanceMode::Performance], "task notified");

        *cost.borrow_mut() = 1.0;
        let mut recovered = None;
        for _ in 0..1_000 {
            let report = fx.frame();
            fx.time.advance_ms(16.0);
            if report.mode_change.is_some() {
                recovered = report.mode_change;
                break;
            }
        }
        assert_eq!(recovered, Some(PerformanceMode::Quality));
        assert_eq!(
            *modes.borrow(),
            [PerformanceMode::Performance, PerformanceMode::Quality]
        );
        assert!(fx.sched.dropped_frames() > 0);
    }

    #[test]
    fn fixed_policy_never_switches() {
        let config = SchedulerConfig {
            mode_policy: ModePolicy::Fixed,
            ..SchedulerConfig::default()
        };
        let mut fx = Fixture::new(config);
        fx.sched
            .register("heavy", Priority::Critical, 60.0, Effect::new(&fx.time, 30.0, "--fx-h"))
            .unwrap();
        for _ in 0..300 {
            assert!(fx.frame().mode_change.is_none());
            fx.time.advance_ms(5.0);
        }
        assert_eq!(fx.sched.mode(), PerformanceMode::Quality);
    }

    #[test]
    fn forced_mode_notifies_and_pins() {
        let mut fx = Fixture::new(SchedulerConfig::default());
        let effect = Effect::new(&fx.time, 0.0, "--fx-a");
        let modes = Rc::clone(&effect.modes);
        fx.sched.register("a", Priority::Normal, 60.0, effect).unwrap();

        let switch = fx.sched.force_mode(Some(PerformanceMode::Performance)).unwrap();
        assert_eq!(switch.mode, PerformanceMode::Performance);
        assert!(switch.disabled.is_empty(), "hook succeeded");
        assert_eq!(*modes.borrow(), [PerformanceMode::Performance]);

        // Cheap frames would normally recover quality mode.
        for _ in 0..400 {
            assert!(fx.frame().mode_change.is_none(), "pinned mode holds");
            fx.time.advance_ms(16.0);
        }
        assert_eq!(fx.sched.force_mode(None), None);
        assert_eq!(fx.sched.forced_mode(), None);
    }

    #[test]
    fn forced_switch_lists_tasks_whose_hook_panics() {
        struct Brittle;
        impl Task for Brittle {
            fn tick(&mut self, _: &FrameContext, _: &mut dyn StyleWriter) -> Result<(), TaskError> {
                Ok(())
            }
            fn on_mode_change(&mut self, _: PerformanceMode) {
                panic!("no low-power variant");
            }
        }

        let mut fx = Fixture::new(SchedulerConfig::default());
        fx.sched.register("brittle", Priority::Normal, 60.0, Brittle).unwrap();
        fx.sched
            .register("a", Priority::Normal, 60.0, Effect::new(&fx.time, 0.0, "--fx-a"))
            .unwrap();

        let switch = fx.sched.force_mode(Some(PerformanceMode::Performance)).unwrap();
        assert_eq!(switch.disabled.len(), 1);
        assert_eq!(switch.disabled[0].0, TaskId::from("brittle"));
        assert_eq!(
            switch.disabled[0].1,
            TaskError::Panicked("no low-power variant".into())
        );
        assert!(!fx.sched.task_info("brittle").unwrap().enabled);
        assert!(fx.sched.task_info("a").unwrap().enabled);
    }

    #[test]
    fn clock_pause_keeps_tasks_running_with_zero_delta() {
        let mut fx = Fixture::new(SchedulerConfig::default());
        let deltas = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&deltas);
        fx.sched
            .register(
                "probe",
                Priority::Normal,
                60.0,
                crate::task::from_fn(move |frame, _| {
                    seen.borrow_mut().push(frame.delta_ms);
                    Ok(())
                }),
            )
            .unwrap();
        fx.frame();
        fx.time.advance_ms(20.0);
        fx.sched.clock_mut().pause();
        fx.frame();
        assert_eq!(*deltas.borrow(), [0.0, 0.0]);
        assert_eq!(fx.sched.clock().frame_count(), 2);
    }
}
