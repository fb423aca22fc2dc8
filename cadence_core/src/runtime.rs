// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The context object that owns and wires every component.
//!
//! A [`Runtime`] is what a host embeds. The host calls:
//!
//! - [`frame`](Runtime::frame) from its repaint callback while
//!   [`is_running`](Runtime::is_running),
//! - [`timer_tick`](Runtime::timer_tick) from a coarse interval timer while
//!   [`timer_running`](Runtime::timer_running),
//! - [`flush`](Runtime::flush) whenever it honours a request taken from
//!   [`take_flush_request`](Runtime::take_flush_request).
//!
//! Everything else follows from those calls. Per-task costs, frame costs
//! and flush costs are fed to the [`PerformanceTracker`]; the
//! [`BudgetPolicy`] is polled on its own interval and its decisions are
//! broadcast on the [`EventBus`].

use std::rc::Rc;

use serde_json::Value;

use crate::batch::{FlushReport, FlushStrategy, TargetId, WriteBatcher, WriteOutcome};
use crate::capability::{CapabilityProbe, CapabilityReport, classify};
use crate::config::{RuntimeConfig, Setting};
use crate::error::{RegistryError, Result, TaskError};
use crate::events::{EventBus, RuntimeEvent, SubscriptionId};
use crate::perf::{BATCH_FLUSH, DeviceHints, FRAME, PROPERTY_WRITE, PerformanceTracker};
use crate::policy::{BudgetPolicy, OptimizationLevel};
use crate::registry::{PassReport, Registration};
use crate::scheduler::{FrameReport, LoopSignal, Scheduler};
use crate::surface::RenderSurface;
use crate::task::{FrameSignals, PerformanceMode, Priority, Task, TaskId};
use crate::time::{HostTime, TimeSource};
use crate::timer::TimerScheduler;

/// Owns the schedulers, the batcher, the tracker, and the policy.
#[derive(Debug)]
pub struct Runtime<S> {
    time: Rc<dyn TimeSource>,
    scheduler: Scheduler,
    timer: TimerScheduler,
    batcher: WriteBatcher<S>,
    tracker: PerformanceTracker,
    policy: BudgetPolicy,
    events: EventBus,
    signals: FrameSignals,
    pinned_mode: Option<PerformanceMode>,
    capabilities: Option<CapabilityReport>,
}

impl<S: RenderSurface> Runtime<S> {
    /// Builds a runtime writing to `surface`.
    pub fn new(config: RuntimeConfig, surface: S, time: Rc<dyn TimeSource>) -> Self {
        let RuntimeConfig {
            scheduler,
            timer,
            batch,
            tracker,
            policy,
        } = config;
        Self {
            scheduler: Scheduler::new(scheduler, Rc::clone(&time)),
            timer: TimerScheduler::new(timer, Rc::clone(&time)),
            batcher: WriteBatcher::new(surface, batch, Rc::clone(&time)),
            tracker: PerformanceTracker::new(tracker, Rc::clone(&time)),
            policy: BudgetPolicy::new(policy),
            events: EventBus::new(),
            signals: FrameSignals::default(),
            pinned_mode: None,
            capabilities: None,
            time,
        }
    }

    /// Classifies the device first and seeds `config` with the recommended
    /// quality preset.
    pub fn with_capabilities(
        config: RuntimeConfig,
        surface: S,
        time: Rc<dyn TimeSource>,
        probe: &mut dyn CapabilityProbe,
    ) -> Self {
        let report = classify(probe);
        let preset = report.recommend_quality();
        tracing::debug!(
            overall = ?report.overall,
            score = report.score,
            ?preset,
            "device classified"
        );
        let mut runtime = Self::new(config.with_preset(preset), surface, time);
        runtime.tracker.set_device_hints(DeviceHints {
            memory_gb: report.readings.memory_gb,
            logical_cores: report.readings.logical_cores,
            network: report.readings.network,
        });
        runtime.capabilities = Some(report);
        runtime
    }

    /// Registers a frame task.
    pub fn register(
        &mut self,
        id: impl Into<TaskId>,
        priority: Priority,
        target_rate: f64,
        task: impl Task + 'static,
    ) -> Result<LoopSignal> {
        Ok(self.scheduler.register(id, priority, target_rate, task)?)
    }

    /// Registers a frame task with full [`Registration`] parameters.
    pub fn register_with(&mut self, registration: Registration, task: Box<dyn Task>) -> Result<LoopSignal> {
        Ok(self.scheduler.register_with(registration, task)?)
    }

    /// Removes a frame task and its cost history.
    pub fn unregister(&mut self, id: impl Into<TaskId>) -> Result<LoopSignal> {
        let id = id.into();
        let signal = self.scheduler.unregister(id.clone())?;
        self.forget_task(&id);
        Ok(signal)
    }

    /// Registers a timer task.
    pub fn register_timer(
        &mut self,
        id: impl Into<TaskId>,
        priority: Priority,
        target_rate: f64,
        task: impl Task + 'static,
    ) -> Result<LoopSignal> {
        Ok(self.timer.register(id, priority, target_rate, task)?)
    }

    /// Removes a timer task and its cost history.
    pub fn unregister_timer(&mut self, id: impl Into<TaskId>) -> Result<LoopSignal> {
        let id = id.into();
        let signal = self.timer.unregister(id.clone())?;
        self.forget_task(&id);
        Ok(signal)
    }

    /// Enables or disables a task on whichever scheduler holds it.
    pub fn set_enabled(&mut self, id: impl Into<TaskId>, enabled: bool) -> Result<()> {
        let id = id.into();
        match self.scheduler.set_enabled(id.clone(), enabled) {
            Err(RegistryError::Unknown(_)) => Ok(self.timer.set_enabled(id, enabled)?),
            other => Ok(other?),
        }
    }

    /// Whether the host should be requesting frames.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Whether the host should be driving the timer tick.
    #[must_use]
    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Replaces the shared per-frame signals.
    pub fn set_signals(&mut self, signals: FrameSignals) {
        self.signals = signals;
    }

    /// Mutable access to the shared per-frame signals.
    pub fn signals_mut(&mut self) -> &mut FrameSignals {
        &mut self.signals
    }

    /// Runs one frame. Call from the host's repaint callback.
    pub fn frame(&mut self, now: HostTime) -> FrameReport {
        let report = self.scheduler.run_frame(now, &mut self.batcher, self.signals);

        self.tracker.record_frame(now);
        self.tracker.is_within_budget(FRAME, report.frame_cost_ms);
        if !report.flush.is_empty() {
            self.tracker
                .is_within_budget(BATCH_FLUSH, report.flush.duration.as_millis_f64());
        }
        self.record_pass(&report.tasks);

        if let Some(mode) = report.mode_change {
            let disabled = self.timer.set_mode(mode);
            self.publish_disabled(&disabled);
            self.events.publish(&RuntimeEvent::ModeChanged { mode });
        }
        self.maintain(now);
        report
    }

    /// Runs the timer scheduler if its tick interval has elapsed.
    pub fn timer_tick(&mut self, now: HostTime) -> Option<PassReport> {
        let pass = self.timer.poll(now, &mut self.batcher, self.signals)?;
        self.record_pass(&pass);
        self.maintain(now);
        Some(pass)
    }

    /// Applies every pending write now.
    pub fn flush(&mut self) -> FlushReport {
        let report = self.batcher.flush();
        if !report.is_empty() {
            self.tracker
                .is_within_budget(BATCH_FLUSH, report.duration.as_millis_f64());
        }
        report
    }

    /// The flush the host should schedule, if one was requested.
    pub fn take_flush_request(&mut self) -> Option<FlushStrategy> {
        self.batcher.take_flush_request()
    }

    /// Writes a property from outside any task, e.g. an input handler.
    ///
    /// Immediate writes are measured against the `property_write` budget.
    pub fn write(&mut self, property: &str, value: &str, target: Option<TargetId>) -> WriteOutcome {
        let start = self.time.now();
        let outcome = self.batcher.write(property, value, target);
        match &outcome {
            WriteOutcome::Bypassed | WriteOutcome::Direct => {
                let ms = self.time.now().saturating_duration_since(start).as_millis_f64();
                self.tracker.is_within_budget(PROPERTY_WRITE, ms);
            }
            WriteOutcome::Flushed(report) => {
                self.tracker
                    .is_within_budget(BATCH_FLUSH, report.duration.as_millis_f64());
            }
            WriteOutcome::Queued { .. } => {}
        }
        outcome
    }

    /// Applies a runtime settings change and broadcasts it.
    pub fn apply_setting(&mut self, key: &str, value: &Value) -> Result<()> {
        match Setting::parse(key, value)? {
            Setting::BatchMaxSize(size) => self.batcher.set_max_batch_size(size),
            Setting::BatchFlushIntervalMs(ms) => self.batcher.set_flush_interval_ms(ms),
            Setting::BatchEnabled(enabled) => self.batcher.set_enabled(enabled),
            Setting::Budget { operation, ms } => self.tracker.set_budget(&operation, ms)?,
            Setting::ViolationThreshold(n) => self.policy.config_mut().violation_threshold = n,
            Setting::RecoveryThreshold(n) => self.policy.config_mut().recovery_threshold = n,
            Setting::SchedulerMode(mode) => {
                self.pinned_mode = mode;
                if self.policy.level() != OptimizationLevel::Aggressive {
                    self.pin_mode(mode);
                }
            }
            Setting::TimeScale(scale) => {
                self.scheduler.clock_mut().set_time_scale(scale);
                self.timer.clock_mut().set_time_scale(scale);
            }
        }
        tracing::debug!(key, %value, "setting applied");
        self.events.publish(&RuntimeEvent::SettingChanged {
            key: key.to_owned(),
            value: value.clone(),
        });
        Ok(())
    }

    /// Adds an event listener.
    pub fn subscribe(&mut self, listener: impl FnMut(&RuntimeEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(listener)
    }

    /// Removes an event listener.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Whether a named feature is currently allowed to run.
    #[must_use]
    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        !self.policy.is_feature_disabled(feature)
    }

    /// The classification this runtime was seeded from, if any.
    #[must_use]
    pub fn capabilities(&self) -> Option<&CapabilityReport> {
        self.capabilities.as_ref()
    }

    /// The master scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Mutable access to the master scheduler.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// The timer scheduler.
    #[must_use]
    pub fn timer(&self) -> &TimerScheduler {
        &self.timer
    }

    /// The write batcher.
    #[must_use]
    pub fn batcher(&self) -> &WriteBatcher<S> {
        &self.batcher
    }

    /// Mutable access to the write batcher.
    pub fn batcher_mut(&mut self) -> &mut WriteBatcher<S> {
        &mut self.batcher
    }

    /// The performance tracker.
    #[must_use]
    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    /// Mutable access to the performance tracker (probe installation).
    pub fn tracker_mut(&mut self) -> &mut PerformanceTracker {
        &mut self.tracker
    }

    /// The budget policy.
    #[must_use]
    pub fn policy(&self) -> &BudgetPolicy {
        &self.policy
    }

    /// The time source every component reads.
    #[must_use]
    pub fn time(&self) -> &Rc<dyn TimeSource> {
        &self.time
    }

    fn record_pass(&mut self, pass: &PassReport) {
        for run in &pass.ran {
            self.tracker
                .is_within_budget(&task_operation(&run.id), run.cost_ms);
        }
        self.publish_disabled(&pass.disabled);
    }

    fn publish_disabled(&mut self, disabled: &[(TaskId, TaskError)]) {
        for (id, error) in disabled {
            self.events.publish(&RuntimeEvent::TaskDisabled {
                id: id.clone(),
                error: error.clone(),
            });
        }
    }

    fn forget_task(&mut self, id: &TaskId) {
        let op = task_operation(id);
        self.tracker.forget_operation(&op);
        self.policy.forget_operation(&op);
    }

    fn maintain(&mut self, now: HostTime) {
        self.tracker.poll(now);
        for event in self.policy.poll(now, &self.tracker, &mut self.batcher) {
            self.events.publish(&event);
            if let RuntimeEvent::LevelChanged { from, to } = event {
                if to == OptimizationLevel::Aggressive {
                    self.pin_mode(Some(PerformanceMode::Performance));
                } else if from == OptimizationLevel::Aggressive {
                    self.pin_mode(self.pinned_mode);
                }
            }
        }
    }

    fn pin_mode(&mut self, mode: Option<PerformanceMode>) {
        if let Some(switch) = self.scheduler.force_mode(mode) {
            let timer_disabled = self.timer.set_mode(switch.mode);
            self.publish_disabled(&switch.disabled);
            self.publish_disabled(&timer_disabled);
            self.events.publish(&RuntimeEvent::ModeChanged { mode: switch.mode });
        }
    }
}

fn task_operation(id: &TaskId) -> String {
    format!("task:{id}")
}
