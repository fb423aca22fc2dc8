// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Priority-ordered task registry and the budgeted pass shared by the
//! master and timer schedulers.
//!
//! A pass walks the registry in priority order (critical, normal,
//! background; registration order within a tier) and spends a fixed
//! millisecond budget:
//!
//! 1. Disabled tasks are skipped.
//! 2. Tasks whose interval has not elapsed since their last run are skipped.
//! 3. Background tasks are skipped, and their skip counter bumped, when the
//!    budget is exhausted or their expected cost does not fit what remains.
//! 4. Everything else runs. Cost is measured through the shared
//!    [`TimeSource`] and subtracted from the budget.
//!
//! Critical and normal tasks always run when due, even past the budget; such
//! runs are flagged as over budget rather than dropped.
//!
//! Every [`IntervalTuning::adjust_period_ms`] each task's interval is
//! revisited: persistent violators (cost above their own interval) are
//! widened, cheap tasks that were widened earlier are narrowed back towards
//! their ideal interval.

use core::any::Any;
use core::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::batch::StyleWriter;
use crate::clock::ClockSnapshot;
use crate::error::{RegistryError, TaskError};
use crate::stats::SampleWindow;
use crate::task::{FrameContext, FrameSignals, PerformanceMode, Priority, Task, TaskId};
use crate::time::{HostTime, TimeSource};

/// Knobs for adaptive interval adjustment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalTuning {
    /// How often each task's interval is revisited.
    pub adjust_period_ms: f64,
    /// Consecutive over-interval runs that trigger widening.
    pub violation_streak: u32,
    /// Multiplier applied when widening.
    pub widen_factor: f64,
    /// Upper bound for widened intervals.
    pub max_interval_ms: f64,
    /// Multiplier applied when narrowing.
    pub narrow_factor: f64,
    /// Average cost must stay below this fraction of the remaining budget
    /// before a task is narrowed.
    pub narrow_headroom: f64,
    /// Slack subtracted from a task's interval when deciding whether it is
    /// due, absorbing frame timestamp jitter.
    pub jitter_tolerance_ms: f64,
    /// Number of cost samples kept per task.
    pub cost_history: usize,
}

impl Default for IntervalTuning {
    fn default() -> Self {
        Self {
            adjust_period_ms: 2_000.0,
            violation_streak: 3,
            widen_factor: 1.5,
            max_interval_ms: 1_000.0,
            narrow_factor: 0.8,
            narrow_headroom: 0.5,
            jitter_tolerance_ms: 1.0,
            cost_history: 20,
        }
    }
}

/// Parameters for registering a task.
#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    /// Unique name.
    pub id: TaskId,
    /// Scheduling tier.
    pub priority: Priority,
    /// Desired update rate in hertz.
    pub target_rate: f64,
    /// Cost assumed before the task has run at all, in milliseconds.
    pub cost_estimate_ms: Option<f64>,
}

impl Registration {
    /// Creates a registration without a cost estimate.
    pub fn new(id: impl Into<TaskId>, priority: Priority, target_rate: f64) -> Self {
        Self {
            id: id.into(),
            priority,
            target_rate,
            cost_estimate_ms: None,
        }
    }

    /// Seeds the expected cost used for background admission until the
    /// task has measured history of its own.
    #[must_use]
    pub fn with_cost_estimate(mut self, ms: f64) -> Self {
        self.cost_estimate_ms = Some(ms.max(0.0));
        self
    }
}

/// Read-only snapshot of one registered task.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskInfo {
    /// Task name.
    pub id: TaskId,
    /// Scheduling tier.
    pub priority: Priority,
    /// Requested rate in hertz.
    pub target_rate: f64,
    /// Interval implied by the target rate (and any rate scale).
    pub ideal_interval_ms: f64,
    /// Current, possibly widened, interval.
    pub interval_ms: f64,
    /// Mean of the recent cost history.
    pub average_cost_ms: Option<f64>,
    /// Passes in which the task was skipped for lack of budget.
    pub skipped_frames: u64,
    /// Completed runs.
    pub run_count: u64,
    /// Whether the task is eligible to run.
    pub enabled: bool,
    /// Host time of the last run.
    pub last_run: Option<HostTime>,
}

/// One task invocation within a pass.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskRun {
    /// Task that ran.
    pub id: TaskId,
    /// Measured wall-clock cost.
    pub cost_ms: f64,
    /// The task ran after the pass budget was already exhausted.
    pub over_budget: bool,
}

/// An interval adjustment made during a pass.
#[derive(Clone, Debug, PartialEq)]
pub struct IntervalChange {
    /// Adjusted task.
    pub id: TaskId,
    /// Interval before the adjustment.
    pub from_ms: f64,
    /// Interval after the adjustment.
    pub to_ms: f64,
}

/// Outcome of one budgeted pass over the registry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassReport {
    /// Tasks that ran, in execution order.
    pub ran: Vec<TaskRun>,
    /// Background tasks skipped for lack of budget.
    pub skipped: Vec<TaskId>,
    /// Tasks that were not due yet.
    pub rate_limited: usize,
    /// Tasks disabled by an error or panic during this pass.
    pub disabled: Vec<(TaskId, TaskError)>,
    /// Interval adjustments made during this pass.
    pub interval_changes: Vec<IntervalChange>,
    /// Budget the pass started with.
    pub budget_ms: f64,
    /// Total measured task cost.
    pub spent_ms: f64,
}

impl PassReport {
    /// Whether task cost exceeded the pass budget.
    #[must_use]
    pub fn over_budget(&self) -> bool {
        self.spent_ms > self.budget_ms
    }

    /// Whether the named task ran in this pass.
    #[must_use]
    pub fn did_run(&self, id: &str) -> bool {
        self.ran.iter().any(|r| r.id.as_str() == id)
    }

    /// Whether the named task was skipped for lack of budget.
    #[must_use]
    pub fn was_skipped(&self, id: &str) -> bool {
        self.skipped.iter().any(|s| s.as_str() == id)
    }
}

/// Inputs to one pass.
#[derive(Clone, Copy)]
pub(crate) struct Pass<'a> {
    pub(crate) now: HostTime,
    pub(crate) budget_ms: f64,
    pub(crate) clock: ClockSnapshot,
    pub(crate) mode: PerformanceMode,
    pub(crate) signals: FrameSignals,
    /// Interval multiplier for background tasks in performance mode.
    pub(crate) background_stretch: f64,
    pub(crate) time: &'a dyn TimeSource,
}

struct RegisteredTask {
    id: TaskId,
    priority: Priority,
    target_rate: f64,
    ideal_interval_ms: f64,
    interval_ms: f64,
    last_run: Option<HostTime>,
    enabled: bool,
    costs: SampleWindow,
    cost_estimate_ms: Option<f64>,
    consecutive_over: u32,
    last_adjustment: Option<HostTime>,
    skipped_frames: u64,
    run_count: u64,
    task: Box<dyn Task>,
}

impl RegisteredTask {
    fn expected_cost_ms(&self) -> f64 {
        self.costs
            .mean()
            .or(self.cost_estimate_ms)
            .unwrap_or(0.0)
    }

    fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id.clone(),
            priority: self.priority,
            target_rate: self.target_rate,
            ideal_interval_ms: self.ideal_interval_ms,
            interval_ms: self.interval_ms,
            average_cost_ms: self.costs.mean(),
            skipped_frames: self.skipped_frames,
            run_count: self.run_count,
            enabled: self.enabled,
            last_run: self.last_run,
        }
    }

    fn record_cost(&mut self, cost_ms: f64) {
        self.costs.push(cost_ms);
        if cost_ms > self.interval_ms {
            self.consecutive_over += 1;
        } else {
            self.consecutive_over = 0;
        }
    }

    /// Revisits the interval if the adjustment period has elapsed.
    fn maybe_adjust(
        &mut self,
        now: HostTime,
        remaining_ms: f64,
        tuning: &IntervalTuning,
    ) -> Option<IntervalChange> {
        let last = *self.last_adjustment.get_or_insert(now);
        if now.saturating_duration_since(last).as_millis_f64() < tuning.adjust_period_ms {
            return None;
        }
        self.last_adjustment = Some(now);

        let from = self.interval_ms;
        if self.consecutive_over >= tuning.violation_streak {
            // Never shrinks: the cap only bounds growth.
            let cap = tuning.max_interval_ms.max(from);
            self.interval_ms = (from * tuning.widen_factor).min(cap);
            self.consecutive_over = 0;
        } else if from > self.ideal_interval_ms {
            if let Some(avg) = self.costs.mean() {
                if avg < remaining_ms * tuning.narrow_headroom && avg < from {
                    self.interval_ms = (from * tuning.narrow_factor).max(self.ideal_interval_ms);
                }
            }
        }

        (self.interval_ms != from).then(|| IntervalChange {
            id: self.id.clone(),
            from_ms: from,
            to_ms: self.interval_ms,
        })
    }
}

/// Priority-ordered set of tasks with per-task timing state.
pub struct TaskRegistry {
    tasks: Vec<RegisteredTask>,
    tuning: IntervalTuning,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.iter().map(|t| &t.id).collect::<Vec<_>>())
            .field("tuning", &self.tuning)
            .finish()
    }
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(tuning: IntervalTuning) -> Self {
        Self {
            tasks: Vec::new(),
            tuning,
        }
    }

    /// Adds a task. Target rates are multiplied by `rate_scale` before the
    /// ideal interval is derived.
    pub fn register(
        &mut self,
        registration: Registration,
        task: Box<dyn Task>,
        rate_scale: f64,
    ) -> Result<(), RegistryError> {
        let Registration {
            id,
            priority,
            target_rate,
            cost_estimate_ms,
        } = registration;
        if self.contains(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        let scaled = target_rate * rate_scale;
        if !target_rate.is_finite() || !scaled.is_finite() || scaled <= 0.0 {
            return Err(RegistryError::InvalidRate {
                id,
                rate: target_rate,
            });
        }

        let ideal = 1_000.0 / scaled;
        let entry = RegisteredTask {
            id,
            priority,
            target_rate,
            ideal_interval_ms: ideal,
            interval_ms: ideal,
            last_run: None,
            enabled: true,
            costs: SampleWindow::new(self.tuning.cost_history),
            cost_estimate_ms,
            consecutive_over: 0,
            last_adjustment: None,
            skipped_frames: 0,
            run_count: 0,
            task,
        };
        // Insert after every task of the same or a higher tier.
        let at = self.tasks.partition_point(|t| t.priority <= priority);
        self.tasks.insert(at, entry);
        Ok(())
    }

    /// Removes a task and hands it back.
    pub fn unregister(&mut self, id: &TaskId) -> Result<Box<dyn Task>, RegistryError> {
        let idx = self
            .position(id)
            .ok_or_else(|| RegistryError::Unknown(id.clone()))?;
        Ok(self.tasks.remove(idx).task)
    }

    /// Enables or disables a task. Re-enabling clears its violation streak.
    pub fn set_enabled(&mut self, id: &TaskId, enabled: bool) -> Result<(), RegistryError> {
        let idx = self
            .position(id)
            .ok_or_else(|| RegistryError::Unknown(id.clone()))?;
        let entry = &mut self.tasks[idx];
        entry.enabled = enabled;
        if enabled {
            entry.consecutive_over = 0;
        }
        Ok(())
    }

    /// Whether a task with this id is registered.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.position(id).is_some()
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no tasks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of one task.
    #[must_use]
    pub fn info(&self, id: &TaskId) -> Option<TaskInfo> {
        self.position(id).map(|idx| self.tasks[idx].info())
    }

    /// Snapshots of every task in execution order.
    #[must_use]
    pub fn infos(&self) -> Vec<TaskInfo> {
        self.tasks.iter().map(RegisteredTask::info).collect()
    }

    /// Ids in execution order.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> + '_ {
        self.tasks.iter().map(|t| &t.id)
    }

    /// Interval tuning in effect.
    #[must_use]
    pub fn tuning(&self) -> &IntervalTuning {
        &self.tuning
    }

    /// Calls [`Task::on_mode_change`] on every enabled task. A task that
    /// panics in its hook is disabled.
    pub fn notify_mode(&mut self, mode: PerformanceMode) -> Vec<(TaskId, TaskError)> {
        let mut disabled = Vec::new();
        for entry in self.tasks.iter_mut().filter(|t| t.enabled) {
            let task = entry.task.as_mut();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.on_mode_change(mode)))
            {
                let err = TaskError::Panicked(panic_message(payload.as_ref()));
                tracing::warn!(task = %entry.id, error = %err, "task disabled");
                entry.enabled = false;
                disabled.push((entry.id.clone(), err));
            }
        }
        disabled
    }

    pub(crate) fn run_pass(&mut self, pass: &Pass<'_>, out: &mut dyn StyleWriter) -> PassReport {
        let mut report = PassReport {
            budget_ms: pass.budget_ms,
            ..PassReport::default()
        };
        let mut remaining = pass.budget_ms;

        for entry in &mut self.tasks {
            if !entry.enabled {
                continue;
            }

            let background = entry.priority == Priority::Background;
            let interval = if background && pass.mode == PerformanceMode::Performance {
                entry.interval_ms * pass.background_stretch
            } else {
                entry.interval_ms
            };
            let since_last_run_ms = match entry.last_run {
                Some(last) => {
                    let since = pass.now.saturating_duration_since(last).as_millis_f64();
                    if since + self.tuning.jitter_tolerance_ms < interval {
                        report.rate_limited += 1;
                        continue;
                    }
                    since
                }
                None => 0.0,
            };

            // Only due tasks count as skipped.
            if background && (remaining <= 0.0 || entry.expected_cost_ms() > remaining) {
                entry.skipped_frames += 1;
                report.skipped.push(entry.id.clone());
                continue;
            }

            let exhausted = remaining <= 0.0;
            let frame = FrameContext {
                now: pass.now,
                delta_ms: pass.clock.delta_ms,
                since_last_run_ms,
                clock: pass.clock,
                mode: pass.mode,
                signals: pass.signals,
            };

            let start = pass.time.now();
            let result = invoke(entry.task.as_mut(), &frame, out);
            let cost_ms = pass.time.now().saturating_duration_since(start).as_millis_f64();

            remaining -= cost_ms;
            report.spent_ms += cost_ms;
            entry.last_run = Some(pass.now);
            entry.run_count += 1;
            entry.record_cost(cost_ms);
            if exhausted {
                tracing::debug!(task = %entry.id, cost_ms, "task ran past the exhausted budget");
            }
            report.ran.push(TaskRun {
                id: entry.id.clone(),
                cost_ms,
                over_budget: exhausted,
            });

            if let Err(err) = result {
                tracing::warn!(task = %entry.id, error = %err, "task disabled");
                entry.enabled = false;
                report.disabled.push((entry.id.clone(), err));
                continue;
            }

            if let Some(change) = entry.maybe_adjust(pass.now, remaining, &self.tuning) {
                tracing::debug!(
                    task = %change.id,
                    from_ms = change.from_ms,
                    to_ms = change.to_ms,
                    "task interval adjusted"
                );
                report.interval_changes.push(change);
            }
        }

        report
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == *id)
    }
}

fn invoke(
    task: &mut dyn Task,
    frame: &FrameContext,
    out: &mut dyn StyleWriter,
) -> Result<(), TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(|| task.tick(frame, out))) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
