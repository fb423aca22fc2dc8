// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rolling performance metrics, named budgets, and a derived health score.
//!
//! The [`PerformanceTracker`] keeps:
//!
//! - a [`BudgetTable`] mapping operation classes to allowed durations,
//! - per-operation [`OperationStats`] (recent samples plus a violation
//!   counter) fed by [`PerformanceTracker::is_within_budget`] and the
//!   `time_operation` wrappers,
//! - an [`FpsCounter`] fed once per frame,
//! - a history of [`HealthSnapshot`]s sampled through a pluggable
//!   [`MetricsProbe`], pruned by age.
//!
//! Operation names may carry a qualifier after a colon (`task:aurora`). When
//! no budget exists for the full name, the class before the colon is used.

use core::cell::OnceCell;
use core::fmt;
use core::future::Future;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::capability::NetworkClass;
use crate::error::{ConfigError, ProbeError};
use crate::stats::SampleWindow;
use crate::time::{Duration, HostTime, TimeSource};

/// Budget for one whole frame.
pub const FRAME: &str = "frame";
/// Budget for a single immediate style write.
pub const PROPERTY_WRITE: &str = "property_write";
/// Budget for one batch flush.
pub const BATCH_FLUSH: &str = "batch_flush";
/// Budget for one task invocation.
pub const TASK: &str = "task";
/// Budget for one layout or tree query.
pub const DOM_QUERY: &str = "dom_query";
/// Budget for one analysis step.
pub const ANALYSIS: &str = "analysis";

/// The built-in operation budgets, in milliseconds.
#[must_use]
pub fn default_budgets() -> BTreeMap<String, f64> {
    [
        (FRAME, 16.67),
        (PROPERTY_WRITE, 2.0),
        (BATCH_FLUSH, 8.0),
        (TASK, 4.0),
        (DOM_QUERY, 10.0),
        (ANALYSIS, 100.0),
    ]
    .into_iter()
    .map(|(op, ms)| (op.to_owned(), ms))
    .collect()
}

/// Configuration for the [`PerformanceTracker`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Operation budgets in milliseconds.
    pub budgets: BTreeMap<String, f64>,
    /// How often [`PerformanceTracker::poll`] takes a health snapshot.
    pub sample_interval_ms: f64,
    /// Snapshots older than this are pruned.
    pub history_max_age_ms: f64,
    /// Samples kept per operation.
    pub operation_history: usize,
    /// One-second FPS buckets kept for averaging.
    pub fps_buckets: usize,
    /// Memory utilization above which the health score is penalized.
    pub memory_pressure: f64,
    /// Average FPS below which the health score is penalized.
    pub min_fps: f64,
    /// Largest contentful paint above which the health score is penalized.
    pub max_lcp_ms: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            budgets: default_budgets(),
            sample_interval_ms: 5_000.0,
            history_max_age_ms: 300_000.0,
            operation_history: 100,
            fps_buckets: 60,
            memory_pressure: 0.8,
            min_fps: 30.0,
            max_lcp_ms: 2_500.0,
        }
    }
}

/// Named operation budgets with class fallback.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BudgetTable {
    budgets: HashMap<String, f64>,
}

impl BudgetTable {
    /// Builds a table from `(operation, ms)` pairs.
    pub fn new(budgets: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            budgets: budgets.into_iter().collect(),
        }
    }

    /// Budget for `op`, falling back to its class (`task:x` → `task`).
    #[must_use]
    pub fn get(&self, op: &str) -> Option<f64> {
        self.budgets.get(op).copied().or_else(|| {
            let (class, _) = op.split_once(':')?;
            self.budgets.get(class).copied()
        })
    }

    /// Sets or overrides a budget. Must be finite and positive.
    pub fn set(&mut self, op: &str, ms: f64) -> Result<(), ConfigError> {
        if !ms.is_finite() || ms <= 0.0 {
            return Err(ConfigError::invalid(
                &format!("budget.{op}"),
                "budget must be a positive number of milliseconds",
            ));
        }
        self.budgets.insert(op.to_owned(), ms);
        Ok(())
    }

    /// Every configured budget, unordered.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.budgets.iter().map(|(op, ms)| (op.as_str(), *ms))
    }
}

/// Recent samples and violation count for one operation.
#[derive(Clone, Debug)]
pub struct OperationStats {
    samples: SampleWindow,
    violations: u64,
    count: u64,
}

impl OperationStats {
    fn new(history: usize) -> Self {
        Self {
            samples: SampleWindow::new(history),
            violations: 0,
            count: 0,
        }
    }

    /// Mean of the retained samples.
    #[must_use]
    pub fn average_ms(&self) -> Option<f64> {
        self.samples.mean()
    }

    /// Largest retained sample.
    #[must_use]
    pub fn max_ms(&self) -> Option<f64> {
        self.samples.max()
    }

    /// Most recent sample.
    #[must_use]
    pub fn last_ms(&self) -> Option<f64> {
        self.samples.last()
    }

    /// Samples that exceeded the budget, since creation.
    #[must_use]
    pub fn violations(&self) -> u64 {
        self.violations
    }

    /// Samples recorded, since creation.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Frame-rate counter with one-second buckets.
#[derive(Clone, Debug)]
pub struct FpsCounter {
    bucket_start: Option<HostTime>,
    frames: u32,
    history: SampleWindow,
}

impl FpsCounter {
    /// Creates a counter that keeps `buckets` completed seconds.
    #[must_use]
    pub fn new(buckets: usize) -> Self {
        Self {
            bucket_start: None,
            frames: 0,
            history: SampleWindow::new(buckets),
        }
    }

    /// Counts a frame at `now`. Closes the current bucket once a second has
    /// passed.
    pub fn frame(&mut self, now: HostTime) {
        let start = *self.bucket_start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= Duration::from_secs(1) {
            let secs = elapsed.as_millis_f64() / 1_000.0;
            self.history.push(f64::from(self.frames) / secs);
            self.bucket_start = Some(now);
            self.frames = 0;
        }
        self.frames += 1;
    }

    /// Rate of the last completed bucket.
    #[must_use]
    pub fn current(&self) -> Option<f64> {
        self.history.last()
    }

    /// Mean over the retained buckets.
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        self.history.mean()
    }
}

/// Memory in use versus the allowed limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes in use.
    pub used_bytes: u64,
    /// Bytes available before the platform starts to fail allocations.
    pub limit_bytes: u64,
}

impl MemoryUsage {
    /// Fraction of the limit in use, or `None` for a zero limit.
    #[must_use]
    pub fn ratio(&self) -> Option<f64> {
        (self.limit_bytes > 0).then(|| self.used_bytes as f64 / self.limit_bytes as f64)
    }
}

/// One reading from a [`MetricsProbe`]. Missing fields are unsupported.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProbeSample {
    /// Heap usage.
    pub memory: Option<MemoryUsage>,
    /// Size of the presentation tree.
    pub dom_nodes: Option<u64>,
    /// First contentful paint.
    pub first_contentful_paint_ms: Option<f64>,
    /// Largest contentful paint.
    pub largest_contentful_paint_ms: Option<f64>,
}

/// Source of platform metrics the tracker cannot measure itself.
pub trait MetricsProbe {
    /// Takes a reading.
    fn sample(&mut self) -> Result<ProbeSample, ProbeError>;
}

/// Timestamped health reading with its derived score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HealthSnapshot {
    /// When the snapshot was taken.
    pub at: HostTime,
    /// Probe reading (default when the probe failed or is absent).
    pub sample: ProbeSample,
    /// Average frames per second at the time.
    pub fps: Option<f64>,
    /// Derived 0–100 score.
    pub score: u8,
}

/// Scores a reading: 100, minus 20 for memory pressure, 25 for a low frame
/// rate, and 15 for a slow largest contentful paint. Unknown inputs are not
/// penalized.
#[must_use]
pub fn health_score(
    memory_ratio: Option<f64>,
    fps: Option<f64>,
    lcp_ms: Option<f64>,
    config: &TrackerConfig,
) -> u8 {
    let mut score: u8 = 100;
    if memory_ratio.is_some_and(|r| r > config.memory_pressure) {
        score = score.saturating_sub(20);
    }
    if fps.is_some_and(|f| f < config.min_fps) {
        score = score.saturating_sub(25);
    }
    if lcp_ms.is_some_and(|l| l > config.max_lcp_ms) {
        score = score.saturating_sub(15);
    }
    score
}

/// Coarse device facts used by the low-end heuristic.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeviceHints {
    /// Installed memory in gigabytes.
    pub memory_gb: Option<f64>,
    /// Logical processor count.
    pub logical_cores: Option<usize>,
    /// Effective network class.
    pub network: Option<NetworkClass>,
}

impl DeviceHints {
    /// At most 4 GB of memory, at most 2 cores, or a 2G-class network.
    #[must_use]
    pub fn is_low_end(&self) -> bool {
        self.memory_gb.is_some_and(|gb| gb <= 4.0)
            || self.logical_cores.is_some_and(|c| c <= 2)
            || matches!(
                self.network,
                Some(NetworkClass::Slow2g | NetworkClass::TwoG)
            )
    }
}

/// Rolling metrics store.
pub struct PerformanceTracker {
    config: TrackerConfig,
    budgets: BudgetTable,
    ops: HashMap<String, OperationStats>,
    fps: FpsCounter,
    history: VecDeque<HealthSnapshot>,
    time: Rc<dyn TimeSource>,
    probe: Option<Box<dyn MetricsProbe>>,
    last_sample: Option<HostTime>,
    device: DeviceHints,
    low_end: OnceCell<bool>,
}

impl fmt::Debug for PerformanceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceTracker")
            .field("operations", &self.ops.len())
            .field("history", &self.history.len())
            .field("fps", &self.fps.average())
            .field("has_probe", &self.probe.is_some())
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl PerformanceTracker {
    /// Creates a tracker without a metrics probe.
    #[must_use]
    pub fn new(config: TrackerConfig, time: Rc<dyn TimeSource>) -> Self {
        Self {
            budgets: BudgetTable::new(config.budgets.clone()),
            ops: HashMap::new(),
            fps: FpsCounter::new(config.fps_buckets),
            history: VecDeque::new(),
            time,
            probe: None,
            last_sample: None,
            device: DeviceHints::default(),
            low_end: OnceCell::new(),
            config,
        }
    }

    /// Installs the metrics probe used by [`poll`](Self::poll).
    pub fn set_probe(&mut self, probe: Box<dyn MetricsProbe>) {
        self.probe = Some(probe);
    }

    /// Supplies device facts for [`is_low_end`](Self::is_low_end).
    ///
    /// Has no effect once the heuristic has been evaluated.
    pub fn set_device_hints(&mut self, hints: DeviceHints) {
        self.device = hints;
    }

    /// Whether this looks like a low-end device. Computed once and cached.
    pub fn is_low_end(&self) -> bool {
        *self.low_end.get_or_init(|| self.device.is_low_end())
    }

    /// The budget table.
    #[must_use]
    pub fn budgets(&self) -> &BudgetTable {
        &self.budgets
    }

    /// Overrides an operation budget.
    pub fn set_budget(&mut self, op: &str, ms: f64) -> Result<(), ConfigError> {
        self.budgets.set(op, ms)
    }

    /// Records a measured duration for `op` and reports whether it fit the
    /// budget. Operations without a budget are recorded and always fit.
    pub fn is_within_budget(&mut self, op: &str, duration_ms: f64) -> bool {
        let budget = self.budgets.get(op);
        let history = self.config.operation_history;
        let stats = self
            .ops
            .entry_ref(op)
            .or_insert_with(|| OperationStats::new(history));
        stats.samples.push(duration_ms);
        stats.count += 1;

        let within = budget.is_none_or(|b| duration_ms <= b);
        if !within {
            stats.violations += 1;
            tracing::trace!(
                op,
                duration_ms,
                budget_ms = budget,
                violations = stats.violations,
                "budget violation"
            );
        }
        within
    }

    /// Runs `f`, measuring it against the budget for `op`.
    pub fn time_operation<R>(&mut self, op: &str, f: impl FnOnce() -> R) -> R {
        let start = self.time.now();
        let out = f();
        let ms = self.time.now().saturating_duration_since(start).as_millis_f64();
        self.is_within_budget(op, ms);
        out
    }

    /// Awaits `fut`, measuring the wall-clock time until it completes.
    pub async fn time_operation_async<F: Future>(&mut self, op: &str, fut: F) -> F::Output {
        let start = self.time.now();
        let out = fut.await;
        let ms = self.time.now().saturating_duration_since(start).as_millis_f64();
        self.is_within_budget(op, ms);
        out
    }

    /// Counts a presented frame.
    pub fn record_frame(&mut self, now: HostTime) {
        self.fps.frame(now);
    }

    /// The frame-rate counter.
    #[must_use]
    pub fn fps(&self) -> &FpsCounter {
        &self.fps
    }

    /// Stats for one operation.
    #[must_use]
    pub fn operation(&self, op: &str) -> Option<&OperationStats> {
        self.ops.get(op)
    }

    /// Stats for every recorded operation, unordered.
    pub fn operations(&self) -> impl Iterator<Item = (&str, &OperationStats)> + '_ {
        self.ops.iter().map(|(op, s)| (op.as_str(), s))
    }

    /// Drops everything recorded for `op`, e.g. when the task it measured
    /// is unregistered. Returns whether anything was recorded.
    pub fn forget_operation(&mut self, op: &str) -> bool {
        self.ops.remove(op).is_some()
    }

    /// Violations recorded for one operation.
    #[must_use]
    pub fn violations(&self, op: &str) -> u64 {
        self.ops.get(op).map_or(0, OperationStats::violations)
    }

    /// Violations recorded across all operations.
    #[must_use]
    pub fn total_violations(&self) -> u64 {
        self.ops.values().map(OperationStats::violations).sum()
    }

    /// Takes a health snapshot if the sample interval has elapsed.
    pub fn poll(&mut self, now: HostTime) -> Option<HealthSnapshot> {
        if let Some(last) = self.last_sample {
            let elapsed = now.saturating_duration_since(last).as_millis_f64();
            if elapsed < self.config.sample_interval_ms {
                return None;
            }
        }
        Some(self.sample_now(now))
    }

    /// Takes a health snapshot unconditionally and prunes old history.
    pub fn sample_now(&mut self, now: HostTime) -> HealthSnapshot {
        self.last_sample = Some(now);
        let sample = match self.probe.as_mut().map(|p| p.sample()) {
            Some(Ok(sample)) => sample,
            Some(Err(err)) => {
                tracing::warn!(error = %err, "metrics probe failed");
                ProbeSample::default()
            }
            None => ProbeSample::default(),
        };
        let fps = self.fps.average();
        let score = health_score(
            sample.memory.and_then(|m| m.ratio()),
            fps,
            sample.largest_contentful_paint_ms,
            &self.config,
        );
        let snapshot = HealthSnapshot {
            at: now,
            sample,
            fps,
            score,
        };
        self.history.push_back(snapshot);
        self.prune(now);
        snapshot
    }

    /// Latest health snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<&HealthSnapshot> {
        self.history.back()
    }

    /// Latest health score, or 100 before the first snapshot.
    #[must_use]
    pub fn health_score(&self) -> u8 {
        self.latest().map_or(100, |s| s.score)
    }

    /// Retained snapshots, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &HealthSnapshot> + '_ {
        self.history.iter()
    }

    fn prune(&mut self, now: HostTime) {
        let max_age = Duration::from_millis_f64(self.config.history_max_age_ms);
        while let Some(oldest) = self.history.front() {
            if now.saturating_duration_since(oldest.at) <= max_age {
                break;
            }
            self.history.pop_front();
        }
    }
}
