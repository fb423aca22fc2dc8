// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Turns budget violations into degradations, and recovered health back
//! into full quality.
//!
//! The [`BudgetPolicy`] polls the [`PerformanceTracker`] on a fixed interval.
//! On each evaluation:
//!
//! - Every operation whose violation count reached
//!   [`PolicyConfig::violation_threshold`] gets a one-time optimization.
//!   Write-coalescing classes retune the batcher (longer flush interval,
//!   smaller batches); everything else is broadcast as
//!   [`RuntimeEvent::Optimize`] for effects to act on.
//! - If total violations exceed twice the threshold and are still growing,
//!   the [`OptimizationLevel`] escalates one step and that level's feature
//!   list is disabled.
//! - If health is at or above [`PolicyConfig::recovery_threshold`], nothing
//!   new was violated, and anything is active, every optimization is lifted
//!   and the level returns to [`OptimizationLevel::None`].
//!
//! Violation counters in the tracker only grow, so the policy measures
//! against a baseline taken at the last recovery.

use std::collections::BTreeSet;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::batch::{BatchControl, BatchTuning};
use crate::events::RuntimeEvent;
use crate::perf::{BATCH_FLUSH, OperationStats, PROPERTY_WRITE, PerformanceTracker};
use crate::time::HostTime;

/// Discrete degradation level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    /// Full quality.
    #[default]
    None,
    /// Shed optional polish.
    Conservative,
    /// Shed everything non-essential; the scheduler is held in performance
    /// mode.
    Aggressive,
}

impl OptimizationLevel {
    /// The next level up, saturating at [`Aggressive`](Self::Aggressive).
    #[must_use]
    pub const fn escalate(self) -> Self {
        match self {
            Self::None => Self::Conservative,
            Self::Conservative | Self::Aggressive => Self::Aggressive,
        }
    }
}

/// Configuration for the [`BudgetPolicy`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// How often the policy evaluates.
    pub poll_interval_ms: f64,
    /// Violations of one operation before it is optimized.
    pub violation_threshold: u64,
    /// Health score at or above which optimizations are lifted.
    pub recovery_threshold: u8,
    /// Operation classes handled by retuning the batcher.
    pub write_operations: Vec<String>,
    /// Multiplier for the batch flush interval when a write class is optimized.
    pub flush_interval_factor: f64,
    /// Multiplier for the max batch size when a write class is optimized.
    pub batch_size_factor: f64,
    /// Features disabled on reaching [`OptimizationLevel::Conservative`].
    pub conservative_features: Vec<String>,
    /// Additional features disabled on reaching
    /// [`OptimizationLevel::Aggressive`].
    pub aggressive_features: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000.0,
            violation_threshold: 5,
            recovery_threshold: 80,
            write_operations: vec![PROPERTY_WRITE.to_owned(), BATCH_FLUSH.to_owned()],
            flush_interval_factor: 2.0,
            batch_size_factor: 0.5,
            conservative_features: vec!["backdrop-blur".to_owned(), "particle-trails".to_owned()],
            aggressive_features: vec![
                "ambient-particles".to_owned(),
                "parallax".to_owned(),
                "animated-gradients".to_owned(),
            ],
        }
    }
}

/// What the policy currently has in effect.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptimizationState {
    /// Current level.
    pub level: OptimizationLevel,
    /// Features turned off by the level.
    pub disabled_features: BTreeSet<String>,
    /// Operations with an optimization applied.
    pub active: BTreeSet<String>,
}

/// Polls the tracker and applies or lifts degradations.
#[derive(Debug)]
pub struct BudgetPolicy {
    config: PolicyConfig,
    state: OptimizationState,
    last_poll: Option<HostTime>,
    last_total: u64,
    baseline: HashMap<String, u64>,
}

impl BudgetPolicy {
    /// Creates a policy at [`OptimizationLevel::None`].
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            state: OptimizationState::default(),
            last_poll: None,
            last_total: 0,
            baseline: HashMap::new(),
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Mutable configuration, for runtime settings changes.
    pub fn config_mut(&mut self) -> &mut PolicyConfig {
        &mut self.config
    }

    /// What is currently in effect.
    #[must_use]
    pub fn state(&self) -> &OptimizationState {
        &self.state
    }

    /// Current level.
    #[must_use]
    pub fn level(&self) -> OptimizationLevel {
        self.state.level
    }

    /// Whether a feature is currently disabled.
    #[must_use]
    pub fn is_feature_disabled(&self, feature: &str) -> bool {
        self.state.disabled_features.contains(feature)
    }

    /// Drops the recovery baseline for an operation the tracker no longer
    /// records, so a later operation with the same name starts from zero.
    pub fn forget_operation(&mut self, op: &str) {
        self.baseline.remove(op);
    }

    /// Evaluates if the poll interval has elapsed.
    pub fn poll(
        &mut self,
        now: HostTime,
        tracker: &PerformanceTracker,
        batch: &mut dyn BatchControl,
    ) -> Vec<RuntimeEvent> {
        if let Some(last) = self.last_poll {
            if now.saturating_duration_since(last).as_millis_f64() < self.config.poll_interval_ms {
                return Vec::new();
            }
        }
        self.last_poll = Some(now);
        self.evaluate(tracker, batch)
    }

    /// Evaluates unconditionally and returns the events to broadcast.
    pub fn evaluate(
        &mut self,
        tracker: &PerformanceTracker,
        batch: &mut dyn BatchControl,
    ) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        let threshold = self.config.violation_threshold;
        let total: u64 = tracker
            .operations()
            .map(|(op, stats)| self.fresh_violations(op, stats))
            .sum();
        let grew = total > self.last_total;

        let mut due: Vec<&str> = tracker
            .operations()
            .filter(|(op, stats)| {
                self.fresh_violations(op, stats) >= threshold && !self.state.active.contains(*op)
            })
            .map(|(op, _)| op)
            .collect();
        due.sort_unstable();
        for op in due {
            if self.is_write_operation(op) {
                let before = batch.tuning();
                let after = BatchTuning {
                    max_batch_size: scale_size(before.max_batch_size, self.config.batch_size_factor),
                    flush_interval_ms: before.flush_interval_ms * self.config.flush_interval_factor,
                };
                batch.set_tuning(after);
                tracing::debug!(
                    op,
                    max_batch_size = after.max_batch_size,
                    flush_interval_ms = after.flush_interval_ms,
                    "batcher retuned"
                );
            } else {
                tracing::debug!(op, "optimization requested");
                events.push(RuntimeEvent::Optimize {
                    operation: op.to_owned(),
                });
            }
            self.state.active.insert(op.to_owned());
        }

        let health = tracker.health_score();
        if total > threshold.saturating_mul(2) && grew {
            if self.state.level < OptimizationLevel::Aggressive {
                self.set_level(self.state.level.escalate(), &mut events);
            }
        } else if health >= self.config.recovery_threshold
            && !grew
            && (!self.state.active.is_empty() || self.state.level != OptimizationLevel::None)
        {
            self.recover(tracker, batch, &mut events);
            self.last_total = 0;
            return events;
        }

        self.last_total = total;
        events
    }

    fn recover(
        &mut self,
        tracker: &PerformanceTracker,
        batch: &mut dyn BatchControl,
        events: &mut Vec<RuntimeEvent>,
    ) {
        tracing::debug!(
            level = ?self.state.level,
            active = self.state.active.len(),
            "health recovered, lifting optimizations"
        );
        self.state.active.clear();
        batch.reset_tuning();
        self.baseline = tracker
            .operations()
            .map(|(op, stats)| (op.to_owned(), stats.violations()))
            .collect();
        events.push(RuntimeEvent::Recover);
        self.set_level(OptimizationLevel::None, events);
    }

    fn set_level(&mut self, level: OptimizationLevel, events: &mut Vec<RuntimeEvent>) {
        let from = self.state.level;
        if from == level {
            return;
        }
        self.state.level = level;
        tracing::debug!(?from, to = ?level, "optimization level changed");
        events.push(RuntimeEvent::LevelChanged { from, to: level });

        let wanted = self.features_for(level);
        let stale: Vec<String> = self
            .state
            .disabled_features
            .iter()
            .filter(|f| !wanted.contains(f))
            .cloned()
            .collect();
        for feature in stale {
            self.state.disabled_features.remove(&feature);
            events.push(RuntimeEvent::FeatureEnabled { feature });
        }
        for feature in wanted {
            if self.state.disabled_features.insert(feature.clone()) {
                events.push(RuntimeEvent::FeatureDisabled { feature });
            }
        }
    }

    fn features_for(&self, level: OptimizationLevel) -> Vec<String> {
        let mut features = Vec::new();
        if level >= OptimizationLevel::Conservative {
            features.extend(self.config.conservative_features.iter().cloned());
        }
        if level >= OptimizationLevel::Aggressive {
            features.extend(self.config.aggressive_features.iter().cloned());
        }
        features
    }

    /// Violations since the last recovery.
    fn fresh_violations(&self, op: &str, stats: &OperationStats) -> u64 {
        let base = self.baseline.get(op).copied().unwrap_or(0);
        stats.violations().saturating_sub(base)
    }

    fn is_write_operation(&self, op: &str) -> bool {
        let class = op.split_once(':').map_or(op, |(class, _)| class);
        self.config
            .write_operations
            .iter()
            .any(|w| w == op || w == class)
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "batch sizes are small positive integers"
)]
fn scale_size(size: usize, factor: f64) -> usize {
    ((size as f64 * factor).round() as usize).max(1)
}
