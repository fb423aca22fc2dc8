// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Aggregate configuration and runtime settings keys.
//!
//! [`RuntimeConfig`] gathers every component's config. Each field defaults
//! independently, so a JSON document only needs the values it overrides:
//!
//! ```json
//! { "scheduler": { "quality_budget_ms": 14.0 }, "batch": { "max_batch_size": 32 } }
//! ```
//!
//! Changes made while running arrive as `(key, value)` pairs and are parsed
//! into a typed [`Setting`] before anything is touched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::BatchConfig;
use crate::capability::QualityPreset;
use crate::error::ConfigError;
use crate::perf::TrackerConfig;
use crate::policy::PolicyConfig;
use crate::scheduler::SchedulerConfig;
use crate::task::PerformanceMode;
use crate::timer::TimerConfig;

/// Configuration for every runtime component.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Master scheduler.
    pub scheduler: SchedulerConfig,
    /// Timer scheduler.
    pub timer: TimerConfig,
    /// Write batcher.
    pub batch: BatchConfig,
    /// Performance tracker.
    pub tracker: TrackerConfig,
    /// Budget policy.
    pub policy: PolicyConfig,
}

impl RuntimeConfig {
    /// Parses a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Applies a startup quality preset.
    #[must_use]
    pub fn with_preset(mut self, preset: QualityPreset) -> Self {
        preset.apply(&mut self.scheduler, &mut self.tracker);
        self
    }
}

/// A validated settings change.
#[derive(Clone, Debug, PartialEq)]
pub enum Setting {
    /// `batch.max_size`
    BatchMaxSize(usize),
    /// `batch.flush_interval_ms`
    BatchFlushIntervalMs(f64),
    /// `batch.enabled`
    BatchEnabled(bool),
    /// `budget.<operation>`
    Budget {
        /// Operation name.
        operation: String,
        /// Budget in milliseconds.
        ms: f64,
    },
    /// `policy.violation_threshold`
    ViolationThreshold(u64),
    /// `policy.recovery_threshold`
    RecoveryThreshold(u8),
    /// `scheduler.mode`; `None` (`"auto"` or `null`) releases a pinned mode.
    SchedulerMode(Option<PerformanceMode>),
    /// `clock.time_scale`
    TimeScale(f64),
}

impl Setting {
    /// Validates a settings change.
    pub fn parse(key: &str, value: &Value) -> Result<Self, ConfigError> {
        if let Some(operation) = key.strip_prefix("budget.") {
            if operation.is_empty() {
                return Err(ConfigError::UnknownKey(key.to_owned()));
            }
            return Ok(Self::Budget {
                operation: operation.to_owned(),
                ms: positive_f64(key, value)?,
            });
        }

        match key {
            "batch.max_size" => {
                let size = value
                    .as_u64()
                    .filter(|&n| n >= 1)
                    .ok_or_else(|| ConfigError::invalid(key, "expected an integer >= 1"))?;
                let size = usize::try_from(size)
                    .map_err(|_| ConfigError::invalid(key, "batch size out of range"))?;
                Ok(Self::BatchMaxSize(size))
            }
            "batch.flush_interval_ms" => Ok(Self::BatchFlushIntervalMs(positive_f64(key, value)?)),
            "batch.enabled" => value
                .as_bool()
                .map(Self::BatchEnabled)
                .ok_or_else(|| ConfigError::invalid(key, "expected a boolean")),
            "policy.violation_threshold" => value
                .as_u64()
                .filter(|&n| n >= 1)
                .map(Self::ViolationThreshold)
                .ok_or_else(|| ConfigError::invalid(key, "expected an integer >= 1")),
            "policy.recovery_threshold" => value
                .as_u64()
                .filter(|&n| n <= 100)
                .and_then(|n| u8::try_from(n).ok())
                .map(Self::RecoveryThreshold)
                .ok_or_else(|| ConfigError::invalid(key, "expected an integer in 0..=100")),
            "scheduler.mode" => match value {
                Value::Null => Ok(Self::SchedulerMode(None)),
                Value::String(s) if s == "auto" => Ok(Self::SchedulerMode(None)),
                Value::String(s) => PerformanceMode::parse(s)
                    .map(|m| Self::SchedulerMode(Some(m)))
                    .ok_or_else(|| {
                        ConfigError::invalid(key, "expected \"quality\", \"performance\" or \"auto\"")
                    }),
                _ => Err(ConfigError::invalid(key, "expected a string")),
            },
            "clock.time_scale" => value
                .as_f64()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map(Self::TimeScale)
                .ok_or_else(|| ConfigError::invalid(key, "expected a non-negative number")),
            _ => Err(ConfigError::UnknownKey(key.to_owned())),
        }
    }
}

fn positive_f64(key: &str, value: &Value) -> Result<f64, ConfigError> {
    value
        .as_f64()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| ConfigError::invalid(key, "expected a positive number"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let config = RuntimeConfig::from_json(
            r#"{
                "scheduler": { "quality_budget_ms": 14.0, "mode_policy": { "kind": "fixed" } },
                "batch": { "max_batch_size": 32 },
                "policy": { "violation_threshold": 3 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.quality_budget_ms, 14.0);
        assert_eq!(config.scheduler.performance_budget_ms, 12.0);
        assert_eq!(config.scheduler.mode_policy, crate::scheduler::ModePolicy::Fixed);
        assert_eq!(config.batch.max_batch_size, 32);
        assert_eq!(config.batch.flush_interval_ms, 16.0);
        assert_eq!(config.policy.violation_threshold, 3);
        assert_eq!(config.timer, TimerConfig::default());
    }

    #[test]
    fn malformed_documents_are_parse_errors() {
        let err = RuntimeConfig::from_json(r#"{ "batch": { "max_batch_size": "many" } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
    }

    #[test]
    fn low_preset_starts_in_performance_mode() {
        let config = RuntimeConfig::default().with_preset(QualityPreset::Low);
        assert_eq!(config.scheduler.initial_mode, PerformanceMode::Performance);
        assert_eq!(config.scheduler.rate_scale, 0.5);
        assert_eq!(config.tracker.budgets.get("frame"), Some(&33.33));
    }

    #[test]
    fn settings_parse() {
        assert_eq!(
            Setting::parse("batch.max_size", &json!(20)).unwrap(),
            Setting::BatchMaxSize(20)
        );
        assert_eq!(
            Setting::parse("budget.task:aurora", &json!(3.5)).unwrap(),
            Setting::Budget {
                operation: "task:aurora".into(),
                ms: 3.5
            }
        );
        assert_eq!(
            Setting::parse("scheduler.mode", &json!("performance")).unwrap(),
            Setting::SchedulerMode(Some(PerformanceMode::Performance))
        );
        assert_eq!(
            Setting::parse("scheduler.mode", &json!("auto")).unwrap(),
            Setting::SchedulerMode(None)
        );
        assert_eq!(
            Setting::parse("clock.time_scale", &json!(0)).unwrap(),
            Setting::TimeScale(0.0)
        );
    }

    #[test]
    fn bad_settings_are_rejected() {
        assert!(matches!(
            Setting::parse("batch.size", &json!(20)),
            Err(ConfigError::UnknownKey(k)) if k == "batch.size"
        ));
        assert!(matches!(
            Setting::parse("budget.", &json!(1)),
            Err(ConfigError::UnknownKey(_))
        ));
        for (key, value) in [
            ("batch.max_size", json!(0)),
            ("batch.max_size", json!(-1)),
            ("batch.enabled", json!("yes")),
            ("budget.frame", json!(0)),
            ("policy.recovery_threshold", json!(101)),
            ("scheduler.mode", json!("turbo")),
            ("clock.time_scale", json!(-1.0)),
        ] {
            assert!(
                matches!(Setting::parse(key, &value), Err(ConfigError::InvalidValue { .. })),
                "{key} = {value} should be rejected"
            );
        }
    }
}
