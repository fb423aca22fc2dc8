// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! One-shot device capability classification.
//!
//! A [`CapabilityProbe`] answers a fixed set of hardware questions. The
//! [`CapabilityClassifier`] asks each once, grades every category as a
//! [`Tier`], and combines them into a weighted overall tier:
//!
//! | category | inputs | weight |
//! |----------|--------|--------|
//! | memory   | device memory | 0.25 |
//! | cpu      | logical cores, micro-benchmark | 0.30 |
//! | gpu      | support, max texture size | 0.25 |
//! | display  | refresh rate | 0.10 |
//! | network  | effective connection class | 0.10 |
//!
//! A probe error grades its category [`Tier::Low`]. A probe that answers
//! "unknown" (`Ok(None)`) grades it [`Tier::Medium`].
//!
//! The result seeds the runtime through [`QualityPreset`].

use core::cell::OnceCell;
use std::hint::black_box;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;
use crate::perf::{FRAME, TrackerConfig};
use crate::scheduler::SchedulerConfig;
use crate::task::PerformanceMode;
use crate::time::{StdTimeSource, TimeSource};

/// Coarse capability grade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Below what effects assume.
    Low,
    /// Adequate.
    Medium,
    /// Comfortably above what effects assume.
    High,
}

impl Tier {
    const fn points(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 3.0,
        }
    }

    fn from_points(points: f64) -> Self {
        if points >= 2.5 {
            Self::High
        } else if points >= 1.75 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Effective network connection class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkClass {
    /// `slow-2g`
    #[serde(rename = "slow-2g")]
    Slow2g,
    /// `2g`
    #[serde(rename = "2g")]
    TwoG,
    /// `3g`
    #[serde(rename = "3g")]
    ThreeG,
    /// `4g` or better.
    #[serde(rename = "4g")]
    FourG,
}

impl NetworkClass {
    /// Parses the browser's `effectiveType` strings.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "slow-2g" => Some(Self::Slow2g),
            "2g" => Some(Self::TwoG),
            "3g" => Some(Self::ThreeG),
            "4g" => Some(Self::FourG),
            _ => None,
        }
    }
}

/// Graphics support as reported by the platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    /// Hardware-accelerated rendering is available.
    pub supported: bool,
    /// The newer graphics API generation is available.
    pub modern_api: bool,
    /// Largest texture edge in pixels.
    pub max_texture_size: u32,
}

/// Platform feature flags. Recorded for effects to consult; they do not
/// affect tiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFeatures {
    /// Rendering off the main thread is possible.
    pub offscreen_rendering: bool,
    /// Background workers are available.
    pub workers: bool,
    /// The user asked for reduced motion.
    pub reduced_motion: bool,
}

/// Source of raw device facts.
///
/// Every method defaults to [`ProbeError::Unsupported`]; implement the ones
/// the platform can answer.
pub trait CapabilityProbe {
    /// Installed memory in gigabytes.
    fn device_memory_gb(&mut self) -> Result<Option<f64>, ProbeError> {
        Err(ProbeError::Unsupported("device memory"))
    }

    /// Logical processor count.
    fn logical_cores(&mut self) -> Result<Option<usize>, ProbeError> {
        Err(ProbeError::Unsupported("core count"))
    }

    /// Duration of a short fixed CPU workload, in milliseconds.
    fn cpu_benchmark_ms(&mut self) -> Result<Option<f64>, ProbeError> {
        Err(ProbeError::Unsupported("cpu benchmark"))
    }

    /// Graphics support.
    fn gpu(&mut self) -> Result<Option<GpuInfo>, ProbeError> {
        Err(ProbeError::Unsupported("gpu"))
    }

    /// Platform feature flags.
    fn features(&mut self) -> Result<PlatformFeatures, ProbeError> {
        Err(ProbeError::Unsupported("feature flags"))
    }

    /// Display refresh rate in hertz.
    fn refresh_rate_hz(&mut self) -> Result<Option<f64>, ProbeError> {
        Err(ProbeError::Unsupported("refresh rate"))
    }

    /// Effective network class.
    fn network(&mut self) -> Result<Option<NetworkClass>, ProbeError> {
        Err(ProbeError::Unsupported("network class"))
    }
}

/// Raw answers collected from the probe. `None` when unknown or failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    /// Installed memory in gigabytes.
    pub memory_gb: Option<f64>,
    /// Logical processor count.
    pub logical_cores: Option<usize>,
    /// CPU micro-benchmark duration.
    pub cpu_benchmark_ms: Option<f64>,
    /// Graphics support.
    pub gpu: Option<GpuInfo>,
    /// Feature flags.
    pub features: PlatformFeatures,
    /// Display refresh rate.
    pub refresh_rate_hz: Option<f64>,
    /// Network class.
    pub network: Option<NetworkClass>,
}

/// Per-category tiers and the weighted overall tier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityReport {
    /// Weighted combination of the categories.
    pub overall: Tier,
    /// Memory tier.
    pub memory: Tier,
    /// Processor tier.
    pub cpu: Tier,
    /// Graphics tier.
    pub gpu: Tier,
    /// Display tier.
    pub display: Tier,
    /// Network tier.
    pub network: Tier,
    /// Weighted score in `[1, 3]`.
    pub score: f64,
    /// What the probe reported.
    pub readings: Readings,
}

impl CapabilityReport {
    /// Quality preset for this device.
    #[must_use]
    pub fn recommend_quality(&self) -> QualityPreset {
        match self.overall {
            Tier::Low => QualityPreset::Low,
            Tier::Medium => QualityPreset::Balanced,
            Tier::High => QualityPreset::High,
        }
    }
}

/// Startup quality preset derived from a [`CapabilityReport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    /// Start in performance mode at reduced rates.
    Low,
    /// Quality mode at slightly reduced rates.
    Balanced,
    /// Quality mode at full rates.
    High,
}

impl QualityPreset {
    /// Initial master-scheduler mode.
    #[must_use]
    pub const fn initial_mode(self) -> PerformanceMode {
        match self {
            Self::Low => PerformanceMode::Performance,
            Self::Balanced | Self::High => PerformanceMode::Quality,
        }
    }

    /// Multiplier for every task's target rate.
    #[must_use]
    pub const fn rate_scale(self) -> f64 {
        match self {
            Self::Low => 0.5,
            Self::Balanced => 0.8,
            Self::High => 1.0,
        }
    }

    /// Frame budget for the tracker, in milliseconds.
    #[must_use]
    pub const fn frame_budget_ms(self) -> f64 {
        match self {
            Self::Low => 33.33,
            Self::Balanced | Self::High => 16.67,
        }
    }

    /// Writes this preset into the scheduler and tracker configuration.
    pub fn apply(self, scheduler: &mut SchedulerConfig, tracker: &mut TrackerConfig) {
        scheduler.initial_mode = self.initial_mode();
        scheduler.rate_scale = self.rate_scale();
        tracker
            .budgets
            .insert(FRAME.to_owned(), self.frame_budget_ms());
    }
}

const WEIGHT_MEMORY: f64 = 0.25;
const WEIGHT_CPU: f64 = 0.30;
const WEIGHT_GPU: f64 = 0.25;
const WEIGHT_DISPLAY: f64 = 0.10;
const WEIGHT_NETWORK: f64 = 0.10;

/// Runs the probe once and caches the report.
#[derive(Debug, Default)]
pub struct CapabilityClassifier {
    report: OnceCell<CapabilityReport>,
}

impl CapabilityClassifier {
    /// Creates a classifier that has not probed yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies the device, probing on the first call only.
    pub fn detect(&self, probe: &mut dyn CapabilityProbe) -> &CapabilityReport {
        self.report.get_or_init(|| classify(probe))
    }

    /// The cached report, if [`detect`](Self::detect) has run.
    #[must_use]
    pub fn report(&self) -> Option<&CapabilityReport> {
        self.report.get()
    }
}

/// Probes and grades the device.
pub fn classify(probe: &mut dyn CapabilityProbe) -> CapabilityReport {
    let mut readings = Readings::default();

    let memory = grade(
        "device memory",
        probe.device_memory_gb(),
        &mut readings.memory_gb,
        |gb| {
            if gb >= 8.0 {
                Tier::High
            } else if gb >= 4.0 {
                Tier::Medium
            } else {
                Tier::Low
            }
        },
    );

    let cores = grade(
        "core count",
        probe.logical_cores(),
        &mut readings.logical_cores,
        |n| match n {
            8.. => Tier::High,
            4..=7 => Tier::Medium,
            _ => Tier::Low,
        },
    );
    let bench = grade(
        "cpu benchmark",
        probe.cpu_benchmark_ms(),
        &mut readings.cpu_benchmark_ms,
        |ms| {
            if ms <= 5.0 {
                Tier::High
            } else if ms <= 15.0 {
                Tier::Medium
            } else {
                Tier::Low
            }
        },
    );
    let cpu = cores.min(bench);

    let gpu = grade("gpu", probe.gpu(), &mut readings.gpu, |g| {
        if !g.supported {
            Tier::Low
        } else if g.modern_api && g.max_texture_size >= 8_192 {
            Tier::High
        } else if g.max_texture_size >= 4_096 {
            Tier::Medium
        } else {
            Tier::Low
        }
    });

    match probe.features() {
        Ok(features) => readings.features = features,
        Err(err) => tracing::warn!(error = %err, "feature probe failed"),
    }

    let display = grade(
        "refresh rate",
        probe.refresh_rate_hz(),
        &mut readings.refresh_rate_hz,
        |hz| {
            if hz >= 110.0 {
                Tier::High
            } else if hz >= 55.0 {
                Tier::Medium
            } else {
                Tier::Low
            }
        },
    );

    let network = grade("network", probe.network(), &mut readings.network, |n| match n {
        NetworkClass::FourG => Tier::High,
        NetworkClass::ThreeG => Tier::Medium,
        NetworkClass::TwoG | NetworkClass::Slow2g => Tier::Low,
    });

    let score = memory.points() * WEIGHT_MEMORY
        + cpu.points() * WEIGHT_CPU
        + gpu.points() * WEIGHT_GPU
        + display.points() * WEIGHT_DISPLAY
        + network.points() * WEIGHT_NETWORK;
    let report = CapabilityReport {
        overall: Tier::from_points(score),
        memory,
        cpu,
        gpu,
        display,
        network,
        score,
        readings,
    };
    tracing::debug!(
        overall = ?report.overall,
        score,
        "device capabilities classified"
    );
    report
}

fn grade<T: Copy>(
    what: &'static str,
    answer: Result<Option<T>, ProbeError>,
    slot: &mut Option<T>,
    tier: impl FnOnce(T) -> Tier,
) -> Tier {
    match answer {
        Ok(Some(value)) => {
            *slot = Some(value);
            tier(value)
        }
        Ok(None) => Tier::Medium,
        Err(err) => {
            tracing::warn!(probe = what, error = %err, "capability probe failed");
            Tier::Low
        }
    }
}

/// Native probe: core count and a CPU micro-benchmark. Everything else is
/// unknown.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProbe;

impl CapabilityProbe for SystemProbe {
    fn device_memory_gb(&mut self) -> Result<Option<f64>, ProbeError> {
        Ok(None)
    }

    fn logical_cores(&mut self) -> Result<Option<usize>, ProbeError> {
        std::thread::available_parallelism()
            .map(|n| Some(n.get()))
            .map_err(|err| ProbeError::Failed(err.to_string()))
    }

    fn cpu_benchmark_ms(&mut self) -> Result<Option<f64>, ProbeError> {
        Ok(Some(cpu_benchmark_ms(&StdTimeSource::new())))
    }

    fn gpu(&mut self) -> Result<Option<GpuInfo>, ProbeError> {
        Ok(None)
    }

    fn features(&mut self) -> Result<PlatformFeatures, ProbeError> {
        Ok(PlatformFeatures {
            workers: true,
            ..PlatformFeatures::default()
        })
    }

    fn refresh_rate_hz(&mut self) -> Result<Option<f64>, ProbeError> {
        Ok(None)
    }

    fn network(&mut self) -> Result<Option<NetworkClass>, ProbeError> {
        Ok(None)
    }
}

/// Times a fixed floating-point workload against `time`.
pub fn cpu_benchmark_ms(time: &dyn TimeSource) -> f64 {
    let start = time.now();
    let mut acc = 0.0_f64;
    for i in 0..100_000_u32 {
        acc += black_box(f64::from(i)).sqrt();
    }
    black_box(acc);
    time.now().saturating_duration_since(start).as_millis_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeProbe {
        memory: Option<f64>,
        cores: Option<usize>,
        bench: Option<f64>,
        gpu: Option<GpuInfo>,
        refresh: Option<f64>,
        network: Option<NetworkClass>,
        calls: u32,
    }

    impl CapabilityProbe for FakeProbe {
        fn device_memory_gb(&mut self) -> Result<Option<f64>, ProbeError> {
            self.calls += 1;
            Ok(self.memory)
        }
        fn logical_cores(&mut self) -> Result<Option<usize>, ProbeError> {
            Ok(self.cores)
        }
        fn cpu_benchmark_ms(&mut self) -> Result<Option<f64>, ProbeError> {
            Ok(self.bench)
        }
        fn gpu(&mut self) -> Result<Option<GpuInfo>, ProbeError> {
            Ok(self.gpu)
        }
        fn features(&mut self) -> Result<PlatformFeatures, ProbeError> {
            Ok(PlatformFeatures::default())
        }
        fn refresh_rate_hz(&mut self) -> Result<Option<f64>, ProbeError> {
            Ok(self.refresh)
        }
        fn network(&mut self) -> Result<Option<NetworkClass>, ProbeError> {
            Ok(self.network)
        }
    }

    fn workstation() -> FakeProbe {
        FakeProbe {
            memory: Some(16.0),
            cores: Some(12),
            bench: Some(2.0),
            gpu: Some(GpuInfo {
                supported: true,
                modern_api: true,
                max_texture_size: 16_384,
            }),
            refresh: Some(144.0),
            network: Some(NetworkClass::FourG),
            calls: 0,
        }
    }

    #[test]
    fn strong_device_is_high() {
        let report = classify(&mut workstation());
        assert_eq!(report.overall, Tier::High);
        assert!((report.score - 3.0).abs() < 1e-9);
        assert_eq!(report.recommend_quality(), QualityPreset::High);
        assert_eq!(report.readings.logical_cores, Some(12));
    }

    #[test]
    fn every_probe_failing_is_low() {
        struct Nothing;
        impl CapabilityProbe for Nothing {}

        let report = classify(&mut Nothing);
        assert_eq!(report.overall, Tier::Low);
        assert_eq!(report.memory, Tier::Low);
        assert_eq!(report.readings, Readings::default());
        assert_eq!(report.recommend_quality(), QualityPreset::Low);
    }

    #[test]
    fn unknown_answers_grade_medium() {
        let report = classify(&mut FakeProbe::default());
        assert_eq!(report.overall, Tier::Medium);
        assert_eq!(report.recommend_quality(), QualityPreset::Balanced);
    }

    #[test]
    fn cpu_takes_the_weaker_signal() {
        let mut probe = workstation();
        probe.bench = Some(40.0);
        let report = classify(&mut probe);
        assert_eq!(report.cpu, Tier::Low, "many cores but a slow benchmark");
    }

    #[test]
    fn weak_gpu_and_network_pull_overall_down() {
        let mut probe = workstation();
        probe.memory = Some(2.0);
        probe.gpu = Some(GpuInfo::default());
        probe.network = Some(NetworkClass::TwoG);
        let report = classify(&mut probe);
        // 0.25 + 0.9 + 0.25 + 0.3 + 0.1
        assert!((report.score - 1.8).abs() < 1e-9);
        assert_eq!(report.overall, Tier::Medium);
    }

    #[test]
    fn classifier_probes_once() {
        let classifier = CapabilityClassifier::new();
        assert!(classifier.report().is_none());
        let mut probe = workstation();
        classifier.detect(&mut probe);
        classifier.detect(&mut probe);
        assert_eq!(probe.calls, 1);
        assert!(classifier.report().is_some());
    }

    #[test]
    fn preset_seeds_configs() {
        let mut scheduler = SchedulerConfig::default();
        let mut tracker = TrackerConfig::default();
        QualityPreset::Low.apply(&mut scheduler, &mut tracker);
        assert_eq!(scheduler.initial_mode, PerformanceMode::Performance);
        assert_eq!(scheduler.rate_scale, 0.5);
        assert_eq!(tracker.budgets.get(FRAME), Some(&33.33));
    }

    #[test]
    fn network_names_parse() {
        assert_eq!(NetworkClass::parse("slow-2g"), Some(NetworkClass::Slow2g));
        assert_eq!(NetworkClass::parse("4g"), Some(NetworkClass::FourG));
        assert_eq!(NetworkClass::parse("5g"), None);
    }

    #[test]
    fn system_probe_reports_cores() {
        let report = classify(&mut SystemProbe);
        assert!(report.readings.logical_cores.is_some_and(|n| n >= 1));
        assert!(report.readings.cpu_benchmark_ms.is_some());
    }
}
