// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Write coalescing for shared style properties.
//!
//! The [`WriteBatcher`] sits between effect tasks and the
//! [`RenderSurface`]. Writes are keyed by `(target, property)`; repeated
//! writes to the same slot before a flush collapse to the latest value, so
//! no intermediate value is ever applied.
//!
//! # Lanes
//!
//! - **Bypass** — properties on the critical allow-list are written through
//!   immediately. Use it for per-beat accents that must be visible the
//!   instant they change.
//! - **Batched** — everything else waits for [`WriteBatcher::flush`], which
//!   the runtime calls once at the end of every frame. When no frame is
//!   coming, the batcher asks its host to schedule a flush via
//!   [`WriteBatcher::take_flush_request`].
//! - **Direct** — while batching is disabled (by configuration or by the
//!   overrun cooldown) writes go straight to the surface.
//!
//! # Flushing
//!
//! Pending writes are grouped by target. A target with more than
//! [`BatchConfig::bulk_threshold`] changed properties is rewritten with a
//! single style-text replacement; smaller groups are applied per property.
//! A failed write falls back to per-property application for the rest of
//! that target and the flush continues.
//!
//! A flush slower than [`BatchConfig::warn_flush_ms`] is logged. A flush
//! slower than [`BatchConfig::disable_flush_ms`] disables batching for
//! [`BatchConfig::cooldown_ms`] so a stalled surface is not hit with ever
//! larger batches.

use core::fmt;
use core::mem;
use std::rc::Rc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::SurfaceError;
use crate::surface::{RenderSurface, format_declarations, parse_declarations};
use crate::time::{Duration, HostTime, TimeSource};

/// Handle naming one element of the render surface.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TargetId(pub u32);

impl TargetId {
    /// The default target (the document root) used when a write names none.
    pub const ROOT: Self = Self(0);
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({})", self.0)
    }
}

/// Destination for style writes handed to tasks.
///
/// Tasks never touch the surface directly; they enqueue through this trait
/// and the batcher decides when the write is applied.
pub trait StyleWriter {
    /// Requests `property = value` on `target` (the root when `None`).
    fn enqueue(&mut self, property: &str, value: &str, target: Option<TargetId>);
}

/// Configuration for the [`WriteBatcher`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Whether coalescing is enabled at all.
    pub enabled: bool,
    /// Pending-write count that forces an immediate flush.
    pub max_batch_size: usize,
    /// Delay used when a flush must be scheduled on a timer.
    pub flush_interval_ms: f64,
    /// Targets with more pending properties than this get one style-text
    /// rewrite instead of per-property writes.
    pub bulk_threshold: usize,
    /// Flush duration above which a warning is logged.
    pub warn_flush_ms: f64,
    /// Flush duration above which batching is disabled for a cooldown.
    pub disable_flush_ms: f64,
    /// Length of the batching cooldown after an overrun.
    pub cooldown_ms: f64,
    /// Properties written through immediately, bypassing coalescing.
    pub critical_properties: Vec<String>,
    /// Property prefix routed into the batch by the [`InterceptShim`].
    /// `None` disables interception.
    pub intercept_namespace: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 50,
            flush_interval_ms: 16.0,
            bulk_threshold: 3,
            warn_flush_ms: 8.0,
            disable_flush_ms: 16.0,
            cooldown_ms: 5_000.0,
            critical_properties: vec![
                "--fx-beat-pulse".to_owned(),
                "--fx-beat-intensity".to_owned(),
                "--fx-accent-flash".to_owned(),
            ],
            intercept_namespace: Some("--fx-".to_owned()),
        }
    }
}

/// The subset of batch parameters the budget policy adjusts at runtime.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchTuning {
    /// Pending-write count that forces an immediate flush.
    pub max_batch_size: usize,
    /// Delay used when a flush must be scheduled on a timer.
    pub flush_interval_ms: f64,
}

/// Runtime tuning hooks used by the
/// [`BudgetPolicy`](crate::policy::BudgetPolicy).
pub trait BatchControl {
    /// Current tuning.
    fn tuning(&self) -> BatchTuning;
    /// Replaces the tuning.
    fn set_tuning(&mut self, tuning: BatchTuning);
    /// Restores the configured defaults.
    fn reset_tuning(&mut self);
}

/// How the host should schedule the next flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushStrategy {
    /// On the next repaint callback.
    AnimationFrame,
    /// As a microtask, after the current task completes.
    Microtask,
    /// On a timer after `delay`.
    Timeout {
        /// Timer delay.
        delay: Duration,
    },
}

/// Which scheduling primitives the host offers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushCapabilities {
    /// Repaint callbacks are available.
    pub animation_frame: bool,
    /// Microtasks are available.
    pub microtask: bool,
}

impl Default for FlushCapabilities {
    fn default() -> Self {
        Self {
            animation_frame: true,
            microtask: true,
        }
    }
}

/// A write waiting for the next flush.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingWrite {
    /// Target element.
    pub target: TargetId,
    /// Property name.
    pub property: String,
    /// Latest value.
    pub value: String,
    /// When the latest value was enqueued.
    pub enqueued_at: HostTime,
}

/// What happened to one write.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    /// Critical property, written immediately.
    Bypassed,
    /// Batching inactive, written immediately.
    Direct,
    /// Added to the batch (or replaced an earlier value for the same slot).
    Queued {
        /// Whether this replaced a pending value.
        coalesced: bool,
    },
    /// Added to the batch, which then hit its size cap and flushed.
    Flushed(FlushReport),
}

/// Summary of one flush.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlushReport {
    /// Distinct targets touched.
    pub targets: usize,
    /// Writes applied.
    pub writes: usize,
    /// Targets rewritten with a single style-text replacement.
    pub bulk_targets: usize,
    /// Writes that failed even on the per-property path.
    pub failures: usize,
    /// Wall-clock cost of the flush.
    pub duration: Duration,
    /// Whether this flush overran and disabled batching.
    pub throttled: bool,
}

impl FlushReport {
    /// Whether the flush had anything to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes == 0 && self.failures == 0
    }
}

/// Running counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Writes accepted into the batch.
    pub queued: u64,
    /// Queued writes that replaced a pending value.
    pub coalesced: u64,
    /// Critical writes applied immediately.
    pub bypassed: u64,
    /// Writes applied immediately because batching was inactive.
    pub direct: u64,
    /// Non-empty flushes.
    pub flushes: u64,
    /// Writes that failed.
    pub failures: u64,
    /// Times batching was disabled by an overrun.
    pub throttles: u64,
}

/// Coalesces style writes and applies them to a [`RenderSurface`].
pub struct WriteBatcher<S> {
    surface: S,
    config: BatchConfig,
    tuning: BatchTuning,
    time: Rc<dyn TimeSource>,
    pending: Vec<PendingWrite>,
    index: HashMap<(TargetId, String), usize>,
    capabilities: FlushCapabilities,
    flush_in_flight: bool,
    flush_request: Option<FlushStrategy>,
    disabled_until: Option<HostTime>,
    stats: BatchStats,
}

impl<S> fmt::Debug for WriteBatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBatcher")
            .field("pending", &self.pending.len())
            .field("tuning", &self.tuning)
            .field("flush_in_flight", &self.flush_in_flight)
            .field("disabled_until", &self.disabled_until)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<S: RenderSurface> WriteBatcher<S> {
    /// Creates a batcher writing to `surface`.
    pub fn new(surface: S, config: BatchConfig, time: Rc<dyn TimeSource>) -> Self {
        let tuning = default_tuning(&config);
        Self {
            surface,
            config,
            tuning,
            time,
            pending: Vec::new(),
            index: HashMap::new(),
            capabilities: FlushCapabilities::default(),
            flush_in_flight: false,
            flush_request: None,
            disabled_until: None,
            stats: BatchStats::default(),
        }
    }

    /// Declares which scheduling primitives the host offers.
    pub fn set_flush_capabilities(&mut self, capabilities: FlushCapabilities) {
        self.capabilities = capabilities;
    }

    /// The wrapped surface.
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Mutable access to the wrapped surface.
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Current configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Enables or disables coalescing. Disabling flushes anything pending.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
        if !enabled {
            self.flush();
        }
    }

    /// Changes the configured size cap. Any runtime tuning is discarded.
    pub fn set_max_batch_size(&mut self, size: usize) {
        self.config.max_batch_size = size.max(1);
        self.tuning = default_tuning(&self.config);
    }

    /// Changes the configured timer-fallback delay. Any runtime tuning is
    /// discarded.
    pub fn set_flush_interval_ms(&mut self, ms: f64) {
        self.config.flush_interval_ms = ms;
        self.tuning = default_tuning(&self.config);
    }

    /// Number of writes waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Pending value for a slot, if any.
    pub fn pending_value(&self, target: TargetId, property: &str) -> Option<&str> {
        let &idx = self.index.get(&(target, property.to_owned()))?;
        Some(self.pending[idx].value.as_str())
    }

    /// Running counters.
    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Whether a flush has been requested and not yet performed.
    pub fn flush_in_flight(&self) -> bool {
        self.flush_in_flight
    }

    /// Whether batching is currently suspended by an overrun cooldown.
    pub fn is_throttled(&self) -> bool {
        self.disabled_until.is_some()
    }

    /// Whether `property` is on the critical allow-list.
    pub fn is_critical(&self, property: &str) -> bool {
        self.config.critical_properties.iter().any(|p| p == property)
    }

    /// Takes the pending flush request, if one was raised since the last
    /// call. The host schedules a call to [`flush`](Self::flush) accordingly.
    pub fn take_flush_request(&mut self) -> Option<FlushStrategy> {
        self.flush_request.take()
    }

    /// Routes one write and reports what happened to it.
    pub fn write(&mut self, property: &str, value: &str, target: Option<TargetId>) -> WriteOutcome {
        let target = target.unwrap_or(TargetId::ROOT);

        if self.is_critical(property) {
            self.stats.bypassed += 1;
            self.apply_now(target, property, value);
            return WriteOutcome::Bypassed;
        }

        let now = self.time.now();
        if !self.batching_active(now) {
            self.stats.direct += 1;
            self.apply_now(target, property, value);
            return WriteOutcome::Direct;
        }

        self.stats.queued += 1;
        let key = (target, property.to_owned());
        let coalesced = match self.index.get(&key) {
            Some(&idx) => {
                let slot = &mut self.pending[idx];
                value.clone_into(&mut slot.value);
                slot.enqueued_at = now;
                self.stats.coalesced += 1;
                true
            }
            None => {
                self.index.insert(key, self.pending.len());
                self.pending.push(PendingWrite {
                    target,
                    property: property.to_owned(),
                    value: value.to_owned(),
                    enqueued_at: now,
                });
                false
            }
        };

        if self.pending.len() >= self.tuning.max_batch_size {
            return WriteOutcome::Flushed(self.flush());
        }

        if !self.flush_in_flight {
            self.flush_in_flight = true;
            self.flush_request = Some(self.choose_strategy());
        }
        WriteOutcome::Queued { coalesced }
    }

    /// Applies every pending write.
    pub fn flush(&mut self) -> FlushReport {
        self.flush_in_flight = false;
        self.flush_request = None;
        if self.pending.is_empty() {
            return FlushReport::default();
        }

        let start = self.time.now();
        self.index.clear();
        let writes = mem::take(&mut self.pending);
        let mut report = FlushReport::default();

        for (target, group) in group_by_target(writes) {
            report.targets += 1;
            if group.len() > self.config.bulk_threshold {
                match self.apply_bulk(target, &group) {
                    Ok(()) => {
                        report.bulk_targets += 1;
                        report.writes += group.len();
                    }
                    Err(err) => {
                        tracing::debug!(
                            target_id = target.0,
                            error = %err,
                            "bulk style rewrite failed, applying per property"
                        );
                        self.apply_each(target, &group, &mut report);
                    }
                }
            } else {
                self.apply_each(target, &group, &mut report);
            }
        }

        let end = self.time.now();
        report.duration = end.saturating_duration_since(start);
        report.throttled = self.check_overrun(report.duration, end);
        self.stats.flushes += 1;
        tracing::trace!(
            targets = report.targets,
            writes = report.writes,
            bulk = report.bulk_targets,
            failures = report.failures,
            duration_ms = report.duration.as_millis_f64(),
            "flushed style batch"
        );
        report
    }

    /// Discards every pending write without applying it.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.index.clear();
        self.flush_in_flight = false;
        self.flush_request = None;
    }

    /// Returns a shim that routes namespaced writes into the batch and
    /// passes everything else through to the surface.
    pub fn intercept(&mut self) -> InterceptShim<'_, S> {
        InterceptShim { batcher: self }
    }

    fn batching_active(&mut self, now: HostTime) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self.disabled_until {
            Some(until) if now < until => false,
            Some(_) => {
                self.disabled_until = None;
                tracing::debug!("style batching re-enabled after cooldown");
                true
            }
            None => true,
        }
    }

    fn choose_strategy(&self) -> FlushStrategy {
        if self.surface.is_visible() && self.capabilities.animation_frame {
            FlushStrategy::AnimationFrame
        } else if self.capabilities.microtask {
            FlushStrategy::Microtask
        } else {
            FlushStrategy::Timeout {
                delay: Duration::from_millis_f64(self.tuning.flush_interval_ms),
            }
        }
    }

    fn apply_now(&mut self, target: TargetId, property: &str, value: &str) {
        if let Err(err) = self.surface.set_property(target, property, value) {
            self.stats.failures += 1;
            tracing::warn!(property, error = %err, "immediate style write failed");
        }
    }

    fn apply_bulk(&mut self, target: TargetId, group: &[PendingWrite]) -> Result<(), SurfaceError> {
        let existing = self.surface.style_text(target)?;
        let kept = parse_declarations(&existing)
            .into_iter()
            .filter(|(name, _)| !group.iter().any(|w| same_property(&w.property, name)))
            .collect::<Vec<_>>();
        let text = format_declarations(
            kept.iter()
                .map(|(n, v)| (n.as_str(), v.as_str()))
                .chain(group.iter().map(|w| (w.property.as_str(), w.value.as_str()))),
        );
        self.surface.set_style_text(target, &text)
    }

    fn apply_each(&mut self, target: TargetId, group: &[PendingWrite], report: &mut FlushReport) {
        for write in group {
            match self.surface.set_property(target, &write.property, &write.value) {
                Ok(()) => report.writes += 1,
                Err(err) => {
                    report.failures += 1;
                    self.stats.failures += 1;
                    tracing::warn!(
                        target_id = target.0,
                        property = %write.property,
                        error = %err,
                        "style write failed"
                    );
                }
            }
        }
    }

    fn check_overrun(&mut self, duration: Duration, now: HostTime) -> bool {
        let ms = duration.as_millis_f64();
        if ms > self.config.disable_flush_ms {
            self.disabled_until = Some(now + Duration::from_millis_f64(self.config.cooldown_ms));
            self.stats.throttles += 1;
            tracing::warn!(
                duration_ms = ms,
                cooldown_ms = self.config.cooldown_ms,
                "style flush overran the frame, batching disabled"
            );
            true
        } else {
            if ms > self.config.warn_flush_ms {
                tracing::warn!(duration_ms = ms, "slow style flush");
            }
            false
        }
    }
}

impl<S: RenderSurface> StyleWriter for WriteBatcher<S> {
    fn enqueue(&mut self, property: &str, value: &str, target: Option<TargetId>) {
        _ = self.write(property, value, target);
    }
}

impl<S: RenderSurface> BatchControl for WriteBatcher<S> {
    fn tuning(&self) -> BatchTuning {
        self.tuning
    }

    fn set_tuning(&mut self, tuning: BatchTuning) {
        self.tuning = BatchTuning {
            max_batch_size: tuning.max_batch_size.max(1),
            flush_interval_ms: tuning.flush_interval_ms.max(0.0),
        };
    }

    fn reset_tuning(&mut self) {
        self.tuning = default_tuning(&self.config);
    }
}

fn default_tuning(config: &BatchConfig) -> BatchTuning {
    BatchTuning {
        max_batch_size: config.max_batch_size.max(1),
        flush_interval_ms: config.flush_interval_ms.max(0.0),
    }
}

/// Custom properties are case-sensitive; standard ones are not.
fn same_property(a: &str, b: &str) -> bool {
    if a.starts_with("--") || b.starts_with("--") {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

/// Groups writes by target, keeping first-seen target order and write order.
fn group_by_target(writes: Vec<PendingWrite>) -> Vec<(TargetId, Vec<PendingWrite>)> {
    let mut groups: Vec<(TargetId, Vec<PendingWrite>)> = Vec::new();
    for write in writes {
        match groups.iter_mut().find(|(t, _)| *t == write.target) {
            Some((_, group)) => group.push(write),
            None => groups.push((write.target, vec![write])),
        }
    }
    groups
}

/// Where the [`InterceptShim`] sent a write.
#[derive(Clone, Debug, PartialEq)]
pub enum Routed {
    /// Inside the namespace: handed to the batcher.
    Batched(WriteOutcome),
    /// Outside the namespace: written to the surface unchanged.
    PassedThrough,
}

/// Compatibility adapter for call sites that write the surface directly.
///
/// Writes to properties under [`BatchConfig::intercept_namespace`] are
/// redirected into the batch; all other writes reach the surface untouched.
pub struct InterceptShim<'a, S> {
    batcher: &'a mut WriteBatcher<S>,
}

impl<S> fmt::Debug for InterceptShim<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptShim")
            .field("namespace", &self.batcher.config.intercept_namespace)
            .finish()
    }
}

impl<S: RenderSurface> InterceptShim<'_, S> {
    /// Sets a property, batching it when it is inside the namespace.
    pub fn set_property(
        &mut self,
        target: TargetId,
        property: &str,
        value: &str,
    ) -> Result<Routed, SurfaceError> {
        let intercepted = self
            .batcher
            .config
            .intercept_namespace
            .as_deref()
            .is_some_and(|ns| !ns.is_empty() && property.starts_with(ns));
        if intercepted {
            return Ok(Routed::Batched(
                self.batcher.write(property, value, Some(target)),
            ));
        }
        self.batcher.surface.set_property(target, property, value)?;
        Ok(Routed::PassedThrough)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{MemorySurface, SurfaceOp};
    use crate::time::ManualTimeSource;

    fn batcher() -> (WriteBatcher<MemorySurface>, ManualTimeSource) {
        batcher_with(BatchConfig::default())
    }

    fn batcher_with(config: BatchConfig) -> (WriteBatcher<MemorySurface>, ManualTimeSource) {
        let time = ManualTimeSource::new();
        let b = WriteBatcher::new(MemorySurface::new(), config, Rc::new(time.clone()));
        (b, time)
    }

    /// Surface that advances the manual clock on every write.
    struct SlowSurface {
        inner: MemorySurface,
        time: ManualTimeSource,
        cost_ms: f64,
    }

    impl RenderSurface for SlowSurface {
        fn set_property(
            &mut self,
            target: TargetId,
            property: &str,
            value: &str,
        ) -> Result<(), SurfaceError> {
            self.time.advance_ms(self.cost_ms);
            self.inner.set_property(target, property, value)
        }

        fn style_text(&self, target: TargetId) -> Result<String, SurfaceError> {
            self.inner.style_text(target)
        }

        fn set_style_text(&mut self, target: TargetId, text: &str) -> Result<(), SurfaceError> {
            self.time.advance_ms(self.cost_ms);
            self.inner.set_style_text(target, text)
        }
    }

    #[test]
    fn last_write_wins_within_a_flush() {
        let (mut b, _) = batcher();
        let t = TargetId(7);
        b.enqueue("--fx-p1", "red", Some(t));
        b.enqueue("--fx-p1", "blue", Some(t));
        b.enqueue("--fx-p2", "green", Some(t));
        assert_eq!(b.pending_len(), 2);
        assert_eq!(b.pending_value(t, "--fx-p1"), Some("blue"));

        let report = b.flush();
        assert_eq!(report.writes, 2);
        assert_eq!(b.stats().flushes, 1, "exactly one flush cycle");
        assert_eq!(b.stats().coalesced, 1);

        let s = b.surface();
        assert_eq!(s.property(t, "--fx-p1"), Some("blue"));
        assert_eq!(s.property(t, "--fx-p2"), Some("green"));
        assert_eq!(s.writes_to("--fx-p1"), 1, "red is never applied");
        assert!(
            !s.ops().iter().any(|op| matches!(op, SurfaceOp::SetProperty { value, .. } if value == "red")),
            "intermediate value must never reach the surface"
        );
    }

    #[test]
    fn critical_properties_bypass_the_batch() {
        let (mut b, _) = batcher();
        let outcome = b.write("--fx-beat-pulse", "1", None);
        assert_eq!(outcome, WriteOutcome::Bypassed);
        assert_eq!(b.pending_len(), 0);
        assert_eq!(b.surface().property(TargetId::ROOT, "--fx-beat-pulse"), Some("1"));
        assert!(b.take_flush_request().is_none(), "bypass needs no flush");
    }

    #[test]
    fn bypass_wins_over_queued_write_until_flush() {
        let (mut b, _) = batcher();
        b.enqueue("--fx-beat-pulse", "0.2", None);
        assert_eq!(b.surface().property(TargetId::ROOT, "--fx-beat-pulse"), Some("0.2"));
        b.enqueue("--fx-glow", "0.3", None);
        assert_eq!(b.surface().property(TargetId::ROOT, "--fx-glow"), None);
    }

    #[test]
    fn only_one_flush_request_in_flight() {
        let (mut b, _) = batcher();
        b.enqueue("--fx-a", "1", None);
        assert_eq!(b.take_flush_request(), Some(FlushStrategy::AnimationFrame));
        b.enqueue("--fx-b", "2", None);
        assert_eq!(b.take_flush_request(), None, "already in flight");
        assert!(b.flush_in_flight());

        b.flush();
        assert!(!b.flush_in_flight());
        b.enqueue("--fx-c", "3", None);
        assert!(b.take_flush_request().is_some(), "new batch, new request");
    }

    #[test]
    fn hidden_surface_flushes_on_microtask() {
        let (mut b, _) = batcher();
        b.surface_mut().set_visible(false);
        b.enqueue("--fx-a", "1", None);
        assert_eq!(b.take_flush_request(), Some(FlushStrategy::Microtask));
    }

    #[test]
    fn timeout_fallback_without_frames_or_microtasks() {
        let (mut b, _) = batcher();
        b.set_flush_capabilities(FlushCapabilities {
            animation_frame: false,
            microtask: false,
        });
        b.enqueue("--fx-a", "1", None);
        assert_eq!(
            b.take_flush_request(),
            Some(FlushStrategy::Timeout {
                delay: Duration::from_millis(16)
            })
        );
    }

    #[test]
    fn size_cap_flushes_immediately() {
        let config = BatchConfig {
            max_batch_size: 3,
            ..BatchConfig::default()
        };
        let (mut b, _) = batcher_with(config);
        assert!(matches!(b.write("--fx-a", "1", None), WriteOutcome::Queued { .. }));
        assert!(matches!(b.write("--fx-b", "1", None), WriteOutcome::Queued { .. }));
        match b.write("--fx-c", "1", None) {
            WriteOutcome::Flushed(report) => assert_eq!(report.writes, 3),
            other => panic!("expected a cap flush, got {other:?}"),
        }
        assert_eq!(b.pending_len(), 0);
        assert!(!b.flush_in_flight());
    }

    #[test]
    fn large_groups_use_one_style_rewrite() {
        let (mut b, _) = batcher();
        let t = TargetId(1);
        b.surface_mut().set_style_text(t, "color: red; --fx-a: old;").unwrap();
        b.surface_mut().clear_ops();

        for (p, v) in [("--fx-a", "1"), ("--fx-b", "2"), ("--fx-c", "3"), ("--fx-d", "4")] {
            b.enqueue(p, v, Some(t));
        }
        b.enqueue("--fx-z", "9", Some(TargetId(2)));

        let report = b.flush();
        assert_eq!(report.targets, 2);
        assert_eq!(report.bulk_targets, 1);
        assert_eq!(report.writes, 5);

        let s = b.surface();
        assert_eq!(
            s.style_text(t).unwrap(),
            "color: red; --fx-a: 1; --fx-b: 2; --fx-c: 3; --fx-d: 4;",
            "changed declarations are replaced, others kept"
        );
        assert_eq!(s.ops().len(), 2, "one rewrite plus one direct write");
    }

    #[test]
    fn style_rewrite_preserves_values_containing_semicolons() {
        let (mut b, _) = batcher();
        let t = TargetId(1);
        let image = r#"url("data:image/svg+xml;utf8,<svg/>")"#;
        b.surface_mut().set_property(t, "background-image", image).unwrap();

        for (p, v) in [("--fx-a", "1"), ("--fx-b", "2"), ("--fx-c", "3"), ("--fx-d", "4")] {
            b.enqueue(p, v, Some(t));
        }
        assert_eq!(b.flush().bulk_targets, 1);
        assert_eq!(b.surface().property(t, "background-image"), Some(image));
        assert_eq!(b.surface().property(t, "--fx-d"), Some("4"));
    }

    #[test]
    fn failed_bulk_rewrite_falls_back_per_property() {
        let (mut b, _) = batcher();
        b.surface_mut().reject_property("--fx-bad");
        for (p, v) in [("--fx-a", "1"), ("--fx-bad", "x"), ("--fx-c", "3"), ("--fx-d", "4")] {
            b.enqueue(p, v, None);
        }
        let report = b.flush();
        assert_eq!(report.bulk_targets, 0);
        assert_eq!(report.failures, 1);
        assert_eq!(report.writes, 3, "remaining writes are not dropped");
        assert_eq!(b.surface().property(TargetId::ROOT, "--fx-d"), Some("4"));
    }

    #[test]
    fn failed_direct_write_does_not_stop_the_flush() {
        let (mut b, _) = batcher();
        b.surface_mut().reject_property("--fx-a");
        b.enqueue("--fx-a", "1", None);
        b.enqueue("--fx-b", "2", None);
        let report = b.flush();
        assert_eq!(report.failures, 1);
        assert_eq!(report.writes, 1);
        assert_eq!(b.stats().failures, 1);
        assert_eq!(b.surface().property(TargetId::ROOT, "--fx-b"), Some("2"));
    }

    #[test]
    fn overrun_disables_batching_for_cooldown() {
        let time = ManualTimeSource::new();
        let surface = SlowSurface {
            inner: MemorySurface::new(),
            time: time.clone(),
            cost_ms: 9.0,
        };
        let mut b = WriteBatcher::new(surface, BatchConfig::default(), Rc::new(time.clone()));

        b.enqueue("--fx-a", "1", None);
        b.enqueue("--fx-b", "1", None);
        let report = b.flush();
        assert!(report.throttled, "18 ms flush exceeds the 16 ms limit");
        assert!(b.is_throttled());

        assert_eq!(b.write("--fx-a", "2", None), WriteOutcome::Direct);
        assert_eq!(b.pending_len(), 0);

        time.advance_ms(5_001.0);
        assert!(matches!(b.write("--fx-a", "3", None), WriteOutcome::Queued { .. }));
        assert!(!b.is_throttled(), "cooldown elapsed");
        assert_eq!(b.stats().throttles, 1);
    }

    #[test]
    fn slow_but_tolerable_flush_keeps_batching() {
        let time = ManualTimeSource::new();
        let surface = SlowSurface {
            inner: MemorySurface::new(),
            time: time.clone(),
            cost_ms: 10.0,
        };
        let mut b = WriteBatcher::new(surface, BatchConfig::default(), Rc::new(time));
        b.enqueue("--fx-a", "1", None);
        let report = b.flush();
        assert!(!report.throttled);
        assert!(!b.is_throttled());
    }

    #[test]
    fn disabled_batching_writes_through() {
        let (mut b, _) = batcher();
        b.enqueue("--fx-a", "1", None);
        b.set_enabled(false);
        assert_eq!(b.surface().property(TargetId::ROOT, "--fx-a"), Some("1"), "pending flushed");
        assert_eq!(b.write("--fx-b", "2", None), WriteOutcome::Direct);
    }

    #[test]
    fn tuning_is_clamped_and_resettable() {
        let (mut b, _) = batcher();
        b.set_tuning(BatchTuning {
            max_batch_size: 0,
            flush_interval_ms: -4.0,
        });
        assert_eq!(b.tuning().max_batch_size, 1);
        assert_eq!(b.tuning().flush_interval_ms, 0.0);
        b.reset_tuning();
        assert_eq!(b.tuning().max_batch_size, 50);
    }

    #[test]
    fn intercept_routes_only_the_namespace() {
        let (mut b, _) = batcher();
        let t = TargetId(4);
        {
            let mut shim = b.intercept();
            let routed = shim.set_property(t, "--fx-hue", "120").unwrap();
            assert!(matches!(routed, Routed::Batched(WriteOutcome::Queued { .. })));
            let routed = shim.set_property(t, "opacity", "0.5").unwrap();
            assert_eq!(routed, Routed::PassedThrough);
        }
        assert_eq!(b.surface().property(t, "opacity"), Some("0.5"));
        assert_eq!(b.surface().property(t, "--fx-hue"), None, "still pending");
        b.flush();
        assert_eq!(b.surface().property(t, "--fx-hue"), Some("120"));
    }

    #[test]
    fn intercept_disabled_passes_everything_through() {
        let config = BatchConfig {
            intercept_namespace: None,
            ..BatchConfig::default()
        };
        let (mut b, _) = batcher_with(config);
        let routed = b.intercept().set_property(TargetId::ROOT, "--fx-hue", "1").unwrap();
        assert_eq!(routed, Routed::PassedThrough);
    }

    #[test]
    fn standard_properties_match_case_insensitively() {
        assert!(same_property("Color", "color"));
        assert!(!same_property("--FX-a", "--fx-a"));
    }
}
