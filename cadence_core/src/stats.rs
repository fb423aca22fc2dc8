// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Small rolling-statistics helpers shared by the schedulers and the tracker.

use std::collections::VecDeque;

/// Exponential moving average tracker.
#[derive(Clone, Copy, Debug)]
pub struct Ema {
    value: f64,
    alpha: f64,
    initialized: bool,
}

impl Ema {
    /// Creates an empty average with smoothing factor `alpha` (0.0–1.0).
    /// Smaller values smooth more.
    #[must_use]
    pub const fn new(alpha: f64) -> Self {
        Self {
            value: 0.0,
            alpha,
            initialized: false,
        }
    }

    /// Folds in a sample. The first sample sets the value exactly.
    pub fn update(&mut self, sample: f64) {
        if self.initialized {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        } else {
            self.value = sample;
            self.initialized = true;
        }
    }

    /// Current average, or `0.0` before the first sample.
    #[must_use]
    pub const fn get(&self) -> f64 {
        self.value
    }

    /// Whether at least one sample has been folded in.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Bounded window of the most recent samples.
///
/// Pushing beyond capacity evicts the oldest sample.
#[derive(Clone, Debug)]
pub struct SampleWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SampleWindow {
    /// Creates a window holding at most `capacity` samples (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample, evicting the oldest if full.
    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of retained samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mean of the retained samples, or `None` when empty.
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Largest retained sample, or `None` when empty.
    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    /// Most recent sample.
    #[must_use]
    pub fn last(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Samples oldest → newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Drops every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_first_sample_is_exact() {
        let mut ema = Ema::new(0.2);
        assert!(!ema.is_initialized());
        ema.update(10.0);
        assert_eq!(ema.get(), 10.0);
        ema.update(20.0);
        assert!((ema.get() - 12.0).abs() < 1e-9, "0.2 * 20 + 0.8 * 10");
    }

    #[test]
    fn window_evicts_oldest() {
        let mut w = SampleWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            w.push(v);
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.iter().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
        assert_eq!(w.mean(), Some(3.0));
        assert_eq!(w.max(), Some(4.0));
        assert_eq!(w.last(), Some(4.0));
    }

    #[test]
    fn empty_window_has_no_mean() {
        let mut w = SampleWindow::new(0);
        assert_eq!(w.capacity(), 1, "capacity is at least one");
        assert_eq!(w.mean(), None);
        w.push(5.0);
        w.clear();
        assert!(w.is_empty());
    }
}
