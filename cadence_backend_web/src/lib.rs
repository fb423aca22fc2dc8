// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Browser backend for cadence.
//!
//! This crate provides integration with browser APIs:
//!
//! - [`RafLoop`]: `requestAnimationFrame` tick source
//! - [`RefreshRateSampler`]: display refresh-rate estimate from rAF spacing
//! - [`DomSurface`]: [`RenderSurface`] over DOM elements
//! - [`BrowserProbe`] and [`BrowserMetrics`]: capability and health probes
//! - [`WebHost`]: owns a [`Runtime`](cadence_core::runtime::Runtime) and
//!   drives it from rAF, `setInterval`, and microtask/timeout flushes
//!
//! ```rust,ignore
//! let surface = DomSurface::from_window()?;
//! let host = WebHost::new(RuntimeConfig::default(), surface, None);
//! host.register("aurora", Priority::Normal, 30.0, aurora)?;
//! ```

mod dom;
mod host;
mod probe;
mod raf;

pub use cadence_core::surface::RenderSurface;
pub use dom::DomSurface;
pub use host::WebHost;
pub use probe::{BrowserMetrics, BrowserProbe};
pub use raf::{RafLoop, RefreshRateSampler};

use cadence_core::time::{HostTime, TimeSource};

/// Returns the current host time from `performance.now()`, in microsecond
/// ticks.
#[must_use]
pub fn now() -> HostTime {
    raf::host_time_from_ms(raf::performance_now())
}

/// [`TimeSource`] reading `performance.now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebTimeSource;

impl TimeSource for WebTimeSource {
    fn now(&self) -> HostTime {
        now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_convert_to_microseconds() {
        assert_eq!(raf::host_time_from_ms(16.5), HostTime(16_500));
        assert_eq!(raf::host_time_from_ms(0.0), HostTime(0));
    }
}
