// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Browser capability and metrics probes.
//!
//! Most of what is probed here is non-standard or unevenly supported
//! (`navigator.deviceMemory`, `navigator.connection`, `performance.memory`),
//! so everything is read reflectively with `js_sys::Reflect`. A missing
//! property is "unknown", a throwing one is an error.

use cadence_core::capability::{
    CapabilityProbe, GpuInfo, NetworkClass, PlatformFeatures, cpu_benchmark_ms,
};
use cadence_core::error::ProbeError;
use cadence_core::perf::{MemoryUsage, MetricsProbe, ProbeSample};
use js_sys::{Array, Function, Reflect};
use wasm_bindgen::{JsCast as _, JsValue};
use web_sys::{Document, Navigator, Window};

use crate::WebTimeSource;

const MAX_TEXTURE_SIZE: u32 = 0x0D33;

fn failed(err: &JsValue) -> ProbeError {
    ProbeError::Failed(err.as_string().unwrap_or_else(|| format!("{err:?}")))
}

fn get(target: &JsValue, key: &str) -> Result<JsValue, ProbeError> {
    Reflect::get(target, &JsValue::from_str(key)).map_err(|e| failed(&e))
}

fn has(target: &JsValue, key: &str) -> bool {
    Reflect::has(target, &JsValue::from_str(key)).unwrap_or(false)
}

fn method(target: &JsValue, key: &str) -> Result<Function, ProbeError> {
    get(target, key)?
        .dyn_into::<Function>()
        .map_err(|_| ProbeError::Failed(format!("`{key}` is not a function")))
}

fn present(value: JsValue) -> Option<JsValue> {
    (!value.is_undefined() && !value.is_null()).then_some(value)
}

/// [`CapabilityProbe`] backed by browser globals.
pub struct BrowserProbe {
    window: Window,
    navigator: Navigator,
    document: Document,
    refresh_rate_hz: Option<f64>,
}

impl core::fmt::Debug for BrowserProbe {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BrowserProbe")
            .field("refresh_rate_hz", &self.refresh_rate_hz)
            .finish_non_exhaustive()
    }
}

impl BrowserProbe {
    /// Creates a probe for the current window.
    pub fn new() -> Result<Self, ProbeError> {
        let window = web_sys::window().ok_or(ProbeError::Unsupported("window"))?;
        let document = window.document().ok_or(ProbeError::Unsupported("document"))?;
        Ok(Self {
            navigator: window.navigator(),
            window,
            document,
            refresh_rate_hz: None,
        })
    }

    /// Supplies a refresh rate measured beforehand, e.g. by a
    /// [`RefreshRateSampler`](crate::RefreshRateSampler).
    #[must_use]
    pub fn with_refresh_rate(mut self, hz: Option<f64>) -> Self {
        self.refresh_rate_hz = hz;
        self
    }
}

impl CapabilityProbe for BrowserProbe {
    fn device_memory_gb(&mut self) -> Result<Option<f64>, ProbeError> {
        Ok(present(get(&self.navigator, "deviceMemory")?).and_then(|v| v.as_f64()))
    }

    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "hardwareConcurrency is a small positive integer"
    )]
    fn logical_cores(&mut self) -> Result<Option<usize>, ProbeError> {
        let n = self.navigator.hardware_concurrency();
        Ok((n >= 1.0).then_some(n as usize))
    }

    fn cpu_benchmark_ms(&mut self) -> Result<Option<f64>, ProbeError> {
        Ok(Some(cpu_benchmark_ms(&WebTimeSource)))
    }

    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "MAX_TEXTURE_SIZE is a small positive integer"
    )]
    fn gpu(&mut self) -> Result<Option<GpuInfo>, ProbeError> {
        let canvas: JsValue = self
            .document
            .create_element("canvas")
            .map_err(|e| failed(&e))?
            .into();
        let get_context = method(&canvas, "getContext")?;

        let webgl2 = get_context
            .call1(&canvas, &JsValue::from_str("webgl2"))
            .ok()
            .and_then(present);
        let (context, modern) = match webgl2 {
            Some(ctx) => (Some(ctx), true),
            None => (
                get_context
                    .call1(&canvas, &JsValue::from_str("webgl"))
                    .ok()
                    .and_then(present),
                false,
            ),
        };
        let Some(context) = context else {
            return Ok(Some(GpuInfo::default()));
        };

        let max_texture_size = method(&context, "getParameter")?
            .call1(&context, &JsValue::from(MAX_TEXTURE_SIZE))
            .map_err(|e| failed(&e))?
            .as_f64()
            .unwrap_or(0.0) as u32;
        let webgpu = has(&self.navigator, "gpu");

        Ok(Some(GpuInfo {
            supported: true,
            modern_api: modern || webgpu,
            max_texture_size,
        }))
    }

    fn features(&mut self) -> Result<PlatformFeatures, ProbeError> {
        let reduced_motion = method(&self.window, "matchMedia")?
            .call1(&self.window, &JsValue::from_str("(prefers-reduced-motion: reduce)"))
            .map_err(|e| failed(&e))
            .and_then(|query| get(&query, "matches"))?
            .as_bool()
            .unwrap_or(false);
        Ok(PlatformFeatures {
            offscreen_rendering: has(&self.window, "OffscreenCanvas"),
            workers: has(&self.window, "Worker"),
            reduced_motion,
        })
    }

    fn refresh_rate_hz(&mut self) -> Result<Option<f64>, ProbeError> {
        Ok(self.refresh_rate_hz)
    }

    fn network(&mut self) -> Result<Option<NetworkClass>, ProbeError> {
        let Some(connection) = present(get(&self.navigator, "connection")?) else {
            return Ok(None);
        };
        Ok(get(&connection, "effectiveType")?
            .as_string()
            .and_then(|t| NetworkClass::parse(&t)))
    }
}

/// [`MetricsProbe`] reading heap usage, DOM size, and paint timings.
pub struct BrowserMetrics {
    document: Document,
    performance: JsValue,
}

impl core::fmt::Debug for BrowserMetrics {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BrowserMetrics").finish_non_exhaustive()
    }
}

impl BrowserMetrics {
    /// Creates a metrics probe for the current window.
    pub fn new() -> Result<Self, ProbeError> {
        let window = web_sys::window().ok_or(ProbeError::Unsupported("window"))?;
        let document = window.document().ok_or(ProbeError::Unsupported("document"))?;
        let performance = get(&window, "performance")?;
        Ok(Self {
            document,
            performance,
        })
    }

    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "heap sizes are positive integers well inside f64 precision"
    )]
    fn memory(&self) -> Result<Option<MemoryUsage>, ProbeError> {
        let Some(memory) = present(get(&self.performance, "memory")?) else {
            return Ok(None);
        };
        let used = get(&memory, "usedJSHeapSize")?.as_f64();
        let limit = get(&memory, "jsHeapSizeLimit")?.as_f64();
        Ok(used.zip(limit).map(|(used, limit)| MemoryUsage {
            used_bytes: used as u64,
            limit_bytes: limit as u64,
        }))
    }

    fn paint_entry(&self, kind: &str, name: Option<&str>) -> Result<Option<f64>, ProbeError> {
        let entries: Array = method(&self.performance, "getEntriesByType")?
            .call1(&self.performance, &JsValue::from_str(kind))
            .map_err(|e| failed(&e))?
            .dyn_into()
            .map_err(|_| ProbeError::Failed("getEntriesByType returned a non-array".into()))?;
        let mut found = None;
        for entry in entries.iter() {
            let matches = match name {
                Some(name) => get(&entry, "name")?.as_string().as_deref() == Some(name),
                None => true,
            };
            if matches {
                found = get(&entry, "startTime")?.as_f64();
            }
        }
        Ok(found)
    }
}

impl MetricsProbe for BrowserMetrics {
    fn sample(&mut self) -> Result<ProbeSample, ProbeError> {
        Ok(ProbeSample {
            memory: lenient("memory", self.memory()),
            dom_nodes: Some(u64::from(
                self.document.get_elements_by_tag_name("*").length(),
            )),
            first_contentful_paint_ms: lenient(
                "first-contentful-paint",
                self.paint_entry("paint", Some("first-contentful-paint")),
            ),
            largest_contentful_paint_ms: lenient(
                "largest-contentful-paint",
                self.paint_entry("largest-contentful-paint", None),
            ),
        })
    }
}

/// A field that fails to read is reported as unknown, leaving the rest of
/// the sample intact.
fn lenient<T>(field: &'static str, read: Result<Option<T>, ProbeError>) -> Option<T> {
    read.unwrap_or_else(|err| {
        tracing::debug!(field, error = %err, "metric unavailable");
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_reads_become_unknown() {
        assert_eq!(lenient("memory", Ok(Some(3_u64))), Some(3));
        assert_eq!(lenient::<u64>("memory", Ok(None)), None);
        assert_eq!(
            lenient::<f64>(
                "largest-contentful-paint",
                Err(ProbeError::Failed("denied".into()))
            ),
            None
        );
    }
}
