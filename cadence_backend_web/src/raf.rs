// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `requestAnimationFrame` tick source and refresh-rate sampling.
//!
//! [`RafLoop`] calls back once per repaint with the callback's
//! [`DOMHighResTimeStamp`][mdn] converted to microsecond [`HostTime`] ticks.
//! [`RefreshRateSampler`] runs a short loop of its own to estimate the
//! display refresh rate.
//!
//! [mdn]: https://developer.mozilla.org/en-US/docs/Web/API/DOMHighResTimeStamp

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use cadence_core::time::HostTime;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;

// Direct global bindings instead of `web_sys::Window` methods, so nothing is
// fetched (or unwrapped) on every frame.
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = performance, js_name = "now")]
    pub(crate) fn performance_now() -> f64;

    #[wasm_bindgen(js_name = "requestAnimationFrame")]
    pub(crate) fn request_animation_frame(callback: &JsValue) -> i32;

    #[wasm_bindgen(js_name = "cancelAnimationFrame")]
    fn cancel_animation_frame(id: i32);
}

pub(crate) fn host_time_from_ms(ms: f64) -> HostTime {
    HostTime::from_millis_f64(ms)
}

/// A `requestAnimationFrame` loop.
///
/// Create with [`RafLoop::new`], then call [`start`](Self::start). The loop
/// re-registers itself each frame until [`stop`](Self::stop) is called or the
/// `RafLoop` is dropped.
pub struct RafLoop {
    inner: Rc<RafInner>,
}

type RafClosure = Closure<dyn FnMut(f64)>;

struct RafInner {
    /// The JS closure registered with `requestAnimationFrame`.
    ///
    /// Kept apart from `callback` so the closure can re-register itself
    /// while the callback is borrowed.
    closure: RefCell<Option<RafClosure>>,
    callback: RefCell<Box<dyn FnMut(HostTime)>>,
    frames: Cell<u64>,
    running: Cell<bool>,
    /// Id of the most recent request, for cancellation.
    raf_id: Cell<i32>,
}

impl RafLoop {
    /// Creates a loop that is not yet running.
    pub fn new(callback: impl FnMut(HostTime) + 'static) -> Self {
        Self {
            inner: Rc::new(RafInner {
                closure: RefCell::new(None),
                callback: RefCell::new(Box::new(callback)),
                frames: Cell::new(0),
                running: Cell::new(false),
                raf_id: Cell::new(0),
            }),
        }
    }

    /// Starts the loop. No-op if already running.
    pub fn start(&self) {
        if self.inner.running.get() {
            return;
        }
        self.inner.running.set(true);

        if self.inner.closure.borrow().is_none() {
            let weak = Rc::downgrade(&self.inner);
            let closure = Closure::wrap(Box::new(move |timestamp_ms: f64| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.running.get() {
                    return;
                }
                inner.frames.set(inner.frames.get() + 1);
                inner.callback.borrow_mut()(host_time_from_ms(timestamp_ms));

                if inner.running.get()
                    && let Some(ref closure) = *inner.closure.borrow()
                {
                    inner
                        .raf_id
                        .set(request_animation_frame(closure.as_ref().unchecked_ref()));
                }
            }) as Box<dyn FnMut(f64)>);
            *self.inner.closure.borrow_mut() = Some(closure);
        }

        if let Some(ref closure) = *self.inner.closure.borrow() {
            self.inner
                .raf_id
                .set(request_animation_frame(closure.as_ref().unchecked_ref()));
        }
    }

    /// Stops the loop and cancels the pending request. Can be restarted.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// A handle that can stop the loop from inside its own callback.
    pub(crate) fn handle(&self) -> RafHandle {
        RafHandle(Rc::downgrade(&self.inner))
    }

    /// Whether the loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Callbacks delivered since creation.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.inner.frames.get()
    }
}

impl RafInner {
    fn stop(&self) {
        if !self.running.get() {
            return;
        }
        self.running.set(false);
        cancel_animation_frame(self.raf_id.get());
    }
}

/// Weak stop handle for a [`RafLoop`].
#[derive(Clone)]
pub(crate) struct RafHandle(Weak<RafInner>);

impl RafHandle {
    pub(crate) fn stop(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.stop();
        }
    }
}

impl Drop for RafLoop {
    fn drop(&mut self) {
        self.stop();
        self.inner.closure.borrow_mut().take();
    }
}

impl core::fmt::Debug for RafLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RafLoop")
            .field("running", &self.inner.running.get())
            .field("frames", &self.inner.frames.get())
            .finish_non_exhaustive()
    }
}

/// Estimates the display refresh rate from repaint callback spacing.
///
/// The estimate is delivered once, after `frames` intervals have been
/// observed, and the sampler stops itself.
pub struct RefreshRateSampler {
    raf: RafLoop,
}

impl RefreshRateSampler {
    /// Starts sampling.
    pub fn start(frames: u32, on_done: impl FnOnce(Option<f64>) + 'static) -> Self {
        let frames = frames.max(1);
        let state = Rc::new(RefCell::new(SamplerState {
            first: None,
            last: None,
            seen: 0,
            on_done: Some(Box::new(on_done)),
        }));
        let handle: Rc<RefCell<Option<RafHandle>>> = Rc::default();
        let stopper = Rc::clone(&handle);
        let raf = RafLoop::new(move |now| {
            let mut state = state.borrow_mut();
            if state.on_done.is_none() {
                return;
            }
            state.first.get_or_insert(now);
            state.last = Some(now);
            if state.seen < frames {
                state.seen += 1;
                return;
            }
            let hz = state.rate(frames);
            if let Some(stopper) = stopper.borrow().as_ref() {
                stopper.stop();
            }
            if let Some(done) = state.on_done.take() {
                done(hz);
            }
        });
        *handle.borrow_mut() = Some(raf.handle());
        raf.start();
        Self { raf }
    }

    /// Whether the sampler is still collecting.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.raf.is_running()
    }

    /// Stops sampling early. The callback is never invoked.
    pub fn cancel(&self) {
        self.raf.stop();
    }
}

impl core::fmt::Debug for RefreshRateSampler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RefreshRateSampler")
            .field("raf", &self.raf)
            .finish()
    }
}

struct SamplerState {
    first: Option<HostTime>,
    last: Option<HostTime>,
    seen: u32,
    on_done: Option<Box<dyn FnOnce(Option<f64>)>>,
}

impl SamplerState {
    fn rate(&self, intervals: u32) -> Option<f64> {
        let span_ms = self
            .last?
            .saturating_duration_since(self.first?)
            .as_millis_f64();
        (span_ms > 0.0).then(|| f64::from(intervals) * 1_000.0 / span_ms)
    }
}
