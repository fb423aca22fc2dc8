// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wires a [`Runtime`] to the browser event loop.
//!
//! [`WebHost`] owns the runtime and the three things that drive it:
//!
//! - a [`RafLoop`] that runs frames while any frame task is registered,
//! - a `setInterval` timer that runs the timer scheduler while any timer
//!   task is registered (it keeps firing while the tab is hidden, when
//!   repaint callbacks stop),
//! - flush scheduling for writes made outside a frame, using the strategy
//!   the batcher asks for.
//!
//! Deferred flush callbacks are one-shot JS closures that own themselves and
//! hold the host weakly, so one firing after the host is dropped does
//! nothing.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cadence_core::batch::{FlushCapabilities, FlushStrategy, TargetId, WriteOutcome};
use cadence_core::config::RuntimeConfig;
use cadence_core::events::{RuntimeEvent, SubscriptionId};
use cadence_core::runtime::Runtime;
use cadence_core::scheduler::LoopSignal;
use cadence_core::task::{Priority, Task, TaskId};
use cadence_core::time::TimeSource;
use serde_json::Value;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;

use crate::dom::DomSurface;
use crate::probe::{BrowserMetrics, BrowserProbe};
use crate::raf::{RafLoop, request_animation_frame};
use crate::{WebTimeSource, now};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = "setInterval")]
    fn set_interval(callback: &JsValue, ms: i32) -> i32;

    #[wasm_bindgen(js_name = "clearInterval")]
    fn clear_interval(id: i32);

    #[wasm_bindgen(js_name = "setTimeout")]
    fn set_timeout(callback: &JsValue, ms: i32) -> i32;

    #[wasm_bindgen(js_name = "queueMicrotask")]
    fn queue_microtask(callback: &JsValue);
}

type Callback = Closure<dyn FnMut()>;

struct HostInner {
    runtime: RefCell<Runtime<DomSurface>>,
    raf: RefCell<Option<RafLoop>>,
    interval_id: Cell<Option<i32>>,
    interval: RefCell<Option<Callback>>,
}

/// Browser host for a [`Runtime`] over a [`DomSurface`].
pub struct WebHost {
    inner: Rc<HostInner>,
}

impl core::fmt::Debug for WebHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WebHost")
            .field("frames_running", &self.frames_running())
            .field("timer_running", &self.inner.interval_id.get().is_some())
            .finish_non_exhaustive()
    }
}

impl WebHost {
    /// Classifies the device, seeds `config` from the result, and installs
    /// the browser metrics probe.
    ///
    /// Pass a refresh rate measured with a
    /// [`RefreshRateSampler`](crate::RefreshRateSampler) if one is available.
    pub fn new(config: RuntimeConfig, surface: DomSurface, refresh_rate_hz: Option<f64>) -> Self {
        let time: Rc<dyn TimeSource> = Rc::new(WebTimeSource);
        let mut runtime = match BrowserProbe::new() {
            Ok(probe) => Runtime::with_capabilities(
                config,
                surface,
                time,
                &mut probe.with_refresh_rate(refresh_rate_hz),
            ),
            Err(err) => {
                tracing::warn!(error = %err, "capability probe unavailable");
                Runtime::new(config, surface, time)
            }
        };
        match BrowserMetrics::new() {
            Ok(metrics) => runtime.tracker_mut().set_probe(Box::new(metrics)),
            Err(err) => tracing::warn!(error = %err, "metrics probe unavailable"),
        }
        runtime
            .batcher_mut()
            .set_flush_capabilities(FlushCapabilities {
                animation_frame: true,
                microtask: true,
            });
        Self::from_runtime(runtime)
    }

    /// Hosts an already-built runtime.
    pub fn from_runtime(runtime: Runtime<DomSurface>) -> Self {
        let inner = Rc::new(HostInner {
            runtime: RefCell::new(runtime),
            raf: RefCell::new(None),
            interval_id: Cell::new(None),
            interval: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        *inner.raf.borrow_mut() = Some(RafLoop::new(move |now| {
            if let Some(inner) = weak.upgrade() {
                inner.runtime.borrow_mut().frame(now);
                inner.schedule_flush();
            }
        }));

        let weak = Rc::downgrade(&inner);
        *inner.interval.borrow_mut() = Some(Closure::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.runtime.borrow_mut().timer_tick(now());
                inner.schedule_flush();
            }
        }));

        Self { inner }
    }

    /// Registers a frame task, starting the repaint loop if it was idle.
    pub fn register(
        &self,
        id: impl Into<TaskId>,
        priority: Priority,
        target_rate: f64,
        task: impl Task + 'static,
    ) -> cadence_core::Result<()> {
        let signal = self
            .inner
            .runtime
            .borrow_mut()
            .register(id, priority, target_rate, task)?;
        self.inner.apply_frame_signal(signal);
        Ok(())
    }

    /// Removes a frame task, stopping the repaint loop if none remain.
    pub fn unregister(&self, id: impl Into<TaskId>) -> cadence_core::Result<()> {
        let signal = self.inner.runtime.borrow_mut().unregister(id)?;
        self.inner.apply_frame_signal(signal);
        Ok(())
    }

    /// Registers a timer task, starting the interval if it was idle.
    pub fn register_timer(
        &self,
        id: impl Into<TaskId>,
        priority: Priority,
        target_rate: f64,
        task: impl Task + 'static,
    ) -> cadence_core::Result<()> {
        let signal = self
            .inner
            .runtime
            .borrow_mut()
            .register_timer(id, priority, target_rate, task)?;
        self.inner.apply_timer_signal(signal);
        Ok(())
    }

    /// Removes a timer task, clearing the interval if none remain.
    pub fn unregister_timer(&self, id: impl Into<TaskId>) -> cadence_core::Result<()> {
        let signal = self.inner.runtime.borrow_mut().unregister_timer(id)?;
        self.inner.apply_timer_signal(signal);
        Ok(())
    }

    /// Writes a property from an event handler and schedules its flush.
    pub fn write(&self, property: &str, value: &str, target: Option<TargetId>) -> WriteOutcome {
        let outcome = self.inner.runtime.borrow_mut().write(property, value, target);
        self.inner.schedule_flush();
        outcome
    }

    /// Applies a settings change.
    pub fn apply_setting(&self, key: &str, value: &Value) -> cadence_core::Result<()> {
        self.inner.runtime.borrow_mut().apply_setting(key, value)
    }

    /// Adds an event listener.
    ///
    /// Listeners run while the runtime is borrowed and must not call back
    /// into the host.
    pub fn subscribe(&self, listener: impl FnMut(&RuntimeEvent) + 'static) -> SubscriptionId {
        self.inner.runtime.borrow_mut().subscribe(listener)
    }

    /// Removes an event listener.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.runtime.borrow_mut().unsubscribe(id)
    }

    /// Runs `f` with the runtime borrowed.
    pub fn with_runtime<R>(&self, f: impl FnOnce(&mut Runtime<DomSurface>) -> R) -> R {
        f(&mut self.inner.runtime.borrow_mut())
    }

    /// Whether the repaint loop is running.
    #[must_use]
    pub fn frames_running(&self) -> bool {
        self.inner
            .raf
            .borrow()
            .as_ref()
            .is_some_and(RafLoop::is_running)
    }
}

impl HostInner {
    fn apply_frame_signal(&self, signal: LoopSignal) {
        let raf = self.raf.borrow();
        let Some(raf) = raf.as_ref() else {
            return;
        };
        match signal {
            LoopSignal::Start => {
                tracing::debug!("starting frame loop");
                raf.start();
            }
            LoopSignal::Stop => {
                tracing::debug!("stopping frame loop");
                raf.stop();
            }
            LoopSignal::Unchanged => {}
        }
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "tick intervals are a few milliseconds"
    )]
    fn apply_timer_signal(&self, signal: LoopSignal) {
        match signal {
            LoopSignal::Start if self.interval_id.get().is_none() => {
                let ms = self
                    .runtime
                    .borrow()
                    .timer()
                    .tick_interval()
                    .as_millis_f64()
                    .round() as i32;
                if let Some(callback) = self.interval.borrow().as_ref() {
                    self.interval_id
                        .set(Some(set_interval(callback.as_ref().unchecked_ref(), ms.max(1))));
                }
            }
            LoopSignal::Stop => {
                if let Some(id) = self.interval_id.take() {
                    clear_interval(id);
                }
            }
            _ => {}
        }
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "flush delays are a few milliseconds"
    )]
    fn schedule_flush(self: &Rc<Self>) {
        let Some(strategy) = self.runtime.borrow_mut().take_flush_request() else {
            return;
        };
        match strategy {
            FlushStrategy::AnimationFrame => {
                let frames = self.raf.borrow().as_ref().is_some_and(RafLoop::is_running);
                // A running frame loop flushes at the end of every frame.
                if !frames {
                    request_animation_frame(&self.flush_callback());
                }
            }
            FlushStrategy::Microtask => queue_microtask(&self.flush_callback()),
            FlushStrategy::Timeout { delay } => {
                set_timeout(&self.flush_callback(), delay.as_millis_f64().round() as i32);
            }
        }
    }

    fn flush_callback(self: &Rc<Self>) -> JsValue {
        Closure::once_into_js(while_alive(self, |inner: &Self| {
            inner.runtime.borrow_mut().flush();
        }))
    }
}

/// Runs `f` on `state` when called, unless `state` has been dropped by then.
/// The returned callback does not keep `state` alive.
fn while_alive<T: 'static>(state: &Rc<T>, f: impl FnOnce(&T) + 'static) -> impl FnOnce() + 'static {
    let weak = Rc::downgrade(state);
    move || {
        if let Some(state) = weak.upgrade() {
            f(&state);
        }
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        if let Some(id) = self.interval_id.take() {
            clear_interval(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::while_alive;

    #[test]
    fn deferred_callbacks_run_against_live_state() {
        let flushes = Rc::new(Cell::new(0));
        let callback = while_alive(&flushes, |n: &Cell<u32>| n.set(n.get() + 1));
        assert_eq!(Rc::strong_count(&flushes), 1, "held weakly");
        callback();
        assert_eq!(flushes.get(), 1);
    }

    #[test]
    fn deferred_callbacks_outliving_their_state_do_nothing() {
        let ran = Rc::new(Cell::new(false));
        let seen = Rc::clone(&ran);
        let state = Rc::new(());
        let callback = while_alive(&state, move |_: &()| seen.set(true));
        drop(state);
        callback();
        assert!(!ran.get());
    }
}
