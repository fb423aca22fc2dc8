// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Broadcast of runtime state changes to effects and the host UI.

use core::fmt;

use crate::error::TaskError;
use crate::policy::OptimizationLevel;
use crate::task::{PerformanceMode, TaskId};

/// A state change observers may react to.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeEvent {
    /// The master scheduler switched modes.
    ModeChanged {
        /// Mode now in effect.
        mode: PerformanceMode,
    },
    /// An operation kept exceeding its budget; its owner should shed work.
    Optimize {
        /// Operation name as recorded by the tracker.
        operation: String,
    },
    /// Health recovered and every optimization was lifted.
    Recover,
    /// The optimization level changed.
    LevelChanged {
        /// Previous level.
        from: OptimizationLevel,
        /// New level.
        to: OptimizationLevel,
    },
    /// A named feature should stop running.
    FeatureDisabled {
        /// Feature name.
        feature: String,
    },
    /// A previously disabled feature may run again.
    FeatureEnabled {
        /// Feature name.
        feature: String,
    },
    /// A setting was applied through
    /// [`Runtime::apply_setting`](crate::runtime::Runtime::apply_setting).
    SettingChanged {
        /// Settings key.
        key: String,
        /// Value as supplied.
        value: serde_json::Value,
    },
    /// A task failed or panicked and was disabled.
    TaskDisabled {
        /// The task.
        id: TaskId,
        /// What went wrong.
        error: TaskError,
    },
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&RuntimeEvent)>;

/// Synchronous fan-out to subscribers, in subscription order.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn subscribe(&mut self, listener: impl FnMut(&RuntimeEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers `event` to every listener.
    pub fn publish(&mut self, event: &RuntimeEvent) {
        tracing::trace!(?event, listeners = self.listeners.len(), "publish");
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn listeners_see_events_in_order_until_unsubscribed() {
        let mut bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let a = {
            let seen = Rc::clone(&seen);
            bus.subscribe(move |e| seen.borrow_mut().push(("a", e.clone())))
        };
        {
            let seen = Rc::clone(&seen);
            bus.subscribe(move |e| seen.borrow_mut().push(("b", e.clone())));
        }
        assert_eq!(bus.len(), 2);

        bus.publish(&RuntimeEvent::Recover);
        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a), "second removal is a no-op");
        bus.publish(&RuntimeEvent::ModeChanged {
            mode: PerformanceMode::Performance,
        });

        let seen = seen.borrow();
        let who: Vec<_> = seen.iter().map(|(w, _)| *w).collect();
        assert_eq!(who, ["a", "b", "b"]);
        assert_eq!(
            seen[2].1,
            RuntimeEvent::ModeChanged {
                mode: PerformanceMode::Performance
            }
        );
    }
}
