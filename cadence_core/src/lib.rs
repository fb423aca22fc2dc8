// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame scheduling, a shared animation clock, and write coalescing for
//! cooperative render loops.
//!
//! `cadence_core` coordinates many independent visual effects that all want
//! to run on every repaint. Instead of each effect driving its own loop and
//! writing styles whenever it likes, effects register a [`Task`](task::Task)
//! with one scheduler, read one clock, and enqueue their style writes into
//! one batcher that applies them once per frame.
//!
//! # Architecture
//!
//! ```text
//!   Host repaint callback                 Host interval timer
//!       │                                      │
//!       ▼                                      ▼
//!   Scheduler::run_frame()               TimerScheduler::poll()
//!       │  clock tick, budgeted pass          │  own clock, own budget
//!       ▼                                      │
//!   Task::tick() ──► StyleWriter::enqueue() ◄──┘
//!                          │
//!                          ▼
//!                    WriteBatcher ──► flush() ──► RenderSurface
//!                          │
//!       costs ─────────────┴──────────► PerformanceTracker
//!                                              │ violations, health
//!                                              ▼
//!                                        BudgetPolicy ──► RuntimeEvent
//! ```
//!
//! **[`runtime`]** — The [`Runtime`](runtime::Runtime) context object that
//! owns every component and wires the per-frame data flow. Most hosts only
//! touch this.
//!
//! **[`scheduler`]** — The master frame scheduler: priority-ordered,
//! budgeted passes, adaptive per-task intervals, and the quality /
//! performance mode switch.
//!
//! **[`timer`]** — The same registry and budget model driven by a coarse
//! fixed-rate tick, for work that continues while frames are paused.
//!
//! **[`registry`]** — Task storage and the pass algorithm shared by both
//! schedulers.
//!
//! **[`clock`]** — The [`SharedClock`](clock::SharedClock): scaled,
//! pausable logical time with phase helpers for periodic effects.
//!
//! **[`batch`]** — The [`WriteBatcher`](batch::WriteBatcher): coalescing by
//! `(target, property)`, critical bypass, bulk style-text rewrites, overrun
//! throttling, and the intercept shim.
//!
//! **[`perf`]** — Operation budgets, rolling statistics, FPS, and the health
//! score.
//!
//! **[`policy`]** — Budget violations in, degradations and recovery out.
//!
//! **[`capability`]** — One-time device classification into tiers and a
//! startup quality preset.
//!
//! **[`surface`]** — The [`RenderSurface`](surface::RenderSurface) trait
//! platform backends implement, plus an in-memory surface.
//!
//! **[`time`]** — Microsecond host-time types and pluggable time sources.
//!
//! Everything is single-threaded: components share the time source through
//! `Rc` and none of them are `Send`.

pub mod batch;
pub mod capability;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod perf;
pub mod policy;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod stats;
pub mod surface;
pub mod task;
pub mod time;
pub mod timer;

pub use error::{Error, Result};
