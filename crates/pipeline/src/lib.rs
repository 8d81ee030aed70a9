//! Dual-bus synchronized frame pipeline
//!
//! Moves frames from a slow bulk store to a sink device through a small
//! pool of scratch slots, with two cooperating engines kept in lockstep by
//! a per-slot handshake. On top sits a compose stage that builds each frame
//! in the bulk store and an orchestrator that hands frame buffers back and
//! forth between composition and display with credits.
//!
//! ```text
//!            ┌──────── compose (read src1+src2, write active fb) ───────┐
//!            │                                                          ▼
//! main ◀─ events ─┤                                         bulk store (PSRAM)
//!            │                                                          │
//!            └── render: SourceEngine ─▶ slot 0/1 ─▶ SinkEngine ─▶ sink ┘
//! ```
//!
//! # Features
//!
//! - `defmt`: logging and `defmt::Format` derives on target
//! - `tracing`: logging through `tracing` on the host
//! - `std`: pulls in the platform bus doubles

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(unused_must_use)]
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::print_stdout)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

#[macro_use]
mod log;

pub mod compose;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod handshake;
pub mod orchestrator;
pub mod pool;

pub use compose::{ComposeMachine, ComposeStage, Composer};
pub use config::{CompositionRelease, ConfigError, DisplayStart, PipelineConfig};
pub use context::{PipelineContext, PipelineStats, TaskCommand};
pub use engine::{EngineReport, FrameTransfer, SinkEngine, SourceEngine};
pub use error::{PipelineError, Stage};
pub use fragment::{Fragment, FragmentPlan};
pub use handshake::{Handshake, HandshakeError};
pub use orchestrator::{Command, MainEvent, Orchestrator};
pub use pool::{PingPongPool, PoolError, SlotState};
