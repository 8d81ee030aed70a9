//! Bus abstractions for the dual-bus frame pipeline
//!
//! This crate describes the two external collaborators of the pipeline and
//! nothing else: a slow bulk store that holds frame buffers (PSRAM behind an
//! MSPI controller) and a sink device that frames are streamed into (a
//! display or FRAM behind an IOM/SPI controller).
//!
//! # Architecture Layers
//!
//! ```text
//! Application Layer (firmware crate: scene, setup, emulator)
//!         ↓
//! Pipeline (pipeline crate: pool, handshake, engines, compose, orchestrator)
//!         ↓
//! Bus HAL (this crate - BulkStore / SinkDevice traits, memory map)
//!         ↓
//! Controller drivers (MSPI, IOM/SPI)
//! ```
//!
//! # Features
//!
//! - `std`: Vec-backed bus doubles with fault injection (for testing)
//! - `defmt`: Enable defmt::Format derives
//!
//! # Example
//!
//! ```no_run
//! use platform::{BulkStore, SinkDevice};
//!
//! async fn copy_page<S: BulkStore, D: SinkDevice>(store: &mut S, sink: &mut D) {
//!     let mut page = [0u8; 1024];
//!     if store.read(0, &mut page).await.is_ok() {
//!         let _ = sink.write(0, &page, false).await;
//!     }
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
// Pedantic lints suppressed for this bus HAL crate:
#![allow(clippy::doc_markdown)] // hex offsets and controller names in doc comments
#![allow(clippy::must_use_candidate)] // accessors: callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(async_fn_in_trait)] // Embassy no_std: single-threaded, Send bounds not needed

#[cfg(feature = "std")]
extern crate std;

pub mod bus;
pub mod dma;
pub mod geometry;
pub mod memory_map;
pub mod mocks;
pub mod spi_sink;

pub use bus::{BulkStore, BusError, ReadbackSink, SinkDevice, Window};
pub use dma::{Align32, ScratchBuffer};
pub use geometry::{FRAME_SIZE, FRAGMENT_SIZE, NUM_FRAGMENTS};
pub use memory_map::{FrameBufferIndex, PsramLayout};
pub use spi_sink::SpiSink;
