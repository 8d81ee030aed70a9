//! Frame pipeline application
//!
//! Wires the pipeline to a scene: two banded source images in PSRAM that the
//! compose stage scrolls into the active frame buffers while the render
//! stage streams the previous frame to the panel.
//!
//! # Architecture
//!
//! ```text
//! Application Layer (main.rs emulator, mode, scene, setup, verify)
//!         ↓
//! Pipeline (pipeline crate)
//!         ↓
//! Bus HAL (platform crate)
//! ```
//!
//! # Features
//!
//! - `emulator` - Build the desktop emulator (tokio, tracing)
//! - `std` - Enable the platform bus doubles
//! - `defmt` - Target logging
//!
//! ## Emulator Target
//!
//! ```bash
//! cargo run -p firmware --bin pipeline-emulator --features emulator
//! ```

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::await_holding_lock)] // holding a blocking Mutex across .await is a bug
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![warn(clippy::dbg_macro)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod mode;
pub mod scene;
pub mod setup;
pub mod verify;

pub use mode::{RunMode, UnknownMode};
pub use scene::{SourceImage, BACKGROUND, BAND_COLOR, BAND_WIDTH};
pub use setup::{prepare, InitError};
pub use verify::{verify_frame, VerifyError};
