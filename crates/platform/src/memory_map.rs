//! PSRAM memory map
//!
//! The bulk store is split into 1 MiB regions. The first two are reserved
//! for execute-in-place code and globals and are never touched by the
//! pipeline. The source images and the active (composed) frame buffers each
//! get their own region, with the second buffer of every pair starting on
//! the first page boundary after the first.
//!
//! ```text
//! 0x0000_0000  ┌──────────────────────┐
//!              │  XIP code (reserved) │  1 MB
//! 0x0010_0000  ├──────────────────────┤
//!              │  Globals (reserved)  │  1 MB
//! 0x0020_0000  ├──────────────────────┤
//!              │  Source image 1      │  FRAME_SIZE
//!              │  Source image 2      │  page aligned
//! 0x0030_0000  ├──────────────────────┤
//!              │  Active FB 0         │  FRAME_SIZE
//!              │  Active FB 1         │  page aligned
//! 0x0040_0000  └──────────────────────┘
//! ```

use crate::geometry::{align_up, FRAME_SIZE, PSRAM_PAGE_SIZE};

/// Size of each PSRAM region.
pub const REGION_SIZE: u32 = 1024 * 1024;

/// Identity of one active frame buffer.
///
/// Ownership of a frame buffer moves between the compose stage and the
/// render stage only at frame boundaries; the index itself carries no
/// ownership, it only names the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameBufferIndex(u8);

impl FrameBufferIndex {
    /// First active frame buffer.
    pub const FIRST: Self = Self(0);

    /// Second active frame buffer.
    pub const SECOND: Self = Self(1);

    /// Buffer used for the `sequence`-th frame when `count` buffers rotate.
    ///
    /// `count` of zero or one always selects the first buffer.
    pub const fn for_sequence(sequence: u32, count: u8) -> Self {
        if count <= 1 {
            return Self::FIRST;
        }
        if sequence & 1 == 0 {
            Self::FIRST
        } else {
            Self::SECOND
        }
    }

    /// Raw index (0 or 1).
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Byte offsets of every frame buffer the pipeline touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PsramLayout {
    /// First source image (band on the left edge).
    pub source1: u32,
    /// Second source image (band on the right edge).
    pub source2: u32,
    /// Active frame buffers, written by compose and read by render.
    pub active: [u32; 2],
    /// Bytes per frame buffer.
    pub frame_size: u32,
}

impl PsramLayout {
    /// Layout for the 240×240 panel at the canonical region bases.
    #[allow(clippy::arithmetic_side_effects)] // constant operands, far below u32::MAX
    pub const PANEL: Self = Self::new(2 * REGION_SIZE, 3 * REGION_SIZE, FRAME_SIZE as u32);

    /// Lay out two source images at `source_base` and two active buffers at
    /// `active_base`, each pair page aligned.
    pub const fn new(source_base: u32, active_base: u32, frame_size: u32) -> Self {
        let stride = align_up(frame_size as usize, PSRAM_PAGE_SIZE) as u32;
        Self {
            source1: source_base,
            source2: source_base.saturating_add(stride),
            active: [active_base, active_base.saturating_add(stride)],
            frame_size,
        }
    }

    /// Packed layout starting at offset zero, for small test stores.
    pub const fn compact(frame_size: u32) -> Self {
        let stride = align_up(frame_size as usize, PSRAM_PAGE_SIZE) as u32;
        Self::new(0, stride.saturating_mul(2), frame_size)
    }

    /// Offset of an active frame buffer.
    pub const fn active(&self, fb: FrameBufferIndex) -> u32 {
        if fb.get() == 0 {
            self.active[0]
        } else {
            self.active[1]
        }
    }

    /// One past the last byte used by the layout.
    pub const fn end(&self) -> u32 {
        self.active[1].saturating_add(self.frame_size)
    }
}
