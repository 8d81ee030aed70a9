//! Pipeline configuration.
//!
//! Geometry defaults come from [`platform::geometry`]; the two policy enums
//! select how aggressively composition overlaps rendering.

use embassy_time::Duration;
use platform::geometry::{COMPOSE_ROWS, FRAGMENT_SIZE, FRAME_SIZE, ROW_BYTES};
use platform::memory_map::PsramLayout;

use crate::compose::WORD;

/// When a frame buffer being displayed is handed back to composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompositionRelease {
    /// Only after the last fragment reached the sink. Composition never
    /// touches a buffer the render stage may still read.
    AfterDisplayDone,
    /// As soon as the panel starts scanning the buffer (tearing-effect edge
    /// after the render was scheduled). Lets composition of the next frame
    /// start one panel refresh earlier.
    AtDisplayStart,
}

/// When a composed frame is pushed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayStart {
    /// As soon as the sink is idle and a frame is ready.
    Immediate,
    /// On the next tearing-effect event with the sink idle and a frame ready.
    OnTearingEffect,
}

/// Configuration errors.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Frame size is zero.
    #[error("frame size must be non-zero")]
    EmptyFrame,
    /// Fragment size is zero.
    #[error("fragment size must be non-zero")]
    ZeroFragment,
    /// A fragment does not fit a scratch slot.
    #[error("fragment of {fragment} bytes exceeds {slot}-byte scratch slot")]
    FragmentTooLarge {
        /// Requested fragment size.
        fragment: usize,
        /// Scratch slot size.
        slot: usize,
    },
    /// Fewer than two scratch slots.
    #[error("ping-pong pool needs at least two slots, got {0}")]
    TooFewSlots(usize),
    /// Frame buffer count outside 1..=2.
    #[error("frame buffer count must be 1 or 2, got {0}")]
    FrameBuffers(u8),
    /// Row length is zero or does not tile the frame.
    #[error("row of {row} bytes does not tile a {frame}-byte frame")]
    RowGeometry {
        /// Bytes per row.
        row: usize,
        /// Bytes per frame.
        frame: usize,
    },
    /// Row length is not a whole number of compose words.
    #[error("row of {0} bytes is not a multiple of the 4-byte compose word")]
    RowAlignment(usize),
    /// Compose step of zero rows.
    #[error("compose step must cover at least one row")]
    ComposeRows,
    /// The PSRAM layout was built for a different frame size.
    #[error("layout holds {layout}-byte frames, pipeline expects {frame}")]
    LayoutMismatch {
        /// Frame size the layout was built for.
        layout: u32,
        /// Configured frame size.
        frame: usize,
    },
    /// The bulk store ends before the last region the layout uses.
    #[error("bulk store of {capacity} bytes, layout needs {needed}")]
    StoreTooSmall {
        /// Bytes the layout needs.
        needed: u32,
        /// Store capacity.
        capacity: u32,
    },
    /// Frame or fragment counts overflow the fragment index.
    #[error("frame splits into more than 65535 fragments")]
    TooManyFragments,
}

/// Runtime pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Bytes per frame.
    pub frame_size: usize,
    /// Bytes per transfer fragment (PSRAM → sink).
    pub fragment_size: usize,
    /// Bytes per display row. Composition scrolls whole rows.
    pub row_bytes: usize,
    /// Rows combined per compose step.
    pub compose_rows: usize,
    /// Active frame buffers in the bulk store (1 or 2).
    pub frame_buffers: u8,
    /// Buffer release policy.
    pub release: CompositionRelease,
    /// Render start policy.
    pub display_start: DisplayStart,
    /// Upper bound on any single wait.
    pub wait_timeout: Duration,
    /// Stop after this many frames reached the sink (or were dropped).
    pub max_frames: Option<u32>,
    /// Copy the second source instead of overlaying both.
    pub minimal_compose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_size: FRAME_SIZE,
            fragment_size: FRAGMENT_SIZE,
            row_bytes: ROW_BYTES,
            compose_rows: COMPOSE_ROWS,
            frame_buffers: 2,
            release: CompositionRelease::AfterDisplayDone,
            display_start: DisplayStart::Immediate,
            wait_timeout: Duration::from_millis(500),
            max_frames: None,
            minimal_compose: false,
        }
    }
}

impl PipelineConfig {
    /// Frame of `frame_size` bytes in rows of `row_bytes`.
    #[must_use]
    pub fn with_geometry(mut self, frame_size: usize, row_bytes: usize) -> Self {
        self.frame_size = frame_size;
        self.row_bytes = row_bytes;
        self
    }

    /// Transfer fragment size.
    #[must_use]
    pub fn with_fragment_size(mut self, fragment_size: usize) -> Self {
        self.fragment_size = fragment_size;
        self
    }

    /// Rows per compose step.
    #[must_use]
    pub fn with_compose_rows(mut self, rows: usize) -> Self {
        self.compose_rows = rows;
        self
    }

    /// Number of active frame buffers.
    #[must_use]
    pub fn with_frame_buffers(mut self, count: u8) -> Self {
        self.frame_buffers = count;
        self
    }

    /// Release and start policies.
    #[must_use]
    pub fn with_policies(mut self, release: CompositionRelease, start: DisplayStart) -> Self {
        self.release = release;
        self.display_start = start;
        self
    }

    /// Wait timeout.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Frame limit.
    #[must_use]
    pub fn with_max_frames(mut self, frames: u32) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Minimal composition.
    #[must_use]
    pub fn with_minimal_compose(mut self, minimal: bool) -> Self {
        self.minimal_compose = minimal;
        self
    }

    /// Bytes per compose step.
    pub fn compose_fragment_size(&self) -> usize {
        self.compose_rows.saturating_mul(self.row_bytes)
    }

    /// Frame height in rows.
    pub fn rows(&self) -> usize {
        self.frame_size.checked_div(self.row_bytes).unwrap_or(0)
    }

    /// Check the configuration against a pool of `slots` slots of
    /// `slot_size` bytes.
    pub fn validate(&self, slots: usize, slot_size: usize) -> Result<(), ConfigError> {
        if self.frame_size == 0 {
            return Err(ConfigError::EmptyFrame);
        }
        if self.fragment_size == 0 {
            return Err(ConfigError::ZeroFragment);
        }
        if slots < 2 {
            return Err(ConfigError::TooFewSlots(slots));
        }
        if !(1..=2).contains(&self.frame_buffers) {
            return Err(ConfigError::FrameBuffers(self.frame_buffers));
        }
        if self.frame_size.checked_rem(self.row_bytes) != Some(0) {
            return Err(ConfigError::RowGeometry {
                row: self.row_bytes,
                frame: self.frame_size,
            });
        }
        if self.row_bytes.checked_rem(WORD) != Some(0) {
            return Err(ConfigError::RowAlignment(self.row_bytes));
        }
        if self.compose_rows == 0 {
            return Err(ConfigError::ComposeRows);
        }
        for fragment in [self.fragment_size, self.compose_fragment_size()] {
            if fragment > slot_size {
                return Err(ConfigError::FragmentTooLarge {
                    fragment,
                    slot: slot_size,
                });
            }
        }
        let transfer = platform::geometry::fragment_count(self.frame_size, self.fragment_size);
        let compose =
            platform::geometry::fragment_count(self.frame_size, self.compose_fragment_size());
        if transfer > usize::from(u16::MAX) || compose > usize::from(u16::MAX) {
            return Err(ConfigError::TooManyFragments);
        }
        Ok(())
    }

    /// Check that `layout` matches the frame size and fits a store of
    /// `capacity` bytes. Only the frame buffers in use count.
    pub fn validate_layout(&self, layout: &PsramLayout, capacity: u32) -> Result<(), ConfigError> {
        if usize::try_from(layout.frame_size).ok() != Some(self.frame_size) {
            return Err(ConfigError::LayoutMismatch {
                layout: layout.frame_size,
                frame: self.frame_size,
            });
        }
        let mut regions = [layout.source1, layout.source2, layout.active[0], layout.active[1]];
        if self.frame_buffers < 2 {
            regions[3] = layout.active[0];
        }
        let needed = regions
            .iter()
            .map(|base| base.checked_add(layout.frame_size).unwrap_or(u32::MAX))
            .max()
            .unwrap_or(0);
        if needed > capacity {
            return Err(ConfigError::StoreTooSmall { needed, capacity });
        }
        Ok(())
    }
}
