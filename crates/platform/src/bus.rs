//! Bus traits for the two controllers the pipeline bridges.
//!
//! Both traits are async: on hardware every call queues a DMA transaction
//! and resolves from the controller's completion interrupt. The pipeline
//! holds a bus only for the duration of one call, so a high-priority
//! transaction from another stage can slot in between two fragments.

/// Errors reported by bus implementations in this crate.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// Access would run past the end of the device.
    #[error("access of {len} bytes at {offset:#x} is out of bounds")]
    OutOfBounds {
        /// Requested offset.
        offset: u32,
        /// Requested length.
        len: usize,
    },
    /// The controller reported a failed transaction.
    #[error("transaction failed")]
    Transaction,
    /// A write arrived with no frame window open.
    #[error("no transfer window open")]
    NoWindow,
}

/// Bulk storage behind the source controller (PSRAM over MSPI).
///
/// Offsets are byte offsets from the start of the device.
pub trait BulkStore {
    /// Error type
    type Error: core::fmt::Debug;

    /// Read `buf.len()` bytes at `offset`.
    async fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Write `data` at `offset`.
    async fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Device capacity in bytes.
    fn capacity(&self) -> u32;
}

/// Rectangle of the panel a frame is streamed into (inclusive bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Window {
    /// First row.
    pub row_start: u16,
    /// First column.
    pub col_start: u16,
    /// Last row.
    pub row_end: u16,
    /// Last column.
    pub col_end: u16,
}

impl Window {
    /// Window covering a `rows` × `cols` panel.
    pub const fn full(rows: u16, cols: u16) -> Self {
        Self {
            row_start: 0,
            col_start: 0,
            row_end: rows.saturating_sub(1),
            col_end: cols.saturating_sub(1),
        }
    }

    /// Number of pixels in the window.
    pub const fn area(&self) -> usize {
        let rows = self.row_end.saturating_sub(self.row_start) as usize;
        let cols = self.col_end.saturating_sub(self.col_start) as usize;
        rows.saturating_add(1).saturating_mul(cols.saturating_add(1))
    }
}

/// Sink device behind the destination controller (display or FRAM over IOM).
pub trait SinkDevice {
    /// Error type
    type Error: core::fmt::Debug;

    /// Open a transfer window. Every frame starts with one call.
    async fn begin_frame(&mut self, window: Window) -> Result<(), Self::Error>;

    /// Write one fragment at byte `offset` within the open window.
    ///
    /// `more` is the controller's continue flag: set on every fragment except
    /// the last. Controllers with a continue bit keep chip-select asserted
    /// across the frame; others treat `more == false` as the end of the
    /// frame and close the window.
    async fn write(&mut self, offset: u32, data: &[u8], more: bool) -> Result<(), Self::Error>;
}

/// A sink that can be read back (FRAM), used for end-to-end verification.
pub trait ReadbackSink: SinkDevice {
    /// Read `buf.len()` bytes at `offset`.
    async fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
}
