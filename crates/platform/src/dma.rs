//! DMA scratch buffers.
//!
//! Both controllers read and write the ping-pong fragment buffers directly.
//! On cores with a data cache, any buffer a DMA engine touches must start on
//! a cache line and span whole lines, otherwise a line shared with unrelated
//! data can be written back over freshly DMA'd bytes.
//!
//! `Align32` enforces the alignment. Placement in non-cacheable SRAM (or
//! cache maintenance around each transfer) is the board's responsibility.

/// A `#[repr(align(32))]` wrapper for DMA-accessible buffers.
///
/// # Example
///
/// ```
/// use platform::dma::Align32;
///
/// let buf: Align32<[u8; 64]> = Align32([0u8; 64]);
/// assert_eq!(core::ptr::addr_of!(buf) as usize % 32, 0);
/// ```
#[derive(Clone, Copy)]
#[repr(align(32))]
pub struct Align32<T>(
    /// The inner value. Must be public so callers can construct and destructure the wrapper.
    pub T,
);

/// A fixed-size, cache-line aligned scratch buffer of `SIZE` bytes.
pub type ScratchBuffer<const SIZE: usize> = Align32<[u8; SIZE]>;

impl<const SIZE: usize> Align32<[u8; SIZE]> {
    /// Zero-filled buffer.
    pub const fn zeroed() -> Self {
        Self([0u8; SIZE])
    }

    /// The first `len` bytes, or `None` if `len` exceeds the buffer.
    pub fn prefix(&self, len: usize) -> Option<&[u8]> {
        self.0.get(..len)
    }

    /// The first `len` bytes mutably, or `None` if `len` exceeds the buffer.
    pub fn prefix_mut(&mut self, len: usize) -> Option<&mut [u8]> {
        self.0.get_mut(..len)
    }

    /// Capacity in bytes.
    pub const fn capacity(&self) -> usize {
        SIZE
    }
}
