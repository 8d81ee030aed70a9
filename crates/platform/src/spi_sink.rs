//! SPI display sink.
//!
//! Streams frame fragments to a panel over an `embedded-hal-async`
//! [`SpiDevice`]. The first fragment of every frame is preceded by the
//! panel's memory-write command, sent with the DC pin low; all pixel data
//! goes out with DC high. Panel setup (window registers, power sequencing)
//! happens before the pipeline starts and is not handled here.
//!
//! `SpiDevice` frames every call in its own chip-select transaction, so the
//! continue flag cannot hold CS across fragments. It closes the window
//! instead: after the last fragment (`more == false`) the sink rejects
//! writes until the next `begin_frame`.

use embedded_hal::digital::OutputPin;
use embedded_hal_async::spi::SpiDevice;

use crate::bus::{SinkDevice, Window};

/// MIPI DCS `write_memory_start`.
pub const WRITE_MEMORY_START: u8 = 0x2C;

/// SPI sink errors.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiSinkError<S, P> {
    /// SPI transfer failed.
    #[error("SPI transfer failed: {0:?}")]
    Spi(S),
    /// DC pin could not be driven.
    #[error("DC pin error: {0:?}")]
    Pin(P),
    /// `write` called outside a frame: before `begin_frame` or after the
    /// last fragment.
    #[error("no transfer window open")]
    NoWindow,
    /// Fragment extends past the open window.
    #[error("fragment of {len} bytes at {offset} is outside the window")]
    OutOfWindow {
        /// Fragment offset within the frame.
        offset: u32,
        /// Fragment length.
        len: usize,
    },
}

/// Display sink over SPI with a data/command select pin.
pub struct SpiSink<SPI, DC> {
    spi: SPI,
    dc: DC,
    window: Option<Window>,
    bytes_per_pixel: usize,
}

impl<SPI, DC> SpiSink<SPI, DC>
where
    SPI: SpiDevice,
    DC: OutputPin,
{
    /// Create a sink for a panel with `bytes_per_pixel` bytes per pixel.
    pub fn new(spi: SPI, dc: DC, bytes_per_pixel: usize) -> Self {
        Self {
            spi,
            dc,
            window: None,
            bytes_per_pixel,
        }
    }

    /// Currently open window, if any.
    pub fn window(&self) -> Option<Window> {
        self.window
    }

    /// Give the bus and pin back.
    pub fn release(self) -> (SPI, DC) {
        (self.spi, self.dc)
    }

    fn window_bytes(&self, window: Window) -> usize {
        window.area().saturating_mul(self.bytes_per_pixel)
    }
}

impl<SPI, DC> SinkDevice for SpiSink<SPI, DC>
where
    SPI: SpiDevice,
    DC: OutputPin,
{
    type Error = SpiSinkError<SPI::Error, DC::Error>;

    async fn begin_frame(&mut self, window: Window) -> Result<(), Self::Error> {
        self.window = Some(window);
        Ok(())
    }

    async fn write(&mut self, offset: u32, data: &[u8], more: bool) -> Result<(), Self::Error> {
        let window = self.window.ok_or(SpiSinkError::NoWindow)?;
        let end = (offset as usize).saturating_add(data.len());
        if end > self.window_bytes(window) {
            return Err(SpiSinkError::OutOfWindow {
                offset,
                len: data.len(),
            });
        }

        if offset == 0 {
            self.dc.set_low().map_err(SpiSinkError::Pin)?;
            self.spi
                .write(&[WRITE_MEMORY_START])
                .await
                .map_err(SpiSinkError::Spi)?;
        }
        self.dc.set_high().map_err(SpiSinkError::Pin)?;
        self.spi.write(data).await.map_err(SpiSinkError::Spi)?;
        if !more {
            // Frame complete; the next frame needs a fresh window.
            self.window = None;
        }
        Ok(())
    }
}
