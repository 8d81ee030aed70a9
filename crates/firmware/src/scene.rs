//! Source images and background.
//!
//! Two source images live in the bulk store. Each is blank except for a
//! vertical band: the first on the left edge, the second on the right edge,
//! in complementary colours. Composition scrolls them towards each other so
//! the overlap sweeps across the panel.

use core::ops::Range;

use pipeline::compose::{BLANK, COLOR_MAX};

/// Band width in pixels.
pub const BAND_WIDTH: usize = 32;

/// Colour of the first band. The second band uses `COLOR_MAX ^ BAND_COLOR`.
pub const BAND_COLOR: u8 = 0x0C;

/// Value painted on the sink and into the active buffers before start-up.
pub const BACKGROUND: u8 = 0x00;

/// Which source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SourceImage {
    /// Band on the left edge.
    First,
    /// Band on the right edge.
    Second,
}

impl SourceImage {
    /// Both images, in bulk-store order.
    pub const ALL: [Self; 2] = [Self::First, Self::Second];

    /// Band colour.
    pub const fn color(self) -> u8 {
        match self {
            Self::First => BAND_COLOR,
            Self::Second => COLOR_MAX ^ BAND_COLOR,
        }
    }

    /// Byte columns covered by the band in a row of `row_bytes`.
    pub fn band(self, row_bytes: usize) -> Range<usize> {
        let width = BAND_WIDTH.min(row_bytes);
        match self {
            Self::First => 0..width,
            Self::Second => row_bytes.saturating_sub(width)..row_bytes,
        }
    }

    /// Fill `out` with the image bytes at `offset..offset + out.len()`.
    #[allow(clippy::arithmetic_side_effects)] // Safety: row_bytes checked non-zero
    pub fn paint(self, offset: usize, out: &mut [u8], row_bytes: usize) {
        if row_bytes == 0 {
            out.fill(BLANK);
            return;
        }
        let band = self.band(row_bytes);
        let color = self.color();
        let mut column = offset % row_bytes;
        for px in out {
            *px = if band.contains(&column) { color } else { BLANK };
            column += 1;
            if column == row_bytes {
                column = 0;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn bands_sit_on_opposite_edges() {
        assert_eq!(SourceImage::First.band(240), 0..32);
        assert_eq!(SourceImage::Second.band(240), 208..240);
        assert_eq!(SourceImage::Second.band(16), 0..16);
    }

    #[test]
    fn colors_are_complementary() {
        assert_eq!(
            SourceImage::First.color() ^ SourceImage::Second.color(),
            COLOR_MAX
        );
        assert_ne!(SourceImage::First.color(), BLANK);
    }

    #[test]
    fn paint_follows_row_wrap() {
        let mut out = [0u8; 8];
        // Row of 40 bytes: offset 36 covers columns 36..40 then 0..4.
        SourceImage::First.paint(36, &mut out, 40);
        assert_eq!(out[..4], [BLANK; 4]);
        assert_eq!(out[4..], [BAND_COLOR; 4]);
    }

    #[test]
    fn paint_in_chunks_matches_whole_image() {
        let mut whole = [0u8; 240 * 3];
        SourceImage::Second.paint(0, &mut whole, 240);
        let mut chunked = [0u8; 240 * 3];
        for (i, chunk) in chunked.chunks_mut(100).enumerate() {
            SourceImage::Second.paint(i * 100, chunk, 240);
        }
        assert_eq!(whole, chunked);
    }
}
