//! Frame and fragment geometry.
//!
//! The panel is 240×240 at one byte per pixel. Frames move between the two
//! buses in PSRAM-page sized fragments; composition works on whole rows.
//!
//! ```text
//! FRAME_SIZE        = 240 × 240      = 57_600 B
//! FRAGMENT_SIZE     = PSRAM page     =  1_024 B
//! NUM_FRAGMENTS     = ⌈57_600 / 1_024⌉ =   57   (tail = 256 B)
//! COMPOSE_FRAGMENT  = 4 rows × 240   =    960 B (60 per frame)
//! ```

// Compile-time geometry; every divisor is checked non-zero before use.
#![allow(clippy::arithmetic_side_effects)]

/// Display rows.
pub const ROW_NUM: usize = 240;

/// Display columns.
pub const COLUMN_NUM: usize = 240;

/// Bytes per pixel on the wire.
pub const BYTES_PER_PIXEL: usize = 1;

/// Bytes in one display row.
pub const ROW_BYTES: usize = COLUMN_NUM * BYTES_PER_PIXEL;

/// Bytes in one full frame.
pub const FRAME_SIZE: usize = ROW_NUM * ROW_BYTES;

/// PSRAM page size. Frame buffers are aligned to this boundary.
pub const PSRAM_PAGE_SIZE: usize = 1024;

/// Bytes moved per bus transaction between PSRAM and the sink.
pub const FRAGMENT_SIZE: usize = PSRAM_PAGE_SIZE;

/// Fragments per frame, including a short tail.
pub const NUM_FRAGMENTS: usize = fragment_count(FRAME_SIZE, FRAGMENT_SIZE);

/// Rows combined per compose step.
pub const COMPOSE_ROWS: usize = 4;

/// Bytes combined per compose step.
pub const COMPOSE_FRAGMENT_SIZE: usize = COMPOSE_ROWS * ROW_BYTES;

/// Number of `fragment_size` pieces needed to cover `total` bytes.
///
/// A `fragment_size` of zero yields zero fragments.
pub const fn fragment_count(total: usize, fragment_size: usize) -> usize {
    if fragment_size == 0 {
        return 0;
    }
    total.div_ceil(fragment_size)
}

/// Length of the final fragment: `total % fragment_size`, or a full
/// fragment when `total` divides evenly.
pub const fn tail_len(total: usize, fragment_size: usize) -> usize {
    if fragment_size == 0 || total == 0 {
        return 0;
    }
    match total % fragment_size {
        0 => fragment_size,
        rem => rem,
    }
}

/// Round `value` up to the next multiple of `align` (`align` > 0).
pub const fn align_up(value: usize, align: usize) -> usize {
    if align == 0 {
        return value;
    }
    value.div_ceil(align).saturating_mul(align)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_frame_splits_into_57_fragments_with_short_tail() {
        assert_eq!(FRAME_SIZE, 57_600);
        assert_eq!(NUM_FRAGMENTS, 57);
        assert_eq!(tail_len(FRAME_SIZE, FRAGMENT_SIZE), 256);
    }

    #[test]
    fn compose_fragments_tile_the_frame_exactly() {
        assert_eq!(FRAME_SIZE % COMPOSE_FRAGMENT_SIZE, 0);
        assert_eq!(fragment_count(FRAME_SIZE, COMPOSE_FRAGMENT_SIZE), 60);
    }

    #[test]
    fn tail_is_full_fragment_when_evenly_divisible() {
        assert_eq!(tail_len(8 * 1024, 1024), 1024);
        assert_eq!(tail_len(10 * 1024 + 3, 1024), 3);
    }

    #[test]
    fn zero_sizes_do_not_divide_by_zero() {
        assert_eq!(fragment_count(100, 0), 0);
        assert_eq!(tail_len(100, 0), 0);
        assert_eq!(tail_len(0, 64), 0);
    }

    #[test]
    fn align_up_rounds_to_page() {
        assert_eq!(align_up(FRAME_SIZE, PSRAM_PAGE_SIZE), 57 * 1024);
        assert_eq!(align_up(2048, 1024), 2048);
    }
}
