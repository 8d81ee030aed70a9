//! Property-based tests for frame geometry and the PSRAM memory map.

// Test files legitimately use arithmetic for verification; allow at file level.
#![allow(clippy::arithmetic_side_effects)]

use platform::geometry::{align_up, fragment_count, tail_len, PSRAM_PAGE_SIZE};
use platform::PsramLayout;

proptest::proptest! {
    /// Full fragments plus the tail cover the frame exactly.
    #[test]
    fn fragments_cover_total_exactly(total in 1usize..200_000, frag in 1usize..4096) {
        let n = fragment_count(total, frag);
        let tail = tail_len(total, frag);
        assert!(n >= 1);
        assert!(tail >= 1 && tail <= frag);
        assert_eq!((n - 1) * frag + tail, total);
    }

    /// The tail is `total % frag`, or a full fragment on even division.
    #[test]
    fn tail_matches_remainder(k in 0usize..64, frag in 1usize..2048, extra in 0usize..2048) {
        let extra = extra % frag;
        let total = k * frag + extra;
        if total > 0 {
            let expected = if extra == 0 { frag } else { extra };
            assert_eq!(tail_len(total, frag), expected);
        }
    }

    /// Second buffers never overlap the first and start on a page boundary.
    #[test]
    fn layout_buffers_are_disjoint(frame in 1u32..300_000) {
        let l = PsramLayout::new(0, 4 * 1024 * 1024, frame);
        assert_eq!(l.source2 as usize % PSRAM_PAGE_SIZE, 0);
        assert!(l.source2 >= l.source1 + frame);
        assert!(l.active[1] >= l.active[0] + frame);
        assert!(l.source2 + frame <= l.active[0]);
    }

    /// align_up never rounds down and never overshoots by a full page.
    #[test]
    fn align_up_is_tight(v in 0usize..10_000_000) {
        let a = align_up(v, PSRAM_PAGE_SIZE);
        assert!(a >= v);
        assert!(a - v < PSRAM_PAGE_SIZE);
        assert_eq!(a % PSRAM_PAGE_SIZE, 0);
    }
}
