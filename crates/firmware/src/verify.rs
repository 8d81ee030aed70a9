//! Read-back verification.
//!
//! After a run the sink is read back and compared with the active frame
//! buffer that was shown last. Used with sinks that can be read, such as an
//! FRAM part on the IOM bus.

use platform::bus::{BulkStore, ReadbackSink};
use platform::dma::ScratchBuffer;
use platform::geometry::FRAGMENT_SIZE;

use crate::setup::chunks;

/// Verification failures.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VerifyError {
    /// Reading the frame buffer failed.
    #[error("bulk store read failed at {offset:#x}")]
    Store {
        /// Absolute store offset.
        offset: u32,
    },
    /// Reading the sink back failed.
    #[error("sink read failed at {offset:#x}")]
    Sink {
        /// Offset within the frame.
        offset: u32,
    },
    /// First differing byte.
    #[error("mismatch at {offset:#x}: expected {expected:#04x}, found {found:#04x}")]
    Mismatch {
        /// Offset within the frame.
        offset: u32,
        /// Byte in the frame buffer.
        expected: u8,
        /// Byte on the sink.
        found: u8,
    },
}

/// Compare `frame_size` bytes of the sink with the frame buffer at `base`.
pub async fn verify_frame<S, D>(
    store: &mut S,
    sink: &mut D,
    base: u32,
    frame_size: usize,
) -> Result<(), VerifyError>
where
    S: BulkStore,
    D: ReadbackSink,
{
    let mut expected = ScratchBuffer::<FRAGMENT_SIZE>::zeroed();
    let mut found = ScratchBuffer::<FRAGMENT_SIZE>::zeroed();

    for (offset, len) in chunks(frame_size) {
        let at = base.saturating_add(offset);
        let (Some(want), Some(got)) = (expected.prefix_mut(len), found.prefix_mut(len)) else {
            return Err(VerifyError::Store { offset: at });
        };
        store
            .read(at, want)
            .await
            .map_err(|_| VerifyError::Store { offset: at })?;
        sink.read(offset, got)
            .await
            .map_err(|_| VerifyError::Sink { offset })?;

        if let Some((i, (&e, &f))) = want.iter().zip(got.iter()).enumerate().find(|(_, (e, f))| e != f) {
            let delta = u32::try_from(i).unwrap_or(u32::MAX);
            return Err(VerifyError::Mismatch {
                offset: offset.saturating_add(delta),
                expected: e,
                found: f,
            });
        }
    }
    Ok(())
}
