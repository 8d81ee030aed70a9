//! Bring-up before the first frame.
//!
//! Writes both source images into the bulk store, clears the active frame
//! buffers and paints the sink background. Everything goes out in
//! page-sized chunks through one aligned scratch buffer.

use pipeline::PipelineConfig;
use platform::bus::{BulkStore, SinkDevice, Window};
use platform::dma::ScratchBuffer;
use platform::geometry::FRAGMENT_SIZE;
use platform::memory_map::{FrameBufferIndex, PsramLayout};

use crate::scene::{SourceImage, BACKGROUND};

/// Bring-up failures.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// The bulk store is smaller than the layout.
    #[error("bulk store holds {available} bytes, layout needs {needed}")]
    Capacity {
        /// Bytes the layout spans.
        needed: u32,
        /// Store capacity.
        available: u32,
    },
    /// Panel geometry does not fit a window.
    #[error("frame of {frame} bytes does not split into rows of {row}")]
    Geometry {
        /// Bytes per row.
        row: usize,
        /// Bytes per frame.
        frame: usize,
    },
    /// A bulk store write failed.
    #[error("bulk store write failed at {offset:#x}")]
    Store {
        /// Absolute store offset.
        offset: u32,
    },
    /// A sink write failed.
    #[error("sink write failed at {offset:#x}")]
    Sink {
        /// Offset within the frame.
        offset: u32,
    },
}

/// Full-frame sink window for `config`.
pub fn window(config: &PipelineConfig) -> Result<Window, InitError> {
    let geometry = InitError::Geometry {
        row: config.row_bytes,
        frame: config.frame_size,
    };
    let rows = u16::try_from(config.rows()).map_err(|_| geometry)?;
    let cols = u16::try_from(config.row_bytes).map_err(|_| geometry)?;
    if rows == 0 || cols == 0 {
        return Err(geometry);
    }
    Ok(Window::full(rows, cols))
}

/// `(offset, len)` of each page-sized chunk of a `total`-byte frame.
pub(crate) fn chunks(total: usize) -> impl Iterator<Item = (u32, usize)> {
    (0..total).step_by(FRAGMENT_SIZE).filter_map(move |start| {
        let offset = u32::try_from(start).ok()?;
        Some((offset, FRAGMENT_SIZE.min(total.saturating_sub(start))))
    })
}

/// Prepare store and sink for a pipeline run.
pub async fn prepare<S, D>(
    store: &mut S,
    sink: &mut D,
    layout: &PsramLayout,
    config: &PipelineConfig,
) -> Result<(), InitError>
where
    S: BulkStore,
    D: SinkDevice,
{
    let needed = layout.end();
    let available = store.capacity();
    if available < needed {
        return Err(InitError::Capacity { needed, available });
    }
    let window = window(config)?;
    let mut scratch = ScratchBuffer::<FRAGMENT_SIZE>::zeroed();
    let frame_size = config.frame_size;

    for (image, base) in SourceImage::ALL.into_iter().zip([layout.source1, layout.source2]) {
        for (offset, len) in chunks(frame_size) {
            let at = base.saturating_add(offset);
            let chunk = scratch
                .prefix_mut(len)
                .ok_or(InitError::Store { offset: at })?;
            image.paint(offset as usize, chunk, config.row_bytes);
            store
                .write(at, chunk)
                .await
                .map_err(|_| InitError::Store { offset: at })?;
        }
    }

    scratch.0.fill(BACKGROUND);
    for index in 0..config.frame_buffers {
        let base = layout.active(FrameBufferIndex::for_sequence(u32::from(index), 2));
        for (offset, len) in chunks(frame_size) {
            let at = base.saturating_add(offset);
            let chunk = scratch.prefix(len).ok_or(InitError::Store { offset: at })?;
            store
                .write(at, chunk)
                .await
                .map_err(|_| InitError::Store { offset: at })?;
        }
    }

    sink.begin_frame(window)
        .await
        .map_err(|_| InitError::Sink { offset: 0 })?;
    for (offset, len) in chunks(frame_size) {
        let chunk = scratch.prefix(len).ok_or(InitError::Sink { offset })?;
        let more = (offset as usize).saturating_add(len) < frame_size;
        sink.write(offset, chunk, more)
            .await
            .map_err(|_| InitError::Sink { offset })?;
    }
    Ok(())
}
