//! Mock bus implementations for testing
//!
//! Vec-backed doubles of both controllers. Each records what happened to it
//! and can be told to fail a chosen transaction, which is how the pipeline's
//! error containment is exercised without hardware.

#![cfg(any(test, feature = "std"))]

use std::vec;
use std::vec::Vec;

use embassy_time::{Duration, Timer};

use crate::bus::{BulkStore, BusError, ReadbackSink, SinkDevice, Window};

/// Which call of an operation should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPlan {
    /// Never fail.
    #[default]
    Never,
    /// Fail the n-th call (0-based) once.
    Once(usize),
    /// Fail the n-th call and every call after it.
    From(usize),
}

impl FaultPlan {
    fn fails(self, call: usize) -> bool {
        match self {
            Self::Never => false,
            Self::Once(n) => call == n,
            Self::From(n) => call >= n,
        }
    }
}

/// Counts calls and decides which ones fail.
#[derive(Debug, Default)]
struct FaultCounter {
    plan: FaultPlan,
    calls: usize,
    injected: usize,
}

impl FaultCounter {
    fn new(plan: FaultPlan) -> Self {
        Self {
            plan,
            calls: 0,
            injected: 0,
        }
    }

    fn next(&mut self) -> Result<(), BusError> {
        let call = self.calls;
        self.calls = self.calls.saturating_add(1);
        if self.plan.fails(call) {
            self.injected = self.injected.saturating_add(1);
            Err(BusError::Transaction)
        } else {
            Ok(())
        }
    }
}

fn range(offset: u32, len: usize, capacity: usize) -> Result<core::ops::Range<usize>, BusError> {
    let start = offset as usize;
    match start.checked_add(len) {
        Some(end) if end <= capacity => Ok(start..end),
        _ => Err(BusError::OutOfBounds { offset, len }),
    }
}

// ── Bulk store ──────────────────────────────────────────────────────────────

/// PSRAM double backed by a `Vec<u8>`.
#[derive(Debug)]
pub struct MemoryStore {
    data: Vec<u8>,
    reads: FaultCounter,
    writes: FaultCounter,
    latency: Duration,
}

impl MemoryStore {
    /// Zero-filled store of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            reads: FaultCounter::default(),
            writes: FaultCounter::default(),
            latency: Duration::from_ticks(0),
        }
    }

    /// Fail reads according to `plan`.
    #[must_use]
    pub fn with_read_faults(mut self, plan: FaultPlan) -> Self {
        self.reads = FaultCounter::new(plan);
        self
    }

    /// Fail writes according to `plan`.
    #[must_use]
    pub fn with_write_faults(mut self, plan: FaultPlan) -> Self {
        self.writes = FaultCounter::new(plan);
        self
    }

    /// Delay every transaction by `latency`, yielding to other tasks.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Raw contents.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Number of reads issued (including failed ones).
    pub fn read_calls(&self) -> usize {
        self.reads.calls
    }

    /// Number of writes issued (including failed ones).
    pub fn write_calls(&self) -> usize {
        self.writes.calls
    }

    async fn settle(&self) {
        if self.latency.as_ticks() > 0 {
            Timer::after(self.latency).await;
        }
    }
}

impl BulkStore for MemoryStore {
    type Error = BusError;

    async fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.settle().await;
        self.reads.next()?;
        let r = range(offset, buf.len(), self.data.len())?;
        let src = self
            .data
            .get(r)
            .ok_or(BusError::OutOfBounds { offset, len: buf.len() })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    async fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.settle().await;
        self.writes.next()?;
        let r = range(offset, data.len(), self.data.len())?;
        let dst = self
            .data
            .get_mut(r)
            .ok_or(BusError::OutOfBounds { offset, len: data.len() })?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn capacity(&self) -> u32 {
        u32::try_from(self.data.len()).unwrap_or(u32::MAX)
    }
}

// ── Sink ────────────────────────────────────────────────────────────────────

/// One accepted sink write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    /// Frame number (count of `begin_frame` calls before this write, minus one).
    pub frame: usize,
    /// Offset within the frame.
    pub offset: u32,
    /// Bytes written.
    pub len: usize,
    /// Continue flag.
    pub more: bool,
}

/// Display / FRAM double that keeps the last image and a log of writes.
#[derive(Debug)]
pub struct RecordingSink {
    image: Vec<u8>,
    window: Option<Window>,
    frames: usize,
    log: Vec<WriteRecord>,
    writes: FaultCounter,
    latency: Duration,
}

impl RecordingSink {
    /// Sink with a `capacity`-byte image.
    pub fn new(capacity: usize) -> Self {
        Self {
            image: vec![0; capacity],
            window: None,
            frames: 0,
            log: Vec::new(),
            writes: FaultCounter::default(),
            latency: Duration::from_ticks(0),
        }
    }

    /// Fail writes according to `plan` (counted across frames).
    #[must_use]
    pub fn with_write_faults(mut self, plan: FaultPlan) -> Self {
        self.writes = FaultCounter::new(plan);
        self
    }

    /// Delay every write by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Current image.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Every accepted write, in arrival order.
    pub fn log(&self) -> &[WriteRecord] {
        &self.log
    }

    /// Accepted writes belonging to frame `frame`.
    pub fn frame_log(&self, frame: usize) -> Vec<WriteRecord> {
        self.log.iter().copied().filter(|w| w.frame == frame).collect()
    }

    /// Number of frames opened with `begin_frame`.
    pub fn frames_started(&self) -> usize {
        self.frames
    }

    /// Last window opened.
    pub fn window(&self) -> Option<Window> {
        self.window
    }

    /// Number of injected write failures so far.
    pub fn injected_faults(&self) -> usize {
        self.writes.injected
    }

    /// Overwrite the whole image with `value` without logging.
    pub fn fill(&mut self, value: u8) {
        self.image.fill(value);
    }
}

impl SinkDevice for RecordingSink {
    type Error = BusError;

    async fn begin_frame(&mut self, window: Window) -> Result<(), Self::Error> {
        self.window = Some(window);
        self.frames = self.frames.saturating_add(1);
        Ok(())
    }

    async fn write(&mut self, offset: u32, data: &[u8], more: bool) -> Result<(), Self::Error> {
        if self.latency.as_ticks() > 0 {
            Timer::after(self.latency).await;
        }
        if self.window.is_none() {
            return Err(BusError::NoWindow);
        }
        self.writes.next()?;
        let r = range(offset, data.len(), self.image.len())?;
        let dst = self
            .image
            .get_mut(r)
            .ok_or(BusError::OutOfBounds { offset, len: data.len() })?;
        dst.copy_from_slice(data);
        self.log.push(WriteRecord {
            frame: self.frames.saturating_sub(1),
            offset,
            len: data.len(),
            more,
        });
        Ok(())
    }
}

impl ReadbackSink for RecordingSink {
    async fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let r = range(offset, buf.len(), self.image.len())?;
        let src = self
            .image
            .get(r)
            .ok_or(BusError::OutOfBounds { offset, len: buf.len() })?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_round_trips_and_checks_bounds() {
        let mut store = MemoryStore::new(16);
        store.write(4, &[9, 8, 7]).await.unwrap();
        let mut buf = [0u8; 3];
        store.read(4, &mut buf).await.unwrap();
        assert_eq!(buf, [9, 8, 7]);
        assert_eq!(
            store.read(15, &mut buf).await,
            Err(BusError::OutOfBounds { offset: 15, len: 3 })
        );
    }

    #[tokio::test]
    async fn once_fault_fails_exactly_one_call() {
        let mut store = MemoryStore::new(8).with_read_faults(FaultPlan::Once(1));
        let mut buf = [0u8; 2];
        assert!(store.read(0, &mut buf).await.is_ok());
        assert_eq!(store.read(0, &mut buf).await, Err(BusError::Transaction));
        assert!(store.read(0, &mut buf).await.is_ok());
        assert_eq!(store.read_calls(), 3);
    }

    #[tokio::test]
    async fn sink_requires_window_and_logs_writes() {
        let mut sink = RecordingSink::new(8);
        assert_eq!(sink.write(0, &[1], true).await, Err(BusError::NoWindow));

        sink.begin_frame(Window::full(2, 4)).await.unwrap();
        sink.write(0, &[1, 2], true).await.unwrap();
        sink.write(2, &[3], false).await.unwrap();

        assert_eq!(&sink.image()[..3], &[1, 2, 3]);
        assert_eq!(sink.log().len(), 2);
        assert!(!sink.log()[1].more);
        assert_eq!(sink.frame_log(0).len(), 2);
    }

    #[tokio::test]
    async fn failed_sink_write_leaves_image_untouched() {
        let mut sink = RecordingSink::new(4).with_write_faults(FaultPlan::From(1));
        sink.begin_frame(Window::full(1, 4)).await.unwrap();
        sink.write(0, &[5, 5], true).await.unwrap();
        assert!(sink.write(2, &[6, 6], false).await.is_err());
        assert!(sink.write(2, &[6, 6], false).await.is_err());

        assert_eq!(sink.image(), &[5, 5, 0, 0]);
        assert_eq!(sink.injected_faults(), 2);
        let mut back = [0u8; 4];
        sink.read(0, &mut back).await.unwrap();
        assert_eq!(back, [5, 5, 0, 0]);
    }
}
