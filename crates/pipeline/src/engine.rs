//! Source and sink transfer engines.
//!
//! Both engines walk the same [`FragmentPlan`] front to back. The source
//! moves each fragment from the bulk store into its scratch slot, the sink
//! drains it to the device. They meet only through the [`Handshake`] tokens
//! and the [`PingPongPool`] slot states; the bus mutexes are held for one
//! transaction at a time, never across a handshake wait.
//!
//! A failure on either side aborts the handshake so the other side returns
//! promptly, and [`FrameTransfer::transfer_frame`] reports the first real
//! cause rather than the peer's `Aborted`.

use embassy_futures::join::join;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use platform::bus::{BulkStore, SinkDevice, Window};

use crate::error::{PipelineError, Stage};
use crate::fragment::{Fragment, FragmentPlan};
use crate::handshake::Handshake;
use crate::pool::PingPongPool;

/// Outcome of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineReport {
    /// Fragments moved.
    pub fragments: u16,
    /// Bytes moved.
    pub bytes: usize,
}

impl EngineReport {
    fn record(&mut self, fragment: &Fragment) {
        self.fragments = self.fragments.saturating_add(1);
        self.bytes = self.bytes.saturating_add(fragment.len);
    }
}

/// Reads fragments from the bulk store into scratch slots.
pub struct SourceEngine<'a, M: RawMutex, S, const SLOTS: usize, const SIZE: usize> {
    store: &'a Mutex<M, S>,
    pool: &'a PingPongPool<M, SLOTS, SIZE>,
    handshake: &'a Handshake<M, SLOTS>,
}

impl<'a, M, S, const SLOTS: usize, const SIZE: usize> SourceEngine<'a, M, S, SLOTS, SIZE>
where
    M: RawMutex,
    S: BulkStore,
{
    /// Engine over a shared store, pool and handshake.
    pub fn new(
        store: &'a Mutex<M, S>,
        pool: &'a PingPongPool<M, SLOTS, SIZE>,
        handshake: &'a Handshake<M, SLOTS>,
    ) -> Self {
        Self {
            store,
            pool,
            handshake,
        }
    }

    /// Move every fragment of `plan`, reading at `base + fragment.offset`.
    ///
    /// `on_complete` runs once, after the last fragment was published.
    pub async fn run(
        &self,
        base: u32,
        plan: &FragmentPlan,
        on_complete: impl FnOnce(),
    ) -> Result<EngineReport, PipelineError> {
        let result = self.run_inner(base, plan, on_complete).await;
        if result.is_err() {
            self.handshake.abort();
        }
        result
    }

    async fn run_inner(
        &self,
        base: u32,
        plan: &FragmentPlan,
        on_complete: impl FnOnce(),
    ) -> Result<EngineReport, PipelineError> {
        let mut report = EngineReport::default();
        let mut on_complete = Some(on_complete);
        for fragment in plan {
            self.handshake
                .wait_consumed(fragment.slot)
                .await
                .map_err(|e| PipelineError::from_handshake(e, Stage::Source, fragment.index))?;

            let mut slot = self.pool.try_acquire_write(fragment.slot)?;
            let offset = base
                .checked_add(fragment.offset)
                .ok_or(PipelineError::Transfer {
                    stage: Stage::Source,
                    fragment: fragment.index,
                })?;
            {
                let buf = slot.buf_mut(fragment.len)?;
                let mut store = self.store.lock().await;
                store.read(offset, buf).await.map_err(|_| {
                    warn!("source read failed at fragment {}", fragment.index);
                    PipelineError::Transfer {
                        stage: Stage::Source,
                        fragment: fragment.index,
                    }
                })?;
            }
            slot.publish(fragment.index, fragment.len)?;
            self.handshake
                .signal_produced(fragment.slot)
                .map_err(|e| PipelineError::from_handshake(e, Stage::Source, fragment.index))?;
            trace!("source fragment {} -> slot {}", fragment.index, fragment.slot);

            report.record(&fragment);
            if fragment.last {
                if let Some(done) = on_complete.take() {
                    done();
                }
            }
        }
        Ok(report)
    }
}

/// Drains scratch slots into the sink device.
pub struct SinkEngine<'a, M: RawMutex, D, const SLOTS: usize, const SIZE: usize> {
    sink: &'a Mutex<M, D>,
    pool: &'a PingPongPool<M, SLOTS, SIZE>,
    handshake: &'a Handshake<M, SLOTS>,
}

impl<'a, M, D, const SLOTS: usize, const SIZE: usize> SinkEngine<'a, M, D, SLOTS, SIZE>
where
    M: RawMutex,
    D: SinkDevice,
{
    /// Engine over a shared sink, pool and handshake.
    pub fn new(
        sink: &'a Mutex<M, D>,
        pool: &'a PingPongPool<M, SLOTS, SIZE>,
        handshake: &'a Handshake<M, SLOTS>,
    ) -> Self {
        Self {
            sink,
            pool,
            handshake,
        }
    }

    /// Drain every fragment of `plan` in order.
    ///
    /// `on_complete` runs once, after the last fragment reached the sink.
    pub async fn run(
        &self,
        plan: &FragmentPlan,
        on_complete: impl FnOnce(),
    ) -> Result<EngineReport, PipelineError> {
        let result = self.run_inner(plan, on_complete).await;
        if result.is_err() {
            self.handshake.abort();
        }
        result
    }

    async fn run_inner(
        &self,
        plan: &FragmentPlan,
        on_complete: impl FnOnce(),
    ) -> Result<EngineReport, PipelineError> {
        let mut report = EngineReport::default();
        let mut on_complete = Some(on_complete);
        for fragment in plan {
            self.handshake
                .wait_produced(fragment.slot)
                .await
                .map_err(|e| PipelineError::from_handshake(e, Stage::Sink, fragment.index))?;

            let slot = self.pool.try_acquire_read(fragment.slot, fragment.index)?;
            {
                let mut sink = self.sink.lock().await;
                sink.write(fragment.offset, slot.bytes(), !fragment.last)
                    .await
                    .map_err(|_| {
                        warn!("sink write failed at fragment {}", fragment.index);
                        PipelineError::Transfer {
                            stage: Stage::Sink,
                            fragment: fragment.index,
                        }
                    })?;
            }
            slot.release();
            self.handshake
                .signal_consumed(fragment.slot)
                .map_err(|e| PipelineError::from_handshake(e, Stage::Sink, fragment.index))?;
            trace!("sink fragment {} <- slot {}", fragment.index, fragment.slot);

            report.record(&fragment);
            if fragment.last {
                if let Some(done) = on_complete.take() {
                    done();
                }
            }
        }
        Ok(report)
    }
}

/// Both engines bound to one pool and handshake.
pub struct FrameTransfer<'a, M: RawMutex, S, D, const SLOTS: usize, const SIZE: usize> {
    source: SourceEngine<'a, M, S, SLOTS, SIZE>,
    sink: SinkEngine<'a, M, D, SLOTS, SIZE>,
    pool: &'a PingPongPool<M, SLOTS, SIZE>,
    handshake: &'a Handshake<M, SLOTS>,
    sink_device: &'a Mutex<M, D>,
}

impl<'a, M, S, D, const SLOTS: usize, const SIZE: usize> FrameTransfer<'a, M, S, D, SLOTS, SIZE>
where
    M: RawMutex,
    S: BulkStore,
    D: SinkDevice,
{
    /// Bind both engines.
    pub fn new(
        store: &'a Mutex<M, S>,
        sink: &'a Mutex<M, D>,
        pool: &'a PingPongPool<M, SLOTS, SIZE>,
        handshake: &'a Handshake<M, SLOTS>,
    ) -> Self {
        Self {
            source: SourceEngine::new(store, pool, handshake),
            sink: SinkEngine::new(sink, pool, handshake),
            pool,
            handshake,
            sink_device: sink,
        }
    }

    /// Stream one frame of `plan.total()` bytes starting at `base` in the
    /// bulk store into `window` on the sink.
    ///
    /// `on_sink_done` runs once when the last fragment reached the sink.
    /// On error, fragments already written stay as they are and the pool
    /// and handshake are left for the next call to reset.
    pub async fn transfer_frame(
        &self,
        base: u32,
        plan: &FragmentPlan,
        window: Window,
        on_sink_done: impl FnOnce(),
    ) -> Result<EngineReport, PipelineError> {
        self.pool.reset();
        self.handshake.reset();

        self.sink_device
            .lock()
            .await
            .begin_frame(window)
            .await
            .map_err(|_| PipelineError::Transfer {
                stage: Stage::Sink,
                fragment: 0,
            })?;

        let (source, sink) = join(
            self.source.run(base, plan, || {
                trace!("source done, {} fragments", plan.len());
            }),
            self.sink.run(plan, on_sink_done),
        )
        .await;

        match (source, sink) {
            (Ok(_), Ok(report)) => Ok(report),
            (Err(e), Err(other)) if e.is_secondary() => Err(other),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_time::Duration;
    use platform::mocks::{FaultPlan, MemoryStore, RecordingSink};

    type Pool = PingPongPool<NoopRawMutex, 2, 64>;
    type Hs = Handshake<NoopRawMutex, 2>;

    fn patterned_store(len: usize) -> MemoryStore {
        let mut store = MemoryStore::new(len);
        let pattern: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        embassy_futures::block_on(store.write(0, &pattern)).unwrap();
        store
    }

    #[tokio::test]
    async fn frame_arrives_in_order_with_tail() {
        let total = 10 * 64 + 3;
        let store = Mutex::<NoopRawMutex, _>::new(patterned_store(total));
        let sink = Mutex::<NoopRawMutex, _>::new(RecordingSink::new(total));
        let pool = Pool::new();
        let hs = Hs::new(Duration::from_millis(200));
        let xfer = FrameTransfer::new(&store, &sink, &pool, &hs);
        let plan = FragmentPlan::new(total, 64, 2).unwrap();

        let done = Cell::new(0u32);
        let report = xfer
            .transfer_frame(0, &plan, Window::full(1, 643), || done.set(done.get() + 1))
            .await
            .unwrap();

        assert_eq!(report.fragments, 11);
        assert_eq!(report.bytes, total);
        assert_eq!(done.get(), 1);

        let sink = sink.lock().await;
        let offsets: Vec<u32> = sink.log().iter().map(|w| w.offset).collect();
        let expected: Vec<u32> = (0..11).map(|i| i * 64).collect();
        assert_eq!(offsets, expected);
        let last = sink.log().last().unwrap();
        assert_eq!(last.len, 3);
        assert!(!last.more);
        assert!(sink.log()[..10].iter().all(|w| w.more));
        assert_eq!(sink.image(), store.lock().await.contents());
    }

    #[tokio::test]
    async fn sink_fault_keeps_earlier_fragments_and_reports_root_cause() {
        let total = 8 * 64;
        let store = Mutex::<NoopRawMutex, _>::new(patterned_store(total));
        let sink = Mutex::<NoopRawMutex, _>::new(
            RecordingSink::new(total).with_write_faults(FaultPlan::Once(5)),
        );
        let pool = Pool::new();
        let hs = Hs::new(Duration::from_millis(200));
        let xfer = FrameTransfer::new(&store, &sink, &pool, &hs);
        let plan = FragmentPlan::new(total, 64, 2).unwrap();

        let done = Cell::new(false);
        let err = xfer
            .transfer_frame(0, &plan, Window::full(1, 512), || done.set(true))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PipelineError::Transfer {
                stage: Stage::Sink,
                fragment: 5
            }
        );
        assert!(!done.get());

        let sink = sink.lock().await;
        assert_eq!(sink.log().len(), 5);
        let store = store.lock().await;
        let good = &store.contents()[..5 * 64];
        assert_eq!(&sink.image()[..5 * 64], good);
        assert!(sink.image()[5 * 64..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn source_fault_aborts_the_sink() {
        let total = 6 * 64;
        let store = Mutex::<NoopRawMutex, _>::new(
            patterned_store(total).with_read_faults(FaultPlan::Once(3)),
        );
        let sink = Mutex::<NoopRawMutex, _>::new(RecordingSink::new(total));
        let pool = Pool::new();
        let hs = Hs::new(Duration::from_secs(5));
        let xfer = FrameTransfer::new(&store, &sink, &pool, &hs);
        let plan = FragmentPlan::new(total, 64, 2).unwrap();

        let err = xfer
            .transfer_frame(0, &plan, Window::full(1, 384), || {})
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::Transfer {
                stage: Stage::Source,
                fragment: 3
            }
        );
        assert!(sink.lock().await.log().len() <= 3);

        // The next frame starts clean.
        let report = xfer
            .transfer_frame(0, &plan, Window::full(1, 384), || {})
            .await
            .unwrap();
        assert_eq!(report.fragments, 6);
    }
}
