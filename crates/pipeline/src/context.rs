//! Pipeline context and tasks.
//!
//! One [`PipelineContext`] owns the shared state of a running pipeline: the
//! bulk store and sink behind async mutexes, the scratch pool, the handshake
//! and the event channel. Three cooperating tasks run on top of it:
//!
//! - **main** feeds [`MainEvent`]s to the [`Orchestrator`] and forwards its
//!   commands,
//! - **compose** builds frames into the active frame buffers,
//! - **render** streams a composed frame to the sink with both engines.
//!
//! [`PipelineContext::run`] drives all three on the caller's executor and
//! returns once the frame limit is reached or something stalls.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_futures::join::join3;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use platform::bus::{BulkStore, SinkDevice, Window};
use platform::memory_map::{FrameBufferIndex, PsramLayout};

use crate::compose::ComposeStage;
use crate::config::{ConfigError, PipelineConfig};
use crate::engine::FrameTransfer;
use crate::error::PipelineError;
use crate::fragment::FragmentPlan;
use crate::handshake::Handshake;
use crate::orchestrator::{Command, Commands, MainEvent, Orchestrator};
use crate::pool::PingPongPool;

/// Depth of the main task's event queue.
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Main gives up after this many wait timeouts without any event.
const STALL_FACTOR: u64 = 4;

/// Work item for the compose and render tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskCommand {
    /// Process frame `frame` in buffer `fb`.
    Start {
        /// Active frame buffer.
        fb: FrameBufferIndex,
        /// Sequence number for logs.
        frame: u32,
    },
    /// Leave the task loop.
    Stop,
}

/// Counters published by the tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipelineStats {
    /// Frames composed.
    pub composed: u32,
    /// Frames that reached the sink completely.
    pub displayed: u32,
    /// Frames whose render failed.
    pub dropped: u32,
    /// Compose runs that failed.
    pub compose_failures: u32,
    /// Transfer fragments delivered to the sink.
    pub fragments: u32,
}

#[derive(Default)]
struct StatCounters {
    composed: AtomicU32,
    displayed: AtomicU32,
    dropped: AtomicU32,
    compose_failures: AtomicU32,
    fragments: AtomicU32,
}

impl StatCounters {
    fn bump(counter: &AtomicU32, by: u32) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            composed: self.composed.load(Ordering::Relaxed),
            displayed: self.displayed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            compose_failures: self.compose_failures.load(Ordering::Relaxed),
            fragments: self.fragments.load(Ordering::Relaxed),
        }
    }
}

/// Shared state of one pipeline instance.
///
/// `SLOTS` scratch slots of `SIZE` bytes carry transfer fragments; the
/// compose stage uses three more `SIZE`-byte buffers of its own.
pub struct PipelineContext<M: RawMutex, S, D, const SLOTS: usize, const SIZE: usize> {
    store: Mutex<M, S>,
    sink: Mutex<M, D>,
    pool: PingPongPool<M, SLOTS, SIZE>,
    handshake: Handshake<M, SLOTS>,
    events: Channel<M, MainEvent, EVENT_QUEUE_DEPTH>,
    compose_cmd: Signal<M, TaskCommand>,
    render_cmd: Signal<M, TaskCommand>,
    config: PipelineConfig,
    layout: PsramLayout,
    plan: FragmentPlan,
    window: Window,
    stats: StatCounters,
}

impl<M, S, D, const SLOTS: usize, const SIZE: usize> PipelineContext<M, S, D, SLOTS, SIZE>
where
    M: RawMutex,
    S: BulkStore,
    D: SinkDevice,
{
    /// Validate `config` and bind the pipeline to its two buses.
    pub fn new(
        store: S,
        sink: D,
        config: PipelineConfig,
        layout: PsramLayout,
    ) -> Result<Self, PipelineError> {
        config.validate(SLOTS, SIZE)?;
        config.validate_layout(&layout, store.capacity())?;
        let plan = FragmentPlan::new(config.frame_size, config.fragment_size, SLOTS)?;
        let rows = u16::try_from(config.rows()).map_err(|_| ConfigError::RowGeometry {
            row: config.row_bytes,
            frame: config.frame_size,
        })?;
        let cols = u16::try_from(config.row_bytes).map_err(|_| ConfigError::RowGeometry {
            row: config.row_bytes,
            frame: config.frame_size,
        })?;

        Ok(Self {
            store: Mutex::new(store),
            sink: Mutex::new(sink),
            pool: PingPongPool::new(),
            handshake: Handshake::new(config.wait_timeout),
            events: Channel::new(),
            compose_cmd: Signal::new(),
            render_cmd: Signal::new(),
            config,
            layout,
            plan,
            window: Window::full(rows, cols),
            stats: StatCounters::default(),
        })
    }

    /// Run main, compose and render until the frame limit is reached.
    ///
    /// Without a frame limit this only returns on a stall.
    pub async fn run(&self) -> Result<PipelineStats, PipelineError> {
        let mut stage = ComposeStage::<SIZE>::new(&self.config, self.layout)?;
        info!(
            "pipeline up: {} fragments of {} bytes, {} frame buffers",
            self.plan.len(),
            self.plan.fragment_size(),
            self.config.frame_buffers
        );

        let (main, (), ()) = join3(
            self.main_task(),
            self.compose_task(&mut stage),
            self.render_task(),
        )
        .await;

        let stats = self.stats();
        info!(
            "pipeline down: {} composed, {} displayed, {} dropped",
            stats.composed,
            stats.displayed,
            stats.dropped
        );
        main.map(|()| stats)
    }

    /// Panel tearing-effect edge. Safe to call from any task; an edge that
    /// finds the queue full is dropped.
    pub fn tearing_effect(&self) {
        if self.events.try_send(MainEvent::TearingEffect).is_err() {
            trace!("tearing effect dropped, queue full");
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Bulk store.
    pub fn store(&self) -> &Mutex<M, S> {
        &self.store
    }

    /// Sink device.
    pub fn sink(&self) -> &Mutex<M, D> {
        &self.sink
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Bulk store layout.
    pub fn layout(&self) -> PsramLayout {
        self.layout
    }

    /// Give back the two buses.
    pub fn into_parts(self) -> (S, D) {
        (self.store.into_inner(), self.sink.into_inner())
    }

    // ── Main ────────────────────────────────────────────────────────────────

    async fn main_task(&self) -> Result<(), PipelineError> {
        let result = self.orchestrate().await;
        if let Err(e) = &result {
            error!("main: {}", e);
            self.handshake.abort();
        }
        self.compose_cmd.signal(TaskCommand::Stop);
        self.render_cmd.signal(TaskCommand::Stop);
        result
    }

    async fn orchestrate(&self) -> Result<(), PipelineError> {
        let mut orchestrator = Orchestrator::new(&self.config);
        let stall = Duration::from_ticks(
            self.config
                .wait_timeout
                .as_ticks()
                .saturating_mul(STALL_FACTOR),
        );

        if self.dispatch(orchestrator.start()) {
            return Ok(());
        }
        loop {
            let event = with_timeout(stall, self.events.receive())
                .await
                .map_err(|_| PipelineError::Stalled)?;
            trace!("main event {}", event_name(event));

            let commands = orchestrator.handle(event);
            if !orchestrator.conserved() {
                error!(
                    "frame buffer credits out of balance: {} available, {} ready",
                    orchestrator.available(),
                    orchestrator.ready()
                );
            }
            if self.dispatch(commands) {
                debug!("frame limit reached");
                return Ok(());
            }
        }
    }

    /// Forward commands; true once the orchestrator is finished.
    fn dispatch(&self, commands: Commands) -> bool {
        let mut finished = false;
        for command in commands {
            match command {
                Command::StartCompose { fb, frame } => {
                    self.compose_cmd.signal(TaskCommand::Start { fb, frame });
                }
                Command::StartRender { fb, frame } => {
                    self.render_cmd.signal(TaskCommand::Start { fb, frame });
                }
                Command::Finished => finished = true,
            }
        }
        finished
    }

    // ── Compose ─────────────────────────────────────────────────────────────

    async fn compose_task(&self, stage: &mut ComposeStage<SIZE>) {
        loop {
            let TaskCommand::Start { fb, frame } = self.compose_cmd.wait().await else {
                break;
            };
            let event = match stage.compose_frame(&self.store, fb).await {
                Ok(frames) => {
                    StatCounters::bump(&self.stats.composed, 1);
                    debug!("composed frame {} into fb{} ({} total)", frame, fb.get(), frames);
                    MainEvent::NewFrameReady
                }
                Err(e) => {
                    StatCounters::bump(&self.stats.compose_failures, 1);
                    warn!("compose of frame {} failed: {}", frame, e);
                    MainEvent::ComposeFailed
                }
            };
            self.events.send(event).await;
        }
        trace!("compose task stopped");
    }

    // ── Render ──────────────────────────────────────────────────────────────

    async fn render_task(&self) {
        let transfer = FrameTransfer::new(&self.store, &self.sink, &self.pool, &self.handshake);
        loop {
            let TaskCommand::Start { fb, frame } = self.render_cmd.wait().await else {
                break;
            };
            let base = self.layout.active(fb);
            let result = transfer
                .transfer_frame(base, &self.plan, self.window, || {
                    StatCounters::bump(&self.stats.displayed, 1);
                })
                .await;
            let event = match result {
                Ok(report) => {
                    StatCounters::bump(&self.stats.fragments, u32::from(report.fragments));
                    debug!("displayed frame {} from fb{}", frame, fb.get());
                    MainEvent::DisplayDone
                }
                Err(e) => {
                    StatCounters::bump(&self.stats.dropped, 1);
                    warn!("render of frame {} failed: {}", frame, e);
                    MainEvent::RenderFailed
                }
            };
            self.events.send(event).await;
        }
        trace!("render task stopped");
    }
}

fn event_name(event: MainEvent) -> &'static str {
    match event {
        MainEvent::NewFrameReady => "new-frame-ready",
        MainEvent::DisplayDone => "display-done",
        MainEvent::TearingEffect => "tearing-effect",
        MainEvent::ComposeFailed => "compose-failed",
        MainEvent::RenderFailed => "render-failed",
    }
}
