//! Frame pipeline emulator - host entry point
//!
//! Runs the full pipeline against in-memory PSRAM and sink doubles on a
//! single-threaded tokio runtime.
//!
//! Environment:
//!
//! - `PIPELINE_FRAMES` - frames to display before stopping (default 60)
//! - `PIPELINE_MODE` - `serial`, `early`, `te`, `te-early` or `single`
//! - `PIPELINE_FAULT_AT` - fail this sink write once (0-based, counted from
//!   the first pipeline frame)
//! - `RUST_LOG` - tracing filter (default `info`)

use std::str::FromStr;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::{Duration, Timer};
use firmware::RunMode;
use pipeline::PipelineContext;
use platform::geometry::FRAGMENT_SIZE;
use platform::memory_map::{FrameBufferIndex, PsramLayout};
use platform::mocks::{FaultPlan, MemoryStore, RecordingSink};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Two transfer slots of one PSRAM page each.
type Emulated = PipelineContext<NoopRawMutex, MemoryStore, RecordingSink, 2, FRAGMENT_SIZE>;

/// Panel refresh period (≈60 Hz).
const TE_PERIOD: Duration = Duration::from_micros(16_667);

/// Per-transaction delay of the emulated buses.
const BUS_LATENCY: Duration = Duration::from_micros(20);

struct Options {
    frames: u32,
    mode: RunMode,
    fault_at: Option<usize>,
}

impl Options {
    fn from_env() -> Result<Self> {
        let frames = env_or("PIPELINE_FRAMES", 60u32)?;
        if frames == 0 {
            bail!("PIPELINE_FRAMES must be at least 1");
        }
        Ok(Self {
            frames,
            mode: env_or("PIPELINE_MODE", RunMode::Serial)?,
            fault_at: std::env::var("PIPELINE_FAULT_AT")
                .ok()
                .map(|v| v.parse().context("PIPELINE_FAULT_AT"))
                .transpose()?,
        })
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|e| anyhow!("{name}: {e}")),
        Err(_) => Ok(default),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = Options::from_env()?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(&options))
}

async fn run(options: &Options) -> Result<()> {
    let layout = PsramLayout::PANEL;
    let config = options.mode.config(options.frames);
    info!(mode = options.mode.as_str(), frames = options.frames, "frame pipeline emulator");

    let mut store = MemoryStore::new(layout.end() as usize);
    let mut sink = RecordingSink::new(config.frame_size);
    firmware::prepare(&mut store, &mut sink, &layout, &config)
        .await
        .map_err(|e| anyhow!("bring-up: {e}"))?;
    info!("source images written, background painted");

    let store = store.with_latency(BUS_LATENCY);
    let mut sink = sink.with_latency(BUS_LATENCY);
    if let Some(call) = options.fault_at {
        sink = sink.with_write_faults(FaultPlan::Once(call));
    }

    let ctx = Emulated::new(store, sink, config, layout).map_err(|e| anyhow!("{e}"))?;
    let ticker = async {
        if options.mode.uses_tearing_effect() {
            loop {
                Timer::after(TE_PERIOD).await;
                ctx.tearing_effect();
            }
        } else {
            core::future::pending::<()>().await;
        }
    };

    let started = Instant::now();
    let stats = match select(ctx.run(), ticker).await {
        Either::First(result) => result.map_err(|e| anyhow!("pipeline: {e}"))?,
        Either::Second(()) => bail!("tearing-effect ticker stopped"),
    };
    let elapsed = started.elapsed();
    let fps = f64::from(stats.displayed) / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        composed = stats.composed,
        displayed = stats.displayed,
        dropped = stats.dropped,
        compose_failures = stats.compose_failures,
        fragments = stats.fragments,
        elapsed_ms = elapsed.as_millis() as u64,
        fps = %format_args!("{fps:.1}"),
        "run complete"
    );

    let last = stats.displayed.saturating_add(stats.dropped).saturating_sub(1);
    let fb = FrameBufferIndex::for_sequence(last, config.frame_buffers);
    let (mut store, mut sink) = ctx.into_parts();
    match firmware::verify_frame(&mut store, &mut sink, layout.active(fb), config.frame_size).await
    {
        Ok(()) => info!(fb = fb.get(), "sink matches the last displayed frame buffer"),
        Err(e) if options.mode.releases_early() || stats.dropped > 0 => {
            warn!(fb = fb.get(), "read-back differs: {e}");
        }
        Err(e) => bail!("read-back verification failed: {e}"),
    }
    Ok(())
}
