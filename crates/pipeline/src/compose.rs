//! Frame composition.
//!
//! Three layers:
//!
//! - [`ComposeMachine`]: pure state machine over compose fragments. No I/O.
//! - [`Composer`]: the per-pixel overlay of two source images.
//! - [`ComposeStage`]: drives the machine against the bulk store.
//!
//! The machine follows the fragment cursor through one frame:
//!
//! | State            | Trigger                  | Action                                    | Next            |
//! |------------------|--------------------------|-------------------------------------------|-----------------|
//! | Idle             | start-new-frame          | set request flag                          | Idle (flag set) |
//! | Idle (flag set)  | fragment reads complete  | combine, write, read next pair            | Composing(1)    |
//! | Composing(k)     | fragment reads complete  | combine, write, read next pair            | Composing(k+1)  |
//! | Composing(N-1)   | fragment reads complete  | combine, write, wrap to 0, frame ready    | Idle            |
//!
//! Reads for fragment 0 of the next frame are issued as soon as the previous
//! frame finishes, before the next request arrives.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use platform::bus::BulkStore;
use platform::dma::ScratchBuffer;
use platform::memory_map::{FrameBufferIndex, PsramLayout};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Stage};
use crate::fragment::FragmentPlan;

// ── State machine ───────────────────────────────────────────────────────────

/// Observable compose state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ComposeState {
    /// At fragment 0, waiting for a request or for the first reads.
    Idle {
        /// A new frame has been requested.
        requested: bool,
    },
    /// Somewhere inside a frame.
    Composing {
        /// Next fragment to combine.
        fragment: u16,
    },
}

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ComposeStep {
    /// Read both source fragments for `fragment`.
    NeedRead {
        /// Fragment to load.
        fragment: u16,
    },
    /// Sources are loaded: combine and write `fragment`.
    Compose {
        /// Fragment to combine.
        fragment: u16,
        /// Final fragment of the frame.
        last: bool,
    },
    /// Nothing to do until a request or a read completion arrives.
    Wait,
}

/// Result of finishing a fragment write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Advance {
    /// More fragments remain; the cursor moved to `fragment`.
    Next {
        /// New cursor.
        fragment: u16,
    },
    /// The frame is complete. Emitted exactly once per frame.
    FrameReady {
        /// Number of frames composed so far, including this one.
        frames: u32,
    },
}

/// Compose protocol errors.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ComposeError {
    /// Read completion for a fragment that was not requested.
    #[error("unexpected read completion for fragment {0}")]
    UnexpectedRead(u16),
    /// Write completion with no compose in progress.
    #[error("no fragment is being composed")]
    NotComposing,
}

/// Pure compose state machine over `fragments` compose fragments.
#[derive(Debug, Clone)]
pub struct ComposeMachine {
    fragments: u16,
    cursor: u16,
    loaded: Option<u16>,
    pending: Option<u16>,
    composing: bool,
    requested: bool,
    frames: u32,
}

impl ComposeMachine {
    /// Machine for a frame of `fragments` compose fragments (at least one).
    pub fn new(fragments: u16) -> Self {
        Self {
            fragments: fragments.max(1),
            cursor: 0,
            loaded: None,
            pending: None,
            composing: false,
            requested: false,
            frames: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ComposeState {
        if self.cursor == 0 && !self.composing {
            ComposeState::Idle {
                requested: self.requested,
            }
        } else {
            ComposeState::Composing {
                fragment: self.cursor,
            }
        }
    }

    /// Frames completed so far.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Start-new-frame event.
    pub fn request_frame(&mut self) {
        self.requested = true;
    }

    /// Decide the next action. Marks reads as in flight when it asks for them.
    pub fn next_step(&mut self) -> ComposeStep {
        if self.composing {
            return ComposeStep::Wait;
        }
        if self.loaded == Some(self.cursor) {
            if self.cursor == 0 && !self.requested {
                return ComposeStep::Wait;
            }
            self.composing = true;
            return ComposeStep::Compose {
                fragment: self.cursor,
                last: self.is_last(self.cursor),
            };
        }
        if self.pending.is_none() {
            self.pending = Some(self.cursor);
            return ComposeStep::NeedRead {
                fragment: self.cursor,
            };
        }
        ComposeStep::Wait
    }

    /// Both source reads for `fragment` finished (`ok`) or failed.
    pub fn reads_complete(&mut self, fragment: u16, ok: bool) -> Result<(), ComposeError> {
        if self.pending != Some(fragment) {
            return Err(ComposeError::UnexpectedRead(fragment));
        }
        self.pending = None;
        if ok && fragment == self.cursor {
            self.loaded = Some(fragment);
        }
        Ok(())
    }

    /// The composed fragment was written out.
    pub fn fragment_written(&mut self) -> Result<Advance, ComposeError> {
        if !self.composing {
            return Err(ComposeError::NotComposing);
        }
        self.composing = false;
        self.loaded = None;
        if self.is_last(self.cursor) {
            self.cursor = 0;
            self.requested = false;
            self.frames = self.frames.saturating_add(1);
            Ok(Advance::FrameReady {
                frames: self.frames,
            })
        } else {
            self.cursor = self.cursor.saturating_add(1);
            Ok(Advance::Next {
                fragment: self.cursor,
            })
        }
    }

    /// Drop the frame in progress and rewind to fragment 0. No frame-ready
    /// event is emitted for it.
    pub fn abort_frame(&mut self) {
        self.cursor = 0;
        self.loaded = None;
        self.pending = None;
        self.composing = false;
        self.requested = false;
    }

    fn is_last(&self, fragment: u16) -> bool {
        fragment.saturating_add(1) >= self.fragments
    }
}

// ── Pixel combine ───────────────────────────────────────────────────────────

/// Pixels are handled four at a time.
pub const WORD: usize = 4;

/// Highest colour value the combine produces.
pub const COLOR_MAX: u8 = 0x3F;

/// Colour value meaning "no pixel" in the source images.
pub const BLANK: u8 = 0xFF;

/// Four identical pixels.
pub const fn color_word(c: u8) -> [u8; WORD] {
    [c; WORD]
}

/// Overlays two scrolling source images.
///
/// For frame `n`, source 2 is scrolled left and source 1 right by `n`
/// words. Where both have a pixel the result is `COLOR_MAX ^ (n % COLOR_MAX)`;
/// where one has a pixel it shows through; where neither does the background
/// is `n % COLOR_MAX`.
#[derive(Debug, Clone, Copy)]
pub struct Composer {
    row_bytes: usize,
    minimal: bool,
}

impl Composer {
    /// Composer for rows of `row_bytes` bytes.
    pub fn new(row_bytes: usize, minimal: bool) -> Self {
        Self { row_bytes, minimal }
    }

    /// Combine whole rows of `src1` and `src2` into `dest` for frame `frame`.
    ///
    /// All three slices must have the same length, a multiple of the row
    /// length. Trailing partial rows are left untouched.
    #[allow(clippy::arithmetic_side_effects)] // Safety: `words` > 0; every index is reduced mod `words`
    pub fn compose(&self, src1: &[u8], src2: &[u8], dest: &mut [u8], frame: u32) {
        if self.row_bytes == 0 {
            return;
        }
        let words = self.row_bytes / WORD;
        if words == 0 {
            return;
        }
        let shift = (frame as usize) % words;
        let n = (frame % u32::from(COLOR_MAX)) as u8;
        let overlap = color_word(COLOR_MAX ^ n);
        let background = color_word(n);
        let blank = color_word(BLANK);

        let rows = dest
            .chunks_exact_mut(self.row_bytes)
            .zip(src1.chunks_exact(self.row_bytes))
            .zip(src2.chunks_exact(self.row_bytes));
        for ((out, a), b) in rows {
            for (j, px) in out.chunks_exact_mut(WORD).enumerate() {
                let b_word = word(b, (j + shift) % words);
                if self.minimal {
                    px.copy_from_slice(&b_word);
                    continue;
                }
                let a_word = word(a, (j + words - shift) % words);
                let value = match (a_word != blank, b_word != blank) {
                    (true, true) => overlap,
                    (false, true) => b_word,
                    (true, false) => a_word,
                    (false, false) => background,
                };
                px.copy_from_slice(&value);
            }
        }
    }
}

fn word(row: &[u8], index: usize) -> [u8; WORD] {
    let start = index.saturating_mul(WORD);
    let mut out = color_word(BLANK);
    if let Some(bytes) = row.get(start..start.saturating_add(WORD)) {
        out.copy_from_slice(bytes);
    }
    out
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// Runs the compose machine against the bulk store.
pub struct ComposeStage<const SIZE: usize> {
    machine: ComposeMachine,
    composer: Composer,
    plan: FragmentPlan,
    layout: PsramLayout,
    src1: ScratchBuffer<SIZE>,
    src2: ScratchBuffer<SIZE>,
    dest: ScratchBuffer<SIZE>,
}

impl<const SIZE: usize> ComposeStage<SIZE> {
    /// Stage for `config`, with sources and targets at `layout`.
    pub fn new(config: &PipelineConfig, layout: PsramLayout) -> Result<Self, PipelineError> {
        let fragment = config.compose_fragment_size();
        if fragment > SIZE {
            return Err(crate::config::ConfigError::FragmentTooLarge {
                fragment,
                slot: SIZE,
            }
            .into());
        }
        let plan = FragmentPlan::new(config.frame_size, fragment, 1)?;
        Ok(Self {
            machine: ComposeMachine::new(plan.len()),
            composer: Composer::new(config.row_bytes, config.minimal_compose),
            plan,
            layout,
            src1: ScratchBuffer::zeroed(),
            src2: ScratchBuffer::zeroed(),
            dest: ScratchBuffer::zeroed(),
        })
    }

    /// Underlying state machine.
    pub fn machine(&self) -> &ComposeMachine {
        &self.machine
    }

    /// Compose one full frame into active buffer `fb`.
    pub async fn compose_frame<M, S>(
        &mut self,
        store: &Mutex<M, S>,
        fb: FrameBufferIndex,
    ) -> Result<u32, PipelineError>
    where
        M: RawMutex,
        S: BulkStore,
    {
        self.machine.request_frame();
        let result = self.run_frame(store, fb).await;
        if result.is_err() {
            self.machine.abort_frame();
        }
        result
    }

    async fn run_frame<M, S>(
        &mut self,
        store: &Mutex<M, S>,
        fb: FrameBufferIndex,
    ) -> Result<u32, PipelineError>
    where
        M: RawMutex,
        S: BulkStore,
    {
        loop {
            match self.machine.next_step() {
                ComposeStep::NeedRead { fragment } => self.load(store, fragment).await?,
                ComposeStep::Compose { fragment, .. } => {
                    self.combine_and_write(store, fb, fragment).await?;
                    let advance = self.machine.fragment_written().map_err(|_| {
                        PipelineError::Transfer {
                            stage: Stage::ComposeWrite,
                            fragment,
                        }
                    })?;
                    if let Advance::FrameReady { frames } = advance {
                        self.prefetch(store).await;
                        return Ok(frames);
                    }
                }
                ComposeStep::Wait => return Err(PipelineError::Stalled),
            }
        }
    }

    async fn load<M, S>(&mut self, store: &Mutex<M, S>, fragment: u16) -> Result<(), PipelineError>
    where
        M: RawMutex,
        S: BulkStore,
    {
        let ok = self.read_sources(store, fragment).await;
        self.machine
            .reads_complete(fragment, ok)
            .map_err(|_| PipelineError::Transfer {
                stage: Stage::ComposeRead,
                fragment,
            })?;
        if ok {
            Ok(())
        } else {
            warn!("compose read failed at fragment {}", fragment);
            Err(PipelineError::Transfer {
                stage: Stage::ComposeRead,
                fragment,
            })
        }
    }

    async fn read_sources<M, S>(&mut self, store: &Mutex<M, S>, fragment: u16) -> bool
    where
        M: RawMutex,
        S: BulkStore,
    {
        let Some(frag) = self.plan.get(fragment) else {
            return false;
        };
        let (Some(a), Some(b)) = (
            self.layout.source1.checked_add(frag.offset),
            self.layout.source2.checked_add(frag.offset),
        ) else {
            return false;
        };
        let (Some(buf1), Some(buf2)) = (self.src1.prefix_mut(frag.len), self.src2.prefix_mut(frag.len))
        else {
            return false;
        };
        // One transaction per lock so render reads can interleave.
        if store.lock().await.read(a, buf1).await.is_err() {
            return false;
        }
        store.lock().await.read(b, buf2).await.is_ok()
    }

    async fn combine_and_write<M, S>(
        &mut self,
        store: &Mutex<M, S>,
        fb: FrameBufferIndex,
        fragment: u16,
    ) -> Result<(), PipelineError>
    where
        M: RawMutex,
        S: BulkStore,
    {
        let failed = PipelineError::Transfer {
            stage: Stage::ComposeWrite,
            fragment,
        };
        let frag = self.plan.get(fragment).ok_or(failed)?;
        let (Some(a), Some(b), Some(out)) = (
            self.src1.prefix(frag.len),
            self.src2.prefix(frag.len),
            self.dest.prefix_mut(frag.len),
        ) else {
            return Err(failed);
        };
        self.composer.compose(a, b, out, self.machine.frames());

        let offset = self.layout.active(fb).checked_add(frag.offset).ok_or(failed)?;
        store
            .lock()
            .await
            .write(offset, out)
            .await
            .map_err(|_| {
                warn!("compose write failed at fragment {}", fragment);
                failed
            })
    }

    /// Load fragment 0 of the next frame ahead of its request. A failure is
    /// retried when the next frame starts.
    async fn prefetch<M, S>(&mut self, store: &Mutex<M, S>)
    where
        M: RawMutex,
        S: BulkStore,
    {
        if let ComposeStep::NeedRead { fragment } = self.machine.next_step() {
            if self.load(store, fragment).await.is_err() {
                debug!("prefetch of fragment {} failed", fragment);
            }
        }
    }
}
