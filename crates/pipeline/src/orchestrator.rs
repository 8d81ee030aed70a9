//! Top-level orchestrator.
//!
//! A bounded two-stage pipeline with back-pressure via credits. The
//! orchestrator owns the bookkeeping of which active frame buffer may be
//! composed into and which one is queued for display; it performs no I/O and
//! returns the commands the tasks must carry out.
//!
//! Every frame buffer is in exactly one place at any time:
//!
//! ```text
//! available + composing + ready + held_by_display == frame_buffers
//! ```
//!
//! [`Orchestrator::conserved`] checks this after every event.

use heapless::Vec;
use platform::memory_map::FrameBufferIndex;

use crate::config::{CompositionRelease, DisplayStart, PipelineConfig};

/// Events delivered to the main task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MainEvent {
    /// Compose finished a frame into the buffer it was given.
    NewFrameReady,
    /// The sink received the last fragment of the frame being displayed.
    DisplayDone,
    /// Panel tearing-effect edge (start of a scan).
    TearingEffect,
    /// Composition of the current frame failed; its buffer is free again.
    ComposeFailed,
    /// Rendering of the current frame failed; the frame is dropped.
    RenderFailed,
}

/// Display stage state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayState {
    /// No frame in flight.
    Idle,
    /// Render started, buffer still held by the display.
    Scheduled,
    /// Panel scanning the frame. Under early release the buffer is already
    /// back in the available pool.
    Started,
}

/// Work for the compose and render tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Stream frame buffer `fb` to the sink.
    StartRender {
        /// Buffer to display.
        fb: FrameBufferIndex,
        /// Display sequence number.
        frame: u32,
    },
    /// Compose the next frame into `fb`.
    StartCompose {
        /// Buffer to compose into.
        fb: FrameBufferIndex,
        /// Compose sequence number.
        frame: u32,
    },
    /// The frame limit was reached; stop all tasks.
    Finished,
}

/// Commands produced by one event.
pub type Commands = Vec<Command, 3>;

/// Frame counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameCounts {
    /// Compose runs started.
    pub compose_started: u32,
    /// Frames composed.
    pub composed: u32,
    /// Frames that reached the sink.
    pub displayed: u32,
    /// Frames dropped by a render failure.
    pub dropped: u32,
    /// Compose runs that failed.
    pub compose_failures: u32,
}

/// Credit-based scheduler for compose and render.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    frame_buffers: u8,
    release: CompositionRelease,
    start: DisplayStart,
    max_frames: Option<u32>,

    available: u8,
    composing: bool,
    ready: u8,
    display: DisplayState,

    compose_seq: u32,
    display_seq: u32,
    counts: FrameCounts,
    finished: bool,
}

impl Orchestrator {
    /// Orchestrator with every frame buffer available.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            frame_buffers: config.frame_buffers,
            release: config.release,
            start: config.display_start,
            max_frames: config.max_frames,
            available: config.frame_buffers,
            composing: false,
            ready: 0,
            display: DisplayState::Idle,
            compose_seq: 0,
            display_seq: 0,
            counts: FrameCounts::default(),
            finished: false,
        }
    }

    /// Kick off the first composition.
    pub fn start(&mut self) -> Commands {
        let mut out = Commands::new();
        self.schedule(&mut out);
        out
    }

    /// Apply one event and return the resulting commands.
    pub fn handle(&mut self, event: MainEvent) -> Commands {
        let mut out = Commands::new();
        if self.finished {
            return out;
        }
        match event {
            MainEvent::NewFrameReady => {
                if self.composing {
                    self.composing = false;
                    self.ready = self.ready.saturating_add(1);
                    self.compose_seq = self.compose_seq.wrapping_add(1);
                    self.counts.composed = self.counts.composed.saturating_add(1);
                }
            }
            MainEvent::ComposeFailed => {
                if self.composing {
                    self.composing = false;
                    self.available = self.available.saturating_add(1);
                    self.counts.compose_failures = self.counts.compose_failures.saturating_add(1);
                }
            }
            MainEvent::DisplayDone => {
                if self.display != DisplayState::Idle {
                    self.finish_display();
                    self.counts.displayed = self.counts.displayed.saturating_add(1);
                }
            }
            MainEvent::RenderFailed => {
                if self.display != DisplayState::Idle {
                    self.finish_display();
                    self.counts.dropped = self.counts.dropped.saturating_add(1);
                }
            }
            MainEvent::TearingEffect => {
                if self.display == DisplayState::Scheduled {
                    self.display = DisplayState::Started;
                }
                if self.start == DisplayStart::OnTearingEffect {
                    self.try_start_render(&mut out);
                }
            }
        }

        if self.limit_reached() {
            self.finished = true;
            out.clear();
            push(&mut out, Command::Finished);
            return out;
        }
        self.schedule(&mut out);
        out
    }

    fn schedule(&mut self, out: &mut Commands) {
        if self.start == DisplayStart::Immediate {
            self.try_start_render(out);
        }
        if self.available > 0 && !self.composing && self.compose_allowed() {
            self.available = self.available.saturating_sub(1);
            self.composing = true;
            self.counts.compose_started = self.counts.compose_started.saturating_add(1);
            push(
                out,
                Command::StartCompose {
                    fb: FrameBufferIndex::for_sequence(self.compose_seq, self.frame_buffers),
                    frame: self.compose_seq,
                },
            );
        }
    }

    fn try_start_render(&mut self, out: &mut Commands) {
        if self.display != DisplayState::Idle || self.ready == 0 {
            return;
        }
        self.ready = self.ready.saturating_sub(1);
        // Either start policy puts the first fragment on the wire now, so an
        // early-release policy hands the buffer back here.
        if self.release == CompositionRelease::AtDisplayStart {
            self.display = DisplayState::Started;
            self.available = self.available.saturating_add(1);
        } else {
            self.display = DisplayState::Scheduled;
        }
        push(
            out,
            Command::StartRender {
                fb: FrameBufferIndex::for_sequence(self.display_seq, self.frame_buffers),
                frame: self.display_seq,
            },
        );
    }

    fn finish_display(&mut self) {
        if self.display_holds_buffer() {
            self.available = self.available.saturating_add(1);
        }
        self.display = DisplayState::Idle;
        self.display_seq = self.display_seq.wrapping_add(1);
    }

    fn display_holds_buffer(&self) -> bool {
        match self.display {
            DisplayState::Idle => false,
            DisplayState::Scheduled => true,
            DisplayState::Started => self.release == CompositionRelease::AfterDisplayDone,
        }
    }

    /// Stop composing once enough frames are in the pipe to reach the limit.
    fn compose_allowed(&self) -> bool {
        match self.max_frames {
            None => true,
            Some(limit) => {
                let in_pipe = self
                    .counts
                    .displayed
                    .saturating_add(self.counts.dropped)
                    .saturating_add(u32::from(self.ready))
                    .saturating_add(u32::from(self.display != DisplayState::Idle));
                in_pipe < limit
            }
        }
    }

    fn limit_reached(&self) -> bool {
        self.max_frames.is_some_and(|limit| {
            self.counts.displayed.saturating_add(self.counts.dropped) >= limit
        })
    }

    /// Credit invariant.
    pub fn conserved(&self) -> bool {
        let held = u16::from(self.display_holds_buffer());
        let total = u16::from(self.available)
            .saturating_add(u16::from(self.composing))
            .saturating_add(u16::from(self.ready))
            .saturating_add(held);
        total == u16::from(self.frame_buffers)
    }

    /// Buffers free for composition.
    pub fn available(&self) -> u8 {
        self.available
    }

    /// Composed buffers waiting for display.
    pub fn ready(&self) -> u8 {
        self.ready
    }

    /// A composition is in flight.
    pub fn composing(&self) -> bool {
        self.composing
    }

    /// Display stage state.
    pub fn display(&self) -> DisplayState {
        self.display
    }

    /// Frame counters.
    pub fn counts(&self) -> FrameCounts {
        self.counts
    }

    /// The frame limit was reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

fn push(out: &mut Commands, command: Command) {
    // One render, one compose and a stop at most.
    let pushed = out.push(command);
    debug_assert!(pushed.is_ok(), "command list overflow");
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn cfg(release: CompositionRelease, start: DisplayStart, fbs: u8) -> PipelineConfig {
        PipelineConfig::default()
            .with_frame_buffers(fbs)
            .with_policies(release, start)
    }

    fn compose_fb(cmds: &Commands) -> Option<u8> {
        cmds.iter().find_map(|c| match c {
            Command::StartCompose { fb, .. } => Some(fb.get()),
            _ => None,
        })
    }

    fn render_fb(cmds: &Commands) -> Option<u8> {
        cmds.iter().find_map(|c| match c {
            Command::StartRender { fb, .. } => Some(fb.get()),
            _ => None,
        })
    }

    #[test]
    fn double_buffering_overlaps_compose_with_render() {
        let mut o = Orchestrator::new(&cfg(
            CompositionRelease::AfterDisplayDone,
            DisplayStart::Immediate,
            2,
        ));
        assert_eq!(compose_fb(&o.start()), Some(0));
        assert!(o.conserved());

        let cmds = o.handle(MainEvent::NewFrameReady);
        assert_eq!(render_fb(&cmds), Some(0));
        assert_eq!(compose_fb(&cmds), Some(1));
        assert!(o.conserved());

        // Frame 1 composed while frame 0 is still on the wire: no credit left.
        let cmds = o.handle(MainEvent::NewFrameReady);
        assert!(cmds.is_empty());
        assert_eq!(o.ready(), 1);
        assert!(o.conserved());

        let cmds = o.handle(MainEvent::DisplayDone);
        assert_eq!(render_fb(&cmds), Some(1));
        assert_eq!(compose_fb(&cmds), Some(0));
        assert!(o.conserved());
    }

    #[test]
    fn single_buffer_serialises_stages() {
        let mut o = Orchestrator::new(&cfg(
            CompositionRelease::AfterDisplayDone,
            DisplayStart::Immediate,
            1,
        ));
        assert_eq!(compose_fb(&o.start()), Some(0));
        let cmds = o.handle(MainEvent::NewFrameReady);
        assert_eq!(render_fb(&cmds), Some(0));
        assert_eq!(compose_fb(&cmds), None);
        let cmds = o.handle(MainEvent::DisplayDone);
        assert_eq!(compose_fb(&cmds), Some(0));
        assert!(o.conserved());
    }

    #[test]
    fn tearing_effect_gates_render_start() {
        let mut o = Orchestrator::new(&cfg(
            CompositionRelease::AfterDisplayDone,
            DisplayStart::OnTearingEffect,
            2,
        ));
        o.start();
        let cmds = o.handle(MainEvent::NewFrameReady);
        assert_eq!(render_fb(&cmds), None);
        let cmds = o.handle(MainEvent::TearingEffect);
        assert_eq!(render_fb(&cmds), Some(0));
        assert_eq!(o.display(), DisplayState::Scheduled);
        assert!(o.conserved());
    }

    #[test]
    fn early_release_returns_credit_when_render_starts() {
        let mut o = Orchestrator::new(&cfg(
            CompositionRelease::AtDisplayStart,
            DisplayStart::Immediate,
            2,
        ));
        o.start();
        let cmds = o.handle(MainEvent::NewFrameReady);
        assert_eq!(render_fb(&cmds), Some(0));
        assert_eq!(o.display(), DisplayState::Started);
        assert_eq!(compose_fb(&cmds), Some(1));

        // fb0 is still streaming but already free for frame 2.
        let cmds = o.handle(MainEvent::NewFrameReady);
        assert_eq!(compose_fb(&cmds), Some(0));
        assert_eq!(o.available(), 0);
        assert!(o.conserved());

        // DisplayDone must not hand fb0 back a second time.
        let cmds = o.handle(MainEvent::DisplayDone);
        assert_eq!(render_fb(&cmds), Some(1));
        assert_eq!(compose_fb(&cmds), None);
        assert_eq!(o.available(), 1);
        assert!(o.conserved());
    }

    #[test]
    fn tearing_effect_with_early_release_frees_buffer_at_start() {
        let mut o = Orchestrator::new(&cfg(
            CompositionRelease::AtDisplayStart,
            DisplayStart::OnTearingEffect,
            2,
        ));
        o.start();
        let cmds = o.handle(MainEvent::NewFrameReady);
        assert_eq!(render_fb(&cmds), None);
        assert_eq!(compose_fb(&cmds), Some(1));
        o.handle(MainEvent::NewFrameReady);
        assert_eq!(o.available(), 0);

        let cmds = o.handle(MainEvent::TearingEffect);
        assert_eq!(render_fb(&cmds), Some(0));
        assert_eq!(compose_fb(&cmds), Some(0));
        assert!(o.conserved());
    }

    #[test]
    fn serial_release_holds_buffer_through_scan() {
        let mut o = Orchestrator::new(&cfg(
            CompositionRelease::AfterDisplayDone,
            DisplayStart::Immediate,
            2,
        ));
        o.start();
        o.handle(MainEvent::NewFrameReady);
        o.handle(MainEvent::NewFrameReady);
        let cmds = o.handle(MainEvent::TearingEffect);
        assert_eq!(o.display(), DisplayState::Started);
        assert!(cmds.is_empty());
        assert_eq!(o.available(), 0);
        assert!(o.conserved());
    }

    #[test]
    fn failures_return_credit_and_skip_frame() {
        let mut o = Orchestrator::new(&cfg(
            CompositionRelease::AfterDisplayDone,
            DisplayStart::Immediate,
            2,
        ));
        o.start();
        let cmds = o.handle(MainEvent::ComposeFailed);
        assert_eq!(compose_fb(&cmds), Some(0));
        assert_eq!(o.counts().compose_failures, 1);

        o.handle(MainEvent::NewFrameReady);
        let cmds = o.handle(MainEvent::RenderFailed);
        assert_eq!(o.counts().dropped, 1);
        assert_eq!(render_fb(&cmds), None);
        assert!(o.conserved());
    }

    #[test]
    fn frame_limit_finishes_once() {
        let mut o = Orchestrator::new(
            &cfg(CompositionRelease::AfterDisplayDone, DisplayStart::Immediate, 2)
                .with_max_frames(2),
        );
        o.start();
        o.handle(MainEvent::NewFrameReady);
        let cmds = o.handle(MainEvent::NewFrameReady);
        assert_eq!(compose_fb(&cmds), None, "two frames already in the pipe");
        o.handle(MainEvent::DisplayDone);
        let cmds = o.handle(MainEvent::DisplayDone);
        assert_eq!(cmds.as_slice(), &[Command::Finished]);
        assert!(o.is_finished());
        assert!(o.handle(MainEvent::NewFrameReady).is_empty());
    }

    #[test]
    fn no_event_fills_the_command_list() {
        let events = [
            MainEvent::NewFrameReady,
            MainEvent::TearingEffect,
            MainEvent::DisplayDone,
            MainEvent::ComposeFailed,
            MainEvent::RenderFailed,
        ];
        for release in [CompositionRelease::AfterDisplayDone, CompositionRelease::AtDisplayStart] {
            for start in [DisplayStart::Immediate, DisplayStart::OnTearingEffect] {
                let mut o = Orchestrator::new(&cfg(release, start, 2).with_max_frames(6));
                let first = o.start();
                assert!(first.len() < first.capacity());
                for round in 0..40usize {
                    let cmds = o.handle(events[round * 7 % events.len()]);
                    assert!(cmds.len() < cmds.capacity(), "{cmds:?}");
                }
            }
        }
    }

    #[test]
    fn stray_events_are_ignored() {
        let mut o = Orchestrator::new(&PipelineConfig::default());
        o.start();
        o.handle(MainEvent::DisplayDone);
        o.handle(MainEvent::RenderFailed);
        o.handle(MainEvent::TearingEffect);
        assert!(o.conserved());
        assert_eq!(o.counts().displayed, 0);
    }
}
