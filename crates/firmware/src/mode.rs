//! Run modes of the emulator and the board build.
//!
//! Each mode picks a composition-release policy, a display-start policy and
//! a frame-buffer count:
//!
//! | Mode       | Release            | Display start      | Buffers |
//! |------------|--------------------|--------------------|---------|
//! | `serial`   | after display done | immediate          | 2       |
//! | `early`    | at display start   | immediate          | 2       |
//! | `te`       | after display done | on tearing effect  | 2       |
//! | `te-early` | at display start   | on tearing effect  | 2       |
//! | `single`   | after display done | immediate          | 1       |

use core::str::FromStr;

use pipeline::{CompositionRelease, DisplayStart, PipelineConfig};

/// Unrecognised mode name.
#[derive(thiserror_no_std::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("unknown run mode (expected serial, early, te, te-early or single)")]
pub struct UnknownMode;

/// Scheduling mode of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunMode {
    /// Compose waits for the previous display to finish.
    #[default]
    Serial,
    /// Compose may reuse a buffer as soon as its display starts.
    Early,
    /// Display starts on the tearing-effect edge.
    Te,
    /// Tearing-effect start with early release.
    TeEarly,
    /// One frame buffer, stages fully serialised.
    Single,
}

impl RunMode {
    /// Every mode, in table order.
    pub const ALL: [Self; 5] = [Self::Serial, Self::Early, Self::Te, Self::TeEarly, Self::Single];

    /// Name as accepted by [`FromStr`].
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Early => "early",
            Self::Te => "te",
            Self::TeEarly => "te-early",
            Self::Single => "single",
        }
    }

    /// Pipeline configuration for this mode with a frame limit.
    pub fn config(self, frames: u32) -> PipelineConfig {
        let (release, start, buffers) = match self {
            Self::Serial => (CompositionRelease::AfterDisplayDone, DisplayStart::Immediate, 2),
            Self::Early => (CompositionRelease::AtDisplayStart, DisplayStart::Immediate, 2),
            Self::Te => (CompositionRelease::AfterDisplayDone, DisplayStart::OnTearingEffect, 2),
            Self::TeEarly => (CompositionRelease::AtDisplayStart, DisplayStart::OnTearingEffect, 2),
            Self::Single => (CompositionRelease::AfterDisplayDone, DisplayStart::Immediate, 1),
        };
        PipelineConfig::default()
            .with_policies(release, start)
            .with_frame_buffers(buffers)
            .with_max_frames(frames)
    }

    /// The run needs a tearing-effect source.
    pub const fn uses_tearing_effect(self) -> bool {
        matches!(self, Self::Te | Self::TeEarly)
    }

    /// Compose may overwrite a buffer while it is still streaming.
    pub const fn releases_early(self) -> bool {
        matches!(self, Self::Early | Self::TeEarly)
    }
}

impl FromStr for RunMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or(UnknownMode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::orchestrator::{Command, MainEvent, Orchestrator};

    /// Commands issued for a fixed event script: two compositions finish
    /// while the first frame is still streaming, then both displays finish.
    fn schedule(mode: RunMode) -> Vec<Vec<Command>> {
        let mut o = Orchestrator::new(&mode.config(8));
        let mut out = vec![o.start().to_vec()];
        for event in [
            MainEvent::NewFrameReady,
            MainEvent::NewFrameReady,
            MainEvent::DisplayDone,
            MainEvent::NewFrameReady,
            MainEvent::DisplayDone,
        ] {
            out.push(o.handle(event).to_vec());
            assert!(o.conserved(), "{} after {event:?}", mode.as_str());
        }
        out
    }

    fn step_composing_frame_2(steps: &[Vec<Command>]) -> Option<usize> {
        steps.iter().position(|cmds| {
            cmds.iter()
                .any(|c| matches!(c, Command::StartCompose { frame: 2, .. }))
        })
    }

    #[test]
    fn names_round_trip() {
        for mode in RunMode::ALL {
            assert_eq!(mode.as_str().parse::<RunMode>(), Ok(mode));
        }
        assert_eq!("fast".parse::<RunMode>(), Err(UnknownMode));
    }

    #[test]
    fn early_and_serial_schedules_differ() {
        let serial = schedule(RunMode::Serial);
        let early = schedule(RunMode::Early);
        assert_ne!(serial, early);

        // Early release composes frame 2 as soon as frame 1 is ready, while
        // frame 0 is still streaming. Serial mode has to wait for DisplayDone.
        assert_eq!(step_composing_frame_2(&early), Some(2));
        assert_eq!(step_composing_frame_2(&serial), Some(3));
    }

    #[test]
    fn only_tearing_effect_modes_need_a_ticker() {
        let te: Vec<_> = RunMode::ALL
            .into_iter()
            .filter(|m| m.uses_tearing_effect())
            .collect();
        assert_eq!(te, [RunMode::Te, RunMode::TeEarly]);
        assert_eq!(RunMode::Single.config(1).frame_buffers, 1);
        assert!(RunMode::Early.releases_early());
        assert!(!RunMode::Serial.releases_early());
    }
}
