//! Property-based tests for frame buffer credits.
//! Whatever order events arrive in, every frame buffer stays accounted for
//! and a queued buffer is never composed into.

use pipeline::orchestrator::{Command, DisplayState, MainEvent, Orchestrator};
use pipeline::{CompositionRelease, DisplayStart, PipelineConfig};
use proptest::prelude::*;

fn event() -> impl Strategy<Value = MainEvent> {
    prop_oneof![
        Just(MainEvent::NewFrameReady),
        Just(MainEvent::DisplayDone),
        Just(MainEvent::TearingEffect),
        Just(MainEvent::ComposeFailed),
        Just(MainEvent::RenderFailed),
    ]
}

fn config() -> impl Strategy<Value = PipelineConfig> {
    (
        1u8..=2,
        prop_oneof![
            Just(CompositionRelease::AfterDisplayDone),
            Just(CompositionRelease::AtDisplayStart)
        ],
        prop_oneof![Just(DisplayStart::Immediate), Just(DisplayStart::OnTearingEffect)],
    )
        .prop_map(|(fbs, release, start)| {
            PipelineConfig::default()
                .with_frame_buffers(fbs)
                .with_policies(release, start)
        })
}

proptest! {
    /// available + composing + ready + held == frame_buffers after every event.
    #[test]
    fn credits_are_conserved(cfg in config(), events in prop::collection::vec(event(), 0..200)) {
        let mut o = Orchestrator::new(&cfg);
        o.start();
        prop_assert!(o.conserved());
        for e in events {
            o.handle(e);
            prop_assert!(o.conserved(), "after {:?}: {:?}", e, o);
            prop_assert!(o.available() <= cfg.frame_buffers);
        }
    }

    /// Only one compose and one render are ever in flight.
    #[test]
    fn at_most_one_job_per_stage(cfg in config(), events in prop::collection::vec(event(), 0..200)) {
        let mut o = Orchestrator::new(&cfg);
        let mut composing = o.start().iter().any(|c| matches!(c, Command::StartCompose { .. }));
        for e in events {
            let was_idle = o.display() == DisplayState::Idle;
            let commands = o.handle(e);
            let composes = commands.iter().filter(|c| matches!(c, Command::StartCompose { .. })).count();
            let renders = commands.iter().filter(|c| matches!(c, Command::StartRender { .. })).count();
            prop_assert!(composes <= 1 && renders <= 1);
            prop_assert!(commands.len() < commands.capacity());
            if matches!(e, MainEvent::NewFrameReady | MainEvent::ComposeFailed) {
                composing = false;
            }
            if composes == 1 {
                prop_assert!(!composing, "compose started while one was running");
                composing = true;
            }
            if renders == 1 {
                let freed = matches!(e, MainEvent::DisplayDone | MainEvent::RenderFailed);
                prop_assert!(was_idle || freed, "render started while one was running");
            }
        }
    }

    /// With a frame limit, the pipeline finishes exactly once and never
    /// counts more frames than the limit.
    #[test]
    fn frame_limit_is_respected(limit in 1u32..6, events in prop::collection::vec(event(), 0..200)) {
        let cfg = PipelineConfig::default().with_max_frames(limit);
        let mut o = Orchestrator::new(&cfg);
        o.start();
        let mut finished = 0;
        for e in events {
            finished += o.handle(e).iter().filter(|c| **c == Command::Finished).count();
            let c = o.counts();
            prop_assert!(c.displayed + c.dropped <= limit);
            prop_assert!(c.compose_started <= limit + u32::from(c.compose_failures));
        }
        prop_assert!(finished <= 1);
        prop_assert_eq!(finished == 1, o.is_finished());
    }
}
