use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rudiment_audio::{ClickKind, ClickSink};
use rudiment_domain::{
    MetronomeAction, MetronomeControl, MetronomeState, MetronomeTick, MAX_TEMPO_BPM, MIN_TEMPO_BPM,
};

use crate::clock::Clock;
use crate::session::SessionStore;

/// Local copy of the service's metronome position. The service is
/// authoritative; every state or tick message overwrites it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetronomePhase {
    pub is_playing: bool,
    pub current_beat: u32,
    pub current_subdivision: u32,
}

impl MetronomePhase {
    pub fn apply_state(&mut self, state: &MetronomeState) {
        *self = MetronomePhase {
            is_playing: state.is_playing,
            current_beat: state.current_beat,
            current_subdivision: state.current_subdivision,
        };
    }

    pub fn apply_tick(&mut self, tick: &MetronomeTick) {
        self.current_beat = tick.beat;
        self.current_subdivision = tick.subdivision;
    }
}

pub fn clamp_tempo(bpm: u32) -> u32 {
    bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM)
}

/// Issues metronome commands through the store and renders clicks for ticks.
pub struct MetronomeController {
    clock: Arc<dyn Clock>,
    sink: Box<dyn ClickSink>,
    tempo_bpm: u32,
}

impl MetronomeController {
    pub fn new(clock: Arc<dyn Clock>, sink: Box<dyn ClickSink>, tempo_bpm: u32) -> Self {
        Self {
            clock,
            sink,
            tempo_bpm: clamp_tempo(tempo_bpm),
        }
    }

    pub fn tempo_bpm(&self) -> u32 {
        self.tempo_bpm
    }

    pub fn start(&self, store: &mut SessionStore) -> bool {
        self.command(store, MetronomeAction::Start, None)
    }

    pub fn stop(&self, store: &mut SessionStore) -> bool {
        self.command(store, MetronomeAction::Stop, None)
    }

    pub fn reset(&self, store: &mut SessionStore) -> bool {
        self.command(store, MetronomeAction::Reset, None)
    }

    /// Clamps `bpm` into the supported range and sends it. Returns the tempo
    /// that went out, or `None` when no session is connected.
    pub fn update_tempo(&mut self, store: &mut SessionStore, bpm: u32) -> Option<u32> {
        let clamped = clamp_tempo(bpm);
        if clamped != bpm {
            debug!(requested = bpm, clamped, "tempo clamped");
        }
        if !self.command(store, MetronomeAction::UpdateTempo, Some(clamped)) {
            return None;
        }
        self.tempo_bpm = clamped;
        Some(clamped)
    }

    pub fn nudge_tempo(&mut self, store: &mut SessionStore, delta: i32) -> Option<u32> {
        let target = (self.tempo_bpm as i64 + delta as i64).max(0) as u32;
        self.update_tempo(store, target)
    }

    fn command(
        &self,
        store: &mut SessionStore,
        action: MetronomeAction,
        custom_tempo_bpm: Option<u32>,
    ) -> bool {
        if !store.is_live() {
            debug!(?action, "metronome command ignored: no connected session");
            return false;
        }
        let control = MetronomeControl {
            t: self.clock.now_ms(),
            metronome_action: action,
            custom_tempo_bpm,
        };
        info!(?action, ?custom_tempo_bpm, "metronome command");
        store.send(control.into())
    }

    /// Plays the click for a tick. Audio failures stay here.
    pub fn on_tick(&self, tick: &MetronomeTick) -> ClickKind {
        let kind = ClickKind::for_tick(tick.is_downbeat, tick.is_beat());
        if let Err(err) = self.sink.play(kind) {
            debug!(%err, ?kind, "click playback failed");
        }
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::clock::ManualClock;

    struct RecordingSink(Rc<RefCell<Vec<ClickKind>>>);

    impl ClickSink for RecordingSink {
        fn play(&self, kind: ClickKind) -> anyhow::Result<()> {
            self.0.borrow_mut().push(kind);
            Ok(())
        }
    }

    struct BrokenSink;

    impl ClickSink for BrokenSink {
        fn play(&self, _kind: ClickKind) -> anyhow::Result<()> {
            anyhow::bail!("device unplugged")
        }
    }

    #[test]
    fn tempo_is_clamped() {
        assert_eq!(clamp_tempo(10), 40);
        assert_eq!(clamp_tempo(120), 120);
        assert_eq!(clamp_tempo(400), 300);
    }

    #[test]
    fn state_replaces_phase_wholesale() {
        let mut phase = MetronomePhase {
            is_playing: true,
            current_beat: 3,
            current_subdivision: 2,
        };
        phase.apply_state(&MetronomeState {
            is_playing: false,
            current_beat: 0,
            current_subdivision: 0,
        });
        assert_eq!(phase, MetronomePhase::default());
    }

    #[test]
    fn ticks_update_phase_and_pick_click() {
        let played = Rc::new(RefCell::new(Vec::new()));
        let controller = MetronomeController::new(
            Arc::new(ManualClock::new(0.0)),
            Box::new(RecordingSink(played.clone())),
            120,
        );
        let mut phase = MetronomePhase::default();
        let ticks = [
            MetronomeTick {
                beat: 2,
                subdivision: 0,
                is_downbeat: true,
                is_beat: None,
            },
            MetronomeTick {
                beat: 2,
                subdivision: 1,
                is_downbeat: false,
                is_beat: Some(false),
            },
        ];
        for tick in &ticks {
            phase.apply_tick(tick);
            controller.on_tick(tick);
        }
        assert_eq!((phase.current_beat, phase.current_subdivision), (2, 1));
        assert_eq!(
            *played.borrow(),
            vec![ClickKind::Downbeat, ClickKind::Subdivision]
        );
    }

    #[test]
    fn click_failures_are_swallowed() {
        let controller =
            MetronomeController::new(Arc::new(ManualClock::new(0.0)), Box::new(BrokenSink), 90);
        let kind = controller.on_tick(&MetronomeTick {
            beat: 1,
            subdivision: 0,
            is_downbeat: false,
            is_beat: Some(true),
        });
        assert_eq!(kind, ClickKind::Beat);
    }
}
