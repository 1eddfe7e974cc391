use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rudiment_domain::HitEvent;

use crate::clock::Clock;
use crate::session::SessionStore;

pub const KEYBOARD_VELOCITY: u8 = 80;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputDevice {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteOn {
    pub note: u8,
    pub velocity: u8,
}

pub type HitCallback = Arc<dyn Fn(NoteOn) + Send + Sync>;

pub trait HitSource {
    fn name(&self) -> &str;
    fn list_inputs(&self) -> Result<Vec<InputDevice>>;
    fn on_hit(&mut self, callback: HitCallback) -> Result<()>;
    /// Unregisters the callback; no strikes are reported afterwards.
    fn detach(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMapping {
    pub key: char,
    pub note: u8,
    pub label: &'static str,
}

pub const KEYBOARD_MAP: [KeyMapping; 10] = [
    KeyMapping { key: 'a', note: 36, label: "Bass Drum" },
    KeyMapping { key: 's', note: 38, label: "Snare" },
    KeyMapping { key: 'd', note: 42, label: "Closed Hi-Hat" },
    KeyMapping { key: 'f', note: 46, label: "Open Hi-Hat" },
    KeyMapping { key: 'g', note: 49, label: "Crash" },
    KeyMapping { key: 'h', note: 51, label: "Ride" },
    KeyMapping { key: 'j', note: 45, label: "Tom 1" },
    KeyMapping { key: 'k', note: 47, label: "Tom 2" },
    KeyMapping { key: 'l', note: 48, label: "Tom 3" },
    KeyMapping { key: ' ', note: 36, label: "Bass Drum" },
];

pub fn key_mapping(code: KeyCode) -> Option<&'static KeyMapping> {
    let KeyCode::Char(c) = code else {
        return None;
    };
    let c = c.to_ascii_lowercase();
    KEYBOARD_MAP.iter().find(|mapping| mapping.key == c)
}

/// What the keyboard source did with a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Mapped key; a strike was reported.
    Struck(u8),
    /// Mapped key that must not act (auto-repeat, release, held, no listener).
    Suppressed,
    /// Not a drum key, or a drum key chorded with Ctrl, Alt or Super.
    Unmapped,
}

/// Presses of one key closer together than this are terminal auto-repeat.
pub const REPEAT_WINDOW_MS: f64 = 60.0;

#[derive(Default)]
struct KeyState {
    /// The terminal reports repeat and release kinds.
    release_events: bool,
    held: HashSet<char>,
    last_seen: HashMap<char, f64>,
    callback: Option<HitCallback>,
}

/// Simulated drum kit on the computer keyboard. Clones share one listener
/// and one key state, so the terminal loop can keep a handle while the
/// adapter owns another.
///
/// Terminals that report key releases get one strike per press until the
/// key is released. Others only send presses, so a press of the same key
/// within [`REPEAT_WINDOW_MS`] of its previous event counts as auto-repeat.
#[derive(Clone)]
pub struct KeyboardSource {
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<KeyState>>,
}

impl KeyboardSource {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Arc::default(),
        }
    }

    /// Set once the terminal has agreed to report release events.
    pub fn set_release_events(&self, enabled: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.release_events = enabled;
            state.held.clear();
            state.last_seen.clear();
        }
    }

    pub fn press(&self, event: &KeyEvent) -> KeyOutcome {
        let Some(mapping) = key_mapping(event.code) else {
            return KeyOutcome::Unmapped;
        };
        let chord = KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER;
        if event.modifiers.intersects(chord) {
            return KeyOutcome::Unmapped;
        }
        let now = self.clock.now_ms();
        let Ok(mut state) = self.state.lock() else {
            return KeyOutcome::Suppressed;
        };
        let key = mapping.key;
        match event.kind {
            KeyEventKind::Release => {
                state.held.remove(&key);
                state.last_seen.remove(&key);
                return KeyOutcome::Suppressed;
            }
            KeyEventKind::Repeat => {
                state.last_seen.insert(key, now);
                return KeyOutcome::Suppressed;
            }
            KeyEventKind::Press => {}
        }
        let repeated = if state.release_events {
            !state.held.insert(key)
        } else {
            // The window slides, so a held key's repeat stream stays suppressed.
            state
                .last_seen
                .insert(key, now)
                .is_some_and(|last| now - last < REPEAT_WINDOW_MS)
        };
        if repeated {
            return KeyOutcome::Suppressed;
        }
        let Some(callback) = state.callback.clone() else {
            return KeyOutcome::Suppressed;
        };
        drop(state);
        callback(NoteOn {
            note: mapping.note,
            velocity: KEYBOARD_VELOCITY,
        });
        KeyOutcome::Struck(mapping.note)
    }
}

impl HitSource for KeyboardSource {
    fn name(&self) -> &str {
        "keyboard"
    }

    fn list_inputs(&self) -> Result<Vec<InputDevice>> {
        Ok(vec![InputDevice {
            name: "Computer Keyboard".into(),
        }])
    }

    fn on_hit(&mut self, callback: HitCallback) -> Result<()> {
        if let Ok(mut state) = self.state.lock() {
            state.callback = Some(callback);
        }
        Ok(())
    }

    fn detach(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.callback = None;
            state.held.clear();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    Uninitialized,
    Initializing,
    Ready,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub devices: Vec<InputDevice>,
    /// Non-fatal device faults, one line per failing source.
    pub warnings: Vec<String>,
}

/// Enumerates every [`HitSource`] and stamps each reported strike with the
/// client clock at capture time. Stamped hits are queued for the event loop,
/// which forwards them only while a session is live.
pub struct HitInputAdapter {
    state: SetupState,
    clock: Arc<dyn Clock>,
    sources: Vec<Box<dyn HitSource>>,
    hits: mpsc::UnboundedSender<HitEvent>,
    report: SetupReport,
}

impl HitInputAdapter {
    pub fn new(clock: Arc<dyn Clock>, hits: mpsc::UnboundedSender<HitEvent>) -> Self {
        Self {
            state: SetupState::Uninitialized,
            clock,
            sources: Vec::new(),
            hits,
            report: SetupReport::default(),
        }
    }

    pub fn with_source(mut self, source: Box<dyn HitSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    pub fn report(&self) -> &SetupReport {
        &self.report
    }

    /// Enumerates inputs and registers handlers. Calling it again while
    /// initializing or ready does nothing.
    pub fn setup(&mut self) -> &SetupReport {
        if self.state != SetupState::Uninitialized {
            debug!(state = ?self.state, "input setup already done");
            return &self.report;
        }
        self.state = SetupState::Initializing;
        let mut report = SetupReport::default();
        for source in self.sources.iter_mut() {
            match source.list_inputs() {
                Ok(devices) => report.devices.extend(devices),
                Err(err) => {
                    warn!(source = source.name(), %err, "could not enumerate inputs");
                    report.warnings.push(format!("{}: {err}", source.name()));
                    continue;
                }
            }
            let callback = capture_callback(self.clock.clone(), self.hits.clone());
            if let Err(err) = source.on_hit(callback) {
                warn!(source = source.name(), %err, "could not register input handler");
                report.warnings.push(format!("{}: {err}", source.name()));
            }
        }
        info!(
            devices = report.devices.len(),
            warnings = report.warnings.len(),
            "input setup ready"
        );
        self.report = report;
        self.state = SetupState::Ready;
        &self.report
    }

    pub fn teardown(&mut self) {
        if self.state == SetupState::Uninitialized {
            return;
        }
        for source in self.sources.iter_mut() {
            source.detach();
        }
        self.report = SetupReport::default();
        self.state = SetupState::Uninitialized;
        info!("input handlers released");
    }

    /// Sends a captured hit if the store has a live session; otherwise the
    /// hit is dropped.
    pub fn forward(store: &mut SessionStore, hit: HitEvent) -> bool {
        if !store.is_live() {
            debug!(note = ?hit.note, "dropping hit: no connected session");
            return false;
        }
        store.send(hit.into())
    }
}

impl Drop for HitInputAdapter {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn capture_callback(clock: Arc<dyn Clock>, hits: mpsc::UnboundedSender<HitEvent>) -> HitCallback {
    Arc::new(move |strike: NoteOn| {
        let hit = HitEvent::midi(clock.now_ms(), strike.note, strike.velocity);
        if hits.send(hit).is_err() {
            debug!("hit queue closed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::clock::ManualClock;

    #[derive(Clone, Default)]
    struct FakeSource {
        enumerations: Arc<AtomicUsize>,
        callback: Arc<Mutex<Option<HitCallback>>>,
        fail: bool,
    }

    impl FakeSource {
        fn strike(&self, note: u8, velocity: u8) {
            if let Some(cb) = self.callback.lock().unwrap().clone() {
                cb(NoteOn { note, velocity });
            }
        }
    }

    impl HitSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        fn list_inputs(&self) -> Result<Vec<InputDevice>> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("permission denied");
            }
            Ok(vec![InputDevice { name: "Pad".into() }])
        }

        fn on_hit(&mut self, callback: HitCallback) -> Result<()> {
            *self.callback.lock().unwrap() = Some(callback);
            Ok(())
        }

        fn detach(&mut self) {
            *self.callback.lock().unwrap() = None;
        }
    }

    fn press(code: KeyCode, kind: KeyEventKind) -> KeyEvent {
        KeyEvent::new_with_kind(code, KeyModifiers::NONE, kind)
    }

    #[test]
    fn keyboard_map_covers_kit() {
        assert_eq!(KEYBOARD_MAP.len(), 10);
        assert_eq!(key_mapping(KeyCode::Char('S')).map(|m| m.note), Some(38));
        assert_eq!(key_mapping(KeyCode::Char(' ')).map(|m| m.label), Some("Bass Drum"));
        assert!(key_mapping(KeyCode::Char('z')).is_none());
        assert!(key_mapping(KeyCode::Enter).is_none());
    }

    #[test]
    fn setup_is_idempotent() {
        let source = FakeSource::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut adapter = HitInputAdapter::new(Arc::new(ManualClock::new(5.0)), tx)
            .with_source(Box::new(source.clone()));
        adapter.setup();
        adapter.setup();
        assert_eq!(adapter.state(), SetupState::Ready);
        assert_eq!(source.enumerations.load(Ordering::SeqCst), 1);

        source.strike(38, 100);
        let hit = rx.try_recv().unwrap();
        assert_eq!(hit.note, Some(38));
        assert_eq!(hit.t, 5.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn device_fault_is_a_warning() {
        let broken = FakeSource {
            fail: true,
            ..Default::default()
        };
        let keyboard = KeyboardSource::new(Arc::new(ManualClock::new(0.0)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut adapter = HitInputAdapter::new(Arc::new(ManualClock::new(0.0)), tx)
            .with_source(Box::new(broken))
            .with_source(Box::new(keyboard.clone()));
        let report = adapter.setup().clone();
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.devices.len(), 1);

        assert_eq!(
            keyboard.press(&press(KeyCode::Char('a'), KeyEventKind::Press)),
            KeyOutcome::Struck(36)
        );
        assert_eq!(rx.try_recv().unwrap().velocity, KEYBOARD_VELOCITY);
    }

    fn keyboard_kit(
        clock: Arc<ManualClock>,
    ) -> (KeyboardSource, HitInputAdapter, mpsc::UnboundedReceiver<HitEvent>) {
        let keyboard = KeyboardSource::new(clock.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut adapter = HitInputAdapter::new(clock, tx).with_source(Box::new(keyboard.clone()));
        adapter.setup();
        (keyboard, adapter, rx)
    }

    #[test]
    fn keyboard_repeats_are_suppressed() {
        let (keyboard, _adapter, mut rx) = keyboard_kit(Arc::new(ManualClock::new(0.0)));
        assert_eq!(
            keyboard.press(&press(KeyCode::Char('d'), KeyEventKind::Repeat)),
            KeyOutcome::Suppressed
        );
        assert_eq!(
            keyboard.press(&press(KeyCode::Char('d'), KeyEventKind::Release)),
            KeyOutcome::Suppressed
        );
        assert_eq!(
            keyboard.press(&press(KeyCode::Char('q'), KeyEventKind::Press)),
            KeyOutcome::Unmapped
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn held_key_without_release_events_strikes_once() {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let (keyboard, _adapter, mut rx) = keyboard_kit(clock.clone());
        let snare = press(KeyCode::Char('s'), KeyEventKind::Press);

        // Terminals without release reporting send auto-repeat as presses.
        assert_eq!(keyboard.press(&snare), KeyOutcome::Struck(38));
        for _ in 0..10 {
            clock.advance(33.0);
            assert_eq!(keyboard.press(&snare), KeyOutcome::Suppressed);
        }
        assert_eq!(rx.try_recv().unwrap().note, Some(38));
        assert!(rx.try_recv().is_err());

        // Another key is not a repeat of the first.
        clock.advance(5.0);
        assert_eq!(
            keyboard.press(&press(KeyCode::Char('a'), KeyEventKind::Press)),
            KeyOutcome::Struck(36)
        );

        // Deliberate re-strikes are further apart than the window.
        clock.advance(REPEAT_WINDOW_MS + 40.0);
        assert_eq!(keyboard.press(&snare), KeyOutcome::Struck(38));
    }

    #[test]
    fn held_key_with_release_events_waits_for_release() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (keyboard, _adapter, mut rx) = keyboard_kit(clock.clone());
        keyboard.set_release_events(true);
        let hat = press(KeyCode::Char('d'), KeyEventKind::Press);

        assert_eq!(keyboard.press(&hat), KeyOutcome::Struck(42));
        clock.advance(500.0);
        assert_eq!(keyboard.press(&hat), KeyOutcome::Suppressed);
        assert_eq!(
            keyboard.press(&press(KeyCode::Char('d'), KeyEventKind::Release)),
            KeyOutcome::Suppressed
        );
        clock.advance(10.0);
        assert_eq!(keyboard.press(&hat), KeyOutcome::Struck(42));
        assert_eq!(rx.try_recv().unwrap().note, Some(42));
        assert_eq!(rx.try_recv().unwrap().note, Some(42));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn modified_drum_keys_are_not_strikes() {
        let (keyboard, _adapter, mut rx) = keyboard_kit(Arc::new(ManualClock::new(0.0)));
        for modifiers in [KeyModifiers::CONTROL, KeyModifiers::ALT, KeyModifiers::SUPER] {
            let event = KeyEvent::new_with_kind(KeyCode::Char('s'), modifiers, KeyEventKind::Press);
            assert_eq!(keyboard.press(&event), KeyOutcome::Unmapped);
        }
        let shifted = KeyEvent::new_with_kind(
            KeyCode::Char('S'),
            KeyModifiers::SHIFT,
            KeyEventKind::Press,
        );
        assert_eq!(keyboard.press(&shifted), KeyOutcome::Struck(38));
        assert_eq!(rx.try_recv().unwrap().note, Some(38));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn teardown_unregisters_handlers() {
        let source = FakeSource::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut adapter = HitInputAdapter::new(Arc::new(ManualClock::new(0.0)), tx)
            .with_source(Box::new(source.clone()));
        adapter.setup();
        adapter.teardown();
        source.strike(42, 64);
        assert!(rx.try_recv().is_err());
        assert_eq!(adapter.state(), SetupState::Uninitialized);

        adapter.setup();
        assert_eq!(source.enumerations.load(Ordering::SeqCst), 2);
    }
}
