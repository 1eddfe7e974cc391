use std::fmt::Display;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use crossterm::event::{
    Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::{execute, terminal};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rudiment_audio::{ClickSink, CpalClickSink, NullClickSink};
use rudiment_domain::{Drill, HitFeedback};
use rudiment_services::{HttpSessionApi, SessionApi, StreamChannel, WsChannelFactory};
use rudiment_tutor::{
    Clock, FeedbackSummary, HitInputAdapter, HitRow, KeyOutcome, KeyboardSource,
    MetronomeController, MidirSource, MonotonicClock, SessionStore, StoreNotice,
};

use crate::config::ClientConfig;

const TEMPO_STEP: i32 = 5;

pub struct PracticeOptions {
    pub drill_id: String,
    pub tempo_bpm: Option<u32>,
    pub midi_port: Option<String>,
    pub use_midi: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Toggle,
    Reset,
    Faster,
    Slower,
    Quit,
}

pub fn command_for(key: &KeyEvent) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return matches!(key.code, KeyCode::Char('c')).then_some(Command::Quit);
    }
    match key.code {
        KeyCode::Enter => Some(Command::Toggle),
        KeyCode::Char('r') | KeyCode::Char('R') => Some(Command::Reset),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(Command::Faster),
        KeyCode::Char('-') | KeyCode::Char('_') => Some(Command::Slower),
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => Some(Command::Quit),
        _ => None,
    }
}

pub fn format_row(row: &HitRow) -> String {
    let sticking = row.sticking.as_deref().unwrap_or("-");
    let accent = if row.accent { ">" } else { " " };
    format!(
        "beat {:>3}.{}  {}{:<2} {:>+7.1} ms  timing {:<7}  overall {:<7} {:.2}",
        row.position.beat,
        row.position.subdivision_in_beat,
        accent,
        sticking,
        row.delta_ms,
        row.timing.label(),
        row.overall.label(),
        row.overall_score,
    )
}

pub fn format_summary(summary: &FeedbackSummary) -> String {
    format!(
        "{} hits  timing {:.2}  dynamics {:.2}  early {}  late {}  mean |delta| {:.1} ms",
        summary.count,
        summary.mean_timing,
        summary.mean_dynamics,
        summary.early_hits,
        summary.late_hits,
        summary.mean_abs_delta_ms,
    )
}

/// Raw mode swallows the carriage return, so every line carries its own.
fn say(line: impl Display) {
    let mut out = std::io::stdout();
    let _ = write!(out, "{line}\r\n");
    let _ = out.flush();
}

struct RawMode {
    /// Key release and repeat kinds are reported.
    enhanced: bool,
}

impl RawMode {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("could not switch the terminal to raw mode")?;
        let enhanced = terminal::supports_keyboard_enhancement().unwrap_or(false)
            && execute!(
                std::io::stdout(),
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                )
            )
            .is_ok();
        debug!(enhanced, "terminal key reporting");
        Ok(Self { enhanced })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if self.enhanced {
            let _ = execute!(std::io::stdout(), PopKeyboardEnhancementFlags);
        }
        let _ = terminal::disable_raw_mode();
    }
}

fn click_sink(gain: f32) -> Box<dyn ClickSink> {
    match CpalClickSink::open_default(gain) {
        Ok(sink) => Box::new(sink),
        Err(err) => {
            warn!(%err, "no audio output; metronome will be silent");
            Box::new(NullClickSink)
        }
    }
}

pub async fn practice(config: &ClientConfig, options: PracticeOptions) -> Result<()> {
    let endpoints = config.endpoints();
    let api = HttpSessionApi::new(endpoints.clone());
    let drill = api
        .get_drill(&options.drill_id)
        .await
        .with_context(|| format!("could not load drill {:?}", options.drill_id))?;
    drill.validate()?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let channel = StreamChannel::new(Box::new(WsChannelFactory::new(endpoints)), events_tx);
    let mut store = SessionStore::new(channel).with_client_latency(config.client_latency_ms);
    store.set_drills(vec![drill.clone()]);
    store.select_drill(&drill);

    let session = store
        .create_session(&api, &drill.id, config.input_type, options.tempo_bpm)
        .await?;
    store.connect(&session.id);

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let mut metronome = MetronomeController::new(
        clock.clone(),
        click_sink(config.click_gain),
        session.custom_tempo_bpm.unwrap_or(drill.tempo_bpm),
    );

    let keyboard = KeyboardSource::new(clock.clone());
    let (hits_tx, mut hits_rx) = mpsc::unbounded_channel();
    let mut adapter = HitInputAdapter::new(clock, hits_tx).with_source(Box::new(keyboard.clone()));
    if options.use_midi {
        adapter = adapter.with_source(Box::new(MidirSource::new(options.midi_port)));
    }
    let report = adapter.setup();
    for warning in &report.warnings {
        say(format!("input unavailable: {warning}"));
    }
    let devices: Vec<_> = report.devices.iter().map(|d| d.name.as_str()).collect();
    say(format!(
        "{} at {} bpm. Inputs: {}",
        drill.name,
        metronome.tempo_bpm(),
        devices.join(", ")
    ));
    say("Enter start/stop  r reset  +/- tempo  q quit");

    {
        let raw = RawMode::enable()?;
        keyboard.set_release_events(raw.enhanced);
        let mut keys = EventStream::new();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => {
                    let Some(notice) = store.handle_channel_event(event) else {
                        continue;
                    };
                    if !show_notice(&store, &metronome, &drill, notice) {
                        break;
                    }
                }
                Some(hit) = hits_rx.recv() => {
                    HitInputAdapter::forward(&mut store, hit);
                }
                key = keys.next() => match key {
                    Some(Ok(Event::Key(key))) => {
                        if keyboard.press(&key) != KeyOutcome::Unmapped {
                            continue;
                        }
                        match command_for(&key) {
                            Some(Command::Quit) => break,
                            Some(command) => run_command(&mut store, &mut metronome, config, command),
                            None => {}
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%err, "terminal input failed");
                        break;
                    }
                    None => break,
                },
                _ = &mut ctrl_c => break,
            }
        }
    }

    if store.metronome().is_playing {
        metronome.stop(&mut store);
    }
    adapter.teardown();
    say(format_summary(&store.summary()));
    match store.finish_take(&api).await {
        Ok(take) => say(format!(
            "diamond {:.2}  timing mean {:+.1} ms (sd {:.1})  missed slots {}",
            take.metrics.diamond_score,
            take.metrics.timing_mean,
            take.metrics.timing_std,
            take.metrics.missed_slots
        )),
        Err(err) => warn!(%err, "take was not finalized"),
    }
    Ok(())
}

fn run_command(
    store: &mut SessionStore,
    metronome: &mut MetronomeController,
    config: &ClientConfig,
    command: Command,
) {
    let sent = match command {
        Command::Toggle if store.metronome().is_playing => metronome.stop(store),
        Command::Toggle => {
            let started = metronome.start(store);
            if started {
                store.begin_lead_in(config.lead_in_beats);
            }
            started
        }
        Command::Reset => metronome.reset(store),
        Command::Faster => metronome.nudge_tempo(store, TEMPO_STEP).is_some(),
        Command::Slower => metronome.nudge_tempo(store, -TEMPO_STEP).is_some(),
        Command::Quit => true,
    };
    if !sent {
        say("not connected");
    } else if matches!(command, Command::Faster | Command::Slower) {
        say(format!("tempo {} bpm", metronome.tempo_bpm()));
    }
}

/// Prints a store notice. Returns false once the connection is gone.
fn show_notice(
    store: &SessionStore,
    metronome: &MetronomeController,
    drill: &Drill,
    notice: StoreNotice,
) -> bool {
    match notice {
        StoreNotice::Connected { session_id } => say(format!("connected ({session_id})")),
        StoreNotice::Disconnected { reason } => {
            say(format!(
                "connection closed{}",
                reason.map(|r| format!(": {r}")).unwrap_or_default()
            ));
            return false;
        }
        StoreNotice::Feedback(feedback) => show_feedback(store, drill, &feedback),
        StoreNotice::FeedbackIgnored { slot_idx } => debug!(slot_idx, "lead-in hit ignored"),
        StoreNotice::SessionStarted(start) => info!(
            session_id = %start.session_id,
            server_start_time = %start.server_start_time,
            "session started"
        ),
        StoreNotice::Calibration { client_offset_ms } => {
            debug!(client_offset_ms, "calibration")
        }
        StoreNotice::Metronome(phase) => {
            say(if phase.is_playing { "metronome running" } else { "metronome stopped" })
        }
        StoreNotice::Tick(tick) => {
            metronome.on_tick(&tick);
        }
        StoreNotice::ServerError(message) => say(format!("service error: {message}")),
    }
    true
}

fn show_feedback(store: &SessionStore, drill: &Drill, feedback: &HitFeedback) {
    say(format_row(&HitRow::new(feedback, drill)));
    if let Some(rolling) = store.rolling() {
        debug!(
            timing = rolling.timing,
            dynamics = rolling.dynamics,
            diamond = rolling.diamond,
            "rolling score"
        );
    }
}

pub async fn list_drills(api: &dyn SessionApi) -> Result<()> {
    let drills = api.list_drills().await?;
    if drills.is_empty() {
        println!("no drills available");
    }
    for drill in drills {
        let flag = match drill.validate() {
            Ok(()) => String::new(),
            Err(err) => format!("  (invalid: {err})"),
        };
        println!(
            "{:<24} {:<28} {:>3} bpm  {}/{} x{}{}",
            drill.id,
            drill.name,
            drill.tempo_bpm,
            drill.beats_per_bar,
            drill.subdivision,
            drill.bars,
            flag
        );
    }
    Ok(())
}

pub async fn health(api: &dyn SessionApi) -> Result<()> {
    let status = api.health().await?;
    println!("{} (version {}, {})", status.status, status.version, status.timestamp);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudiment_tutor::{Quality, SlotPosition};

    fn key(code: KeyCode, modifiers: KeyModifiers, kind: KeyEventKind) -> KeyEvent {
        KeyEvent::new_with_kind(code, modifiers, kind)
    }

    #[test]
    fn keys_map_to_commands() {
        let press = |code| key(code, KeyModifiers::NONE, KeyEventKind::Press);
        assert_eq!(command_for(&press(KeyCode::Enter)), Some(Command::Toggle));
        assert_eq!(command_for(&press(KeyCode::Char('r'))), Some(Command::Reset));
        assert_eq!(command_for(&press(KeyCode::Char('+'))), Some(Command::Faster));
        assert_eq!(command_for(&press(KeyCode::Char('-'))), Some(Command::Slower));
        assert_eq!(command_for(&press(KeyCode::Esc)), Some(Command::Quit));
        assert_eq!(command_for(&press(KeyCode::Char('s'))), None);
        assert_eq!(
            command_for(&key(KeyCode::Char('c'), KeyModifiers::CONTROL, KeyEventKind::Press)),
            Some(Command::Quit)
        );
        assert_eq!(
            command_for(&key(KeyCode::Enter, KeyModifiers::NONE, KeyEventKind::Repeat)),
            None
        );
    }

    #[test]
    fn row_line_shows_position_and_buckets() {
        let row = HitRow {
            slot_idx: 37,
            position: SlotPosition {
                beat: 10,
                subdivision_in_beat: 2,
            },
            delta_ms: -4.25,
            timing: Quality::Good,
            overall: Quality::Good,
            overall_score: 0.82,
            sticking: Some("L".into()),
            accent: false,
        };
        let line = format_row(&row);
        assert!(line.starts_with("beat  10.2"));
        assert!(line.contains("-4.2 ms") || line.contains("-4.3 ms"));
        assert!(line.contains("timing Good"));
        assert!(line.ends_with("0.82"));
    }

    #[test]
    fn summary_line() {
        let line = format_summary(&FeedbackSummary::empty());
        assert!(line.starts_with("0 hits"));
    }
}
