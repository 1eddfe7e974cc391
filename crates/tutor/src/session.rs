use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rudiment_domain::{
    Drill, HitFeedback, InboundMessage, InputType, MetronomeTick, OutboundMessage, RollingScore,
    Session, SessionCreate, SessionStart, SessionStatus, TakeSummary,
};
use rudiment_services::{ChannelEvent, ChannelEventKind, ServiceError, SessionApi, StreamChannel};

use crate::error::StoreError;
use crate::feedback::{self, FeedbackSummary, HitRow};
use crate::metronome::{clamp_tempo, MetronomePhase};

pub type Epoch = u64;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// While open, incoming hit feedback is dropped rather than recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IgnoreWindow {
    #[default]
    Closed,
    /// Held open until explicitly closed.
    Held,
    /// Open for this many count-in beats; closes on the beat tick after them.
    LeadIn { remaining_beats: u32 },
}

impl IgnoreWindow {
    pub fn is_open(&self) -> bool {
        !matches!(self, IgnoreWindow::Closed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionTicket {
    epoch: Epoch,
    request: SessionCreate,
}

impl SessionTicket {
    pub fn request(&self) -> &SessionCreate {
        &self.request
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeTicket {
    epoch: Epoch,
    session_id: String,
}

impl TakeTicket {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// What a routed channel event meant, for the caller to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreNotice {
    Connected { session_id: String },
    Disconnected { reason: Option<String> },
    Feedback(HitFeedback),
    FeedbackIgnored { slot_idx: usize },
    SessionStarted(SessionStart),
    Calibration { client_offset_ms: f64 },
    Metronome(MetronomePhase),
    Tick(MetronomeTick),
    ServerError(String),
}

/// The only place practice session state changes. Network events, captured
/// hits and metronome commands all go through its actions.
///
/// Requests are split around an epoch: `begin_*` records it in a ticket and
/// `complete_*` applies the outcome only if no `begin_session` or
/// `clear_session` happened in between.
pub struct SessionStore {
    drills: Vec<Drill>,
    selected_drill: Option<String>,
    session: Option<Session>,
    status: ConnectionStatus,
    channel: StreamChannel,
    history: Vec<HitFeedback>,
    rolling: Option<RollingScore>,
    metronome: MetronomePhase,
    ignore: IgnoreWindow,
    epoch: Epoch,
    client_latency_ms: Option<f64>,
    server_session: Option<SessionStart>,
    server_offset_ms: Option<f64>,
}

impl SessionStore {
    pub fn new(channel: StreamChannel) -> Self {
        Self {
            drills: Vec::new(),
            selected_drill: None,
            session: None,
            status: ConnectionStatus::Disconnected,
            channel,
            history: Vec::new(),
            rolling: None,
            metronome: MetronomePhase::default(),
            ignore: IgnoreWindow::Closed,
            epoch: 0,
            client_latency_ms: None,
            server_session: None,
            server_offset_ms: None,
        }
    }

    pub fn with_client_latency(mut self, latency_ms: Option<f64>) -> Self {
        self.client_latency_ms = latency_ms;
        self
    }

    // -- catalog --------------------------------------------------------

    /// Replaces the catalog, skipping drills that fail validation.
    pub fn set_drills(&mut self, drills: Vec<Drill>) {
        let total = drills.len();
        self.drills = drills
            .into_iter()
            .filter(|drill| match drill.validate() {
                Ok(()) => true,
                Err(err) => {
                    warn!(drill_id = %drill.id, %err, "skipping invalid drill");
                    false
                }
            })
            .collect();
        debug!(kept = self.drills.len(), total, "drill catalog updated");
    }

    pub fn drills(&self) -> &[Drill] {
        &self.drills
    }

    pub fn drill(&self, drill_id: &str) -> Option<&Drill> {
        self.drills.iter().find(|drill| drill.id == drill_id)
    }

    /// Points the store at `drill`. Does not touch the channel.
    pub fn select_drill(&mut self, drill: &Drill) {
        if self.drill(&drill.id).is_none() {
            debug!(drill_id = %drill.id, "selected drill was not in the catalog");
            self.drills.push(drill.clone());
        }
        self.selected_drill = Some(drill.id.clone());
    }

    pub fn selected_drill(&self) -> Option<&Drill> {
        self.selected_drill
            .as_deref()
            .and_then(|drill_id| self.drill(drill_id))
    }

    // -- session lifecycle ---------------------------------------------

    pub fn begin_session(
        &mut self,
        drill_id: &str,
        input_type: InputType,
        custom_tempo_bpm: Option<u32>,
    ) -> SessionTicket {
        self.epoch += 1;
        SessionTicket {
            epoch: self.epoch,
            request: SessionCreate {
                drill_id: drill_id.to_string(),
                input_type,
                client_latency_ms: self.client_latency_ms,
                custom_tempo_bpm: custom_tempo_bpm.map(clamp_tempo),
            },
        }
    }

    /// Applies a session-creation outcome. Failures and superseded tickets
    /// leave the store as it was.
    pub fn complete_session(
        &mut self,
        ticket: SessionTicket,
        result: Result<Session, ServiceError>,
    ) -> Result<Session, StoreError> {
        if ticket.epoch != self.epoch {
            info!(
                drill_id = %ticket.request.drill_id,
                "discarding superseded session response"
            );
            return Err(StoreError::Superseded);
        }
        let mut session = result.map_err(|err| {
            warn!(drill_id = %ticket.request.drill_id, %err, "session creation failed");
            StoreError::SessionCreationFailed(err)
        })?;
        if session.custom_tempo_bpm.is_none() {
            session.custom_tempo_bpm = ticket.request.custom_tempo_bpm;
        }
        if self.session.is_some() || self.status != ConnectionStatus::Disconnected {
            self.disconnect();
        }
        self.reset_session_state();
        info!(session_id = %session.id, drill_id = %session.drill_id, "session ready");
        self.session = Some(session.clone());
        Ok(session)
    }

    pub async fn create_session(
        &mut self,
        api: &dyn SessionApi,
        drill_id: &str,
        input_type: InputType,
        custom_tempo_bpm: Option<u32>,
    ) -> Result<Session, StoreError> {
        let ticket = self.begin_session(drill_id, input_type, custom_tempo_bpm);
        let result = api.create_session(ticket.request()).await;
        self.complete_session(ticket, result)
    }

    /// Starts finalizing the current take. The channel is closed right away.
    pub fn begin_finish(&mut self) -> Result<TakeTicket, StoreError> {
        let session_id = self
            .session
            .as_ref()
            .filter(|session| session.is_active())
            .map(|session| session.id.clone())
            .ok_or(StoreError::NoActiveSession)?;
        self.disconnect();
        Ok(TakeTicket {
            epoch: self.epoch,
            session_id,
        })
    }

    pub fn complete_finish(
        &mut self,
        ticket: TakeTicket,
        result: Result<TakeSummary, ServiceError>,
    ) -> Result<TakeSummary, StoreError> {
        if ticket.epoch != self.epoch {
            info!(session_id = %ticket.session_id, "discarding superseded take summary");
            return Err(StoreError::Superseded);
        }
        let summary = result.map_err(StoreError::TakeFinalizationFailed)?;
        if let Some(session) = self
            .session
            .as_mut()
            .filter(|session| session.id == ticket.session_id)
        {
            session.status = SessionStatus::Completed;
        }
        info!(
            session_id = %ticket.session_id,
            diamond = summary.metrics.diamond_score,
            "take finalized"
        );
        Ok(summary)
    }

    pub async fn finish_take(&mut self, api: &dyn SessionApi) -> Result<TakeSummary, StoreError> {
        let ticket = self.begin_finish()?;
        let result = api.finalize_take(ticket.session_id()).await;
        self.complete_finish(ticket, result)
    }

    /// Disconnects, then forgets the session and everything recorded for it.
    pub fn clear_session(&mut self) {
        self.disconnect();
        self.epoch += 1;
        self.session = None;
        self.reset_session_state();
        info!("session cleared");
    }

    fn reset_session_state(&mut self) {
        self.history.clear();
        self.rolling = None;
        self.metronome = MetronomePhase::default();
        self.ignore = IgnoreWindow::Closed;
        self.server_session = None;
        self.server_offset_ms = None;
    }

    // -- connection ----------------------------------------------------

    /// Replaces any open channel with one for `session_id`.
    pub fn connect(&mut self, session_id: &str) {
        self.channel.open(session_id);
        self.status = ConnectionStatus::Connecting;
    }

    /// Always leaves the store disconnected. The transport closes in the
    /// background; nothing more is heard from it.
    pub fn disconnect(&mut self) {
        self.channel.close();
        if self.status != ConnectionStatus::Disconnected {
            info!("disconnected");
        }
        self.status = ConnectionStatus::Disconnected;
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> Option<StoreNotice> {
        match self.channel.accept(event)? {
            ChannelEventKind::Opened => {
                self.status = ConnectionStatus::Connected;
                let session_id = self.channel.session_id().unwrap_or_default().to_string();
                info!(%session_id, "connected");
                Some(StoreNotice::Connected { session_id })
            }
            ChannelEventKind::Closed { reason } => {
                warn!(?reason, "stream channel closed");
                self.status = ConnectionStatus::Disconnected;
                Some(StoreNotice::Disconnected { reason })
            }
            ChannelEventKind::Message(message) => Some(self.route(message)),
        }
    }

    fn route(&mut self, message: InboundMessage) -> StoreNotice {
        match message {
            InboundMessage::HitFeedback(feedback) => {
                if self.record_hit(feedback.clone()) {
                    StoreNotice::Feedback(feedback)
                } else {
                    StoreNotice::FeedbackIgnored {
                        slot_idx: feedback.slot_idx,
                    }
                }
            }
            InboundMessage::SessionStart(start) => {
                info!(
                    session_id = %start.session_id,
                    drill_id = %start.drill.id,
                    "service started session"
                );
                self.server_session = Some(start.clone());
                StoreNotice::SessionStarted(start)
            }
            InboundMessage::CalibrationUpdate { client_offset_ms } => {
                debug!(client_offset_ms, "calibration update");
                self.server_offset_ms = Some(client_offset_ms);
                StoreNotice::Calibration { client_offset_ms }
            }
            InboundMessage::MetronomeState(state) => {
                self.metronome.apply_state(&state);
                StoreNotice::Metronome(self.metronome)
            }
            InboundMessage::MetronomeTick(tick) => {
                self.metronome.apply_tick(&tick);
                if tick.is_beat() {
                    self.count_down_lead_in();
                }
                StoreNotice::Tick(tick)
            }
            InboundMessage::Error { message } => {
                warn!(%message, "service reported an error");
                StoreNotice::ServerError(message)
            }
        }
    }

    pub fn record_hit(&mut self, feedback: HitFeedback) -> bool {
        if self.ignore.is_open() {
            debug!(slot_idx = feedback.slot_idx, "feedback inside ignore window");
            return false;
        }
        self.rolling = Some(feedback.rolling);
        self.history.push(feedback);
        true
    }

    pub fn send(&mut self, message: OutboundMessage) -> bool {
        if !self.is_live() {
            warn!("send ignored: no connected session");
            return false;
        }
        self.channel.send(&message).is_ok()
    }

    // -- ignore window -------------------------------------------------

    pub fn set_ignore_window(&mut self, open: bool) {
        self.ignore = if open {
            IgnoreWindow::Held
        } else {
            IgnoreWindow::Closed
        };
    }

    pub fn begin_lead_in(&mut self, beats: u32) {
        self.ignore = if beats == 0 {
            IgnoreWindow::Closed
        } else {
            IgnoreWindow::LeadIn {
                remaining_beats: beats,
            }
        };
    }

    fn count_down_lead_in(&mut self) {
        if let IgnoreWindow::LeadIn { remaining_beats } = self.ignore {
            self.ignore = if remaining_beats == 0 {
                IgnoreWindow::Closed
            } else {
                IgnoreWindow::LeadIn {
                    remaining_beats: remaining_beats - 1,
                }
            };
        }
    }

    // -- views ---------------------------------------------------------

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// True when hits and commands may be sent.
    pub fn is_live(&self) -> bool {
        self.status == ConnectionStatus::Connected
            && self.session.as_ref().is_some_and(Session::is_active)
    }

    pub fn history(&self) -> &[HitFeedback] {
        &self.history
    }

    pub fn rolling(&self) -> Option<RollingScore> {
        self.rolling
    }

    pub fn metronome(&self) -> MetronomePhase {
        self.metronome
    }

    pub fn ignore_window(&self) -> IgnoreWindow {
        self.ignore
    }

    pub fn server_session(&self) -> Option<&SessionStart> {
        self.server_session.as_ref()
    }

    pub fn server_offset_ms(&self) -> Option<f64> {
        self.server_offset_ms
    }

    pub fn summary(&self) -> FeedbackSummary {
        feedback::summarize(&self.history)
    }

    /// Per-hit rows for the drill the current session runs.
    pub fn rows(&self) -> Vec<HitRow> {
        let drill = self
            .session
            .as_ref()
            .and_then(|session| self.drill(&session.drill_id))
            .or_else(|| self.selected_drill());
        match drill {
            Some(drill) => feedback::hit_rows(&self.history, drill),
            None => Vec::new(),
        }
    }
}
