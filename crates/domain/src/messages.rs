use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::drill::DrillSummary;
use crate::events::{HitEvent, HitFeedback};
use crate::DomainError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionStart {
    pub session_id: String,
    pub drill: DrillSummary,
    #[serde(with = "time::serde::rfc3339")]
    pub server_start_time: OffsetDateTime,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetronomeState {
    pub is_playing: bool,
    pub current_beat: u32,
    pub current_subdivision: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetronomeTick {
    pub beat: u32,
    pub subdivision: u32,
    pub is_downbeat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_beat: Option<bool>,
}

impl MetronomeTick {
    /// Downbeats and the first subdivision of a beat count as beats when the
    /// service leaves `is_beat` out.
    pub fn is_beat(&self) -> bool {
        self.is_beat
            .unwrap_or(self.is_downbeat || self.subdivision == 0)
    }
}

/// Frames pushed by the scoring service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    HitFeedback(HitFeedback),
    SessionStart(SessionStart),
    CalibrationUpdate { client_offset_ms: f64 },
    MetronomeState(MetronomeState),
    MetronomeTick(MetronomeTick),
    Error { message: String },
}

const INBOUND_TYPES: [&str; 6] = [
    "hit_feedback",
    "session_start",
    "calibration_update",
    "metronome_state",
    "metronome_tick",
    "error",
];

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| DomainError::Serialization(err.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::protocol("frame has no type"))?;
        if !INBOUND_TYPES.contains(&kind) {
            return Err(DomainError::protocol(format!(
                "unrecognized frame type {kind:?}"
            )));
        }
        let kind = kind.to_owned();
        serde_json::from_value(value)
            .map_err(|err| DomainError::protocol(format!("malformed {kind} frame: {err}")))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::HitFeedback(_) => "hit_feedback",
            InboundMessage::SessionStart(_) => "session_start",
            InboundMessage::CalibrationUpdate { .. } => "calibration_update",
            InboundMessage::MetronomeState(_) => "metronome_state",
            InboundMessage::MetronomeTick(_) => "metronome_tick",
            InboundMessage::Error { .. } => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetronomeAction {
    Start,
    Stop,
    Reset,
    UpdateTempo,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename = "metronome_control")]
pub struct MetronomeControl {
    pub t: f64,
    pub metronome_action: MetronomeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_tempo_bpm: Option<u32>,
}

/// Frames the client sends.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    Hit(HitEvent),
    Metronome(MetronomeControl),
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, DomainError> {
        let encoded = match self {
            OutboundMessage::Hit(hit) => serde_json::to_string(hit),
            OutboundMessage::Metronome(control) => serde_json::to_string(control),
        };
        encoded.map_err(|err| DomainError::Serialization(err.to_string()))
    }
}

impl From<HitEvent> for OutboundMessage {
    fn from(hit: HitEvent) -> Self {
        OutboundMessage::Hit(hit)
    }
}

impl From<MetronomeControl> for OutboundMessage {
    fn from(control: MetronomeControl) -> Self {
        OutboundMessage::Metronome(control)
    }
}
