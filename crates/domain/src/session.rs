use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::events::InputType;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub drill_id: String,
    pub input_type: InputType,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub client_latency_ms: Option<f64>,
    #[serde(default)]
    pub custom_tempo_bpm: Option<u32>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Body of the session-creation request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionCreate {
    pub drill_id: String,
    pub input_type: InputType,
    pub client_latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_tempo_bpm: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TakeMetrics {
    pub timing_mean: f64,
    pub timing_std: f64,
    pub dynamics_target: f64,
    pub dynamics_std: f64,
    pub diamond_score: f64,
    pub total_hits: u32,
    pub missed_slots: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TakeSummary {
    pub session_id: String,
    pub metrics: TakeMetrics,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}
