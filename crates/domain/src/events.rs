use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Midi,
    Audio,
}

/// A strike captured on the client, ready to be put on the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HitEvent {
    /// Client monotonic time in milliseconds.
    pub t: f64,
    #[serde(rename = "type")]
    pub kind: InputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<u8>,
    pub velocity: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Base64 encoded PCM for audio frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcm: Option<String>,
}

impl HitEvent {
    pub fn midi(t: f64, note: u8, velocity: u8) -> Self {
        Self {
            t,
            kind: InputType::Midi,
            note: Some(note),
            velocity: velocity.min(127),
            seq: None,
            pcm: None,
        }
    }
}

/// Smoothed score triple pushed by the service with every hit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RollingScore {
    pub timing: f64,
    pub dynamics: f64,
    pub diamond: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HitFeedback {
    /// Position in the drill's flattened slot sequence.
    pub slot_idx: usize,
    /// Signed deviation from the grid; negative is early.
    pub delta_ms: f64,
    #[serde(default)]
    pub velocity: Option<u8>,
    #[serde(default)]
    pub velocity_target: Option<u8>,
    pub timing_score: f64,
    pub dyn_score: f64,
    pub rolling: RollingScore,
}
