use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::DomainError;

pub const MIN_TEMPO_BPM: u32 = 40;
pub const MAX_TEMPO_BPM: u32 = 300;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VelocityTargets {
    pub accent: u8,
    pub tap: u8,
    pub tolerance: u8,
}

/// Timing windows in milliseconds used by the scoring service.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingWindows {
    pub ok_ms: u32,
    pub good_ms: u32,
    pub bad_ms: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Drill {
    pub id: String,
    pub name: String,
    pub tempo_bpm: u32,
    /// Subdivisions per beat.
    pub subdivision: u32,
    pub beats_per_bar: u32,
    pub bars: u32,
    /// Hand labels ("R", "L"), one per slot. May be a shorter pattern that repeats.
    pub stickings: Vec<String>,
    /// Accent flags parallel to `stickings`.
    pub accents: Vec<u8>,
    pub velocity_targets: VelocityTargets,
    pub timing: TimingWindows,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Drill {
    pub fn slots_per_bar(&self) -> u32 {
        self.subdivision * self.beats_per_bar
    }

    pub fn total_slots(&self) -> u32 {
        self.slots_per_bar() * self.bars
    }

    pub fn sticking_at(&self, slot_idx: usize) -> Option<&str> {
        if self.stickings.is_empty() {
            return None;
        }
        self.stickings
            .get(slot_idx % self.stickings.len())
            .map(String::as_str)
    }

    pub fn is_accent(&self, slot_idx: usize) -> bool {
        if self.accents.is_empty() {
            return false;
        }
        self.accents[slot_idx % self.accents.len()] != 0
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.trim().is_empty() {
            return Err(DomainError::validation("drill id cannot be empty"));
        }
        if !(MIN_TEMPO_BPM..=MAX_TEMPO_BPM).contains(&self.tempo_bpm) {
            return Err(DomainError::validation(format!(
                "drill tempo must be between {MIN_TEMPO_BPM} and {MAX_TEMPO_BPM} bpm"
            )));
        }
        if !(1..=16).contains(&self.subdivision) || !(1..=16).contains(&self.beats_per_bar) {
            return Err(DomainError::validation(
                "subdivision and beats per bar must be between 1 and 16",
            ));
        }
        if !(1..=32).contains(&self.bars) {
            return Err(DomainError::validation("bars must be between 1 and 32"));
        }
        if self.stickings.is_empty() || self.accents.is_empty() {
            return Err(DomainError::validation(
                "drill needs at least one sticking and accent",
            ));
        }
        if self.stickings.len() != self.accents.len() {
            return Err(DomainError::validation(
                "stickings and accents must have the same length",
            ));
        }
        let targets = self.velocity_targets;
        if targets.accent > 127 || targets.tap > 127 || targets.tolerance > 127 {
            return Err(DomainError::validation("velocity targets must be within 0..=127"));
        }
        Ok(())
    }
}

/// The drill summary carried by `session_start`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrillSummary {
    pub id: String,
    pub name: String,
    pub tempo_bpm: u32,
    pub subdivision: u32,
    pub beats_per_bar: u32,
    pub bars: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DrillList {
    pub drills: Vec<Drill>,
    #[serde(default)]
    pub total: Option<usize>,
}

#[cfg(test)]
pub(crate) fn paradiddle() -> Drill {
    Drill {
        id: "paradiddle_120".into(),
        name: "Single Paradiddle".into(),
        tempo_bpm: 120,
        subdivision: 4,
        beats_per_bar: 4,
        bars: 4,
        stickings: ["R", "L", "R", "R", "L", "R", "L", "L"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        accents: vec![1, 0, 0, 0, 1, 0, 0, 0],
        velocity_targets: VelocityTargets {
            accent: 100,
            tap: 40,
            tolerance: 15,
        },
        timing: TimingWindows {
            ok_ms: 20,
            good_ms: 10,
            bad_ms: 40,
        },
        created_by: None,
        created_at: None,
    }
}
