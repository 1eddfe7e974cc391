use serde::{Deserialize, Serialize};

use rudiment_domain::{Drill, HitFeedback};

pub const PERFECT_THRESHOLD: f64 = 0.9;
pub const GOOD_THRESHOLD: f64 = 0.7;
pub const OK_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Quality {
    Perfect,
    Good,
    Ok,
    Poor,
}

impl Quality {
    pub fn from_score(score: f64) -> Self {
        if score >= PERFECT_THRESHOLD {
            Quality::Perfect
        } else if score >= GOOD_THRESHOLD {
            Quality::Good
        } else if score >= OK_THRESHOLD {
            Quality::Ok
        } else {
            Quality::Poor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Quality::Perfect => "Perfect",
            Quality::Good => "Good",
            Quality::Ok => "OK",
            Quality::Poor => "Poor",
        }
    }
}

/// 1-based beat and subdivision of a slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotPosition {
    pub beat: usize,
    pub subdivision_in_beat: usize,
}

pub fn slot_position(slot_idx: usize, subdivision: u32) -> SlotPosition {
    let subdivision = subdivision.max(1) as usize;
    SlotPosition {
        beat: slot_idx / subdivision + 1,
        subdivision_in_beat: slot_idx % subdivision + 1,
    }
}

pub fn overall_score(feedback: &HitFeedback) -> f64 {
    (feedback.timing_score + feedback.dyn_score) / 2.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HitRow {
    pub slot_idx: usize,
    pub position: SlotPosition,
    pub delta_ms: f64,
    pub timing: Quality,
    pub overall: Quality,
    pub overall_score: f64,
    pub sticking: Option<String>,
    pub accent: bool,
}

impl HitRow {
    pub fn new(feedback: &HitFeedback, drill: &Drill) -> Self {
        let overall_score = overall_score(feedback);
        Self {
            slot_idx: feedback.slot_idx,
            position: slot_position(feedback.slot_idx, drill.subdivision),
            delta_ms: feedback.delta_ms,
            timing: Quality::from_score(feedback.timing_score),
            overall: Quality::from_score(overall_score),
            overall_score,
            sticking: drill.sticking_at(feedback.slot_idx).map(str::to_string),
            accent: drill.is_accent(feedback.slot_idx),
        }
    }
}

pub fn hit_rows(history: &[HitFeedback], drill: &Drill) -> Vec<HitRow> {
    history.iter().map(|hit| HitRow::new(hit, drill)).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackSummary {
    pub count: usize,
    pub mean_timing: f64,
    pub mean_dynamics: f64,
    pub early_hits: usize,
    pub late_hits: usize,
    pub mean_abs_delta_ms: f64,
}

impl FeedbackSummary {
    pub fn empty() -> Self {
        Self {
            count: 0,
            mean_timing: 0.0,
            mean_dynamics: 0.0,
            early_hits: 0,
            late_hits: 0,
            mean_abs_delta_ms: 0.0,
        }
    }
}

/// Statistics over the whole retained history.
pub fn summarize(history: &[HitFeedback]) -> FeedbackSummary {
    if history.is_empty() {
        return FeedbackSummary::empty();
    }
    let mut timing = 0.0;
    let mut dynamics = 0.0;
    let mut abs_delta = 0.0;
    let mut early = 0usize;
    let mut late = 0usize;
    for hit in history {
        timing += hit.timing_score;
        dynamics += hit.dyn_score;
        abs_delta += hit.delta_ms.abs();
        if hit.delta_ms < 0.0 {
            early += 1;
        } else if hit.delta_ms > 0.0 {
            late += 1;
        }
    }
    let count = history.len();
    let n = count as f64;
    FeedbackSummary {
        count,
        mean_timing: timing / n,
        mean_dynamics: dynamics / n,
        early_hits: early,
        late_hits: late,
        mean_abs_delta_ms: abs_delta / n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rudiment_domain::{RollingScore, TimingWindows, VelocityTargets};

    fn feedback(slot_idx: usize, delta_ms: f64, timing: f64, dynamics: f64) -> HitFeedback {
        HitFeedback {
            slot_idx,
            delta_ms,
            velocity: Some(90),
            velocity_target: Some(100),
            timing_score: timing,
            dyn_score: dynamics,
            rolling: RollingScore {
                timing,
                dynamics,
                diamond: (timing + dynamics) / 2.0,
            },
        }
    }

    fn drill() -> Drill {
        Drill {
            id: "doubles_100".into(),
            name: "Double Stroke Roll".into(),
            tempo_bpm: 100,
            subdivision: 4,
            beats_per_bar: 4,
            bars: 4,
            stickings: ["R", "R", "L", "L"].iter().map(|s| s.to_string()).collect(),
            accents: vec![1, 0, 1, 0],
            velocity_targets: VelocityTargets {
                accent: 90,
                tap: 30,
                tolerance: 25,
            },
            timing: TimingWindows {
                ok_ms: 30,
                good_ms: 20,
                bad_ms: 60,
            },
            created_by: None,
            created_at: None,
        }
    }

    #[test]
    fn quality_boundaries_are_inclusive_high() {
        assert_eq!(Quality::from_score(0.9), Quality::Perfect);
        assert_eq!(Quality::from_score(0.89999), Quality::Good);
        assert_eq!(Quality::from_score(0.7), Quality::Good);
        assert_eq!(Quality::from_score(0.5), Quality::Ok);
        assert_eq!(Quality::from_score(0.49), Quality::Poor);
        assert_eq!(Quality::Ok.label(), "OK");
    }

    #[test]
    fn row_for_slot_37() {
        let row = HitRow::new(&feedback(37, 6.0, 0.86, 0.78), &drill());
        assert_eq!(row.position.beat, 10);
        assert_eq!(row.position.subdivision_in_beat, 2);
        assert_relative_eq!(row.overall_score, 0.82, epsilon = 1e-9);
        assert_eq!(row.overall, Quality::Good);
        assert_eq!(row.timing, Quality::Good);
        assert_eq!(row.sticking.as_deref(), Some("R"));
        assert!(!row.accent);
    }

    #[test]
    fn summary_covers_full_history() {
        let history = vec![
            feedback(0, -10.0, 1.0, 0.8),
            feedback(1, 5.0, 0.6, 0.4),
            feedback(2, 0.0, 0.8, 0.6),
        ];
        let summary = summarize(&history);
        assert_eq!(summary.count, 3);
        assert_relative_eq!(summary.mean_timing, 0.8, epsilon = 1e-9);
        assert_relative_eq!(summary.mean_dynamics, 0.6, epsilon = 1e-9);
        assert_eq!(summary.early_hits, 1);
        assert_eq!(summary.late_hits, 1);
        assert_relative_eq!(summary.mean_abs_delta_ms, 5.0);
        assert_eq!(hit_rows(&history, &drill()).len(), 3);
    }

    #[test]
    fn empty_history_summarizes_to_zero() {
        assert_eq!(summarize(&[]), FeedbackSummary::empty());
    }
}
