use serde::{Deserialize, Serialize};

/// Prominence class of a metronome click.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ClickKind {
    Downbeat,
    Beat,
    Subdivision,
}

impl ClickKind {
    pub fn for_tick(is_downbeat: bool, is_beat: bool) -> Self {
        if is_downbeat {
            ClickKind::Downbeat
        } else if is_beat {
            ClickKind::Beat
        } else {
            ClickKind::Subdivision
        }
    }

    pub fn envelope(&self) -> ClickEnvelope {
        match self {
            ClickKind::Downbeat => ClickEnvelope {
                freq_hz: 1500.0,
                gain: 1.0,
                duration_ms: 60,
            },
            ClickKind::Beat => ClickEnvelope {
                freq_hz: 1000.0,
                gain: 0.7,
                duration_ms: 45,
            },
            ClickKind::Subdivision => ClickEnvelope {
                freq_hz: 800.0,
                gain: 0.35,
                duration_ms: 30,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClickEnvelope {
    pub freq_hz: f32,
    pub gain: f32,
    pub duration_ms: u64,
}

impl ClickEnvelope {
    pub fn total_samples(&self, sample_rate: f32) -> usize {
        (self.duration_ms as f32 * sample_rate / 1000.0) as usize
    }

    /// Decaying sine; silent once the envelope has elapsed.
    pub fn sample(&self, index: usize, sample_rate: f32) -> f32 {
        let total = self.total_samples(sample_rate);
        if index >= total {
            return 0.0;
        }
        let t = index as f32 / sample_rate;
        let decay = 1.0 - index as f32 / total as f32;
        (2.0 * std::f32::consts::PI * self.freq_hz * t).sin() * self.gain * decay * decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_flags_pick_kind() {
        assert_eq!(ClickKind::for_tick(true, true), ClickKind::Downbeat);
        assert_eq!(ClickKind::for_tick(true, false), ClickKind::Downbeat);
        assert_eq!(ClickKind::for_tick(false, true), ClickKind::Beat);
        assert_eq!(ClickKind::for_tick(false, false), ClickKind::Subdivision);
    }

    #[test]
    fn prominence_strictly_decreases() {
        let down = ClickKind::Downbeat.envelope();
        let beat = ClickKind::Beat.envelope();
        let sub = ClickKind::Subdivision.envelope();
        assert!(down.gain > beat.gain && beat.gain > sub.gain);
        assert!(down.freq_hz > beat.freq_hz && beat.freq_hz > sub.freq_hz);
    }

    #[test]
    fn envelope_goes_silent() {
        let env = ClickKind::Beat.envelope();
        let total = env.total_samples(48_000.0);
        assert_eq!(total, 2160);
        assert_eq!(env.sample(total, 48_000.0), 0.0);
        assert!((0..total).all(|i| env.sample(i, 48_000.0).abs() <= env.gain));
    }
}
