use std::cell::RefCell;

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tracing::debug;

use crate::click::ClickKind;

#[derive(Debug, Error)]
pub enum ClickError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("unsupported sample format {0}")]
    UnsupportedFormat(String),
    #[error("audio stream error: {0}")]
    Stream(String),
}

/// One-way sink for metronome clicks. Callers treat failures as non-fatal.
pub trait ClickSink {
    fn play(&self, kind: ClickKind) -> Result<()>;
}

pub struct NullClickSink;

impl ClickSink for NullClickSink {
    fn play(&self, kind: ClickKind) -> Result<()> {
        debug!(?kind, "click (muted)");
        Ok(())
    }
}

/// Renders clicks on the default cpal output device.
pub struct CpalClickSink {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    gain: f32,
    active: RefCell<Option<cpal::Stream>>,
}

impl CpalClickSink {
    pub fn open_default(gain: f32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(ClickError::NoDevice)?;
        let config = device
            .default_output_config()
            .map_err(|err| ClickError::Stream(err.to_string()))?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(ClickError::UnsupportedFormat(format!("{:?}", config.sample_format())).into());
        }
        debug!(
            device = %device.name().unwrap_or_else(|_| "Unknown".into()),
            sample_rate = config.sample_rate().0,
            "opened click output"
        );
        Ok(Self {
            device,
            config,
            gain: gain.clamp(0.0, 1.0),
            active: RefCell::new(None),
        })
    }
}

impl ClickSink for CpalClickSink {
    fn play(&self, kind: ClickKind) -> Result<()> {
        let envelope = kind.envelope();
        let gain = self.gain;
        let sample_rate = self.config.sample_rate().0 as f32;
        let channels = self.config.channels() as usize;
        let mut index: usize = 0;
        let stream = self
            .device
            .build_output_stream(
                &self.config.config(),
                move |data: &mut [f32], _| {
                    for frame in data.chunks_mut(channels) {
                        let s = envelope.sample(index, sample_rate) * gain;
                        for ch in frame {
                            *ch = s;
                        }
                        index = index.saturating_add(1);
                    }
                },
                |err| debug!(%err, "click stream error"),
                None,
            )
            .map_err(|err| ClickError::Stream(err.to_string()))?;
        stream
            .play()
            .map_err(|err| ClickError::Stream(err.to_string()))?;
        // Replacing drops the previous click's stream.
        self.active.replace(Some(stream));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_every_kind() {
        let sink = NullClickSink;
        for kind in [ClickKind::Downbeat, ClickKind::Beat, ClickKind::Subdivision] {
            assert!(sink.play(kind).is_ok());
        }
    }

    #[test]
    fn open_default_does_not_panic() {
        // Output device availability varies by environment; just ensure no panic.
        let _ = CpalClickSink::open_default(0.5);
    }
}
