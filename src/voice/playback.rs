//! Streaming playback to speakers

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use super::{AudioOutput, Renderer};
use crate::{Error, Result};

/// Default playback sample rate (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Drives a [`Renderer`] from the default output device's callback
///
/// The stream runs until this value is dropped.
pub struct AudioPlayback {
    stream: Stream,
    sample_rate: u32,
    channels: u16,
}

impl AudioPlayback {
    /// Open the default output device and start rendering
    ///
    /// Mono is preferred; stereo devices receive the mono signal on both
    /// channels.
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device or config is available
    pub fn open(mut renderer: Renderer, sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        };

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                // Fallback: try stereo
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| supports(c, 2))
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();
        let channels = config.channels;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio playback initialized"
        );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render(data, usize::from(channels));
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            stream,
            sample_rate,
            channels,
        })
    }

    /// Sample rate the device was opened at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }
}

impl AudioOutput for AudioPlayback {
    fn suspend(&self) -> Result<()> {
        self.stream.pause().map_err(|e| Error::Audio(e.to_string()))
    }

    fn resume(&self) -> Result<()> {
        self.stream.play().map_err(|e| Error::Audio(e.to_string()))
    }

    fn finish(self: Box<Self>) -> Result<()> {
        drop(self.stream);
        tracing::debug!("playback stream closed");
        Ok(())
    }
}
