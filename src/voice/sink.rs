//! Headless render domain
//!
//! Ticks a [`Renderer`] on a dedicated thread at the cadence a sound card
//! would, for machines without audio hardware or to record a session.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::pcm::to_i16;
use super::{AudioOutput, Renderer};
use crate::{Error, Result};

/// Clocked sink settings
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Simulated hardware sample rate
    pub sample_rate: u32,
    /// Frames rendered per tick
    pub frames_per_callback: usize,
    /// Record everything rendered (including silence) to this WAV file
    pub wav_path: Option<PathBuf>,
}

/// Renders on a fixed period without an audio device
pub struct ClockedSink {
    stop: Arc<AtomicBool>,
    suspended: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl ClockedSink {
    /// Start the render thread
    ///
    /// # Errors
    ///
    /// Returns error if the WAV file cannot be created or the thread cannot
    /// be spawned
    pub fn spawn(mut renderer: Renderer, config: SinkConfig) -> Result<Self> {
        if config.sample_rate == 0 || config.frames_per_callback == 0 {
            return Err(Error::Config(
                "sink needs a non-zero sample rate and block size".to_string(),
            ));
        }

        let mut writer = config
            .wav_path
            .as_ref()
            .map(|path| {
                let spec = hound::WavSpec {
                    channels: 1,
                    sample_rate: config.sample_rate,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };
                hound::WavWriter::create(path, spec).map_err(|e| Error::Audio(e.to_string()))
            })
            .transpose()?;

        let stop = Arc::new(AtomicBool::new(false));
        let suspended = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let suspended_flag = Arc::clone(&suspended);

        #[allow(clippy::cast_precision_loss)]
        let period = Duration::from_secs_f64(
            config.frames_per_callback as f64 / f64::from(config.sample_rate),
        );
        let frames = config.frames_per_callback;

        tracing::debug!(
            sample_rate = config.sample_rate,
            frames,
            recording = config.wav_path.is_some(),
            "headless sink started"
        );

        let thread = std::thread::Builder::new()
            .name("readaloud-render".to_string())
            .spawn(move || {
                let mut out = vec![0.0_f32; frames];
                let mut next_tick = Instant::now();

                while !stop_flag.load(Ordering::Acquire) {
                    if !suspended_flag.load(Ordering::Acquire) {
                        renderer.render(&mut out, 1);
                        if let Some(writer) = writer.as_mut() {
                            for &sample in &out {
                                writer
                                    .write_sample(to_i16(sample))
                                    .map_err(|e| Error::Audio(e.to_string()))?;
                            }
                        }
                    }

                    next_tick += period;
                    std::thread::sleep(next_tick.saturating_duration_since(Instant::now()));
                }

                if let Some(writer) = writer {
                    writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
                }
                Ok(())
            })?;

        Ok(Self {
            stop,
            suspended,
            thread: Some(thread),
        })
    }

    fn join(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::Audio("render thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl AudioOutput for ClockedSink {
    fn suspend(&self) -> Result<()> {
        self.suspended.store(true, Ordering::Release);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.suspended.store(false, Ordering::Release);
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.join()
    }
}

impl Drop for ClockedSink {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            tracing::warn!(error = %e, "headless sink shut down uncleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::renderer;

    #[tokio::test]
    async fn plays_appended_audio_and_records_it() {
        let dir = tempfile::tempdir().unwrap();
        let wav_path = dir.path().join("out.wav");

        let (handle, renderer, mut reports) = renderer::channel(8, 64);
        let sink = ClockedSink::spawn(
            renderer,
            SinkConfig {
                sample_rate: 8000,
                frames_per_callback: 80,
                wav_path: Some(wav_path.clone()),
            },
        )
        .unwrap();

        handle.append(vec![0.5; 400]).await.unwrap();

        let mut consumed = 0;
        while consumed < 400 {
            let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
                .await
                .unwrap()
                .unwrap();
            consumed += report.consumed;
        }
        assert_eq!(consumed, 400);

        Box::new(sink).finish().unwrap();

        let reader = hound::WavReader::open(&wav_path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        let loud = reader
            .into_samples::<i16>()
            .filter_map(std::result::Result::ok)
            .filter(|&s| s == to_i16(0.5))
            .count();
        assert_eq!(loud, 400);
    }

    #[test]
    fn rejects_zero_block_size() {
        let (_handle, renderer, _reports) = renderer::channel(1, 1);
        let result = ClockedSink::spawn(
            renderer,
            SinkConfig {
                sample_rate: 8000,
                frames_per_callback: 0,
                wav_path: None,
            },
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
