//! Voice output module
//!
//! Handles synthesis, PCM conversion and real-time rendering. The renderer
//! runs in the audio callback (or a headless clocked thread) and is fed by
//! the session controller through a [`RendererHandle`].

pub mod pcm;
mod playback;
pub mod renderer;
mod sink;
mod tts;

pub use pcm::PcmFormat;
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE};
pub use renderer::{PlaybackReport, RenderCommand, Renderer, RendererHandle, SampleBuffer};
pub use sink::{ClockedSink, SinkConfig};
pub use tts::{TextToSpeech, TtsProvider};

use crate::Result;

/// A running render domain the host can pause independently of the session
pub trait AudioOutput {
    /// Stop pulling frames; buffered audio stays where it is
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to pause
    fn suspend(&self) -> Result<()>;

    /// Continue pulling frames
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to restart
    fn resume(&self) -> Result<()>;

    /// Stop rendering and release the device
    ///
    /// # Errors
    ///
    /// Returns error if the output could not be flushed
    fn finish(self: Box<Self>) -> Result<()>;
}
