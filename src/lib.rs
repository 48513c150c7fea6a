//! readaloud - low-latency streaming speech for long-form text
//!
//! Pages and chapters are read aloud while they are still being
//! synthesized: the text is cut into bounded chunks, each chunk is
//! synthesized on its own, and the audio is pushed into a ring buffer that
//! the sound card drains on its own fixed cadence.
//!
//! # Architecture
//!
//! ```text
//!  text ─▶ Chunker ─▶ SessionController ──synthesize(chunk)──▶ Synthesizer
//!                          │     ▲
//!            append/reset  │     │ played(frames, silent)
//!                          ▼     │
//!                    Renderer (audio callback) ─▶ speakers
//! ```
//!
//! The controller lives on the tokio runtime; the renderer lives in the
//! real-time callback. They only exchange messages.

pub mod config;
pub mod error;
pub mod session;
pub mod text;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    SessionController, SessionEvent, SessionHandle, SessionOptions, SessionSnapshot,
    StreamSession, StreamStatus, Synthesizer,
};
pub use text::{Chunker, ChunkerConfig, TextChunk, normalize, split};
pub use voice::{
    AudioOutput, AudioPlayback, ClockedSink, PlaybackReport, Renderer, RendererHandle,
    SinkConfig, TextToSpeech,
};
