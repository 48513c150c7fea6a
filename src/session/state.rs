//! Stream session state machine
//!
//! Pure and synchronous: every transition returns the [`Effect`]s the
//! driver must carry out. No I/O happens here.
//!
//! ```text
//! Idle ─▶ Connecting ─▶ Streaming ⇄ Paused
//!             │             │  ▲
//!             ▼             ▼  │ retry
//!           Error ◀─────────┘──┘
//!                           │
//!                           ▼
//!                       Completed
//! ```

use std::collections::VecDeque;

use serde::Serialize;

use crate::text::TextChunk;
use crate::{Error, Result};

/// Default look-ahead: chunks buffered ahead of (and including) the one playing
pub const PIPELINE_DEPTH: usize = 2;

/// Lifecycle of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum StreamStatus {
    /// No session
    Idle,
    /// Waiting for the first chunk's audio
    Connecting,
    /// Audio flowing
    Streaming,
    /// No new synthesis requests are issued
    Paused,
    /// Synthesis of `chunk` failed; `retry` resumes from there
    Error {
        /// Index of the failed chunk
        chunk: usize,
    },
    /// Every chunk has been played out
    Completed,
}

/// Work the driver must perform after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Issue a synthesis request for chunk `index`
    Synthesize {
        /// Chunk to synthesize
        index: usize,
    },
    /// Push decoded audio of chunk `index` to the renderer
    Append {
        /// Chunk the audio belongs to
        index: usize,
        /// Mono samples
        samples: Vec<f32>,
    },
    /// Status changed
    Status(StreamStatus),
    /// A different chunk became audible
    Progress {
        /// Chunk now playing
        chunk: usize,
        /// Its start offset in normalized text
        offset: usize,
    },
}

/// Audio handed to the renderer but not yet heard
#[derive(Debug, Clone, Copy)]
struct QueuedAudio {
    index: usize,
    remaining: usize,
}

/// One "read this text aloud" request
#[derive(Debug)]
pub struct StreamSession {
    chunks: Vec<TextChunk>,
    generation: u64,
    pipeline_depth: usize,
    /// Next chunk to request
    cursor: usize,
    status: StreamStatus,
    in_flight: Option<usize>,
    queued: VecDeque<QueuedAudio>,
    /// Failure that arrived while paused
    deferred_failure: Option<usize>,
    appended_any: bool,
    playing: Option<usize>,
}

impl StreamSession {
    /// Create an idle session over `chunks`
    #[must_use]
    pub fn new(chunks: Vec<TextChunk>, generation: u64, pipeline_depth: usize) -> Self {
        Self {
            chunks,
            generation,
            pipeline_depth: pipeline_depth.max(1),
            cursor: 0,
            status: StreamStatus::Idle,
            in_flight: None,
            queued: VecDeque::new(),
            deferred_failure: None,
            appended_any: false,
            playing: None,
        }
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> StreamStatus {
        self.status
    }

    /// Generation tag of this session
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// All chunks of this session
    #[must_use]
    pub fn chunks(&self) -> &[TextChunk] {
        &self.chunks
    }

    /// Chunk by index
    #[must_use]
    pub fn chunk(&self, index: usize) -> Option<&TextChunk> {
        self.chunks.get(index)
    }

    /// Next chunk that will be requested
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Chunk with an outstanding synthesis request
    #[must_use]
    pub const fn in_flight(&self) -> Option<usize> {
        self.in_flight
    }

    /// Chunks appended to the renderer but not fully played
    #[must_use]
    pub fn buffered_chunks(&self) -> usize {
        self.queued.len()
    }

    /// Chunk currently audible
    #[must_use]
    pub const fn playing(&self) -> Option<usize> {
        self.playing
    }

    /// `Idle → Connecting` and request the first chunk
    ///
    /// A session without chunks completes immediately.
    pub fn start(&mut self) -> Result<Vec<Effect>> {
        if self.status != StreamStatus::Idle {
            return Err(self.invalid("start"));
        }

        let mut effects = Vec::new();
        self.set_status(StreamStatus::Connecting, &mut effects);

        if self.chunks.is_empty() {
            self.set_status(StreamStatus::Completed, &mut effects);
        } else {
            self.request_next(&mut effects);
        }

        Ok(effects)
    }

    /// Audio for chunk `index` arrived
    pub fn on_synthesized(&mut self, index: usize, samples: Vec<f32>) -> Vec<Effect> {
        if self.in_flight != Some(index) {
            tracing::warn!(
                chunk = index,
                in_flight = ?self.in_flight,
                "ignoring unexpected synthesis result"
            );
            return Vec::new();
        }

        let mut effects = Vec::new();
        self.in_flight = None;
        self.cursor = index + 1;
        self.appended_any = true;

        if !samples.is_empty() {
            self.queued.push_back(QueuedAudio {
                index,
                remaining: samples.len(),
            });
            effects.push(Effect::Append { index, samples });
        }

        if self.status == StreamStatus::Connecting {
            self.set_status(StreamStatus::Streaming, &mut effects);
        }

        self.update_progress(&mut effects);
        self.prefetch(&mut effects);
        self.check_completed(&mut effects);

        effects
    }

    /// Synthesis of chunk `index` failed
    pub fn on_failed(&mut self, index: usize) -> Vec<Effect> {
        if self.in_flight != Some(index) {
            return Vec::new();
        }

        let mut effects = Vec::new();
        self.in_flight = None;

        match self.status {
            StreamStatus::Connecting | StreamStatus::Streaming => {
                self.set_status(StreamStatus::Error { chunk: index }, &mut effects);
            }
            StreamStatus::Paused => self.deferred_failure = Some(index),
            _ => {}
        }

        effects
    }

    /// The renderer played `consumed` samples; `silent` marks an underrun
    pub fn on_played(&mut self, consumed: usize, silent: bool) -> Vec<Effect> {
        let mut effects = Vec::new();

        let mut left = consumed;
        while left > 0 {
            let Some(front) = self.queued.front_mut() else {
                break;
            };
            let take = left.min(front.remaining);
            front.remaining -= take;
            left -= take;
            if front.remaining == 0 {
                self.queued.pop_front();
            }
        }

        self.update_progress(&mut effects);

        if self.status == StreamStatus::Streaming {
            if silent && self.in_flight.is_none() && self.cursor < self.chunks.len() {
                // Listener is already starved: ignore pipeline depth
                tracing::debug!(
                    generation = self.generation,
                    chunk = self.cursor,
                    "playback underrun, requesting next chunk"
                );
                self.request_next(&mut effects);
            } else {
                self.prefetch(&mut effects);
            }
        }

        self.check_completed(&mut effects);

        effects
    }

    /// `Streaming → Paused`
    pub fn pause(&mut self) -> Result<Vec<Effect>> {
        if self.status != StreamStatus::Streaming {
            return Err(self.invalid("pause"));
        }

        let mut effects = Vec::new();
        self.set_status(StreamStatus::Paused, &mut effects);
        Ok(effects)
    }

    /// `Paused → Streaming`, or `Paused → Error` if a request failed meanwhile
    pub fn resume(&mut self) -> Result<Vec<Effect>> {
        if self.status != StreamStatus::Paused {
            return Err(self.invalid("resume"));
        }

        let mut effects = Vec::new();
        if let Some(chunk) = self.deferred_failure.take() {
            self.set_status(StreamStatus::Error { chunk }, &mut effects);
            return Ok(effects);
        }

        self.set_status(StreamStatus::Streaming, &mut effects);
        self.prefetch(&mut effects);
        self.check_completed(&mut effects);
        Ok(effects)
    }

    /// Re-request the failed chunk only
    pub fn retry(&mut self) -> Result<Vec<Effect>> {
        let StreamStatus::Error { chunk } = self.status else {
            return Err(self.invalid("retry"));
        };

        let mut effects = Vec::new();
        let next = if self.appended_any {
            StreamStatus::Streaming
        } else {
            StreamStatus::Connecting
        };
        self.set_status(next, &mut effects);

        self.cursor = chunk;
        self.request_next(&mut effects);

        Ok(effects)
    }

    fn request_next(&mut self, effects: &mut Vec<Effect>) {
        if self.in_flight.is_none() && self.cursor < self.chunks.len() {
            self.in_flight = Some(self.cursor);
            effects.push(Effect::Synthesize { index: self.cursor });
        }
    }

    fn prefetch(&mut self, effects: &mut Vec<Effect>) {
        if self.status == StreamStatus::Streaming && self.queued.len() < self.pipeline_depth {
            self.request_next(effects);
        }
    }

    fn check_completed(&mut self, effects: &mut Vec<Effect>) {
        if self.status == StreamStatus::Streaming
            && self.cursor >= self.chunks.len()
            && self.in_flight.is_none()
            && self.queued.is_empty()
        {
            self.set_status(StreamStatus::Completed, effects);
        }
    }

    fn update_progress(&mut self, effects: &mut Vec<Effect>) {
        let Some(front) = self.queued.front() else {
            return;
        };
        if self.playing == Some(front.index) {
            return;
        }

        self.playing = Some(front.index);
        let offset = self.chunks[front.index].start_offset;
        effects.push(Effect::Progress {
            chunk: front.index,
            offset,
        });
    }

    fn set_status(&mut self, status: StreamStatus, effects: &mut Vec<Effect>) {
        if self.status != status {
            self.status = status;
            effects.push(Effect::Status(status));
        }
    }

    fn invalid(&self, operation: &str) -> Error {
        Error::InvalidTransition(format!("cannot {operation} while {:?}", self.status))
    }
}
