//! Session controller
//!
//! Owns the chunk sequence of the active stream, issues synthesis requests,
//! feeds the renderer and turns renderer reports into progress. Runs as a
//! single tokio task; the UI talks to it through a cloneable
//! [`SessionHandle`].
//!
//! Synthesis runs in spawned tasks. Every completion carries the generation
//! that requested it, so results that arrive after `stop()` or a new
//! `start()` are dropped instead of reaching the renderer.

mod state;

pub use state::{Effect, PIPELINE_DEPTH, StreamSession, StreamStatus};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::text::{Chunker, ChunkerConfig};
use crate::voice::renderer::{PlaybackReport, RendererHandle};
use crate::voice::{PcmFormat, pcm};
use crate::{Error, Result};

/// Capacity of the session event broadcast
const EVENT_CAPACITY: usize = 256;

/// Capacity of the UI command queue
const COMMAND_CAPACITY: usize = 32;

/// Turns one chunk of text into PCM audio
///
/// Timeouts are the implementor's concern; any error is treated as a
/// chunk-level failure.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` into raw PCM bytes
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Encoding of the returned bytes
    fn format(&self) -> PcmFormat {
        PcmFormat::F32Le
    }
}

/// Notification published to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session status changed
    Status {
        /// Session the change belongs to
        generation: u64,
        /// New status
        status: StreamStatus,
    },
    /// Synthesis of a chunk failed; the backend's message is kept for the UI
    ChunkFailed {
        /// Session the failure belongs to
        generation: u64,
        /// Chunk index
        chunk: usize,
        /// Backend failure description
        message: String,
    },
    /// A new chunk became audible
    Progress {
        /// Session the progress belongs to
        generation: u64,
        /// Chunk index
        chunk: usize,
        /// Chunk start offset in normalized text
        offset: usize,
    },
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Generation of the current (or last) session
    pub generation: u64,
    /// Status of the current session, `Idle` when there is none
    pub status: StreamStatus,
    /// Chunk currently audible
    pub chunk: Option<usize>,
    /// Normalized-text offset of the audible chunk
    pub offset: Option<usize>,
    /// Chunks in the session
    pub total_chunks: usize,
    /// Chunks appended but not fully played
    pub buffered_chunks: usize,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            generation: 0,
            status: StreamStatus::Idle,
            chunk: None,
            offset: None,
            total_chunks: 0,
            buffered_chunks: 0,
        }
    }
}

/// Controller tuning
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Chunk window sizing
    pub chunker: ChunkerConfig,
    /// Maximum chunks buffered ahead of playback
    pub pipeline_depth: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            pipeline_depth: PIPELINE_DEPTH,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Start {
        text: String,
        offset: usize,
        reply: Reply<u64>,
    },
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop(Reply<()>),
    Retry(Reply<()>),
    Shutdown,
}

struct Completion {
    generation: u64,
    index: usize,
    result: Result<Vec<u8>>,
}

/// UI-facing handle to a running controller
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start { .. } => "Start",
            Self::Pause(_) => "Pause",
            Self::Resume(_) => "Resume",
            Self::Stop(_) => "Stop",
            Self::Retry(_) => "Retry",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl SessionHandle {
    /// Replace any current session with one reading `text` from the top
    ///
    /// Returns the new session's generation.
    ///
    /// # Errors
    ///
    /// Returns error if the controller has shut down
    pub async fn start(&self, text: impl Into<String>) -> Result<u64> {
        self.start_at(text, 0).await
    }

    /// Replace any current session with one reading `text` from char
    /// `offset` of its normalized form
    ///
    /// # Errors
    ///
    /// Returns error if the controller has shut down
    pub async fn start_at(&self, text: impl Into<String>, offset: usize) -> Result<u64> {
        let text = text.into();
        self.request(|reply| Command::Start {
            text,
            offset,
            reply,
        })
        .await
    }

    /// Stop issuing synthesis requests
    ///
    /// # Errors
    ///
    /// Returns error if not streaming or the controller has shut down
    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    /// Resume issuing synthesis requests
    ///
    /// # Errors
    ///
    /// Returns error if not paused or the controller has shut down
    pub async fn resume(&self) -> Result<()> {
        self.request(Command::Resume).await
    }

    /// End the current session and silence the renderer
    ///
    /// # Errors
    ///
    /// Returns error if the controller has shut down
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Re-request the chunk that failed
    ///
    /// # Errors
    ///
    /// Returns error if the session is not in `Error` or the controller has
    /// shut down
    pub async fn retry(&self) -> Result<()> {
        self.request(Command::Retry).await
    }

    /// Stop the session and end the controller task
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Latest controller state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch the controller state for changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to status and progress events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)?
    }
}

/// Drives [`StreamSession`]s against a synthesizer and a renderer
pub struct SessionController<S> {
    synthesizer: Arc<S>,
    chunker: Chunker,
    pipeline_depth: usize,
    renderer: RendererHandle,
    reports: mpsc::Receiver<PlaybackReport>,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    session: Option<StreamSession>,
    generation: u64,
}

impl<S: Synthesizer + 'static> SessionController<S> {
    /// Spawn a controller task on the current tokio runtime
    #[must_use]
    pub fn spawn(
        synthesizer: Arc<S>,
        renderer: RendererHandle,
        reports: mpsc::Receiver<PlaybackReport>,
        options: SessionOptions,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshot, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let controller = Self {
            synthesizer,
            chunker: Chunker::new(options.chunker),
            pipeline_depth: options.pipeline_depth,
            renderer,
            reports,
            commands: command_rx,
            completions_tx,
            completions,
            events: events.clone(),
            snapshot,
            session: None,
            generation: 0,
        };

        let handle = SessionHandle {
            commands: command_tx,
            events,
            snapshot: snapshot_rx,
        };

        (handle, tokio::spawn(controller.run()))
    }

    async fn run(mut self) {
        tracing::debug!(pipeline_depth = self.pipeline_depth, "session controller started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(completion) = self.completions.recv() => {
                    self.handle_completion(completion).await;
                }
                Some(report) = self.reports.recv() => {
                    self.handle_report(report).await;
                }
            }
            self.publish_snapshot();
        }

        if self.session.is_some() {
            self.end_session().await;
        }
        tracing::debug!("session controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        tracing::trace!(?command, generation = self.generation, "session command");

        match command {
            Command::Start {
                text,
                offset,
                reply,
            } => {
                let result = self.start(&text, offset).await;
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let result = self.transition(StreamSession::pause).await;
                let _ = reply.send(result);
            }
            Command::Resume(reply) => {
                let result = self.transition(StreamSession::resume).await;
                let _ = reply.send(result);
            }
            Command::Retry(reply) => {
                let result = self.transition(StreamSession::retry).await;
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                if self.session.is_some() {
                    self.end_session().await;
                }
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown => {}
        }
    }

    async fn start(&mut self, text: &str, offset: usize) -> Result<u64> {
        self.retire_session();
        self.advance_generation().await?;

        let chunks = self.chunker.split(text, offset);
        tracing::info!(
            generation = self.generation,
            chunks = chunks.len(),
            offset,
            "starting stream session"
        );

        let mut session = StreamSession::new(chunks, self.generation, self.pipeline_depth);
        let effects = session.start()?;
        self.session = Some(session);
        self.apply(effects).await;

        Ok(self.generation)
    }

    /// Drop the session and silence the renderer
    async fn end_session(&mut self) {
        self.retire_session();
        if let Err(e) = self.advance_generation().await {
            tracing::warn!(error = %e, "failed to reset renderer");
        }
    }

    /// Drop the current session, announcing `Idle` under its own generation
    fn retire_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let generation = session.generation();
        tracing::info!(generation, "stream session stopped");
        self.emit(SessionEvent::Status {
            generation,
            status: StreamStatus::Idle,
        });
    }

    /// Invalidate in-flight work and reset the renderer under a new tag
    async fn advance_generation(&mut self) -> Result<()> {
        self.generation += 1;
        self.renderer.reset(self.generation).await
    }

    async fn transition(
        &mut self,
        step: impl FnOnce(&mut StreamSession) -> Result<Vec<Effect>>,
    ) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::InvalidTransition("no active session".to_string()))?;
        let effects = step(session)?;
        self.apply(effects).await;
        Ok(())
    }

    async fn handle_completion(&mut self, completion: Completion) {
        let Completion {
            generation,
            index,
            result,
        } = completion;

        if generation != self.generation {
            tracing::debug!(
                chunk = index,
                stale = generation,
                current = self.generation,
                "discarding stale synthesis result"
            );
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let effects = match result {
            Ok(bytes) => {
                let samples = pcm::decode(&bytes, self.synthesizer.format());
                tracing::debug!(
                    generation,
                    chunk = index,
                    samples = samples.len(),
                    "chunk synthesized"
                );
                session.on_synthesized(index, samples)
            }
            Err(e) => {
                tracing::warn!(generation, chunk = index, error = %e, "chunk synthesis failed");
                let effects = session.on_failed(index);
                self.emit(SessionEvent::ChunkFailed {
                    generation,
                    chunk: index,
                    message: e.to_string(),
                });
                effects
            }
        };
        self.apply(effects).await;
    }

    async fn handle_report(&mut self, report: PlaybackReport) {
        self.renderer.release_spent();
        if report.epoch != self.generation {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let effects = session.on_played(report.consumed, report.silent);
        self.apply(effects).await;
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Synthesize { index } => self.request_synthesis(index),
                Effect::Append { index, samples } => {
                    if let Err(e) = self.renderer.append(samples).await {
                        // Nothing will ever drain the session again
                        tracing::error!(chunk = index, error = %e, "failed to queue audio");
                        self.end_session().await;
                        return;
                    }
                }
                Effect::Status(status) => {
                    tracing::info!(generation = self.generation, ?status, "stream status");
                    self.emit(SessionEvent::Status {
                        generation: self.generation,
                        status,
                    });
                }
                Effect::Progress { chunk, offset } => {
                    tracing::debug!(generation = self.generation, chunk, offset, "now playing");
                    self.emit(SessionEvent::Progress {
                        generation: self.generation,
                        chunk,
                        offset,
                    });
                }
            }
        }
    }

    fn request_synthesis(&self, index: usize) {
        let Some(text) = self
            .session
            .as_ref()
            .and_then(|s| s.chunk(index))
            .map(|c| c.text.clone())
        else {
            return;
        };

        let synthesizer = Arc::clone(&self.synthesizer);
        let completions = self.completions_tx.clone();
        let generation = self.generation;

        tracing::debug!(generation, chunk = index, bytes = text.len(), "requesting synthesis");

        tokio::spawn(async move {
            let result = synthesizer.synthesize(&text).await;
            let _ = completions.send(Completion {
                generation,
                index,
                result,
            });
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_snapshot(&self) {
        let snapshot = self.session.as_ref().map_or_else(
            || SessionSnapshot {
                generation: self.generation,
                ..SessionSnapshot::default()
            },
            |s| {
                let chunk = s.playing();
                SessionSnapshot {
                    generation: s.generation(),
                    status: s.status(),
                    chunk,
                    offset: chunk.and_then(|i| s.chunk(i)).map(|c| c.start_offset),
                    total_chunks: s.chunks().len(),
                    buffered_chunks: s.buffered_chunks(),
                }
            },
        );
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
