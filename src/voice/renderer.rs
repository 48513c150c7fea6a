//! Ring buffer renderer for the real-time audio callback
//!
//! The renderer is split in two halves joined by channels:
//!
//! ```text
//!   controller domain                      render domain (audio callback)
//!  ┌────────────────┐  Append / Reset   ┌──────────────────────────────┐
//!  │ RendererHandle │ ────────────────▶ │ Renderer                     │
//!  │                │ ◀──────────────── │   SampleBuffer ─▶ output     │
//!  └────────────────┘  spent segments   │                              │
//!  ┌────────────────┐  PlaybackReport   │                              │
//!  │ report stream  │ ◀──────────────── │                              │
//!  └────────────────┘                   └──────────────────────────────┘
//! ```
//!
//! The render side only ever uses `try_recv`/`try_send`, so a callback never
//! waits on the controller. An empty buffer renders silence.
//!
//! Appended audio is never copied or resized in the render domain. Each
//! `Append` becomes one segment in a queue whose slots are reserved up front,
//! and a segment that has been played out (or discarded by a reset) is sent
//! back to the handle, which frees it on the controller side. The only
//! render-side allocations left are the channels' own block reuse, which is
//! amortized across many messages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::{Error, Result};

/// Default depth of the command channel, and of the segment queue
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default depth of the report channel
pub const DEFAULT_REPORT_CAPACITY: usize = 64;

/// Message from the controller to the render domain
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    /// Concatenate samples onto the tail of the buffer
    Append(Vec<f32>),
    /// Discard everything buffered and tag later reports with `generation`
    Reset {
        /// Session generation that owns the audio appended after this reset
        generation: u64,
    },
}

/// Progress emitted once per render callback
///
/// Serializes as `{"type":"played","frames":..,"silent":..,...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "played")]
pub struct PlaybackReport {
    /// Frames written to the output, silent or not
    pub frames: usize,
    /// Samples actually taken from the buffer
    pub consumed: usize,
    /// Buffer was empty before this callback (underrun)
    pub silent: bool,
    /// Generation of the last reset the renderer processed
    pub epoch: u64,
}

impl PlaybackReport {
    /// Fold a later report into this one
    #[must_use]
    pub const fn merge(self, later: Self) -> Self {
        Self {
            frames: self.frames + later.frames,
            consumed: self.consumed + later.consumed,
            silent: self.silent || later.silent,
            epoch: later.epoch,
        }
    }
}

/// Outcome of draining the buffer into one output block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    /// Frames written
    pub frames: usize,
    /// Samples taken from the buffer
    pub consumed: usize,
    /// Buffer was empty before draining
    pub silent: bool,
}

/// Mono sample storage made of whole appended segments
///
/// Segments are played in order through a read position into the front one.
/// The buffer never copies samples between segments; once a segment is used
/// up it is handed to the caller's `spent` closure.
#[derive(Debug)]
pub struct SampleBuffer {
    segments: VecDeque<Vec<f32>>,
    max_segments: usize,
    read: usize,
    len: usize,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_COMMAND_CAPACITY)
    }
}

impl SampleBuffer {
    /// Create an empty buffer with slots for `max_segments` segments
    #[must_use]
    pub fn with_capacity(max_segments: usize) -> Self {
        let max_segments = max_segments.max(1);
        Self {
            segments: VecDeque::with_capacity(max_segments),
            max_segments,
            read: 0,
            len: 0,
        }
    }

    /// Samples waiting to be played
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is waiting to be played
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether every segment slot is taken
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.segments.len() >= self.max_segments
    }

    /// Queue `segment` behind what is already buffered
    ///
    /// A full buffer hands the segment back untouched.
    ///
    /// # Errors
    ///
    /// Returns the segment if no slot is free
    pub fn push(&mut self, segment: Vec<f32>) -> std::result::Result<(), Vec<f32>> {
        if self.is_full() {
            return Err(segment);
        }
        self.len += segment.len();
        self.segments.push_back(segment);
        Ok(())
    }

    /// Discard all buffered segments
    pub fn clear(&mut self, mut spent: impl FnMut(Vec<f32>)) {
        while let Some(segment) = self.segments.pop_front() {
            spent(segment);
        }
        self.read = 0;
        self.len = 0;
    }

    /// Fill `out` (interleaved, `channels` per frame) from the front of the
    /// buffer, zero-filling whatever the buffer cannot cover
    pub fn drain_into(
        &mut self,
        out: &mut [f32],
        channels: usize,
        mut spent: impl FnMut(Vec<f32>),
    ) -> Drained {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let available = self.len;

        let mut written = 0;
        while let Some(front) = self.segments.front() {
            let src = &front[self.read..];
            let take = src.len().min(frames - written);
            let dst = &mut out[written * channels..(written + take) * channels];
            for (frame, &sample) in dst.chunks_mut(channels).zip(src) {
                frame.fill(sample);
            }
            written += take;
            self.read += take;

            if self.read < front.len() {
                break;
            }
            if let Some(segment) = self.segments.pop_front() {
                spent(segment);
            }
            self.read = 0;
        }
        out[written * channels..].fill(0.0);
        self.len -= written;

        Drained {
            frames,
            consumed: written,
            silent: available == 0,
        }
    }
}

/// Render-domain half: owns the buffer, runs inside the audio callback
#[derive(Debug)]
pub struct Renderer {
    buffer: SampleBuffer,
    commands: mpsc::Receiver<RenderCommand>,
    reports: mpsc::Sender<PlaybackReport>,
    spent: mpsc::UnboundedSender<Vec<f32>>,
    pending: Option<PlaybackReport>,
    epoch: u64,
}

impl Renderer {
    /// Render one callback's worth of output and report it
    ///
    /// Never blocks and never fails: pending commands are applied first,
    /// then the buffer is drained into `out`, zero-filling any shortfall.
    pub fn render(&mut self, out: &mut [f32], channels: usize) -> PlaybackReport {
        self.apply_commands();

        let spent = &self.spent;
        let drained = self
            .buffer
            .drain_into(out, channels, |segment| retire(spent, segment));
        let report = PlaybackReport {
            frames: drained.frames,
            consumed: drained.consumed,
            silent: drained.silent,
            epoch: self.epoch,
        };
        self.publish(report);

        report
    }

    /// Samples currently buffered
    #[must_use]
    pub const fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn apply_commands(&mut self) {
        // With every slot taken, later commands wait in the channel
        while !self.buffer.is_full() {
            let Ok(command) = self.commands.try_recv() else {
                break;
            };
            match command {
                RenderCommand::Append(samples) => {
                    if let Err(samples) = self.buffer.push(samples) {
                        retire(&self.spent, samples);
                    }
                }
                RenderCommand::Reset { generation } => {
                    let spent = &self.spent;
                    self.buffer.clear(|segment| retire(spent, segment));
                    self.pending = None;
                    self.epoch = generation;
                }
            }
        }
    }

    fn publish(&mut self, report: PlaybackReport) {
        let report = match self.pending.take() {
            Some(earlier) if earlier.epoch == report.epoch => earlier.merge(report),
            _ => report,
        };

        // Controller is behind: hold the report and fold later ones into it
        if let Err(TrySendError::Full(report)) = self.reports.try_send(report) {
            self.pending = Some(report);
        }
    }
}

/// Hand a used segment back to the controller domain
fn retire(spent: &mpsc::UnboundedSender<Vec<f32>>, segment: Vec<f32>) {
    // Only fails once the handle is gone, at teardown
    let _ = spent.send(segment);
}

/// Controller-domain half: sends commands to the renderer and frees the
/// segments it has finished with
#[derive(Debug, Clone)]
pub struct RendererHandle {
    commands: mpsc::Sender<RenderCommand>,
    spent: Arc<Mutex<mpsc::UnboundedReceiver<Vec<f32>>>>,
}

impl RendererHandle {
    /// Queue samples for playback
    ///
    /// # Errors
    ///
    /// Returns error if the renderer has been dropped
    pub async fn append(&self, samples: Vec<f32>) -> Result<()> {
        self.send(RenderCommand::Append(samples)).await
    }

    /// Discard everything buffered; later reports carry `generation`
    ///
    /// # Errors
    ///
    /// Returns error if the renderer has been dropped
    pub async fn reset(&self, generation: u64) -> Result<()> {
        self.send(RenderCommand::Reset { generation }).await
    }

    /// Free the segments the renderer has handed back
    ///
    /// Returns how many were released.
    pub fn release_spent(&self) -> usize {
        let Ok(mut spent) = self.spent.lock() else {
            return 0;
        };
        let mut released = 0;
        while spent.try_recv().is_ok() {
            released += 1;
        }
        released
    }

    async fn send(&self, command: RenderCommand) -> Result<()> {
        self.release_spent();
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Audio("renderer stopped".to_string()))
    }
}

/// Create a connected renderer pair plus the stream of its reports
///
/// `command_capacity` also sizes the renderer's segment queue.
#[must_use]
pub fn channel(
    command_capacity: usize,
    report_capacity: usize,
) -> (RendererHandle, Renderer, mpsc::Receiver<PlaybackReport>) {
    let command_capacity = command_capacity.max(1);
    let (command_tx, command_rx) = mpsc::channel(command_capacity);
    let (report_tx, report_rx) = mpsc::channel(report_capacity.max(1));
    let (spent_tx, spent_rx) = mpsc::unbounded_channel();

    let renderer = Renderer {
        buffer: SampleBuffer::with_capacity(command_capacity),
        commands: command_rx,
        reports: report_tx,
        spent: spent_tx,
        pending: None,
        epoch: 0,
    };

    (
        RendererHandle {
            commands: command_tx,
            spent: Arc::new(Mutex::new(spent_rx)),
        },
        renderer,
        report_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep(spent: &mut Vec<Vec<f32>>) -> impl FnMut(Vec<f32>) + '_ {
        move |segment| spent.push(segment)
    }

    #[test]
    fn empty_buffer_renders_silence() {
        let mut buffer = SampleBuffer::default();
        let mut out = [1.0_f32; 8];
        let drained = buffer.drain_into(&mut out, 1, drop);
        assert_eq!(out, [0.0; 8]);
        assert_eq!(
            drained,
            Drained {
                frames: 8,
                consumed: 0,
                silent: true,
            }
        );
    }

    #[test]
    fn short_buffer_zero_fills_tail() {
        let mut buffer = SampleBuffer::default();
        buffer.push(vec![0.1, 0.2, 0.3]).unwrap();
        let mut spent = Vec::new();
        let mut out = [9.0_f32; 5];
        let drained = buffer.drain_into(&mut out, 1, keep(&mut spent));
        assert_eq!(out, [0.1, 0.2, 0.3, 0.0, 0.0]);
        assert_eq!(drained.consumed, 3);
        assert!(!drained.silent);
        assert!(buffer.is_empty());
        assert_eq!(spent, [vec![0.1, 0.2, 0.3]]);
    }

    #[test]
    fn reads_across_segment_boundaries() {
        let mut buffer = SampleBuffer::default();
        buffer.push((0..6_u8).map(f32::from).collect()).unwrap();
        let mut spent = Vec::new();
        let mut out = [0.0_f32; 4];
        buffer.drain_into(&mut out, 1, keep(&mut spent));
        assert_eq!(out, [0.0, 1.0, 2.0, 3.0]);
        assert_eq!(buffer.len(), 2);
        assert!(spent.is_empty());

        buffer.push(vec![6.0]).unwrap();
        let mut out = [0.0_f32; 3];
        buffer.drain_into(&mut out, 1, keep(&mut spent));
        assert_eq!(out, [4.0, 5.0, 6.0]);
        assert!(buffer.is_empty());
        assert_eq!(spent.len(), 2);
    }

    #[test]
    fn empty_segments_are_skipped() {
        let mut buffer = SampleBuffer::default();
        buffer.push(Vec::new()).unwrap();
        buffer.push(vec![1.0]).unwrap();
        buffer.push(Vec::new()).unwrap();
        buffer.push(vec![2.0]).unwrap();

        let mut spent = Vec::new();
        let mut out = [0.0_f32; 3];
        let drained = buffer.drain_into(&mut out, 1, keep(&mut spent));
        assert_eq!(out, [1.0, 2.0, 0.0]);
        assert_eq!(drained.consumed, 2);
        assert_eq!(spent.len(), 4);
    }

    #[test]
    fn duplicates_mono_across_channels() {
        let mut buffer = SampleBuffer::default();
        buffer.push(vec![0.5, -0.5]).unwrap();
        let mut out = [1.0_f32; 6];
        let drained = buffer.drain_into(&mut out, 2, drop);
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
        assert_eq!(drained.frames, 3);
        assert_eq!(drained.consumed, 2);
    }

    #[test]
    fn full_buffer_hands_segment_back() {
        let mut buffer = SampleBuffer::with_capacity(2);
        buffer.push(vec![1.0]).unwrap();
        buffer.push(vec![2.0]).unwrap();
        assert!(buffer.is_full());
        assert_eq!(buffer.push(vec![3.0]), Err(vec![3.0]));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn clear_is_idempotent() {
        let mut buffer = SampleBuffer::with_capacity(4);
        buffer.push(vec![1.0; 4]).unwrap();
        let mut spent = Vec::new();
        buffer.clear(keep(&mut spent));
        buffer.clear(keep(&mut spent));
        assert!(buffer.is_empty());
        assert_eq!(spent.len(), 1);
    }

    #[tokio::test]
    async fn played_segments_return_to_handle() {
        let (handle, mut renderer, _reports) = channel(4, 4);
        handle.append(vec![1.0; 8]).await.unwrap();
        handle.append(vec![2.0; 8]).await.unwrap();

        let mut out = [0.0_f32; 12];
        renderer.render(&mut out, 1);
        assert_eq!(handle.release_spent(), 1);

        handle.reset(1).await.unwrap();
        renderer.render(&mut out, 1);
        assert_eq!(handle.release_spent(), 1);
        assert_eq!(renderer.buffered(), 0);
    }

    #[tokio::test]
    async fn full_segment_queue_leaves_commands_queued() {
        let (handle, mut renderer, _reports) = channel(2, 4);
        handle.append(vec![1.0; 4]).await.unwrap();
        handle.append(vec![2.0; 4]).await.unwrap();

        let mut out = [0.0_f32; 2];
        renderer.render(&mut out, 1);
        assert_eq!(renderer.buffered(), 6);

        // Waits in the channel until a slot frees up
        handle.append(vec![3.0; 4]).await.unwrap();
        let mut out = [0.0_f32; 6];
        renderer.render(&mut out, 1);
        assert_eq!(out, [1.0, 1.0, 2.0, 2.0, 2.0, 2.0]);

        let mut out = [0.0_f32; 4];
        renderer.render(&mut out, 1);
        assert_eq!(out, [3.0; 4]);
    }

    #[test]
    fn merge_sums_and_ors() {
        let a = PlaybackReport {
            frames: 4,
            consumed: 4,
            silent: false,
            epoch: 1,
        };
        let b = PlaybackReport {
            frames: 4,
            consumed: 0,
            silent: true,
            epoch: 1,
        };
        assert_eq!(
            a.merge(b),
            PlaybackReport {
                frames: 8,
                consumed: 4,
                silent: true,
                epoch: 1,
            }
        );
    }

    #[test]
    fn report_serializes_as_played_message() {
        let report = PlaybackReport {
            frames: 128,
            consumed: 100,
            silent: false,
            epoch: 2,
        };
        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["type"], "played");
        assert_eq!(json["frames"], 128);
        assert_eq!(json["silent"], false);
    }

    #[test]
    fn full_report_channel_coalesces() {
        let (_handle, mut renderer, mut reports) = channel(4, 1);
        let mut out = [0.0_f32; 16];
        renderer.render(&mut out, 1);
        renderer.render(&mut out, 1);
        renderer.render(&mut out, 1);

        let first = reports.try_recv().unwrap();
        assert_eq!(first.frames, 16);
        assert!(reports.try_recv().is_err());

        // Next callback flushes the two held-back reports merged with it
        renderer.render(&mut out, 1);
        let merged = reports.try_recv().unwrap();
        assert_eq!(merged.frames, 48);
        assert!(merged.silent);
    }
}
