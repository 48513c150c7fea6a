//! Shared test utilities
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use readaloud::voice::pcm::encode_f32le;
use readaloud::{
    ChunkerConfig, Error, Renderer, Result, SessionHandle, SessionOptions, SessionSnapshot,
    Synthesizer,
};

/// Samples every mock synthesis returns
pub const SAMPLES_PER_CHUNK: usize = 100;

/// How long a test waits for the controller before giving up
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Five words that split into five chunks at offsets 0, 10, 20, 30, 40
/// under [`small_chunks`]
pub const FIVE_CHUNK_TEXT: &str = "aaaaaaaaa bbbbbbbbb ccccccccc ddddddddd eeeeeeeee";

/// Chunker sizing that cuts [`FIVE_CHUNK_TEXT`] at every space
#[must_use]
pub const fn small_chunks() -> ChunkerConfig {
    ChunkerConfig {
        max_chunk_len: 10,
        break_search: 5,
    }
}

/// Session options for [`FIVE_CHUNK_TEXT`] with the given look-ahead
#[must_use]
pub const fn options(pipeline_depth: usize) -> SessionOptions {
    SessionOptions {
        chunker: small_chunks(),
        pipeline_depth,
    }
}

/// Sample value the mocks use for a chunk starting with `letter`
///
/// `a` is 1.0, `b` is 2.0 and so on, so rendered audio tells which chunk it
/// came from.
#[must_use]
pub fn level(letter: char) -> f32 {
    let letter = u8::try_from(letter).unwrap_or(b'a');
    f32::from(letter.saturating_sub(b'a') + 1)
}

fn chunk_audio(text: &str) -> Vec<u8> {
    let letter = text.chars().next().unwrap_or('a');
    encode_f32le(&vec![level(letter); SAMPLES_PER_CHUNK])
}

/// Mock synthesizer that records its calls and fails on chosen letters
#[derive(Default)]
pub struct MockSynth {
    failing: Mutex<HashSet<char>>,
    calls: Mutex<Vec<String>>,
}

impl MockSynth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every chunk whose text starts with `letter`
    pub fn failing_on(letter: char) -> Self {
        let synth = Self::default();
        synth.failing.lock().unwrap().insert(letter);
        synth
    }

    /// Stop failing
    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Texts requested so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// First letters of the texts requested so far
    pub fn call_letters(&self) -> String {
        self.calls()
            .iter()
            .filter_map(|text| text.chars().next())
            .collect()
    }
}

#[async_trait]
impl Synthesizer for MockSynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(text.to_string());
        tokio::task::yield_now().await;

        let letter = text.chars().next().unwrap_or('a');
        let fails = self.failing.lock().unwrap().contains(&letter);
        if fails {
            return Err(Error::Tts(format!("backend rejected {text:?}")));
        }
        Ok(chunk_audio(text))
    }
}

/// Synthesizer that holds every request until the test opens the gate
pub struct GatedSynth {
    gate: tokio::sync::Semaphore,
    requested: AtomicUsize,
    finished: AtomicUsize,
}

impl GatedSynth {
    pub fn new() -> Self {
        Self {
            gate: tokio::sync::Semaphore::new(0),
            requested: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    /// Let `n` more requests through
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Requests that have reached the synthesizer
    pub fn requested(&self) -> usize {
        self.requested.load(Ordering::SeqCst)
    }

    /// Requests that have returned audio
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for GatedSynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.requested.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;
        permit.forget();
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(chunk_audio(text))
    }
}

/// Render `frames` mono frames and return them
pub fn render_mono(renderer: &mut Renderer, frames: usize) -> Vec<f32> {
    let mut out = vec![f32::NAN; frames];
    renderer.render(&mut out, 1);
    out
}

/// Wait until the controller's snapshot satisfies `predicate`
pub async fn wait_for(
    session: &SessionHandle,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut watch = session.watch();
    let snapshot = tokio::time::timeout(TIMEOUT, watch.wait_for(predicate))
        .await
        .expect("timed out waiting for session state")
        .expect("session controller stopped");
    SessionSnapshot::clone(&snapshot)
}
