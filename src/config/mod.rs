//! Configuration management for readaloud
//!
//! Precedence is env > TOML file > default for every setting.

pub mod file;

use std::str::FromStr;

use crate::session::{PIPELINE_DEPTH, SessionOptions};
use crate::text::{BREAK_SEARCH_LEN, ChunkerConfig, MAX_CHUNK_LEN};
use crate::voice::renderer::{DEFAULT_COMMAND_CAPACITY, DEFAULT_REPORT_CAPACITY};
use crate::voice::{PLAYBACK_SAMPLE_RATE, PcmFormat, TtsProvider};
use crate::{Error, Result};

use file::ReadaloudConfigFile;

/// readaloud configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Speech synthesis
    pub tts: TtsConfig,

    /// Audio output
    pub playback: PlaybackConfig,

    /// Chunking and look-ahead
    pub stream: StreamConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Backend to call
    pub provider: TtsProvider,

    /// Model identifier (e.g. "tts-1", "eleven_monolingual_v1")
    pub model: String,

    /// Voice identifier
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0, `OpenAI` only)
    pub speed: f32,

    /// Endpoint for the self-hosted provider
    pub url: Option<String>,

    /// Sample encoding the self-hosted provider returns
    pub pcm_format: PcmFormat,
}

/// Audio output configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Output sample rate; must match what the TTS backend produces
    pub sample_rate: u32,

    /// Block size of the headless sink
    pub frames_per_callback: usize,

    /// Depth of the renderer command channel
    pub command_capacity: usize,

    /// Depth of the renderer report channel
    pub report_capacity: usize,
}

/// Chunking and look-ahead configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Chunks buffered ahead of playback
    pub pipeline_depth: usize,

    /// Maximum characters per chunk
    pub max_chunk_len: usize,

    /// Trailing characters searched for a break point
    pub break_search: usize,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key
    pub openai: Option<String>,

    /// `ElevenLabs` API key
    pub elevenlabs: Option<String>,
}

impl StreamConfig {
    /// Session controller options derived from this config
    #[must_use]
    pub const fn session_options(&self) -> SessionOptions {
        SessionOptions {
            chunker: ChunkerConfig {
                max_chunk_len: self.max_chunk_len,
                break_search: self.break_search,
            },
            pipeline_depth: self.pipeline_depth,
        }
    }
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting is out of range or unparsable
    pub fn load() -> Result<Self> {
        Self::from_file_config(file::load_config_file())
    }

    /// Build configuration from a parsed file, applying env overrides
    ///
    /// # Errors
    ///
    /// Returns error if a setting is out of range or unparsable
    pub fn from_file_config(fc: ReadaloudConfigFile) -> Result<Self> {
        let provider = match std::env::var("READALOUD_TTS_PROVIDER") {
            Ok(name) => TtsProvider::from_str(&name)?,
            Err(_) => fc.tts.provider.unwrap_or_default(),
        };

        let default_model = match provider {
            TtsProvider::OpenAI => "tts-1",
            TtsProvider::ElevenLabs => "eleven_monolingual_v1",
            TtsProvider::Http => "",
        };

        let tts = TtsConfig {
            provider,
            model: std::env::var("READALOUD_TTS_MODEL")
                .ok()
                .or(fc.tts.model)
                .unwrap_or_else(|| default_model.to_string()),
            voice: std::env::var("READALOUD_TTS_VOICE")
                .ok()
                .or(fc.tts.voice)
                .unwrap_or_else(|| "alloy".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
            url: std::env::var("READALOUD_TTS_URL").ok().or(fc.tts.url),
            pcm_format: fc.tts.pcm_format.unwrap_or_default(),
        };

        let playback = PlaybackConfig {
            sample_rate: env_parse("READALOUD_SAMPLE_RATE")?
                .or(fc.playback.sample_rate)
                .unwrap_or(PLAYBACK_SAMPLE_RATE),
            frames_per_callback: fc.playback.frames_per_callback.unwrap_or(1024),
            command_capacity: fc
                .playback
                .command_capacity
                .unwrap_or(DEFAULT_COMMAND_CAPACITY),
            report_capacity: fc
                .playback
                .report_capacity
                .unwrap_or(DEFAULT_REPORT_CAPACITY),
        };

        let stream = StreamConfig {
            pipeline_depth: env_parse("READALOUD_PIPELINE_DEPTH")?
                .or(fc.stream.pipeline_depth)
                .unwrap_or(PIPELINE_DEPTH),
            max_chunk_len: fc.stream.max_chunk_len.unwrap_or(MAX_CHUNK_LEN),
            break_search: fc.stream.break_search.unwrap_or(BREAK_SEARCH_LEN),
        };

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok().or(fc.api_keys.openai),
            elevenlabs: std::env::var("ELEVENLABS_API_KEY")
                .ok()
                .or(fc.api_keys.elevenlabs),
        };

        let config = Self {
            tts,
            playback,
            stream,
            api_keys,
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.playback.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        if self.playback.frames_per_callback == 0 {
            return Err(Error::Config(
                "frames_per_callback must be positive".to_string(),
            ));
        }
        if self.stream.pipeline_depth == 0 {
            return Err(Error::Config("pipeline_depth must be at least 1".to_string()));
        }
        if self.stream.max_chunk_len == 0 {
            return Err(Error::Config("max_chunk_len must be positive".to_string()));
        }
        if self.stream.break_search > self.stream.max_chunk_len {
            return Err(Error::Config(
                "break_search cannot exceed max_chunk_len".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse an optional numeric env var
fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} is not a valid number: {raw}"))),
        Err(_) => Ok(None),
    }
}
