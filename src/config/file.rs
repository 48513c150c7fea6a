//! TOML configuration file loading
//!
//! Supports `~/.config/readaloud/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::voice::{PcmFormat, TtsProvider};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ReadaloudConfigFile {
    /// Speech synthesis configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Audio output configuration
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Chunking and look-ahead configuration
    #[serde(default)]
    pub stream: StreamFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Backend ("openai", "elevenlabs", "http")
    pub provider: Option<TtsProvider>,

    /// Model identifier (e.g. "tts-1")
    pub model: Option<String>,

    /// Voice identifier (e.g. "alloy")
    pub voice: Option<String>,

    /// Speed multiplier
    pub speed: Option<f32>,

    /// Endpoint for the "http" provider
    pub url: Option<String>,

    /// Sample encoding returned by the "http" provider
    pub pcm_format: Option<PcmFormat>,
}

/// Audio output configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    pub sample_rate: Option<u32>,
    pub frames_per_callback: Option<usize>,
    pub command_capacity: Option<usize>,
    pub report_capacity: Option<usize>,
}

/// Chunking and look-ahead configuration
#[derive(Debug, Default, Deserialize)]
pub struct StreamFileConfig {
    pub pipeline_depth: Option<usize>,
    pub max_chunk_len: Option<usize>,
    pub break_search: Option<usize>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ReadaloudConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ReadaloudConfigFile {
    config_file_path().map_or_else(ReadaloudConfigFile::default, |path| {
        load_config_file_from(&path)
    })
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults.
pub fn load_config_file_from(path: &Path) -> ReadaloudConfigFile {
    if !path.exists() {
        return ReadaloudConfigFile::default();
    }

    match parse_config_file(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ReadaloudConfigFile::default()
        }
    }
}

/// Read and parse a TOML config file
///
/// # Errors
///
/// Returns `Error::Io` if the file can't be read and `Error::Toml` if it
/// isn't valid
pub fn parse_config_file(path: &Path) -> Result<ReadaloudConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/readaloud/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("readaloud").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_config_file_from(&dir.path().join("nope.toml"));
        assert!(fc.tts.provider.is_none());
        assert!(fc.stream.pipeline_depth.is_none());
    }

    #[test]
    fn parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[tts]
provider = "http"
url = "http://localhost:8880/speak"
pcm_format = "s16le"

[stream]
pipeline_depth = 3
"#,
        )
        .unwrap();

        let fc = load_config_file_from(&path);
        assert_eq!(fc.tts.provider, Some(TtsProvider::Http));
        assert_eq!(fc.tts.url.as_deref(), Some("http://localhost:8880/speak"));
        assert_eq!(fc.tts.pcm_format, Some(PcmFormat::S16Le));
        assert_eq!(fc.stream.pipeline_depth, Some(3));
        assert!(fc.playback.sample_rate.is_none());
    }

    #[test]
    fn malformed_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[stream\npipeline_depth = ").unwrap();
        let fc = load_config_file_from(&path);
        assert!(fc.stream.pipeline_depth.is_none());
    }

    #[test]
    fn parse_errors_keep_their_cause() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(matches!(
            parse_config_file(&path),
            Err(crate::Error::Io(_))
        ));

        std::fs::write(&path, "[stream]\npipeline_depth = \"three\"\n").unwrap();
        assert!(matches!(
            parse_config_file(&path),
            Err(crate::Error::Toml(_))
        ));
    }
}
