//! Text-to-speech (TTS) synthesis over HTTP

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::PcmFormat;
use crate::config::{ApiKeys, TtsConfig};
use crate::session::Synthesizer;
use crate::{Error, Result};

/// TTS provider backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    /// `OpenAI` `/v1/audio/speech` with raw PCM output
    #[default]
    OpenAI,
    /// ElevenLabs text-to-speech with `pcm_24000` output
    ElevenLabs,
    /// Any endpoint accepting `{"text": ...}` and answering with raw PCM
    Http,
}

impl std::str::FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            "http" => Ok(Self::Http),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
    url: Option<String>,
    format: PcmFormat,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, voice: String, speed: f32, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            url: None,
            format: PcmFormat::S16Le,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, voice_id: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            speed: 1.0, // ElevenLabs doesn't use speed in the same way
            model,
            url: None,
            format: PcmFormat::S16Le,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Create a TTS instance for a self-hosted endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty
    pub fn new_http(url: String, voice: String, format: PcmFormat) -> Result<Self> {
        if url.is_empty() {
            return Err(Error::Config("TTS endpoint URL required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: String::new(),
            voice,
            speed: 1.0,
            model: String::new(),
            url: Some(url),
            format,
            provider: TtsProvider::Http,
        })
    }

    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider's credentials or endpoint are missing
    pub fn from_config(tts: &TtsConfig, keys: &ApiKeys) -> Result<Self> {
        match tts.provider {
            TtsProvider::OpenAI => Self::new_openai(
                keys.openai.clone().unwrap_or_default(),
                tts.voice.clone(),
                tts.speed,
                tts.model.clone(),
            ),
            TtsProvider::ElevenLabs => Self::new_elevenlabs(
                keys.elevenlabs.clone().unwrap_or_default(),
                tts.voice.clone(),
                tts.model.clone(),
            ),
            TtsProvider::Http => Self::new_http(
                tts.url.clone().unwrap_or_default(),
                tts.voice.clone(),
                tts.pcm_format,
            ),
        }
    }

    /// Provider this instance talks to
    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// Synthesize text to raw PCM in [`Self::pcm_format`]
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize_pcm(&self, text: &str) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
            TtsProvider::Http => self.synthesize_http(text).await,
        }
    }

    /// Encoding of the bytes returned by [`Self::synthesize_pcm`]
    #[must_use]
    pub const fn pcm_format(&self) -> PcmFormat {
        self.format
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "pcm",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        read_audio(response, "OpenAI").await
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}?output_format=pcm_24000",
            self.voice
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        read_audio(response, "ElevenLabs").await
    }

    /// Synthesize using a self-hosted endpoint
    async fn synthesize_http(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct HttpRequest<'a> {
            text: &'a str,
            voice: &'a str,
        }

        let url = self
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("TTS endpoint URL required".to_string()))?;

        let response = self
            .client
            .post(url)
            .json(&HttpRequest {
                text,
                voice: &self.voice,
            })
            .send()
            .await?;

        read_audio(response, "HTTP").await
    }
}

async fn read_audio(response: reqwest::Response, backend: &str) -> Result<Vec<u8>> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Tts(format!("{backend} TTS error {status}: {body}")));
    }

    let audio = response.bytes().await?;
    Ok(audio.to_vec())
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.synthesize_pcm(text).await
    }

    fn format(&self) -> PcmFormat {
        self.format
    }
}
