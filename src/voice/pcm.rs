//! Raw PCM payload conversions

use serde::{Deserialize, Serialize};

/// Sample encoding of a synthesis payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcmFormat {
    /// Little-endian 32-bit float (renderer wire format)
    #[default]
    F32Le,
    /// Little-endian signed 16-bit (what hosted TTS APIs return as "pcm")
    S16Le,
}

impl PcmFormat {
    /// Bytes per mono sample
    #[must_use]
    pub const fn sample_width(self) -> usize {
        match self {
            Self::F32Le => 4,
            Self::S16Le => 2,
        }
    }
}

/// Decode raw PCM bytes into f32 samples
///
/// A trailing partial sample is dropped.
#[must_use]
pub fn decode(bytes: &[u8], format: PcmFormat) -> Vec<f32> {
    let width = format.sample_width();
    let remainder = bytes.len() % width;
    if remainder != 0 {
        tracing::warn!(
            bytes = bytes.len(),
            dropped = remainder,
            ?format,
            "pcm payload not sample aligned"
        );
    }

    match format {
        PcmFormat::F32Le => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        PcmFormat::S16Le => bytes
            .chunks_exact(2)
            .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
            .collect(),
    }
}

/// Encode f32 samples as little-endian float bytes
#[must_use]
pub fn encode_f32le(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[must_use]
pub fn to_i16(sample: f32) -> i16 {
    #[allow(clippy::cast_possible_truncation)]
    let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
    value
}
