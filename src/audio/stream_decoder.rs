//! Generic stream decoder trait for multi-format audio playback support.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::mp3_decoder::Mp3Decoder;
use super::pcm_decoder::PcmDecoder;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Empty chunk or a byte count that does not fit the declared encoding
    #[error("malformed chunk: {0}")]
    Malformed(String),

    #[error("unsupported stream: {0}")]
    Unsupported(String),

    /// The underlying codec rejected the data
    #[error("codec error: {0}")]
    Codec(String),
}

/// Encoding declared by `initializePlayer` for every chunk of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamFormat {
    /// Signed 16-bit little-endian mono PCM at the declared sample rate
    #[default]
    #[serde(rename = "PCM", alias = "pcm")]
    Pcm,
    /// MPEG-1/2 Layer III frame data
    #[serde(rename = "MP3", alias = "mp3")]
    Mp3,
}

/// A trait for audio stream decoders that convert one inbound chunk into mono
/// f32 frames at the engine output rate.
///
/// Implementations downmix and resample internally and may keep state across
/// the chunks of one session.
pub trait StreamDecoder: Send {
    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<f32>, DecodeError>;
}

/// Factory function: create a decoder based on the declared stream format.
pub fn create_decoder(
    format: StreamFormat,
    input_sample_rate: u32,
    output_sample_rate: u32,
) -> Result<Box<dyn StreamDecoder>, DecodeError> {
    match format {
        StreamFormat::Pcm => Ok(Box::new(PcmDecoder::new(
            input_sample_rate,
            output_sample_rate,
        )?)),
        StreamFormat::Mp3 => Ok(Box::new(Mp3Decoder::new(output_sample_rate))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_follow_the_wire() {
        let pcm: StreamFormat = serde_json::from_str("\"PCM\"").unwrap();
        let mp3: StreamFormat = serde_json::from_str("\"mp3\"").unwrap();
        assert_eq!(pcm, StreamFormat::Pcm);
        assert_eq!(mp3, StreamFormat::Mp3);
        assert_eq!(serde_json::to_string(&StreamFormat::Mp3).unwrap(), "\"MP3\"");
    }

    #[test]
    fn factory_builds_a_pcm_decoder() {
        let mut decoder = create_decoder(StreamFormat::Pcm, 16000, 16000).unwrap();
        let frames = decoder.decode(&[0, 0, 0, 0]).unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn factory_rejects_a_zero_input_rate() {
        assert!(create_decoder(StreamFormat::Pcm, 0, 44100).is_err());
    }
}
