//! Signed 16-bit little-endian mono PCM decoder.

use super::resampler::StreamResampler;
use super::stream_decoder::{DecodeError, StreamDecoder};

/// Full-scale divisor for i16 -> f32 conversion.
const I16_SCALE: f32 = 32768.0;

pub struct PcmDecoder {
    /// Present only when the declared rate differs from the output rate
    resampler: Option<StreamResampler>,
}

impl PcmDecoder {
    pub fn new(input_sample_rate: u32, output_sample_rate: u32) -> Result<Self, DecodeError> {
        if input_sample_rate == 0 {
            return Err(DecodeError::Unsupported("declared sample rate is 0".to_string()));
        }
        let resampler = if input_sample_rate == output_sample_rate {
            None
        } else {
            Some(StreamResampler::new(input_sample_rate, output_sample_rate)?)
        };
        Ok(Self { resampler })
    }
}

/// Reinterpret little-endian byte pairs as i16 samples.
pub fn bytes_to_i16(chunk: &[u8]) -> Result<Vec<i16>, DecodeError> {
    if chunk.is_empty() {
        return Err(DecodeError::Malformed("empty chunk".to_string()));
    }
    if chunk.len() % 2 != 0 {
        return Err(DecodeError::Malformed(format!(
            "{} bytes is not a whole number of 16-bit samples",
            chunk.len()
        )));
    }
    Ok(chunk
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Serialize samples as little-endian 16-bit bytes (the wire layout).
pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Quantize a float sample in [-1, 1] back to i16.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl StreamDecoder for PcmDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<f32>, DecodeError> {
        let frames: Vec<f32> = bytes_to_i16(chunk)?
            .into_iter()
            .map(|s| s as f32 / I16_SCALE)
            .collect();

        match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&frames),
            None => Ok(frames),
        }
    }
}
