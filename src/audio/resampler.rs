//! Streaming mono resampling using rubato.
//!
//! Chunks arrive at arbitrary sizes, so the polynomial resampler is driven one
//! input frame per call. Every frame handed in is converted before `process`
//! returns and the cumulative output tracks `input * ratio`. The interpolator's
//! own delay of a few output frames stays in the stream as a fixed latency.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};

use super::stream_decoder::DecodeError;

pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, DecodeError> {
        if input_rate == 0 || output_rate == 0 {
            return Err(DecodeError::Unsupported(format!(
                "cannot resample {}Hz -> {}Hz",
                input_rate, output_rate
            )));
        }
        let inner = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            1,
            1,
        )
        .map_err(|e| DecodeError::Unsupported(format!("Failed to create resampler: {}", e)))?;

        log::debug!("Resampler created: {}Hz -> {}Hz", input_rate, output_rate);

        Ok(Self {
            inner,
            input_rate,
            output_rate,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Convert every frame of `input`.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, DecodeError> {
        let expected = (input.len() as f64 * self.output_rate as f64 / self.input_rate as f64)
            .ceil() as usize;
        let mut output = Vec::with_capacity(expected + 4);

        for frame in input.chunks(1) {
            let wave_in: [&[f32]; 1] = [frame];
            let converted = self
                .inner
                .process(&wave_in[..], None)
                .map_err(|e| DecodeError::Codec(format!("Resampling failed: {}", e)))?;
            if let Some(channel) = converted.first() {
                output.extend_from_slice(channel);
            }
        }

        Ok(output)
    }
}
