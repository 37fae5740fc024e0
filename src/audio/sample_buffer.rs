//! Append-only store of decoded mono samples for one playback session.

use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    #[error("invalid segment range [{start}, {end}) for buffer of {len} frames")]
    InvalidRange { start: usize, end: usize, len: usize },
}

/// Growable sample store. Only `reset` ever shrinks it.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Vec<f32>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames accumulated since the last reset.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append decoded frames. `Vec` growth is capacity doubling, so this is
    /// amortized O(1) per frame.
    pub fn append(&mut self, frames: &[f32]) {
        self.samples.extend_from_slice(frames);
    }

    /// Drop all frames, keeping the allocation for the next session.
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Copy `[start, end)` out into an immutable segment.
    pub fn segment(&self, start: usize, end: usize) -> Result<Segment, SegmentError> {
        if start > end || end > self.samples.len() {
            return Err(SegmentError::InvalidRange {
                start,
                end,
                len: self.samples.len(),
            });
        }
        Ok(Segment {
            start,
            data: Arc::from(&self.samples[start..end]),
        })
    }

    /// Segment from `start` to the current end of the buffer.
    pub fn tail_from(&self, start: usize) -> Result<Segment, SegmentError> {
        self.segment(start, self.samples.len())
    }
}

/// Read-only range of a [`SampleBuffer`], handed to an output sink.
///
/// The frames are shared behind an `Arc`, so a scheduled segment stays valid
/// while the buffer it came from keeps growing.
#[derive(Debug, Clone)]
pub struct Segment {
    start: usize,
    data: Arc<[f32]>,
}

impl Segment {
    /// Wrap freshly decoded frames that were appended at `start`.
    pub fn from_appended(start: usize, frames: Arc<[f32]>) -> Self {
        Self { start, data: frames }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.start + self.data.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    #[test]
    fn length_is_sum_of_appends() {
        let mut buffer = SampleBuffer::new();
        for n in [160, 0, 1, 4410, 3] {
            buffer.append(&ramp(n));
        }
        assert_eq!(buffer.len(), 160 + 1 + 4410 + 3);
    }

    #[test]
    fn reset_returns_to_empty() {
        let mut buffer = SampleBuffer::new();
        buffer.append(&ramp(100));
        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn segment_copies_requested_range() {
        let mut buffer = SampleBuffer::new();
        buffer.append(&ramp(10));
        let segment = buffer.segment(3, 7).unwrap();
        assert_eq!(segment.start(), 3);
        assert_eq!(segment.end(), 7);
        assert_eq!(segment.samples(), &[3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn segment_survives_further_appends() {
        let mut buffer = SampleBuffer::new();
        buffer.append(&ramp(4));
        let segment = buffer.tail_from(1).unwrap();
        buffer.append(&ramp(1000));
        assert_eq!(segment.samples(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn empty_segment_at_end_is_valid() {
        let mut buffer = SampleBuffer::new();
        buffer.append(&ramp(5));
        let segment = buffer.tail_from(5).unwrap();
        assert!(segment.is_empty());
    }

    #[test]
    fn inverted_or_overlong_ranges_are_rejected() {
        let mut buffer = SampleBuffer::new();
        buffer.append(&ramp(5));
        assert_eq!(
            buffer.segment(4, 2).unwrap_err(),
            SegmentError::InvalidRange { start: 4, end: 2, len: 5 }
        );
        assert!(buffer.tail_from(6).is_err());
        assert!(buffer.segment(0, 6).is_err());
    }
}
