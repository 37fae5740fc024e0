//! Segment renderer shared by the output sink adapters.
//!
//! Scheduled segments are staged back to back, so playback across segment
//! boundaries is gapless. A tempo head walks the staged frames at `rate`
//! source frames per output frame; its integer part is the render clock.
//!
//! When the net pitch ratio equals the rate the output is plain varispeed.
//! Otherwise two Hann-windowed grains, half a grain apart, read at the pitch
//! ratio and restart at the tempo head when they expire (overlap-add).

use std::collections::VecDeque;
use std::f32::consts::PI;

use super::sink::CompletionToken;

/// Staged frames behind the head are compacted once they exceed this.
const TRIM_THRESHOLD: usize = 1 << 16;

const MIN_RATE: f64 = 1.0 / 64.0;

#[derive(Debug, Clone, Copy)]
struct Tap {
    pos: f64,
    age: usize,
}

pub struct SegmentRenderer {
    staged: Vec<f32>,
    /// Absolute frame index of `staged[0]`
    origin: u64,
    /// Scheduled tokens with the absolute frame at which each one ends
    queue: VecDeque<(CompletionToken, u64)>,
    head: f64,
    rate: f64,
    pitch_cents: f64,
    pitch_ratio: f64,
    window: Vec<f32>,
    taps: [Tap; 2],
}

impl SegmentRenderer {
    pub fn new(sample_rate: u32, grain_ms: u32) -> Self {
        let grain_len = ((sample_rate as u64 * grain_ms.max(1) as u64 / 1000) as usize).max(4);
        // Periodic Hann: two copies offset by half a grain sum to exactly 1
        let window = (0..grain_len)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / grain_len as f32).cos())
            .collect();

        let mut renderer = Self {
            staged: Vec::new(),
            origin: 0,
            queue: VecDeque::new(),
            head: 0.0,
            rate: 1.0,
            pitch_cents: 0.0,
            pitch_ratio: 1.0,
            window,
            taps: [Tap { pos: 0.0, age: 0 }; 2],
        };
        renderer.reset_taps();
        renderer
    }

    pub fn grain_len(&self) -> usize {
        self.window.len()
    }

    pub fn schedule(&mut self, token: CompletionToken, frames: &[f32]) {
        self.staged.extend_from_slice(frames);
        let end = self.staged_end();
        self.queue.push_back((token, end));
    }

    /// True while any scheduled segment has not reported completion.
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Frames consumed since the last reset.
    pub fn position(&self) -> u64 {
        (self.head.max(0.0) as u64).min(self.staged_end())
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate.max(MIN_RATE);
        self.update_pitch_ratio();
    }

    pub fn set_pitch(&mut self, cents: f64) {
        self.pitch_cents = cents;
        self.update_pitch_ratio();
    }

    /// Drop everything scheduled and rewind the clock. No completions are reported.
    pub fn reset(&mut self) {
        self.staged.clear();
        self.origin = 0;
        self.queue.clear();
        self.head = 0.0;
        self.reset_taps();
    }

    /// Fill `out` with the next output frames, silence once the queue runs dry,
    /// and push the tokens of fully played segments onto `drained`, in order.
    pub fn render(&mut self, out: &mut [f32], drained: &mut Vec<CompletionToken>) {
        let end = self.staged_end() as f64;
        let varispeed = self.is_varispeed();
        for sample in out.iter_mut() {
            if self.head >= end {
                *sample = 0.0;
                continue;
            }
            *sample = if varispeed {
                self.sample_at(self.head)
            } else {
                self.grain_sample()
            };
            self.head += self.rate;
        }

        while let Some(&(token, seg_end)) = self.queue.front() {
            if self.head < seg_end as f64 {
                break;
            }
            self.queue.pop_front();
            drained.push(token);
        }

        self.trim();
    }

    fn staged_end(&self) -> u64 {
        self.origin + self.staged.len() as u64
    }

    fn is_varispeed(&self) -> bool {
        (self.pitch_ratio - self.rate).abs() < 1e-9
    }

    fn update_pitch_ratio(&mut self) {
        self.pitch_ratio = self.rate * 2f64.powf(self.pitch_cents / 1200.0);
        self.reset_taps();
    }

    fn reset_taps(&mut self) {
        let half = self.window.len() / 2;
        self.taps = [
            Tap { pos: self.head, age: 0 },
            Tap { pos: self.head, age: half },
        ];
    }

    fn grain_sample(&mut self) -> f32 {
        let grain_len = self.window.len();
        let mut acc = 0.0;
        for i in 0..self.taps.len() {
            let mut tap = self.taps[i];
            acc += self.window[tap.age] * self.sample_at(tap.pos);
            tap.pos += self.pitch_ratio;
            tap.age += 1;
            if tap.age >= grain_len {
                tap.age = 0;
                tap.pos = self.head;
            }
            self.taps[i] = tap;
        }
        acc
    }

    /// Linear interpolation at absolute frame `pos`; silence outside the staged range.
    fn sample_at(&self, pos: f64) -> f32 {
        if pos < self.origin as f64 {
            return 0.0;
        }
        let rel = pos - self.origin as f64;
        let index = rel as usize;
        let Some(&s0) = self.staged.get(index) else {
            return 0.0;
        };
        let s1 = self.staged.get(index + 1).copied().unwrap_or(s0);
        let frac = (rel - index as f64) as f32;
        s0 + (s1 - s0) * frac
    }

    fn trim(&mut self) {
        let reach = self.rate.max(self.pitch_ratio);
        let margin = (self.window.len() as f64 * reach * 2.0) as u64 + 4;
        let keep_from = (self.head.max(0.0) as u64).saturating_sub(margin);
        let stale = keep_from.saturating_sub(self.origin) as usize;
        if stale > TRIM_THRESHOLD {
            let stale = stale.min(self.staged.len());
            self.staged.drain(..stale);
            self.origin += stale as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32 / n as f32).collect()
    }

    #[test]
    fn unity_rate_copies_frames_and_drains_in_order() {
        let mut renderer = SegmentRenderer::new(1000, 40);
        renderer.schedule(CompletionToken(1), &[0.1, 0.2, 0.3]);
        renderer.schedule(CompletionToken(2), &[0.4, 0.5]);

        let mut out = [0.0; 4];
        let mut drained = Vec::new();
        renderer.render(&mut out, &mut drained);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(drained, vec![CompletionToken(1)]);
        assert_eq!(renderer.position(), 4);

        let mut out = [9.0; 3];
        renderer.render(&mut out, &mut drained);
        assert_eq!(out, [0.5, 0.0, 0.0]);
        assert_eq!(drained, vec![CompletionToken(1), CompletionToken(2)]);
        assert!(!renderer.has_pending());
        assert_eq!(renderer.position(), 5);
    }

    #[test]
    fn double_rate_without_correction_skips_frames() {
        let mut renderer = SegmentRenderer::new(1000, 40);
        let input = ramp(100);
        renderer.schedule(CompletionToken(7), &input);
        renderer.set_rate(2.0);

        let mut out = vec![0.0; 50];
        let mut drained = Vec::new();
        renderer.render(&mut out, &mut drained);
        for (i, sample) in out.iter().enumerate() {
            assert_eq!(*sample, input[i * 2]);
        }
        assert_eq!(drained, vec![CompletionToken(7)]);
    }

    #[test]
    fn pitch_corrected_slow_down_keeps_level() {
        let mut renderer = SegmentRenderer::new(8000, 20);
        renderer.schedule(CompletionToken(1), &vec![1.0; 20000]);
        renderer.set_rate(0.5);
        renderer.set_pitch(-1200.0 * 0.5f64.log2());
        assert!(!renderer.is_varispeed());

        let mut out = vec![0.0; 4000];
        let mut drained = Vec::new();
        renderer.render(&mut out, &mut drained);
        for sample in &out {
            assert!((sample - 1.0).abs() < 1e-3, "sample {}", sample);
        }
        assert_eq!(renderer.position(), 2000);
        assert!(drained.is_empty());
    }

    #[test]
    fn reset_discards_queue_silently() {
        let mut renderer = SegmentRenderer::new(1000, 40);
        renderer.schedule(CompletionToken(1), &ramp(10));
        let mut drained = Vec::new();
        renderer.render(&mut [0.0; 5], &mut drained);

        renderer.reset();
        assert_eq!(renderer.position(), 0);
        assert!(!renderer.has_pending());
        renderer.render(&mut [0.0; 20], &mut drained);
        assert!(drained.is_empty());
    }

    #[test]
    fn long_playback_compacts_staged_frames() {
        let mut renderer = SegmentRenderer::new(1000, 40);
        let len = TRIM_THRESHOLD * 3;
        renderer.schedule(CompletionToken(1), &vec![0.25; len]);
        let mut drained = Vec::new();
        let mut out = vec![0.0; 4096];
        for _ in 0..(len / 4096 - 1) {
            renderer.render(&mut out, &mut drained);
        }
        assert!(renderer.origin > 0);
        assert_eq!(out[4095], 0.25);
        assert_eq!(renderer.position(), ((len / 4096 - 1) * 4096) as u64);
    }
}
