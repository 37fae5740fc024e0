//! MPEG Layer III chunk decoder using symphonia.
//!
//! Producers cut the stream at arbitrary byte offsets, so chunk bytes are
//! appended to a carry buffer and only whole frames are handed to the codec.
//! The bytes of a frame split across two chunks are kept until the rest
//! arrives, and one codec instance lives for the whole session so the bit
//! reservoir survives chunk boundaries.
//!
//! The first frame header seen is cached. Later candidates must agree with it
//! on version, layer and sample rate, which keeps stray sync words in frame
//! payloads from being taken as headers after a resync. A chunk that starts on
//! a frame boundary without a sync word gets the cached header prefixed.

use symphonia::core::audio::SampleBuffer as InterleavedBuffer;
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use super::resampler::StreamResampler;
use super::stream_decoder::{DecodeError, StreamDecoder};

/// Bytes of a MPEG audio frame header.
const HEADER_LEN: usize = 4;

/// Sync, version, layer and sample-rate bits.
const STREAM_MASK: u32 = 0xFFFE_0C00;

const BITRATES_MPEG1_KBPS: [u32; 15] =
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_MPEG2_KBPS: [u32; 15] =
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// A parsed Layer III frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub word: u32,
    pub sample_rate: u32,
    /// Whole frame length in bytes, header included
    pub frame_len: usize,
}

impl FrameHeader {
    /// Parse the 4 bytes at the start of `data`, if they form a Layer III header.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let bytes: [u8; HEADER_LEN] = data.get(..HEADER_LEN)?.try_into().ok()?;
        let word = u32::from_be_bytes(bytes);
        if word & 0xFFE0_0000 != 0xFFE0_0000 {
            return None;
        }
        // 01 = Layer III
        if (word >> 17) & 0x3 != 0b01 {
            return None;
        }

        let version = (word >> 19) & 0x3;
        let bitrate_idx = ((word >> 12) & 0xF) as usize;
        let rate_idx = ((word >> 10) & 0x3) as usize;
        let padding = ((word >> 9) & 0x1) as usize;
        if bitrate_idx == 0 || bitrate_idx == 0xF || rate_idx == 3 {
            return None;
        }

        let (bitrate_kbps, sample_rate, slot_factor) = match version {
            0b11 => (BITRATES_MPEG1_KBPS[bitrate_idx], [44100, 48000, 32000][rate_idx], 144),
            0b10 => (BITRATES_MPEG2_KBPS[bitrate_idx], [22050, 24000, 16000][rate_idx], 72),
            0b00 => (BITRATES_MPEG2_KBPS[bitrate_idx], [11025, 12000, 8000][rate_idx], 72),
            _ => return None,
        };
        let frame_len = (slot_factor * bitrate_kbps as usize * 1000) / sample_rate as usize + padding;

        Some(Self {
            word,
            sample_rate,
            frame_len,
        })
    }

    fn same_stream(&self, other: &FrameHeader) -> bool {
        self.word & STREAM_MASK == other.word & STREAM_MASK
    }
}

pub struct Mp3Decoder {
    output_sample_rate: u32,
    codec: Option<Box<dyn Decoder>>,
    /// Bytes received but not yet part of a decoded frame
    carry: Vec<u8>,
    /// ID3v2 tag bytes still to discard
    tag_remaining: usize,
    header: Option<FrameHeader>,
    frames_decoded: u64,
    resampler: Option<StreamResampler>,
}

impl Mp3Decoder {
    pub fn new(output_sample_rate: u32) -> Self {
        Self {
            output_sample_rate,
            codec: None,
            carry: Vec::new(),
            tag_remaining: 0,
            header: None,
            frames_decoded: 0,
            resampler: None,
        }
    }

    /// Header cached for this session, `None` until the first frame is found.
    pub fn cached_header(&self) -> Option<FrameHeader> {
        self.header
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn carried_bytes(&self) -> usize {
        self.carry.len()
    }

    fn skip_tag(&mut self) {
        if self.tag_remaining == 0 && self.carry.starts_with(b"ID3") && self.carry.len() >= 10 {
            let size = self.carry[6..10]
                .iter()
                .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7F) as usize);
            let footer = if self.carry[5] & 0x10 != 0 { 10 } else { 0 };
            self.tag_remaining = 10 + size + footer;
            log::debug!("Skipping {} byte ID3v2 tag", self.tag_remaining);
        }
        if self.tag_remaining > 0 {
            let n = self.tag_remaining.min(self.carry.len());
            self.carry.drain(..n);
            self.tag_remaining -= n;
        }
    }

    /// Offset of the next acceptable frame header in the carry buffer.
    fn find_frame(&self) -> Option<(usize, FrameHeader)> {
        (0..self.carry.len().saturating_sub(HEADER_LEN - 1)).find_map(|i| {
            let header = FrameHeader::parse(&self.carry[i..])?;
            match &self.header {
                Some(cached) if !cached.same_stream(&header) => None,
                _ => Some((i, header)),
            }
        })
    }

    /// Split every complete frame off the carry buffer.
    fn take_frames(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        loop {
            let Some((offset, header)) = self.find_frame() else {
                // Keep what could still be the start of a header
                let keep = (HEADER_LEN - 1).min(self.carry.len());
                let dropped = self.carry.len() - keep;
                if dropped > 0 {
                    log::debug!("Discarding {} bytes without a frame sync", dropped);
                    self.carry.drain(..dropped);
                }
                break;
            };
            if offset > 0 {
                log::debug!("Resynced MP3 stream after {} bytes", offset);
                self.carry.drain(..offset);
            }
            if self.header.is_none() {
                log::debug!(
                    "Cached MP3 frame header {:08x} ({}Hz, {} bytes)",
                    header.word,
                    header.sample_rate,
                    header.frame_len
                );
                self.header = Some(header);
            }
            if self.carry.len() < header.frame_len {
                break;
            }
            frames.push(self.carry.drain(..header.frame_len).collect());
        }
        frames
    }

    fn codec(&mut self) -> Result<&mut Box<dyn Decoder>, DecodeError> {
        if self.codec.is_none() {
            let mut params = CodecParameters::new();
            params.for_codec(CODEC_TYPE_MP3);
            let codec = symphonia::default::get_codecs()
                .make(&params, &DecoderOptions::default())
                .map_err(|e| DecodeError::Unsupported(format!("Failed to create decoder: {}", e)))?;
            self.codec = Some(codec);
        }
        self.codec
            .as_mut()
            .ok_or_else(|| DecodeError::Unsupported("MP3 decoder unavailable".to_string()))
    }

    fn resample(&mut self, mono: Vec<f32>, source_rate: u32) -> Result<Vec<f32>, DecodeError> {
        if source_rate == self.output_sample_rate {
            return Ok(mono);
        }
        let stale = self
            .resampler
            .as_ref()
            .is_none_or(|r| r.input_rate() != source_rate);
        if stale {
            self.resampler = Some(StreamResampler::new(source_rate, self.output_sample_rate)?);
        }
        match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&mono),
            None => Ok(mono),
        }
    }
}

/// True when `data` begins with an 11-bit MPEG frame sync.
pub fn has_frame_sync(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] & 0xE0 == 0xE0
}

/// Average interleaved channels down to mono, appending to `out`.
fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

impl StreamDecoder for Mp3Decoder {
    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<f32>, DecodeError> {
        if chunk.is_empty() {
            return Err(DecodeError::Malformed("empty chunk".to_string()));
        }
        if let Some(header) = self.header.filter(|_| self.carry.is_empty()) {
            if chunk.len() >= HEADER_LEN && !has_frame_sync(chunk) {
                self.carry.extend_from_slice(&header.word.to_be_bytes());
            }
        }
        self.carry.extend_from_slice(chunk);
        self.skip_tag();
        if self.carry.starts_with(b"ID3") && self.tag_remaining == 0 {
            // Tag header not complete yet
            return Ok(Vec::new());
        }

        let frames = self.take_frames();
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let mut mono = Vec::new();
        let mut source_rate = None;
        let mut ts = self.frames_decoded;
        {
            let codec = self.codec()?;
            for frame in &frames {
                let packet = Packet::new_from_slice(0, ts, 0, frame);
                ts += 1;
                match codec.decode(&packet) {
                    Ok(decoded) => {
                        let spec = *decoded.spec();
                        source_rate.get_or_insert(spec.rate);
                        let mut interleaved =
                            InterleavedBuffer::<f32>::new(decoded.capacity() as u64, spec);
                        interleaved.copy_interleaved_ref(decoded);
                        downmix_into(interleaved.samples(), spec.channels.count(), &mut mono);
                    }
                    Err(SymphoniaError::DecodeError(e)) => {
                        log::debug!("Skipping corrupt MP3 frame: {}", e);
                    }
                    Err(e) => return Err(DecodeError::Codec(e.to_string())),
                }
            }
        }
        self.frames_decoded = ts;

        match source_rate {
            Some(rate) => self.resample(mono, rate),
            None => Ok(Vec::new()),
        }
    }
}
