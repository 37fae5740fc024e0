//! Playback controller.
//!
//! Owns the session sample buffer and drives the output sink: every decoded
//! chunk is appended and scheduled right behind the previous one, seek and
//! restart reschedule a tail segment of the buffer, and track position is the
//! sink render clock rebased by `segment_base_frame`.
//!
//! Runs only on the engine task. Sink completions reach it as
//! [`on_segment_drained`](PlaybackController::on_segment_drained) calls.

use std::collections::VecDeque;
use std::sync::Arc;

use log::Level;
use tokio::sync::mpsc;

use crate::audio::pcm_decoder::{f32_to_i16, i16_to_bytes};
use crate::audio::{
    CompletionToken, DeviceNotifier, OutputSink, SampleBuffer, Segment, StreamDecoder,
    StreamFormat, create_decoder,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::protocol::{EngineEvent, PlayerParams, Status};

/// Title/artist announced for the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
}

struct PlaybackSession {
    status: Status,
    format: StreamFormat,
    input_sample_rate: u32,
    decoder: Box<dyn StreamDecoder>,
    buffer: SampleBuffer,
    /// Buffer frame at which render frame 0 of the current schedule begins
    segment_base_frame: usize,
    /// Set by a sink stop: the next scheduled segment defines the new base
    rebase_on_schedule: bool,
    cached_position: f64,
    cached_duration: f64,
    rate: f64,
    pitch_cents: f64,
    track: TrackInfo,
    show_logs: bool,
    /// Tokens scheduled since the last sink stop, with the buffer length at scheduling
    scheduled: VecDeque<(CompletionToken, usize)>,
}

impl PlaybackSession {
    fn log_level(&self) -> Level {
        if self.show_logs { Level::Info } else { Level::Debug }
    }
}

pub struct PlaybackController {
    config: EngineConfig,
    sink: Box<dyn OutputSink>,
    notifier: DeviceNotifier,
    attached: bool,
    events: mpsc::UnboundedSender<EngineEvent>,
    session: Option<PlaybackSession>,
}

impl PlaybackController {
    pub fn new(
        config: EngineConfig,
        sink: Box<dyn OutputSink>,
        notifier: DeviceNotifier,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            config,
            sink,
            notifier,
            attached: false,
            events,
            session: None,
        }
    }

    pub fn status(&self) -> Status {
        self.session.as_ref().map_or(Status::Unset, |s| s.status)
    }

    pub fn track(&self) -> Option<&TrackInfo> {
        self.session.as_ref().map(|s| &s.track)
    }

    /// Frames accumulated in the session buffer.
    pub fn buffer_len(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.buffer.len())
    }

    pub fn initialize(&mut self, params: PlayerParams) -> Result<bool> {
        if !self.attached {
            self.sink
                .attach(self.notifier.clone())
                .map_err(|e| EngineError::FailedToPlay(format!("Failed to attach output: {:#}", e)))?;
            self.attached = true;
        }

        let decoder = create_decoder(
            params.format,
            params.sample_rate,
            self.config.output_sample_rate,
        )
        .map_err(|e| EngineError::FailedToWriteBuffer(e.to_string()))?;

        if self.session.take().is_some() {
            if let Err(e) = self.sink.stop() {
                log::warn!("Failed to stop previous playback session: {:#}", e);
            }
        }
        if let Err(e) = self.sink.set_rate(1.0).and_then(|_| self.sink.set_pitch(0.0)) {
            log::warn!("Failed to reset playback rate: {:#}", e);
        }

        let session = PlaybackSession {
            status: Status::Initialized,
            format: params.format,
            input_sample_rate: params.sample_rate,
            decoder,
            buffer: SampleBuffer::new(),
            segment_base_frame: 0,
            rebase_on_schedule: true,
            cached_position: 0.0,
            cached_duration: 0.0,
            rate: 1.0,
            pitch_cents: 0.0,
            track: TrackInfo {
                title: params.title,
                artist: params.artist,
            },
            show_logs: params.show_logs,
            scheduled: VecDeque::new(),
        };
        log::log!(
            session.log_level(),
            "Player initialized: format={:?}, input_rate={}, output_rate={}, title={:?}, artist={:?}",
            session.format,
            session.input_sample_rate,
            self.config.output_sample_rate,
            session.track.title,
            session.track.artist,
        );
        self.session = Some(session);
        self.emit(Status::Initialized);
        Ok(true)
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<bool> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EngineError::FailedToWriteBuffer("Player is not initialized".to_string()))?;

        let frames = match session.decoder.decode(chunk) {
            Ok(frames) => frames,
            Err(e) => {
                log::warn!("Dropping chunk of {} bytes: {}", chunk.len(), e);
                return Ok(true);
            }
        };
        if frames.is_empty() {
            return Ok(true);
        }

        let start = session.buffer.len();
        session.buffer.append(&frames);
        let segment = Segment::from_appended(start, Arc::from(frames));
        let token = self
            .sink
            .schedule_segment(segment)
            .map_err(|e| EngineError::FailedToWriteBuffer(format!("{:#}", e)))?;

        if session.rebase_on_schedule {
            session.segment_base_frame = start;
            session.rebase_on_schedule = false;
        }
        session.scheduled.push_back((token, session.buffer.len()));
        session.cached_duration =
            session.buffer.len() as f64 / self.config.output_sample_rate as f64;
        log::log!(
            session.log_level(),
            "Scheduled chunk {}: {} frames, buffer {} frames",
            token,
            session.buffer.len() - start,
            session.buffer.len(),
        );

        // Output kept running after the queue drained; new audio resumes it
        if session.status == Status::Stopped && self.sink.is_playing() {
            self.set_status(Status::Playing);
        }
        Ok(true)
    }

    pub fn start(&mut self) -> Result<bool> {
        let threshold = self.config.replay_threshold_frames();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EngineError::FailedToPlay("Player is not initialized".to_string()))?;
        if session.status == Status::Playing {
            return Ok(true);
        }

        if session.status == Status::Stopped && session.buffer.len() > threshold {
            log::log!(
                session.log_level(),
                "Replaying {} buffered frames from the start",
                session.buffer.len()
            );
            let segment = session
                .buffer
                .tail_from(0)
                .map_err(|e| EngineError::FailedToPlay(e.to_string()))?;
            self.sink
                .stop()
                .map_err(|e| EngineError::FailedToPlay(format!("{:#}", e)))?;
            session.scheduled.clear();
            let token = self
                .sink
                .schedule_segment(segment)
                .map_err(|e| EngineError::FailedToPlay(format!("{:#}", e)))?;
            session.segment_base_frame = 0;
            session.rebase_on_schedule = false;
            session.scheduled.push_back((token, session.buffer.len()));
        }

        self.sink
            .play()
            .map_err(|e| EngineError::FailedToPlay(format!("{:#}", e)))?;
        self.set_status(Status::Playing);
        Ok(true)
    }

    pub fn pause(&mut self) -> Result<bool> {
        match self.status() {
            Status::Unset => {
                return Err(EngineError::FailedToPlay("Player is not initialized".to_string()));
            }
            Status::Playing => {}
            // Only a playing stream can pause
            _ => return Ok(true),
        }
        // Freeze the position before the clock stops reflecting elapsed time
        self.current_time();
        self.sink
            .pause()
            .map_err(|e| EngineError::FailedToPlay(format!("{:#}", e)))?;
        self.set_status(Status::Paused);
        Ok(true)
    }

    pub fn stop(&mut self) -> Result<bool> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EngineError::FailedToStop("Player is not initialized".to_string()))?;
        self.sink
            .stop()
            .map_err(|e| EngineError::FailedToStop(format!("{:#}", e)))?;
        session.scheduled.clear();
        session.rebase_on_schedule = true;
        self.set_status(Status::Stopped);
        Ok(true)
    }

    pub fn seek(&mut self, time: f64) -> Result<bool> {
        if !time.is_finite() {
            return Err(EngineError::FailedToWriteBuffer(format!("Invalid seekTime: {}", time)));
        }
        let rate = self.config.output_sample_rate as f64;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EngineError::FailedToWriteBuffer("Player is not initialized".to_string()))?;

        let duration = session.buffer.len() as f64 / rate;
        let time = time.clamp(0.0, duration);
        let target = (time * rate).round() as usize;

        self.sink
            .stop()
            .map_err(|e| EngineError::FailedToStop(format!("{:#}", e)))?;
        session.scheduled.clear();
        session.segment_base_frame = target.min(session.buffer.len());
        session.cached_position = time;

        let segment = match session.buffer.tail_from(target) {
            Ok(segment) if !segment.is_empty() => segment,
            Ok(_) | Err(_) => {
                log::log!(session.log_level(), "Seek to {:.3}s leaves nothing to play", time);
                session.rebase_on_schedule = true;
                self.set_status(Status::Stopped);
                return Ok(true);
            }
        };

        let token = self
            .sink
            .schedule_segment(segment)
            .map_err(|e| EngineError::FailedToWriteBuffer(format!("{:#}", e)))?;
        session.rebase_on_schedule = false;
        session.scheduled.push_back((token, session.buffer.len()));
        log::log!(
            session.log_level(),
            "Seek to {:.3}s (frame {} of {})",
            time,
            target,
            session.buffer.len()
        );

        self.sink
            .play()
            .map_err(|e| EngineError::FailedToPlay(format!("{:#}", e)))?;
        self.set_status(Status::Playing);
        Ok(true)
    }

    pub fn change_speed(&mut self, rate: f64) -> Result<bool> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(EngineError::FailedToWriteBuffer(format!("Invalid playback speed: {}", rate)));
        }
        let pitch_correction = self.config.pitch_correction;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EngineError::FailedToWriteBuffer("Player is not initialized".to_string()))?;

        // 变速不变调：反向移调抵消速率带来的音高变化
        let cents = if pitch_correction { -1200.0 * rate.log2() } else { 0.0 };
        self.sink
            .set_rate(rate)
            .and_then(|_| self.sink.set_pitch(cents))
            .map_err(|e| EngineError::FailedToPlay(format!("{:#}", e)))?;
        session.rate = rate;
        session.pitch_cents = cents;
        log::log!(
            session.log_level(),
            "Playback speed {} (pitch {:.1} cents)",
            session.rate,
            session.pitch_cents
        );
        Ok(true)
    }

    /// Track position in seconds, 0.0 without a session.
    pub fn current_time(&mut self) -> f64 {
        let rate = self.config.output_sample_rate as f64;
        let render_frame = self.sink.current_render_frame().max(0) as f64;
        let Some(session) = self.session.as_mut() else {
            return 0.0;
        };
        if session.status == Status::Paused {
            return session.cached_position;
        }
        let duration = session.buffer.len() as f64 / rate;
        let position = ((render_frame + session.segment_base_frame as f64) / rate).clamp(0.0, duration);
        session.cached_position = position;
        position
    }

    /// Buffered audio in seconds, 0.0 without a session.
    pub fn duration(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.cached_duration)
    }

    /// Rate multiplier of the last accepted `change_speed`.
    pub fn playback_rate(&self) -> f64 {
        self.session.as_ref().map_or(1.0, |s| s.rate)
    }

    /// The whole session buffer as 16-bit little-endian mono bytes.
    pub fn player_buffer(&self) -> Vec<u8> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        let samples: Vec<i16> = session.buffer.samples().iter().map(|s| f32_to_i16(*s)).collect();
        i16_to_bytes(&samples)
    }

    /// Sink completion for `token`, delivered through the command queue.
    pub fn on_segment_drained(&mut self, token: CompletionToken) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(index) = session.scheduled.iter().position(|(t, _)| *t == token) else {
            log::debug!("Ignoring completion {} from a superseded schedule", token);
            return;
        };
        let mut last_len = 0;
        for _ in 0..=index {
            if let Some((_, len)) = session.scheduled.pop_front() {
                last_len = len;
            }
        }
        log::log!(session.log_level(), "Segment {} finished", token);

        if session.scheduled.is_empty()
            && session.buffer.len() == last_len
            && session.status == Status::Playing
        {
            self.set_status(Status::Stopped);
        }
    }

    /// Stop output and release the device.
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            if let Err(e) = self.sink.stop() {
                log::warn!("Failed to stop playback on close: {:#}", e);
            }
        }
        if self.attached {
            self.sink.detach();
            self.attached = false;
        }
    }

    /// Record a transition and report it; repeats are not reported.
    fn set_status(&mut self, status: Status) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.status == status {
            return;
        }
        log::log!(session.log_level(), "Player status {} -> {}", session.status, status);
        session.status = status;
        self.emit(status);
    }

    fn emit(&self, status: Status) {
        if self.events.send(EngineEvent::PlayerStatus(status)).is_err() {
            log::debug!("No listener for player status {}", status);
        }
    }
}
