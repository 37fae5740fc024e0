//! ALSA output sink.
//!
//! The PCM lives on a dedicated `audio-play` thread (std::thread, not a tokio
//! task) that renders one period at a time from its own [`SegmentRenderer`].
//! Control calls are forwarded to it as messages; the render clock comes back
//! through a shared cell tagged with a stop epoch so a `stop()` takes effect
//! for readers immediately.
//!
//! Both the clock and segment completions follow what the device has played,
//! not what has been written into its ring buffer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use alsa::pcm::{IO, PCM, State};
use anyhow::{Context, Result, anyhow};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::alsa_device::{self, AlsaParams, PcmRequest};
use super::pcm_decoder::f32_to_i16;
use super::render::SegmentRenderer;
use super::sample_buffer::Segment;
use super::sink::{CompletionToken, DeviceEvent, DeviceNotifier, OutputSink};

/// Playback device settings.
#[derive(Debug, Clone)]
pub struct AlsaSinkConfig {
    pub device: String,
    /// Must equal the engine output rate
    pub sample_rate: u32,
    pub channels: u32,
    /// 0 lets ALSA pick
    pub period_size: usize,
    pub grain_ms: u32,
}

enum SinkMessage {
    Schedule(CompletionToken, Segment),
    Play,
    Pause,
    Stop(u64),
    Rate(f64),
    Pitch(f64),
    Shutdown,
}

#[derive(Debug, Default)]
struct RenderClock {
    epoch: u64,
    frame: i64,
}

fn lock(clock: &Mutex<RenderClock>) -> MutexGuard<'_, RenderClock> {
    clock.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AlsaSink {
    config: AlsaSinkConfig,
    tx: Option<mpsc::UnboundedSender<SinkMessage>>,
    handle: Option<JoinHandle<()>>,
    clock: Arc<Mutex<RenderClock>>,
    next_token: u64,
    playing: bool,
}

impl AlsaSink {
    pub fn new(config: AlsaSinkConfig) -> Self {
        Self {
            config,
            tx: None,
            handle: None,
            clock: Arc::new(Mutex::new(RenderClock::default())),
            next_token: 1,
            playing: false,
        }
    }

    fn send(&self, msg: SinkMessage) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or_else(|| anyhow!("Playback device is not attached"))?
            .send(msg)
            .map_err(|_| anyhow!("Playback thread has exited"))
    }
}

impl OutputSink for AlsaSink {
    fn attach(&mut self, notifier: DeviceNotifier) -> Result<()> {
        if self.tx.is_some() {
            return Ok(());
        }
        // Open here so a busy or missing device fails the caller, not the thread
        let (pcm, params) = alsa_device::open_playback(&PcmRequest {
            device: &self.config.device,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            period_size: self.config.period_size,
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let clock = self.clock.clone();
        let grain_ms = self.config.grain_ms;
        let handle = thread::Builder::new()
            .name("audio-play".into())
            .spawn(move || {
                if let Err(e) = play_thread(pcm, params, grain_ms, rx, clock, notifier) {
                    log::error!("Playback thread error: {}", e);
                }
            })
            .context("Failed to spawn playback thread")?;

        self.tx = Some(tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn schedule_segment(&mut self, segment: Segment) -> Result<CompletionToken> {
        let token = CompletionToken(self.next_token);
        self.send(SinkMessage::Schedule(token, segment))?;
        self.next_token += 1;
        Ok(token)
    }

    fn play(&mut self) -> Result<()> {
        self.send(SinkMessage::Play)?;
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.send(SinkMessage::Pause)?;
        self.playing = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let epoch = {
            let mut clock = lock(&self.clock);
            clock.epoch += 1;
            clock.frame = 0;
            clock.epoch
        };
        self.send(SinkMessage::Stop(epoch))?;
        self.playing = false;
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        self.send(SinkMessage::Rate(rate))
    }

    fn set_pitch(&mut self, cents: f64) -> Result<()> {
        self.send(SinkMessage::Pitch(cents))
    }

    fn current_render_frame(&self) -> i64 {
        lock(&self.clock).frame
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn detach(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(SinkMessage::Shutdown);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.playing = false;
    }
}

impl Drop for AlsaSink {
    fn drop(&mut self) {
        self.detach();
    }
}

// ======================== Playout tracking ========================

/// Maps frames played by the device back to renderer positions.
#[derive(Debug)]
struct PlayoutTracker {
    /// Frames written since the last reset
    written: u64,
    /// (written frame count, renderer position) after each period
    marks: VecDeque<(u64, u64)>,
    /// Completions waiting for the device to play past their mark
    unheard: VecDeque<(CompletionToken, u64)>,
}

impl PlayoutTracker {
    fn new() -> Self {
        Self {
            written: 0,
            marks: VecDeque::from([(0, 0)]),
            unheard: VecDeque::new(),
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    /// Record one written period and the tokens it finished.
    fn wrote(&mut self, frames: usize, position: u64, drained: &mut Vec<CompletionToken>) {
        self.written += frames as u64;
        self.marks.push_back((self.written, position));
        for token in drained.drain(..) {
            self.unheard.push_back((token, self.written));
        }
    }

    fn is_waiting(&self) -> bool {
        !self.unheard.is_empty()
    }

    /// Frames the device has played given its current `delay`.
    fn played(&self, delay: u64) -> u64 {
        self.written.saturating_sub(delay)
    }

    /// Renderer position heard at `played`, interpolated within a period.
    fn position_at(&mut self, played: u64) -> f64 {
        while self.marks.len() > 1 && self.marks[1].0 <= played {
            self.marks.pop_front();
        }
        let (w0, s0) = self.marks[0];
        match self.marks.get(1) {
            Some(&(w1, s1)) if played > w0 && w1 > w0 => {
                let t = (played - w0) as f64 / (w1 - w0) as f64;
                s0 as f64 + (s1 as f64 - s0 as f64) * t
            }
            _ => s0 as f64,
        }
    }

    /// Move every completion the device has played past onto `heard`.
    fn take_heard(&mut self, played: u64, heard: &mut Vec<CompletionToken>) {
        while let Some(&(token, mark)) = self.unheard.front() {
            if mark > played {
                break;
            }
            heard.push(token);
            self.unheard.pop_front();
        }
    }
}

// ======================== Playback thread ========================

fn play_thread(
    pcm: PCM,
    params: AlsaParams,
    grain_ms: u32,
    mut rx: mpsc::UnboundedReceiver<SinkMessage>,
    clock: Arc<Mutex<RenderClock>>,
    notifier: DeviceNotifier,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let channels = params.channels.max(1) as usize;
    let period = params.period_size.max(1);

    let mut renderer = SegmentRenderer::new(params.sample_rate, grain_ms);
    let mut tracker = PlayoutTracker::new();
    let mut mono = vec![0f32; period];
    let mut interleaved = vec![0i16; period * channels];
    let mut drained = Vec::new();
    let mut heard = Vec::new();
    let mut active = false;
    let mut epoch = lock(&clock).epoch;

    log::info!(
        "Playback thread started: rate={}, ch={}, period={}, grain={} frames",
        params.sample_rate,
        channels,
        period,
        renderer.grain_len(),
    );

    loop {
        // Keep feeding the device while audio is queued or not yet heard
        let busy = active && (renderer.has_pending() || tracker.is_waiting());
        let msg = if busy {
            match rx.try_recv() {
                Ok(msg) => Some(msg),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match rx.blocking_recv() {
                Some(msg) => Some(msg),
                None => break,
            }
        };

        if let Some(msg) = msg {
            match msg {
                SinkMessage::Schedule(token, segment) => {
                    renderer.schedule(token, segment.samples());
                }
                SinkMessage::Play => {
                    if !active {
                        if pcm.state() == State::Paused {
                            if let Err(e) = pcm.pause(false) {
                                log::warn!("Failed to resume PCM: {}, re-preparing", e);
                                let _ = pcm.prepare();
                            }
                        }
                        active = true;
                    }
                }
                SinkMessage::Pause => {
                    if active {
                        active = false;
                        // 不支持硬件暂停时丢弃设备缓冲，渲染队列保留
                        if let Err(e) = pcm.pause(true) {
                            log::debug!("Hardware pause unavailable ({}), dropping device buffer", e);
                            let _ = pcm.drop();
                            let _ = pcm.prepare();
                        }
                    }
                }
                SinkMessage::Stop(stop_epoch) => {
                    active = false;
                    epoch = stop_epoch;
                    renderer.reset();
                    tracker.reset();
                    let _ = pcm.drop();
                    if let Err(e) = pcm.prepare() {
                        log::error!("Failed to prepare PCM after stop: {}", e);
                    }
                }
                SinkMessage::Rate(rate) => renderer.set_rate(rate),
                SinkMessage::Pitch(cents) => renderer.set_pitch(cents),
                SinkMessage::Shutdown => break,
            }
            continue;
        }

        // Silence once the queue is dry, until the device has played it out
        renderer.render(&mut mono, &mut drained);
        for (frame, sample) in interleaved.chunks_exact_mut(channels).zip(&mono) {
            frame.fill(f32_to_i16(*sample));
        }
        write_period(&pcm, &io, &interleaved, channels);
        tracker.wrote(period, renderer.position(), &mut drained);

        // An underrun reports an error here; everything written has been played then
        let delay = pcm.delay().unwrap_or(0).max(0) as u64;
        let played = tracker.played(delay);
        let position = tracker.position_at(played);
        {
            let mut shared = lock(&clock);
            if shared.epoch == epoch {
                shared.frame = position as i64;
            }
        }

        tracker.take_heard(played, &mut heard);
        for token in heard.drain(..) {
            notifier(DeviceEvent::SegmentDrained(token));
        }
    }

    let _ = pcm.drop();
    log::info!("Playback thread stopped");
    Ok(())
}

/// Write one interleaved period, recovering from XRUNs without losing frames.
fn write_period(pcm: &PCM, io: &IO<'_, i16>, data: &[i16], channels: usize) {
    let total_frames = data.len() / channels;
    let mut frames_written = 0;
    let mut retry_count = 0u32;

    while frames_written < total_frames {
        let offset = frames_written * channels;
        match io.writei(&data[offset..]) {
            Ok(n) => {
                frames_written += n;
                retry_count = 0;
            }
            Err(e) => {
                log::warn!("ALSA XRUN or error: {}, recovering...", e);
                retry_count += 1;

                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM playback: {}", e2);
                    break;
                }

                // 熔断器：设备持续跟不上时丢弃剩余帧
                if retry_count >= 3 {
                    log::error!(
                        "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                        retry_count,
                        total_frames - frames_written
                    );
                    break;
                }
            }
        }
    }
}
