//! Manually clocked output sink and input source.
//!
//! Nothing here touches hardware: the owner of a handle decides when a device
//! period elapses. Used for headless runs and for driving the engine in tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};

use super::render::SegmentRenderer;
use super::sample_buffer::Segment;
use super::sink::{CompletionToken, DeviceEvent, DeviceNotifier, OutputSink};
use super::source::{CaptureParams, InputSource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ======================== Virtual sink ========================

struct SinkState {
    renderer: SegmentRenderer,
    notifier: Option<DeviceNotifier>,
    playing: bool,
    next_token: u64,
    fail_play: bool,
}

pub struct VirtualSink {
    state: Arc<Mutex<SinkState>>,
}

/// Test/driver side of a [`VirtualSink`].
#[derive(Clone)]
pub struct VirtualSinkHandle {
    state: Arc<Mutex<SinkState>>,
}

impl VirtualSink {
    pub fn new(sample_rate: u32, grain_ms: u32) -> (Self, VirtualSinkHandle) {
        let state = Arc::new(Mutex::new(SinkState {
            renderer: SegmentRenderer::new(sample_rate, grain_ms),
            notifier: None,
            playing: false,
            next_token: 1,
            fail_play: false,
        }));
        (
            Self { state: state.clone() },
            VirtualSinkHandle { state },
        )
    }
}

impl OutputSink for VirtualSink {
    fn attach(&mut self, notifier: DeviceNotifier) -> Result<()> {
        lock(&self.state).notifier = Some(notifier);
        Ok(())
    }

    fn schedule_segment(&mut self, segment: Segment) -> Result<CompletionToken> {
        let mut state = lock(&self.state);
        let token = CompletionToken(state.next_token);
        state.next_token += 1;
        state.renderer.schedule(token, segment.samples());
        Ok(token)
    }

    fn play(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_play {
            bail!("virtual sink refused to start");
        }
        state.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        lock(&self.state).playing = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.playing = false;
        state.renderer.reset();
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        lock(&self.state).renderer.set_rate(rate);
        Ok(())
    }

    fn set_pitch(&mut self, cents: f64) -> Result<()> {
        lock(&self.state).renderer.set_pitch(cents);
        Ok(())
    }

    fn current_render_frame(&self) -> i64 {
        lock(&self.state).renderer.position() as i64
    }

    fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    fn detach(&mut self) {
        let mut state = lock(&self.state);
        state.playing = false;
        state.notifier = None;
    }
}

impl VirtualSinkHandle {
    /// Let one device period of `frames` output frames elapse. Returns the
    /// rendered output, or nothing while the sink is not playing.
    pub fn advance(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        let mut drained = Vec::new();
        let notifier = {
            let mut state = lock(&self.state);
            if !state.playing {
                return Vec::new();
            }
            state.renderer.render(&mut out, &mut drained);
            state.notifier.clone()
        };
        if let Some(notify) = notifier {
            for token in drained {
                notify(DeviceEvent::SegmentDrained(token));
            }
        }
        out
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.state).renderer.has_pending()
    }

    pub fn rate(&self) -> f64 {
        lock(&self.state).renderer.rate()
    }

    /// Make subsequent `play` calls fail like a busy device.
    pub fn set_fail_play(&self, fail: bool) {
        lock(&self.state).fail_play = fail;
    }
}

// ======================== Virtual source ========================

struct SourceState {
    notifier: Option<DeviceNotifier>,
    params: Option<CaptureParams>,
    recording: bool,
    fail_start: bool,
}

pub struct VirtualSource {
    state: Arc<Mutex<SourceState>>,
}

/// Test/driver side of a [`VirtualSource`].
#[derive(Clone)]
pub struct VirtualSourceHandle {
    state: Arc<Mutex<SourceState>>,
}

impl VirtualSource {
    pub fn new() -> (Self, VirtualSourceHandle) {
        let state = Arc::new(Mutex::new(SourceState {
            notifier: None,
            params: None,
            recording: false,
            fail_start: false,
        }));
        (
            Self { state: state.clone() },
            VirtualSourceHandle { state },
        )
    }
}

impl InputSource for VirtualSource {
    fn open(
        &mut self,
        sample_rate: u32,
        period_frames: usize,
        notifier: DeviceNotifier,
    ) -> Result<CaptureParams> {
        let params = CaptureParams { sample_rate, period_frames };
        let mut state = lock(&self.state);
        state.notifier = Some(notifier);
        state.params = Some(params);
        state.recording = false;
        Ok(params)
    }

    fn start(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.params.is_none() {
            bail!("virtual source is not open");
        }
        if state.fail_start {
            bail!("virtual source refused to start");
        }
        state.recording = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        lock(&self.state).recording = false;
        Ok(())
    }

    fn is_recording(&self) -> bool {
        lock(&self.state).recording
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.recording = false;
        state.params = None;
        state.notifier = None;
    }
}

impl VirtualSourceHandle {
    /// Raise one period notification carrying `frames`, as the device
    /// interrupt would. Returns false when the source is not recording.
    pub fn push_period(&self, frames: Vec<i16>) -> bool {
        let notifier = {
            let state = lock(&self.state);
            if !state.recording {
                return false;
            }
            state.notifier.clone()
        };
        match notifier {
            Some(notify) => {
                notify(DeviceEvent::CapturePeriod(frames));
                true
            }
            None => false,
        }
    }

    pub fn params(&self) -> Option<CaptureParams> {
        lock(&self.state).params
    }

    pub fn set_fail_start(&self, fail: bool) {
        lock(&self.state).fail_start = fail;
    }
}
