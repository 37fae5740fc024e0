//! Capture controller.
//!
//! Opens the input source, starts and stops it, and turns each period the
//! device reports into an outbound `dataPeriod` event of little-endian i16 bytes.

use bytes::Bytes;
use log::Level;
use tokio::sync::mpsc;

use crate::audio::pcm_decoder::i16_to_bytes;
use crate::audio::{DeviceNotifier, InputSource};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::protocol::{EngineEvent, RecorderParams, Status};

struct CaptureSession {
    sample_rate: u32,
    period_frames: usize,
    /// Reused for every period
    scratch: Vec<i16>,
    show_logs: bool,
}

impl CaptureSession {
    fn log_level(&self) -> Level {
        if self.show_logs { Level::Info } else { Level::Debug }
    }
}

pub struct CaptureController {
    config: EngineConfig,
    source: Box<dyn InputSource>,
    notifier: DeviceNotifier,
    events: mpsc::UnboundedSender<EngineEvent>,
    session: Option<CaptureSession>,
}

impl CaptureController {
    pub fn new(
        config: EngineConfig,
        source: Box<dyn InputSource>,
        notifier: DeviceNotifier,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            config,
            source,
            notifier,
            events,
            session: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some() && self.source.is_recording()
    }

    /// Negotiated `(sample_rate, period_frames)` of the open session.
    pub fn capture_format(&self) -> Option<(u32, usize)> {
        self.session.as_ref().map(|s| (s.sample_rate, s.period_frames))
    }

    /// Open the input device. Returns whether metering is available, which
    /// it always is once the device opened.
    pub fn initialize(&mut self, params: RecorderParams) -> Result<bool> {
        if self.session.take().is_some() {
            self.source.close();
        }

        let period = self.config.capture_period_for(params.sample_rate);
        let negotiated = self
            .source
            .open(params.sample_rate, period, self.notifier.clone())
            .map_err(|e| EngineError::FailedToRecord(format!("Failed to open input: {:#}", e)))?;

        let session = CaptureSession {
            sample_rate: negotiated.sample_rate,
            period_frames: negotiated.period_frames.max(1),
            scratch: vec![0; negotiated.period_frames.max(1)],
            show_logs: params.show_logs,
        };
        log::log!(
            session.log_level(),
            "Recorder initialized: rate={}, period={} frames",
            session.sample_rate,
            session.period_frames
        );
        self.session = Some(session);
        self.emit(EngineEvent::RecorderStatus(Status::Initialized));
        Ok(true)
    }

    pub fn start(&mut self) -> Result<bool> {
        if self.session.is_none() {
            return Err(EngineError::FailedToRecord("Recorder is not initialized".to_string()));
        }
        if self.source.is_recording() {
            return Ok(true);
        }
        self.source
            .start()
            .map_err(|e| EngineError::FailedToRecord(format!("{:#}", e)))?;
        self.emit(EngineEvent::RecorderStatus(Status::Playing));
        Ok(true)
    }

    pub fn stop(&mut self) -> Result<bool> {
        if self.session.is_none() {
            return Err(EngineError::FailedToRecord("Recorder is not initialized".to_string()));
        }
        if !self.source.is_recording() {
            return Ok(true);
        }
        self.source
            .stop()
            .map_err(|e| EngineError::FailedToRecord(format!("{:#}", e)))?;
        self.emit(EngineEvent::RecorderStatus(Status::Stopped));
        Ok(true)
    }

    /// One filled device period, delivered through the command queue.
    pub fn on_capture_period(&mut self, frames: &[i16]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !self.source.is_recording() {
            return;
        }
        let count = frames.len().min(session.period_frames);
        if count < 1 {
            return;
        }
        session.scratch[..count].copy_from_slice(&frames[..count]);
        let bytes = i16_to_bytes(&session.scratch[..count]);
        log::trace!("Captured {} frames", count);
        self.emit(EngineEvent::DataPeriod(Bytes::from(bytes)));
    }

    /// Stop capturing and release the device.
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            if self.source.is_recording() {
                if let Err(e) = self.source.stop() {
                    log::warn!("Failed to stop recording on close: {:#}", e);
                }
            }
            self.source.close();
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            log::debug!("No listener for recorder events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{DeviceEvent, VirtualSource, VirtualSourceHandle};
    use std::sync::{Arc, Mutex};

    struct Fixture {
        recorder: CaptureController,
        source: VirtualSourceHandle,
        events: mpsc::UnboundedReceiver<EngineEvent>,
        periods: Arc<Mutex<Vec<Vec<i16>>>>,
    }

    impl Fixture {
        fn new(config: EngineConfig) -> Self {
            let (source, handle) = VirtualSource::new();
            let (tx, events) = mpsc::unbounded_channel();
            let periods = Arc::new(Mutex::new(Vec::new()));
            let collected = periods.clone();
            let notifier: DeviceNotifier = Arc::new(move |event| {
                if let DeviceEvent::CapturePeriod(frames) = event {
                    collected.lock().unwrap().push(frames);
                }
            });
            Self {
                recorder: CaptureController::new(config, Box::new(source), notifier, tx),
                source: handle,
                events,
                periods,
            }
        }

        fn pump(&mut self) {
            let periods: Vec<_> = self.periods.lock().unwrap().drain(..).collect();
            for frames in periods {
                self.recorder.on_capture_period(&frames);
            }
        }

        fn drain_events(&mut self) -> Vec<EngineEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    #[test]
    fn commands_need_a_session() {
        let mut fx = Fixture::new(EngineConfig::default());
        assert_eq!(fx.recorder.start().unwrap_err().code(), "FailedToRecord");
        assert_eq!(fx.recorder.stop().unwrap_err().code(), "FailedToRecord");
    }

    #[test]
    fn period_defaults_to_a_tenth_of_a_second() {
        let mut fx = Fixture::new(EngineConfig::default());
        assert!(fx.recorder.initialize(RecorderParams { sample_rate: 16000, show_logs: false }).unwrap());
        assert_eq!(fx.recorder.capture_format(), Some((16000, 1600)));
        assert_eq!(fx.source.params().map(|p| p.period_frames), Some(1600));
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.recorder.initialize(RecorderParams::default()).unwrap();
        fx.recorder.start().unwrap();
        fx.recorder.start().unwrap();
        fx.recorder.stop().unwrap();
        fx.recorder.stop().unwrap();
        assert_eq!(
            fx.drain_events(),
            vec![
                EngineEvent::RecorderStatus(Status::Initialized),
                EngineEvent::RecorderStatus(Status::Playing),
                EngineEvent::RecorderStatus(Status::Stopped),
            ]
        );
    }

    #[test]
    fn periods_become_le_bytes() {
        let config = EngineConfig {
            capture_period_frames: 4,
            ..EngineConfig::default()
        };
        let mut fx = Fixture::new(config);
        fx.recorder.initialize(RecorderParams::default()).unwrap();
        fx.recorder.start().unwrap();
        fx.drain_events();

        fx.source.push_period(vec![1, -1, 256]);
        fx.source.push_period(vec![]);
        fx.source.push_period(vec![1, 2, 3, 4, 5, 6]);
        fx.pump();

        assert_eq!(
            fx.drain_events(),
            vec![
                EngineEvent::DataPeriod(Bytes::from_static(&[1, 0, 0xFF, 0xFF, 0, 1])),
                EngineEvent::DataPeriod(Bytes::from_static(&[1, 0, 2, 0, 3, 0, 4, 0])),
            ]
        );
    }

    #[test]
    fn periods_after_stop_are_dropped() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.recorder.initialize(RecorderParams::default()).unwrap();
        fx.recorder.start().unwrap();
        fx.source.push_period(vec![7; 10]);
        fx.recorder.stop().unwrap();
        fx.drain_events();

        fx.pump();
        assert!(fx.drain_events().is_empty());
    }

    #[test]
    fn device_refusal_is_reported() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.recorder.initialize(RecorderParams::default()).unwrap();
        fx.source.set_fail_start(true);
        assert_eq!(fx.recorder.start().unwrap_err().code(), "FailedToRecord");
        assert!(!fx.recorder.is_recording());
    }
}
