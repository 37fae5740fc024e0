//! ALSA capture source.
//!
//! `open` negotiates a mono S16LE stream; `start` hands the PCM to an
//! `audio-record` thread that reads one period at a time and posts each filled
//! period through the notifier. The thread only calls `readi` once the device
//! reports a period ready and never waits longer than [`POLL_TIMEOUT_MS`], so
//! `stop` joins it within one poll interval even if the device goes quiet.
//! `stop` takes the PCM back so the session can be restarted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::{Context, Result, anyhow};

use super::alsa_device::{self, PcmRequest};
use super::sink::{DeviceEvent, DeviceNotifier};
use super::source::{CaptureParams, InputSource};

/// Longest the recording thread waits on the device before rechecking `running`.
pub const POLL_TIMEOUT_MS: u32 = 20;

pub struct AlsaSource {
    device: String,
    pcm: Option<PCM>,
    params: Option<CaptureParams>,
    notifier: Option<DeviceNotifier>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<PCM>>,
}

impl AlsaSource {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            pcm: None,
            params: None,
            notifier: None,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(pcm) => self.pcm = Some(pcm),
                Err(_) => log::error!("Recording thread panicked"),
            }
        }
    }
}

impl InputSource for AlsaSource {
    fn open(
        &mut self,
        sample_rate: u32,
        period_frames: usize,
        notifier: DeviceNotifier,
    ) -> Result<CaptureParams> {
        self.close();
        let (pcm, alsa_params) = alsa_device::open_capture(&PcmRequest {
            device: &self.device,
            sample_rate,
            channels: 1,
            period_size: period_frames,
        })?;

        let params = CaptureParams {
            sample_rate: alsa_params.sample_rate,
            period_frames: alsa_params.period_size.max(1),
        };
        if params.sample_rate != sample_rate {
            log::warn!(
                "Capture device runs at {} Hz instead of the requested {} Hz",
                params.sample_rate,
                sample_rate
            );
        }

        self.pcm = Some(pcm);
        self.params = Some(params);
        self.notifier = Some(notifier);
        Ok(params)
    }

    fn start(&mut self) -> Result<()> {
        if self.is_recording() {
            return Ok(());
        }
        // Reclaim the PCM from a thread that gave up on the device
        self.join();
        let params = self.params.ok_or_else(|| anyhow!("Capture device is not open"))?;
        let notifier = self
            .notifier
            .clone()
            .ok_or_else(|| anyhow!("Capture device is not open"))?;
        let pcm = self.pcm.take().ok_or_else(|| anyhow!("Capture device is not open"))?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("audio-record".into())
            .spawn(move || record_thread(pcm, params, notifier, &running));
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                // The PCM moved into the failed closure; reopen on next initialize
                self.params = None;
                Err(e).context("Failed to spawn recording thread")
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.join();
        if let Some(pcm) = &self.pcm {
            pcm.drop().context("Failed to stop capture PCM")?;
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join();
        self.pcm = None;
        self.params = None;
        self.notifier = None;
    }
}

impl Drop for AlsaSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ======================== Recording thread ========================

fn record_thread(
    pcm: PCM,
    params: CaptureParams,
    notifier: DeviceNotifier,
    running: &AtomicBool,
) -> PCM {
    let _running = RunningGuard(running);
    if let Err(e) = pcm.prepare().and_then(|_| pcm.start()) {
        log::warn!("Failed to start capture PCM: {}", e);
    }
    if let Err(e) = read_periods(&pcm, params, &notifier, running) {
        log::error!("Recording thread error: {}", e);
    }
    log::info!("Recording stopped");
    pcm
}

fn read_periods(
    pcm: &PCM,
    params: CaptureParams,
    notifier: &DeviceNotifier,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let mut read_buf = vec![0i16; params.period_frames];

    log::info!(
        "Recording started: rate={}, period={}",
        params.sample_rate,
        params.period_frames
    );

    while running.load(Ordering::Relaxed) {
        match pcm.wait(Some(POLL_TIMEOUT_MS)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                log::warn!("ALSA capture wait failed: {}, recovering...", e);
                if let Err(e2) = pcm.prepare().and_then(|_| pcm.start()) {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
                continue;
            }
        }
        match io.readi(&mut read_buf) {
            // 部分设备会返回 0 帧，直接跳过
            Ok(0) => continue,
            Ok(frames) => notifier(DeviceEvent::CapturePeriod(read_buf[..frames].to_vec())),
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Clears the running flag however the recording thread exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_flag_clears_when_the_thread_exits() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        thread::spawn(move || {
            let _running = RunningGuard(&flag);
        })
        .join()
        .unwrap();
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn running_flag_clears_on_panic() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let result = thread::spawn(move || {
            let _running = RunningGuard(&flag);
            panic!("device gone");
        })
        .join();
        assert!(result.is_err());
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn unopened_source_is_not_recording() {
        let mut source = AlsaSource::new("default");
        assert!(!source.is_recording());
        assert!(source.start().is_err());
        assert!(source.stop().is_ok());
    }
}
