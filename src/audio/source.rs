//! Input source abstraction over the platform capture device.

use anyhow::Result;

use super::sink::DeviceNotifier;

/// Parameters negotiated when a capture device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub sample_rate: u32,
    /// Frames per periodic notification
    pub period_frames: usize,
}

/// A mono 16-bit capture device that posts one
/// [`DeviceEvent::CapturePeriod`](super::sink::DeviceEvent::CapturePeriod)
/// per filled period while recording.
pub trait InputSource: Send {
    fn open(
        &mut self,
        sample_rate: u32,
        period_frames: usize,
        notifier: DeviceNotifier,
    ) -> Result<CaptureParams>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Recording state as reported by the device.
    fn is_recording(&self) -> bool;

    fn close(&mut self);
}
