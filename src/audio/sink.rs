//! Output sink abstraction over the platform audio output device.
//!
//! Sinks run their real-time work on their own thread and never touch engine
//! state. Anything they need to report is posted through the
//! [`DeviceNotifier`] handed to them at attach time.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use super::sample_buffer::Segment;

/// Identifies one scheduled segment. Tokens increase monotonically per sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompletionToken(pub u64);

impl fmt::Display for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Notifications raised by device threads.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The sink finished playing the segment with this token
    SegmentDrained(CompletionToken),
    /// The capture device filled one period
    CapturePeriod(Vec<i16>),
}

/// Thread-safe hook a device uses to hand events to the command queue.
pub type DeviceNotifier = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

pub trait OutputSink: Send {
    /// Acquire the device. Called once before any other method.
    fn attach(&mut self, notifier: DeviceNotifier) -> Result<()>;

    /// Queue `segment` to play right after everything already queued.
    fn schedule_segment(&mut self, segment: Segment) -> Result<CompletionToken>;

    fn play(&mut self) -> Result<()>;

    /// Halt output, keeping the queue and the render clock.
    fn pause(&mut self) -> Result<()>;

    /// Halt output, discard every queued segment and rewind the render clock to 0.
    /// Discarded segments never report completion.
    fn stop(&mut self) -> Result<()>;

    /// Playback rate multiplier (1.0 = normal speed).
    fn set_rate(&mut self, rate: f64) -> Result<()>;

    /// Pitch shift in cents applied on top of the rate change.
    fn set_pitch(&mut self, cents: f64) -> Result<()>;

    /// Source frames rendered since the last `stop`.
    fn current_render_frame(&self) -> i64;

    fn is_playing(&self) -> bool;

    /// Release the device.
    fn detach(&mut self) {}
}
