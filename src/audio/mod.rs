//! audio - Decoding, sample storage and device adapters
//!
//! Chunks are decoded to mono f32 at the engine output rate, kept in a growing
//! [`SampleBuffer`] and handed to an [`OutputSink`] as [`Segment`]s. Capture
//! goes through an [`InputSource`]. ALSA adapters run their real-time loops on
//! dedicated std threads; the virtual devices are clocked by their owner.

pub mod alsa_device;
pub mod mp3_decoder;
pub mod pcm_decoder;
pub mod play;
pub mod record;
pub mod render;
pub mod resampler;
pub mod sample_buffer;
pub mod sink;
pub mod source;
pub mod stream_decoder;
pub mod virtual_device;

pub use play::{AlsaSink, AlsaSinkConfig};
pub use record::AlsaSource;
pub use sample_buffer::{SampleBuffer, Segment, SegmentError};
pub use sink::{CompletionToken, DeviceEvent, DeviceNotifier, OutputSink};
pub use source::{CaptureParams, InputSource};
pub use stream_decoder::{DecodeError, StreamDecoder, StreamFormat, create_decoder};
pub use virtual_device::{VirtualSink, VirtualSinkHandle, VirtualSource, VirtualSourceHandle};
