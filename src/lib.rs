//! sound_stream_rs - chunked audio streaming engine
//!
//! Byte chunks are decoded into a growing sample buffer and played gaplessly
//! through an output sink with seek, speed change and position tracking,
//! while a capture path turns input device periods into outbound chunks.
//! All control goes through one serialized command queue; see [`controller`].

pub mod audio;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod player;
pub mod protocol;
pub mod recorder;

pub use config::{Config, EngineConfig};
pub use controller::{EngineController, EngineHandle, spawn};
pub use error::{EngineError, Result};
pub use protocol::{EngineEvent, PlayerParams, RecorderParams, Request, Response, Status};
