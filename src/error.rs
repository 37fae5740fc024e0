//! Error types for the sound stream engine.
//!
//! `EngineError` is the taxonomy reported to callers of the command surface.
//! Device adapters work in `anyhow::Result` and are mapped into one of these
//! variants by the controller that issued the device call.

use thiserror::Error;

/// Errors surfaced by engine commands.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Capture device could not be opened, started or stopped
    #[error("Failed to record: {0}")]
    FailedToRecord(String),

    /// Output device refused to start or resume
    #[error("Failed to play: {0}")]
    FailedToPlay(String),

    /// Output device refused to stop
    #[error("Failed to stop: {0}")]
    FailedToStop(String),

    /// Missing or invalid chunk/seek/rate arguments, or no player to write to
    #[error("Failed to write buffer: {0}")]
    FailedToWriteBuffer(String),

    /// Malformed request or unknown method
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl EngineError {
    /// Wire name of the error class.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::FailedToRecord(_) => "FailedToRecord",
            EngineError::FailedToPlay(_) => "FailedToPlay",
            EngineError::FailedToStop(_) => "FailedToStop",
            EngineError::FailedToWriteBuffer(_) => "FailedToWriteBuffer",
            EngineError::Unknown(_) => "Unknown",
        }
    }

    /// Human readable detail without the class prefix.
    pub fn message(&self) -> &str {
        match self {
            EngineError::FailedToRecord(m)
            | EngineError::FailedToPlay(m)
            | EngineError::FailedToStop(m)
            | EngineError::FailedToWriteBuffer(m)
            | EngineError::Unknown(m) => m,
        }
    }
}

/// Convenience Result type for engine commands
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_variant_name() {
        assert_eq!(EngineError::FailedToRecord("x".into()).code(), "FailedToRecord");
        assert_eq!(EngineError::FailedToWriteBuffer("x".into()).code(), "FailedToWriteBuffer");
        assert_eq!(EngineError::Unknown("x".into()).code(), "Unknown");
    }

    #[test]
    fn display_includes_message() {
        let err = EngineError::FailedToPlay("device busy".into());
        assert_eq!(err.to_string(), "Failed to play: device busy");
        assert_eq!(err.message(), "device busy");
    }
}
