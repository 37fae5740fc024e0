//! Command and event surface of the engine, plus its JSON encoding.
//!
//! A [`MethodCall`] names a command and carries its arguments as a JSON map.
//! [`Request::from_call`] validates those arguments up front, so nothing
//! malformed ever reaches a controller.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::audio::StreamFormat;
use crate::error::{EngineError, Result};

/// Rate assumed when `initializePlayer`/`initializeRecorder` omit `sampleRate`.
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Player and recorder status, reported by name on the event surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Unset,
    Initialized,
    Playing,
    Paused,
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Unset => "Unset",
            Status::Initialized => "Initialized",
            Status::Playing => "Playing",
            Status::Paused => "Paused",
            Status::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// Arguments of `initializePlayer`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerParams {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub format: StreamFormat,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub show_logs: bool,
}

impl Default for PlayerParams {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            format: StreamFormat::Pcm,
            title: None,
            artist: None,
            show_logs: false,
        }
    }
}

/// Arguments of `initializeRecorder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderParams {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub show_logs: bool,
}

impl Default for RecorderParams {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            show_logs: false,
        }
    }
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

#[derive(Debug, Default, Deserialize)]
struct ChunkArgs {
    data: Option<Vec<u8>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeekArgs {
    seek_time: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SpeedArgs {
    #[serde(alias = "rate")]
    speed: Option<f64>,
}

/// One command of the serialized command queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    InitializeRecorder(RecorderParams),
    StartRecording,
    StopRecording,
    InitializePlayer(PlayerParams),
    StartPlayer,
    StopPlayer,
    PausePlayer,
    WriteChunk(Bytes),
    Seek(f64),
    ChangePlayerSpeed(f64),
    CheckCurrentTime,
    GetDuration,
    GetPlayerBuffer,
}

impl Request {
    /// Wire name of the command.
    pub fn method(&self) -> &'static str {
        match self {
            Request::InitializeRecorder(_) => "initializeRecorder",
            Request::StartRecording => "startRecording",
            Request::StopRecording => "stopRecording",
            Request::InitializePlayer(_) => "initializePlayer",
            Request::StartPlayer => "startPlayer",
            Request::StopPlayer => "stopPlayer",
            Request::PausePlayer => "pausePlayer",
            Request::WriteChunk(_) => "writeChunk",
            Request::Seek(_) => "seek",
            Request::ChangePlayerSpeed(_) => "changePlayerSpeed",
            Request::CheckCurrentTime => "checkCurrentTime",
            Request::GetDuration => "getDuration",
            Request::GetPlayerBuffer => "getPlayerBuffer",
        }
    }

    /// Build a request from a method name and its JSON arguments.
    pub fn from_call(method: &str, args: &Value) -> Result<Self> {
        let request = match method {
            "initializeRecorder" => Request::InitializeRecorder(parse_args(args)?),
            "startRecording" => Request::StartRecording,
            "stopRecording" => Request::StopRecording,
            "initializePlayer" => Request::InitializePlayer(parse_args(args)?),
            "startPlayer" => Request::StartPlayer,
            "stopPlayer" => Request::StopPlayer,
            "pausePlayer" => Request::PausePlayer,
            "writeChunk" => {
                let ChunkArgs { data } = parse_args(args)?;
                let data = data.ok_or_else(|| {
                    EngineError::FailedToWriteBuffer("Failed to get data".to_string())
                })?;
                Request::WriteChunk(Bytes::from(data))
            }
            "seek" => {
                let SeekArgs { seek_time } = parse_args(args)?;
                let seek_time = seek_time.ok_or_else(|| {
                    EngineError::FailedToWriteBuffer("Failed to get seekTime".to_string())
                })?;
                Request::Seek(seek_time)
            }
            "changePlayerSpeed" => {
                let SpeedArgs { speed } = parse_args(args)?;
                let speed = speed.ok_or_else(|| {
                    EngineError::FailedToWriteBuffer("Failed to get speed".to_string())
                })?;
                Request::ChangePlayerSpeed(speed)
            }
            "checkCurrentTime" => Request::CheckCurrentTime,
            "getDuration" => Request::GetDuration,
            "getPlayerBuffer" => Request::GetPlayerBuffer,
            other => {
                return Err(EngineError::Unknown(format!("Method not implemented: {}", other)));
            }
        };
        request.validate()?;
        Ok(request)
    }

    /// Reject argument values no controller can act on.
    pub fn validate(&self) -> Result<()> {
        match self {
            Request::InitializeRecorder(RecorderParams { sample_rate, .. })
            | Request::InitializePlayer(PlayerParams { sample_rate, .. })
                if *sample_rate == 0 =>
            {
                Err(EngineError::Unknown("sampleRate must be positive".to_string()))
            }
            Request::Seek(time) if !time.is_finite() => Err(EngineError::FailedToWriteBuffer(
                format!("Invalid seekTime: {}", time),
            )),
            Request::ChangePlayerSpeed(rate) if !rate.is_finite() || *rate <= 0.0 => Err(
                EngineError::FailedToWriteBuffer(format!("Invalid playback speed: {}", rate)),
            ),
            _ => Ok(()),
        }
    }
}

/// Null or absent arguments read as an empty map.
fn parse_args<T: DeserializeOwned + Default>(args: &Value) -> Result<T> {
    match args {
        Value::Null => Ok(T::default()),
        Value::Object(_) => T::deserialize(args)
            .map_err(|e| EngineError::Unknown(format!("Incorrect parameters: {}", e))),
        _ => Err(EngineError::Unknown("Incorrect parameters".to_string())),
    }
}

/// Successful result of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Bool(bool),
    Recorder {
        success: bool,
        is_metering_enabled: bool,
    },
    Time(f64),
    Buffer(Bytes),
}

impl Response {
    pub fn to_json(&self) -> Value {
        match self {
            Response::Bool(b) => json!(b),
            Response::Recorder {
                success,
                is_metering_enabled,
            } => json!({ "success": success, "isMeteringEnabled": is_metering_enabled }),
            Response::Time(t) => json!(t),
            Response::Buffer(bytes) => json!(bytes.as_ref()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Response::Bool(b) => Some(*b),
            Response::Recorder { success, .. } => Some(*success),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<f64> {
        match self {
            Response::Time(t) => Some(*t),
            _ => None,
        }
    }
}

/// Server-to-client push.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    RecorderStatus(Status),
    PlayerStatus(Status),
    /// Little-endian 16-bit mono PCM captured during one period
    DataPeriod(Bytes),
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::RecorderStatus(_) => "recorderStatus",
            EngineEvent::PlayerStatus(_) => "playerStatus",
            EngineEvent::DataPeriod(_) => "dataPeriod",
        }
    }

    /// `{"name": .., "data": ..}` envelope pushed to clients.
    pub fn to_json(&self) -> Value {
        let data = match self {
            EngineEvent::RecorderStatus(status) | EngineEvent::PlayerStatus(status) => {
                json!(status.to_string())
            }
            EngineEvent::DataPeriod(bytes) => json!(bytes.as_ref()),
        };
        json!({ "name": self.name(), "data": data })
    }
}

/// Request as it arrives on the method channel.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodCall {
    #[serde(default)]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReplyError {
    pub code: String,
    pub message: String,
}

/// Reply sent back to the caller of a [`MethodCall`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MethodReply {
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl MethodReply {
    pub fn from_result(id: Option<u64>, result: Result<Response>) -> Self {
        match result {
            Ok(response) => Self {
                id,
                result: Some(response.to_json()),
                error: None,
            },
            Err(e) => Self {
                id,
                result: None,
                error: Some(ReplyError {
                    code: e.code().to_string(),
                    message: e.message().to_string(),
                }),
            },
        }
    }
}

/// Event as pushed on the method channel.
pub fn platform_event(event: &EngineEvent) -> Value {
    json!({ "method": "platformEvent", "args": event.to_json() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_chunk_without_data_is_rejected() {
        let err = Request::from_call("writeChunk", &json!({})).unwrap_err();
        assert_eq!(err.code(), "FailedToWriteBuffer");

        let err = Request::from_call("writeChunk", &Value::Null).unwrap_err();
        assert_eq!(err.code(), "FailedToWriteBuffer");
    }

    #[test]
    fn write_chunk_carries_bytes() {
        let request = Request::from_call("writeChunk", &json!({ "data": [1, 2, 3, 4] })).unwrap();
        assert_eq!(request, Request::WriteChunk(Bytes::from_static(&[1, 2, 3, 4])));
    }

    #[test]
    fn seek_requires_seek_time() {
        let err = Request::from_call("seek", &json!({ "time": 1.0 })).unwrap_err();
        assert_eq!(err.code(), "FailedToWriteBuffer");
        assert_eq!(
            Request::from_call("seek", &json!({ "seekTime": 1.5 })).unwrap(),
            Request::Seek(1.5)
        );
    }

    #[test]
    fn speed_accepts_both_names_and_must_be_positive() {
        assert_eq!(
            Request::from_call("changePlayerSpeed", &json!({ "speed": 1.25 })).unwrap(),
            Request::ChangePlayerSpeed(1.25)
        );
        assert_eq!(
            Request::from_call("changePlayerSpeed", &json!({ "rate": 0.5 })).unwrap(),
            Request::ChangePlayerSpeed(0.5)
        );
        let err = Request::from_call("changePlayerSpeed", &json!({ "speed": 0 })).unwrap_err();
        assert_eq!(err.code(), "FailedToWriteBuffer");
    }

    #[test]
    fn non_finite_values_fail_validation() {
        assert!(Request::Seek(f64::NAN).validate().is_err());
        assert!(Request::ChangePlayerSpeed(f64::INFINITY).validate().is_err());
    }

    #[test]
    fn initialize_player_defaults() {
        let request = Request::from_call("initializePlayer", &json!({})).unwrap();
        assert_eq!(request, Request::InitializePlayer(PlayerParams::default()));

        let request = Request::from_call(
            "initializePlayer",
            &json!({ "sampleRate": 44100, "format": "MP3", "title": "Song", "showLogs": true }),
        )
        .unwrap();
        let Request::InitializePlayer(params) = request else {
            panic!("wrong request");
        };
        assert_eq!(params.sample_rate, 44100);
        assert_eq!(params.format, StreamFormat::Mp3);
        assert_eq!(params.title.as_deref(), Some("Song"));
        assert!(params.artist.is_none());
        assert!(params.show_logs);
    }

    #[test]
    fn bad_parameters_are_unknown() {
        let err = Request::from_call("initializeRecorder", &json!([1, 2])).unwrap_err();
        assert_eq!(err.code(), "Unknown");
        let err = Request::from_call("initializePlayer", &json!({ "sampleRate": "fast" }))
            .unwrap_err();
        assert_eq!(err.code(), "Unknown");
        let err = Request::from_call("initializePlayer", &json!({ "sampleRate": 0 })).unwrap_err();
        assert_eq!(err.code(), "Unknown");
    }

    #[test]
    fn unknown_method() {
        let err = Request::from_call("usePhoneSpeaker", &json!({})).unwrap_err();
        assert_eq!(err.code(), "Unknown");
    }

    #[test]
    fn reply_and_event_shapes() {
        let reply = MethodReply::from_result(
            Some(7),
            Ok(Response::Recorder {
                success: true,
                is_metering_enabled: true,
            }),
        );
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({ "id": 7, "result": { "success": true, "isMeteringEnabled": true } })
        );

        let reply = MethodReply::from_result(
            None,
            Err(EngineError::FailedToPlay("device busy".to_string())),
        );
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({ "id": null, "error": { "code": "FailedToPlay", "message": "device busy" } })
        );

        let event = EngineEvent::PlayerStatus(Status::Stopped);
        assert_eq!(
            platform_event(&event),
            json!({ "method": "platformEvent", "args": { "name": "playerStatus", "data": "Stopped" } })
        );
        let event = EngineEvent::DataPeriod(Bytes::from_static(&[0x01, 0x00]));
        assert_eq!(event.to_json(), json!({ "name": "dataPeriod", "data": [1, 0] }));
    }
}
