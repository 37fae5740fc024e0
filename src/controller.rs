//! The serialized command queue.
//!
//! Every request, and every event raised by a device thread, is a [`Command`]
//! on one unbounded channel drained by a single engine task, so no two
//! operations ever touch player or recorder state at the same time.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audio::{DeviceEvent, DeviceNotifier, InputSource, OutputSink};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::player::PlaybackController;
use crate::protocol::{EngineEvent, PlayerParams, RecorderParams, Request, Response};
use crate::recorder::CaptureController;

pub enum Command {
    Request(Request, oneshot::Sender<Result<Response>>),
    /// Raised on a device thread, applied here
    Device(DeviceEvent),
    Shutdown(oneshot::Sender<()>),
}

pub struct EngineController {
    player: PlaybackController,
    recorder: CaptureController,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl EngineController {
    pub fn new(
        config: EngineConfig,
        sink: Box<dyn OutputSink>,
        source: Box<dyn InputSource>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        // Device threads must not keep the queue alive once every handle is gone
        let weak = tx.downgrade();
        let notifier: DeviceNotifier = Arc::new(move |event| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Command::Device(event));
            }
        });

        log::info!(
            "Engine created: output_rate={}, replay_threshold={:?}, pitch_correction={}",
            config.output_sample_rate,
            config.replay_threshold,
            config.pitch_correction,
        );

        let controller = Self {
            player: PlaybackController::new(config.clone(), sink, notifier.clone(), events.clone()),
            recorder: CaptureController::new(config, source, notifier, events),
            rx,
        };
        (controller, EngineHandle { tx })
    }

    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Request(request, reply) => {
                    let result = self.handle_request(request);
                    let _ = reply.send(result);
                }
                Command::Device(event) => self.handle_device_event(event),
                Command::Shutdown(done) => {
                    self.teardown();
                    let _ = done.send(());
                    return;
                }
            }
        }
        self.teardown();
    }

    pub fn handle_request(&mut self, request: Request) -> Result<Response> {
        let method = request.method();
        log::debug!("Handling {}", method);

        let result = match request {
            Request::InitializeRecorder(params) => {
                self.recorder.initialize(params).map(|metering| Response::Recorder {
                    success: true,
                    is_metering_enabled: metering,
                })
            }
            Request::StartRecording => self.recorder.start().map(Response::Bool),
            Request::StopRecording => self.recorder.stop().map(Response::Bool),
            Request::InitializePlayer(params) => self.player.initialize(params).map(Response::Bool),
            Request::StartPlayer => self.player.start().map(Response::Bool),
            Request::StopPlayer => self.player.stop().map(Response::Bool),
            Request::PausePlayer => self.player.pause().map(Response::Bool),
            Request::WriteChunk(data) => self.player.write_chunk(&data).map(Response::Bool),
            Request::Seek(time) => self.player.seek(time).map(Response::Bool),
            Request::ChangePlayerSpeed(rate) => self.player.change_speed(rate).map(Response::Bool),
            Request::CheckCurrentTime => Ok(Response::Time(self.player.current_time())),
            Request::GetDuration => Ok(Response::Time(self.player.duration())),
            Request::GetPlayerBuffer => Ok(Response::Buffer(Bytes::from(self.player.player_buffer()))),
        };

        if let Err(e) = &result {
            log::warn!("{} failed: {}", method, e);
        }
        result
    }

    pub fn handle_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::SegmentDrained(token) => self.player.on_segment_drained(token),
            DeviceEvent::CapturePeriod(frames) => self.recorder.on_capture_period(&frames),
        }
    }

    fn teardown(&mut self) {
        log::info!("Engine shutting down");
        self.recorder.close();
        self.player.close();
    }
}

/// Cloneable client side of the command queue.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    /// Queue `request` and wait for its turn to complete.
    pub async fn request(&self, request: Request) -> Result<Response> {
        request.validate()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Request(request, reply_tx))
            .map_err(|_| EngineError::Unknown("Engine is not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Unknown("Engine dropped the request".to_string()))?
    }

    /// Dispatch a method-channel call by name.
    pub async fn call(&self, method: &str, args: &Value) -> Result<Response> {
        let request = Request::from_call(method, args)?;
        self.request(request).await
    }

    pub async fn initialize_recorder(&self, params: RecorderParams) -> Result<Response> {
        self.request(Request::InitializeRecorder(params)).await
    }

    pub async fn start_recording(&self) -> Result<bool> {
        self.bool_request(Request::StartRecording).await
    }

    pub async fn stop_recording(&self) -> Result<bool> {
        self.bool_request(Request::StopRecording).await
    }

    pub async fn initialize_player(&self, params: PlayerParams) -> Result<bool> {
        self.bool_request(Request::InitializePlayer(params)).await
    }

    pub async fn start_player(&self) -> Result<bool> {
        self.bool_request(Request::StartPlayer).await
    }

    pub async fn stop_player(&self) -> Result<bool> {
        self.bool_request(Request::StopPlayer).await
    }

    pub async fn pause_player(&self) -> Result<bool> {
        self.bool_request(Request::PausePlayer).await
    }

    pub async fn write_chunk(&self, data: impl Into<Bytes>) -> Result<bool> {
        self.bool_request(Request::WriteChunk(data.into())).await
    }

    pub async fn seek(&self, seek_time: f64) -> Result<bool> {
        self.bool_request(Request::Seek(seek_time)).await
    }

    pub async fn change_player_speed(&self, rate: f64) -> Result<bool> {
        self.bool_request(Request::ChangePlayerSpeed(rate)).await
    }

    pub async fn current_time(&self) -> Result<f64> {
        self.time_request(Request::CheckCurrentTime).await
    }

    pub async fn duration(&self) -> Result<f64> {
        self.time_request(Request::GetDuration).await
    }

    pub async fn player_buffer(&self) -> Result<Bytes> {
        match self.request(Request::GetPlayerBuffer).await? {
            Response::Buffer(bytes) => Ok(bytes),
            other => Err(unexpected(other)),
        }
    }

    /// Stop both devices and end the engine task. Waits for teardown.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    async fn bool_request(&self, request: Request) -> Result<bool> {
        let response = self.request(request).await?;
        response.as_bool().ok_or_else(|| unexpected(response))
    }

    async fn time_request(&self, request: Request) -> Result<f64> {
        let response = self.request(request).await?;
        response.as_time().ok_or_else(|| unexpected(response))
    }
}

fn unexpected(response: Response) -> EngineError {
    EngineError::Unknown(format!("Unexpected response: {:?}", response))
}

/// Start an engine task on the current tokio runtime.
pub fn spawn(
    config: EngineConfig,
    sink: Box<dyn OutputSink>,
    source: Box<dyn InputSource>,
) -> (EngineHandle, mpsc::UnboundedReceiver<EngineEvent>, JoinHandle<()>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (controller, handle) = EngineController::new(config, sink, source, events_tx);
    let task = tokio::spawn(controller.run());
    (handle, events_rx, task)
}
