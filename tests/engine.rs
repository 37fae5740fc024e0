use std::time::Duration;

use serde_json::json;
use sound_stream_rs::audio::pcm_decoder::i16_to_bytes;
use sound_stream_rs::audio::{StreamFormat, VirtualSink, VirtualSinkHandle, VirtualSource, VirtualSourceHandle};
use sound_stream_rs::{
    EngineConfig, EngineEvent, EngineHandle, PlayerParams, RecorderParams, Response, Status,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Harness {
    engine: EngineHandle,
    events: UnboundedReceiver<EngineEvent>,
    sink: VirtualSinkHandle,
    source: VirtualSourceHandle,
    task: JoinHandle<()>,
}

impl Harness {
    fn new(output_rate: u32) -> Self {
        let config = EngineConfig {
            output_sample_rate: output_rate,
            replay_threshold: Duration::from_secs(3),
            ..EngineConfig::default()
        };
        let (sink, sink_handle) = VirtualSink::new(config.output_sample_rate, config.grain_ms);
        let (source, source_handle) = VirtualSource::new();
        let (engine, events, task) = sound_stream_rs::spawn(config, Box::new(sink), Box::new(source));
        Self {
            engine,
            events,
            sink: sink_handle,
            source: source_handle,
            task,
        }
    }

    async fn next_event(&mut self) -> EngineEvent {
        timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for an engine event")
            .expect("event channel closed")
    }

    async fn expect_player(&mut self, status: Status) {
        assert_eq!(self.next_event().await, EngineEvent::PlayerStatus(status));
    }

    async fn expect_recorder(&mut self, status: Status) {
        assert_eq!(self.next_event().await, EngineEvent::RecorderStatus(status));
    }

    async fn init_pcm(&mut self, sample_rate: u32) {
        let params = PlayerParams {
            sample_rate,
            format: StreamFormat::Pcm,
            ..PlayerParams::default()
        };
        assert!(self.engine.initialize_player(params).await.unwrap());
        self.expect_player(Status::Initialized).await;
    }

    fn assert_no_event(&mut self) {
        assert!(self.events.try_recv().is_err());
    }
}

fn silence(frames: usize) -> Vec<u8> {
    i16_to_bytes(&vec![0; frames])
}

#[tokio::test]
async fn silent_chunk_plays_to_completion() {
    let mut h = Harness::new(16000);
    h.init_pcm(16000).await;

    assert!(h.engine.write_chunk(silence(1600)).await.unwrap());
    let duration = h.engine.duration().await.unwrap();
    assert!((duration - 0.1).abs() < 1e-9);

    assert!(h.engine.start_player().await.unwrap());
    h.expect_player(Status::Playing).await;

    h.sink.advance(1024);
    h.sink.advance(1024);
    h.expect_player(Status::Stopped).await;
}

#[tokio::test]
async fn seek_to_zero_replays_both_chunks() {
    let mut h = Harness::new(16000);
    h.init_pcm(16000).await;

    h.engine.write_chunk(i16_to_bytes(&vec![1000; 800])).await.unwrap();
    h.engine.write_chunk(i16_to_bytes(&vec![2000; 800])).await.unwrap();
    h.engine.start_player().await.unwrap();
    h.expect_player(Status::Playing).await;
    h.sink.advance(400);

    assert!(h.engine.seek(0.0).await.unwrap());
    assert!(h.engine.start_player().await.unwrap());
    assert_eq!(h.engine.current_time().await.unwrap(), 0.0);

    let out = h.sink.advance(1600);
    assert_eq!(out.len(), 1600);
    assert!((out[0] - 1000.0 / 32768.0).abs() < 1e-6);
    assert!((out[799] - 1000.0 / 32768.0).abs() < 1e-6);
    assert!((out[800] - 2000.0 / 32768.0).abs() < 1e-6);
    assert!((out[1599] - 2000.0 / 32768.0).abs() < 1e-6);
    h.expect_player(Status::Stopped).await;

    let position = h.engine.current_time().await.unwrap();
    assert!((position - 0.1).abs() < 1e-9);
}

#[tokio::test]
async fn seek_beyond_duration_stops() {
    let mut h = Harness::new(16000);
    h.init_pcm(16000).await;
    h.engine.write_chunk(silence(1600)).await.unwrap();
    h.engine.start_player().await.unwrap();
    h.expect_player(Status::Playing).await;

    assert!(h.engine.seek(3.0).await.unwrap());
    h.expect_player(Status::Stopped).await;
    let position = h.engine.current_time().await.unwrap();
    assert!((0.0..=0.1 + 1e-9).contains(&position));
}

#[tokio::test]
async fn pause_freezes_position() {
    let mut h = Harness::new(1000);
    h.init_pcm(1000).await;
    h.engine.write_chunk(silence(2000)).await.unwrap();
    h.engine.start_player().await.unwrap();
    h.expect_player(Status::Playing).await;

    h.sink.advance(500);
    h.engine.pause_player().await.unwrap();
    h.expect_player(Status::Paused).await;
    let paused = h.engine.current_time().await.unwrap();
    assert!((paused - 0.5).abs() < 1e-9);

    h.sink.advance(500);
    assert_eq!(h.engine.current_time().await.unwrap(), paused);
}

#[tokio::test]
async fn repeated_transport_commands_emit_once() {
    let mut h = Harness::new(1000);
    h.init_pcm(1000).await;
    h.engine.write_chunk(silence(500)).await.unwrap();

    h.engine.start_player().await.unwrap();
    h.engine.start_player().await.unwrap();
    h.expect_player(Status::Playing).await;
    h.engine.pause_player().await.unwrap();
    h.engine.pause_player().await.unwrap();
    h.expect_player(Status::Paused).await;
    h.engine.stop_player().await.unwrap();
    h.engine.stop_player().await.unwrap();
    h.expect_player(Status::Stopped).await;

    // Round-trip one more request so any stray event would already be queued
    h.engine.duration().await.unwrap();
    h.assert_no_event();
}

#[tokio::test]
async fn doubled_speed_halves_wall_time() {
    let mut h = Harness::new(1000);
    h.init_pcm(1000).await;
    h.engine.write_chunk(silence(1000)).await.unwrap();
    assert!(h.engine.change_player_speed(2.0).await.unwrap());
    h.engine.start_player().await.unwrap();
    h.expect_player(Status::Playing).await;

    h.sink.advance(250);
    let position = h.engine.current_time().await.unwrap();
    assert!((position - 0.5).abs() < 1e-9);
    h.sink.advance(250);
    h.expect_player(Status::Stopped).await;
}

#[tokio::test]
async fn recorder_emits_periods_while_recording() {
    let mut h = Harness::new(16000);
    let response = h
        .engine
        .initialize_recorder(RecorderParams {
            sample_rate: 16000,
            show_logs: true,
        })
        .await
        .unwrap();
    assert_eq!(
        response,
        Response::Recorder {
            success: true,
            is_metering_enabled: true
        }
    );
    h.expect_recorder(Status::Initialized).await;
    assert_eq!(h.source.params().map(|p| p.period_frames), Some(1600));

    assert!(!h.source.push_period(vec![5; 1600]));
    h.engine.start_recording().await.unwrap();
    h.expect_recorder(Status::Playing).await;

    assert!(h.source.push_period(vec![5; 1600]));
    match h.next_event().await {
        EngineEvent::DataPeriod(bytes) => {
            assert_eq!(bytes.len(), 3200);
            assert_eq!(&bytes[..4], &[5, 0, 5, 0]);
        }
        other => panic!("expected dataPeriod, got {:?}", other),
    }

    h.engine.stop_recording().await.unwrap();
    h.expect_recorder(Status::Stopped).await;
}

#[tokio::test]
async fn missing_arguments_are_rejected() {
    let mut h = Harness::new(16000);
    h.init_pcm(16000).await;

    let err = h.engine.call("writeChunk", &json!({})).await.unwrap_err();
    assert_eq!(err.code(), "FailedToWriteBuffer");
    let err = h.engine.call("seek", &json!({})).await.unwrap_err();
    assert_eq!(err.code(), "FailedToWriteBuffer");
    let err = h.engine.call("changePlayerSpeed", &json!({ "speed": -1.0 })).await.unwrap_err();
    assert_eq!(err.code(), "FailedToWriteBuffer");
    let err = h.engine.call("hasPermission", &json!({})).await.unwrap_err();
    assert_eq!(err.code(), "Unknown");
    let err = h.engine.seek(f64::NAN).await.unwrap_err();
    assert_eq!(err.code(), "FailedToWriteBuffer");

    assert_eq!(h.engine.duration().await.unwrap(), 0.0);
}

#[tokio::test]
async fn uninitialized_player_and_recorder() {
    let h = Harness::new(16000);
    assert_eq!(h.engine.current_time().await.unwrap(), 0.0);
    assert_eq!(h.engine.duration().await.unwrap(), 0.0);
    assert_eq!(h.engine.start_player().await.unwrap_err().code(), "FailedToPlay");
    assert_eq!(h.engine.stop_player().await.unwrap_err().code(), "FailedToStop");
    assert_eq!(h.engine.write_chunk(silence(10)).await.unwrap_err().code(), "FailedToWriteBuffer");
    assert_eq!(h.engine.start_recording().await.unwrap_err().code(), "FailedToRecord");
    assert!(h.engine.player_buffer().await.unwrap().is_empty());
}

#[tokio::test]
async fn undecodable_mp3_chunk_is_tolerated() {
    let mut h = Harness::new(44100);
    let params = PlayerParams {
        sample_rate: 44100,
        format: StreamFormat::Mp3,
        title: Some("Stream".to_string()),
        artist: Some("Nobody".to_string()),
        show_logs: true,
    };
    assert!(h.engine.initialize_player(params).await.unwrap());
    h.expect_player(Status::Initialized).await;

    assert!(h.engine.write_chunk(vec![0x42u8; 512]).await.unwrap());
    assert!(h.engine.write_chunk(vec![0xFF, 0xFB, 0x90]).await.unwrap());
    assert_eq!(h.engine.duration().await.unwrap(), 0.0);
}

#[tokio::test]
async fn replay_from_stopped_needs_enough_audio() {
    let mut h = Harness::new(1000);
    h.init_pcm(1000).await;
    h.engine.write_chunk(silence(4000)).await.unwrap();
    h.engine.start_player().await.unwrap();
    h.expect_player(Status::Playing).await;
    h.sink.advance(4000);
    h.expect_player(Status::Stopped).await;

    h.engine.start_player().await.unwrap();
    h.expect_player(Status::Playing).await;
    assert!(h.sink.has_pending());
    assert_eq!(h.engine.current_time().await.unwrap(), 0.0);
}

#[tokio::test]
async fn player_buffer_round_trips_pcm() {
    let mut h = Harness::new(16000);
    h.init_pcm(16000).await;
    h.engine.write_chunk(i16_to_bytes(&[0, 8192, -8192, 0])).await.unwrap();
    let bytes = h.engine.player_buffer().await.unwrap();
    assert_eq!(bytes.len(), 8);
    assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 0);
    assert!((i16::from_le_bytes([bytes[2], bytes[3]]) - 8191).abs() <= 1);
}

#[tokio::test]
async fn shutdown_ends_the_engine() {
    let h = Harness::new(16000);
    h.engine.shutdown().await;
    timeout(Duration::from_secs(2), h.task)
        .await
        .expect("engine task did not finish")
        .unwrap();
    assert_eq!(h.engine.duration().await.unwrap_err().code(), "Unknown");
}

#[tokio::test]
async fn resampled_chunk_keeps_its_duration() {
    let mut h = Harness::new(44100);
    h.init_pcm(16000).await;

    assert!(h.engine.write_chunk(silence(1600)).await.unwrap());
    let duration = h.engine.duration().await.unwrap();
    assert!((duration - 0.1).abs() < 0.001, "duration {}", duration);

    // A 10 ms chunk is converted as soon as it arrives
    assert!(h.engine.write_chunk(silence(160)).await.unwrap());
    let grown = h.engine.duration().await.unwrap();
    assert!((grown - duration - 0.01).abs() < 0.001, "grew by {}", grown - duration);
}

#[tokio::test]
async fn resampled_stream_seeks_and_tracks_position() {
    let mut h = Harness::new(44100);
    h.init_pcm(16000).await;
    for _ in 0..100 {
        h.engine.write_chunk(silence(160)).await.unwrap();
    }
    let duration = h.engine.duration().await.unwrap();
    assert!((duration - 1.0).abs() < 0.001, "duration {}", duration);

    h.engine.start_player().await.unwrap();
    h.expect_player(Status::Playing).await;

    assert!(h.engine.seek(0.5).await.unwrap());
    assert!((h.engine.current_time().await.unwrap() - 0.5).abs() < 1e-9);

    h.sink.advance(4410);
    let position = h.engine.current_time().await.unwrap();
    assert!((position - 0.6).abs() < 1e-6, "position {}", position);

    h.sink.advance(44100);
    h.expect_player(Status::Stopped).await;
    let position = h.engine.current_time().await.unwrap();
    assert!((position - duration).abs() < 1e-6, "position {}", position);
}
