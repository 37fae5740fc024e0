use std::sync::Arc;

use sound_stream_rs::audio::{AlsaSink, AlsaSinkConfig, AlsaSource};
use sound_stream_rs::bridge::MethodBridge;
use sound_stream_rs::config::Config;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().unwrap_or_default();
    let engine_config = config.engine_config();
    log::info!("{} v{} starting", config.app_name, config.app_version);

    // 播放与录音设备，实际打开推迟到 initializePlayer / initializeRecorder
    let sink = AlsaSink::new(AlsaSinkConfig {
        device: engine_config.playback_device.clone(),
        sample_rate: engine_config.output_sample_rate,
        channels: engine_config.playback_channels,
        period_size: engine_config.playback_period_size,
        grain_ms: engine_config.grain_ms,
    });
    let source = AlsaSource::new(engine_config.capture_device.clone());

    let (engine, events, engine_task) =
        sound_stream_rs::spawn(engine_config, Box::new(sink), Box::new(source));

    // 启动本地方法通道
    let bridge = Arc::new(
        MethodBridge::new(
            config.bridge_local_ip,
            config.bridge_local_port,
            config.bridge_buffer_size,
            engine.clone(),
        )
        .await?,
    );

    let bridge_clone = bridge.clone();
    tokio::spawn(async move {
        bridge_clone.forward_events(events).await;
    });

    let bridge_clone = bridge.clone();
    let bridge_task = tokio::spawn(async move {
        if let Err(e) = bridge_clone.run().await {
            log::error!("MethodBridge error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down...");
        }
        _ = bridge_task => {
            log::warn!("Method channel closed, shutting down...");
        }
    }

    engine.shutdown().await;
    if let Err(e) = engine_task.await {
        log::error!("Engine task failed: {}", e);
    }
    Ok(())
}
