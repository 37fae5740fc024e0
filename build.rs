use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    engine: Engine,
    playback: Playback,
    capture: Capture,
    bridge: Bridge,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Engine {
    output_sample_rate: u32,
    replay_threshold_secs: f64,
    pitch_correction: bool,
    grain_ms: u32,
}

#[derive(Deserialize)]
struct Playback {
    device: String,
    channels: u32,
    period_size: usize,
}

#[derive(Deserialize)]
struct Capture {
    device: String,
    period_frames: usize,
}

#[derive(Deserialize)]
struct Bridge {
    local_ip: String,
    local_port: u16,
    buffer_size: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 引擎配置
    println!("cargo:rustc-env=ENGINE_OUTPUT_SAMPLE_RATE={}", config.engine.output_sample_rate);
    println!("cargo:rustc-env=ENGINE_REPLAY_THRESHOLD_SECS={}", config.engine.replay_threshold_secs);
    println!("cargo:rustc-env=ENGINE_PITCH_CORRECTION={}", config.engine.pitch_correction);
    println!("cargo:rustc-env=ENGINE_GRAIN_MS={}", config.engine.grain_ms);

    // 播放设备
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.playback.device);
    println!("cargo:rustc-env=PLAYBACK_CHANNELS={}", config.playback.channels);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.playback.period_size);

    // 录音设备
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.capture.device);
    println!("cargo:rustc-env=CAPTURE_PERIOD_FRAMES={}", config.capture.period_frames);

    // 本地 UDP 方法通道
    println!("cargo:rustc-env=BRIDGE_LOCAL_IP={}", config.bridge.local_ip);
    println!("cargo:rustc-env=BRIDGE_LOCAL_PORT={}", config.bridge.local_port);
    println!("cargo:rustc-env=BRIDGE_BUFFER_SIZE={}", config.bridge.buffer_size);
}
