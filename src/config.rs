use std::time::Duration;

/// Process-level configuration, baked in from `config.toml` by `build.rs`.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 引擎配置
    pub output_sample_rate: u32,
    pub replay_threshold_secs: f64,
    pub pitch_correction: bool,
    pub grain_ms: u32,

    // 播放设备配置
    pub playback_device: &'static str,
    pub playback_channels: u32,
    pub playback_period_size: usize,

    // 录音设备配置
    pub capture_device: &'static str,
    pub capture_period_frames: usize,

    // 本地方法通道配置
    pub bridge_local_ip: &'static str,
    pub bridge_local_port: u16,
    pub bridge_buffer_size: usize,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            output_sample_rate: env!("ENGINE_OUTPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse ENGINE_OUTPUT_SAMPLE_RATE")?,
            replay_threshold_secs: env!("ENGINE_REPLAY_THRESHOLD_SECS").parse()
                .map_err(|_| "Failed to parse ENGINE_REPLAY_THRESHOLD_SECS")?,
            pitch_correction: env!("ENGINE_PITCH_CORRECTION").parse()
                .map_err(|_| "Failed to parse ENGINE_PITCH_CORRECTION")?,
            grain_ms: env!("ENGINE_GRAIN_MS").parse()
                .map_err(|_| "Failed to parse ENGINE_GRAIN_MS")?,

            playback_device: env!("PLAYBACK_DEVICE"),
            playback_channels: env!("PLAYBACK_CHANNELS").parse()
                .map_err(|_| "Failed to parse PLAYBACK_CHANNELS")?,
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,

            capture_device: env!("CAPTURE_DEVICE"),
            capture_period_frames: env!("CAPTURE_PERIOD_FRAMES").parse()
                .map_err(|_| "Failed to parse CAPTURE_PERIOD_FRAMES")?,

            bridge_local_ip: env!("BRIDGE_LOCAL_IP"),
            bridge_local_port: env!("BRIDGE_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse BRIDGE_LOCAL_PORT")?,
            bridge_buffer_size: env!("BRIDGE_BUFFER_SIZE").parse()
                .map_err(|_| "Failed to parse BRIDGE_BUFFER_SIZE")?,
        })
    }

    /// The subset of the configuration the engine library consumes.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            output_sample_rate: self.output_sample_rate,
            replay_threshold: Duration::from_secs_f64(self.replay_threshold_secs.max(0.0)),
            pitch_correction: self.pitch_correction,
            grain_ms: self.grain_ms,
            playback_device: self.playback_device.to_string(),
            playback_channels: self.playback_channels,
            playback_period_size: self.playback_period_size,
            capture_device: self.capture_device.to_string(),
            capture_period_frames: self.capture_period_frames,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

/// Engine configuration, shared by every player and recorder session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rate of the sample buffer and of the output device, fixed for the engine lifetime
    pub output_sample_rate: u32,
    /// `startPlayer` from `Stopped` rewinds to frame 0 only above this much buffered audio
    pub replay_threshold: Duration,
    /// Counter-shift pitch when the playback rate changes
    pub pitch_correction: bool,
    /// Grain length of the pitch-corrected renderer, in ms
    pub grain_ms: u32,
    /// ALSA playback device name (e.g. "default", "plughw:0,0")
    pub playback_device: String,
    /// ALSA playback channel count; the mono render is duplicated across channels
    pub playback_channels: u32,
    /// Desired ALSA playback period size (0 = let ALSA decide)
    pub playback_period_size: usize,
    /// ALSA capture device name
    pub capture_device: String,
    /// Capture notification period in frames (0 = sample_rate / 10)
    pub capture_period_frames: usize,
}

impl EngineConfig {
    pub fn replay_threshold_frames(&self) -> usize {
        (self.replay_threshold.as_secs_f64() * self.output_sample_rate as f64) as usize
    }

    pub fn capture_period_for(&self, sample_rate: u32) -> usize {
        if self.capture_period_frames > 0 {
            self.capture_period_frames
        } else {
            (sample_rate as usize / 10).max(1)
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 44100,
            replay_threshold: Duration::from_secs(3),
            pitch_correction: true,
            grain_ms: 40,
            playback_device: "default".to_string(),
            playback_channels: 2,
            playback_period_size: 1024,
            capture_device: "default".to_string(),
            capture_period_frames: 0,
        }
    }
}
