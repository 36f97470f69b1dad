use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::AudioConfig;

/// Where the sound clips live and which decoder they use.
#[derive(Debug, Clone)]
pub struct SoundsConfig {
    pub clips: PathBuf,
    pub hold: PathBuf,
    /// Extension appended to clip names (without the dot)
    pub extension: String,
}

/// UDP bridge standing in for the voice transport.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub local_port: u16,
    pub remote_addr: SocketAddr,
    /// A speaker that sends nothing for this long is considered gone
    pub speaker_idle: Duration,
    /// Sample rate of the device the mixed audio is written for
    pub device_rate: u32,
    pub record_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,
    pub audio: AudioConfig,
    pub sounds: SoundsConfig,
    pub bridge: BridgeConfig,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        let audio = AudioConfig {
            sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            frame_duration_ms: env!("AUDIO_FRAME_DURATION_MS").parse()
                .map_err(|_| "Failed to parse AUDIO_FRAME_DURATION_MS")?,
            jitter_buffer_ms: env!("AUDIO_JITTER_BUFFER_MS").parse()
                .map_err(|_| "Failed to parse AUDIO_JITTER_BUFFER_MS")?,
            outgoing_queue_frames: env!("AUDIO_OUTGOING_QUEUE_FRAMES").parse()
                .map_err(|_| "Failed to parse AUDIO_OUTGOING_QUEUE_FRAMES")?,
            min_volume_db: env!("VOLUME_MIN_DB").parse()
                .map_err(|_| "Failed to parse VOLUME_MIN_DB")?,
            max_volume_db: env!("VOLUME_MAX_DB").parse()
                .map_err(|_| "Failed to parse VOLUME_MAX_DB")?,
            default_volume_db: env!("VOLUME_DEFAULT_DB").parse()
                .map_err(|_| "Failed to parse VOLUME_DEFAULT_DB")?,
            volume_step_db: env!("VOLUME_STEP_DB").parse()
                .map_err(|_| "Failed to parse VOLUME_STEP_DB")?,
        };

        if audio.frame_size() == 0 {
            return Err("AUDIO_FRAME_DURATION_MS yields an empty frame");
        }

        let remote_ip: std::net::IpAddr = env!("BRIDGE_REMOTE_IP").parse()
            .map_err(|_| "Failed to parse BRIDGE_REMOTE_IP")?;
        let remote_port: u16 = env!("BRIDGE_REMOTE_PORT").parse()
            .map_err(|_| "Failed to parse BRIDGE_REMOTE_PORT")?;
        let speaker_idle_ms: u64 = env!("BRIDGE_SPEAKER_IDLE_MS").parse()
            .map_err(|_| "Failed to parse BRIDGE_SPEAKER_IDLE_MS")?;

        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),
            audio,
            sounds: SoundsConfig {
                clips: PathBuf::from(env!("SOUNDS_CLIPS")),
                hold: PathBuf::from(env!("SOUNDS_HOLD")),
                extension: env!("SOUNDS_EXTENSION").trim_start_matches('.').to_string(),
            },
            bridge: BridgeConfig {
                local_port: env!("BRIDGE_LOCAL_PORT").parse()
                    .map_err(|_| "Failed to parse BRIDGE_LOCAL_PORT")?,
                remote_addr: SocketAddr::new(remote_ip, remote_port),
                speaker_idle: Duration::from_millis(speaker_idle_ms),
                device_rate: env!("BRIDGE_DEVICE_RATE").parse()
                    .map_err(|_| "Failed to parse BRIDGE_DEVICE_RATE")?,
                record_path: PathBuf::from(env!("BRIDGE_RECORD_PATH")),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_build_env() {
        let config = Config::new().unwrap();
        assert!(config.audio.frame_size() > 0);
        assert!(config.audio.min_volume_db <= config.audio.max_volume_db);
        assert!(!config.sounds.extension.starts_with('.'));
    }
}
