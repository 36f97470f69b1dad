use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    volume: Volume,
    sounds: Sounds,
    bridge: Bridge,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    sample_rate: u32,
    frame_duration_ms: u32,
    jitter_buffer_ms: u32,
    outgoing_queue_frames: usize,
}

#[derive(Deserialize)]
struct Volume {
    min_db: i32,
    max_db: i32,
    default_db: i32,
    step_db: i32,
}

#[derive(Deserialize)]
struct Sounds {
    clips: String,
    hold: String,
    extension: String,
}

#[derive(Deserialize)]
struct Bridge {
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
    speaker_idle_ms: u64,
    device_rate: u32,
    record_path: String,
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

    if config.volume.min_db > config.volume.max_db {
        panic!(
            "config.toml: volume.min_db ({}) is above volume.max_db ({})",
            config.volume.min_db, config.volume.max_db
        );
    }

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_FRAME_DURATION_MS={}", config.audio.frame_duration_ms);
    println!("cargo:rustc-env=AUDIO_JITTER_BUFFER_MS={}", config.audio.jitter_buffer_ms);
    println!("cargo:rustc-env=AUDIO_OUTGOING_QUEUE_FRAMES={}", config.audio.outgoing_queue_frames);

    // 音量配置 (dB)
    println!("cargo:rustc-env=VOLUME_MIN_DB={}", config.volume.min_db);
    println!("cargo:rustc-env=VOLUME_MAX_DB={}", config.volume.max_db);
    println!("cargo:rustc-env=VOLUME_DEFAULT_DB={}", config.volume.default_db);
    println!("cargo:rustc-env=VOLUME_STEP_DB={}", config.volume.step_db);

    // 音效文件
    println!("cargo:rustc-env=SOUNDS_CLIPS={}", config.sounds.clips);
    println!("cargo:rustc-env=SOUNDS_HOLD={}", config.sounds.hold);
    println!("cargo:rustc-env=SOUNDS_EXTENSION={}", config.sounds.extension);

    // UDP 桥配置
    println!("cargo:rustc-env=BRIDGE_LOCAL_PORT={}", config.bridge.local_port);
    println!("cargo:rustc-env=BRIDGE_REMOTE_IP={}", config.bridge.remote_ip);
    println!("cargo:rustc-env=BRIDGE_REMOTE_PORT={}", config.bridge.remote_port);
    println!("cargo:rustc-env=BRIDGE_SPEAKER_IDLE_MS={}", config.bridge.speaker_idle_ms);
    println!("cargo:rustc-env=BRIDGE_DEVICE_RATE={}", config.bridge.device_rate);
    println!("cargo:rustc-env=BRIDGE_RECORD_PATH={}", config.bridge.record_path);
}
