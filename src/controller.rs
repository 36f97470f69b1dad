use crate::audio::{pcm_stream, resample, Player};
use crate::config::SoundsConfig;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Device-rate recordings relayed with `relay` are raw PCM.
const RELAY_EXTENSION: &str = "raw";

/// Text commands driving the player, one per line.
pub struct CoreController {
    player: Player,
    sounds: SoundsConfig,
    /// Internal rate / device rate
    device_ratio: usize,
}

impl CoreController {
    pub fn new(player: Player, sounds: SoundsConfig, device_ratio: usize) -> Self {
        Self {
            player,
            sounds,
            device_ratio,
        }
    }

    /// Run one command line. The reply is meant for the user who sent it.
    pub fn handle(&self, line: &str) -> String {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return String::new();
        };
        let args: Vec<&str> = words.collect();
        log::debug!("Command {} {:?}", command, args);

        match (command, args.as_slice()) {
            ("play", [name]) => self.play(name),
            ("hold", [name]) => self.hold(name),
            ("loop", [count, name]) => self.play_loop(count, name),
            ("relay", [name]) => self.relay(name),
            ("stop", []) => self.stop(),
            ("volume", []) => self.show_volume(),
            ("volume", [db]) => self.set_volume(db),
            ("volume++", []) => self.step_volume(1),
            ("volume--", []) => self.step_volume(-1),
            ("help", _) => HELP.to_string(),
            _ => format!("Unknown command: {}\n{}", line.trim(), HELP),
        }
    }

    fn resolve(&self, dir: &Path, name: &str) -> Result<PathBuf, String> {
        resolve_sound(dir, name, &self.sounds.extension)
    }

    fn play(&self, name: &str) -> String {
        match self.resolve(&self.sounds.clips, name) {
            Ok(path) => match self.player.play_sound(path) {
                Ok(_) => format!("Playing {}", name),
                Err(e) => format!("Failed to play {}: {}", name, e),
            },
            Err(reply) => reply,
        }
    }

    fn hold(&self, name: &str) -> String {
        match self.resolve(&self.sounds.hold, name) {
            Ok(path) => {
                self.player.play_hold(path);
                format!("Holding with {}, send stop to end", name)
            }
            Err(reply) => reply,
        }
    }

    fn play_loop(&self, count: &str, name: &str) -> String {
        let count: usize = match count.parse() {
            Ok(n) if n > 0 => n,
            _ => return format!("Invalid loop count: {}", count),
        };
        let path = match self.resolve(&self.sounds.clips, name) {
            Ok(path) => path,
            Err(reply) => return reply,
        };

        let player = self.player.clone();
        tokio::spawn(async move {
            if let Err(e) = player.play_loop(&path, Some(count)).await {
                log::error!("Failed to loop {}: {}", path.display(), e);
            }
        });
        format!("Playing {} {} times", name, count)
    }

    /// Stream a device-rate recording into the channel, up-sampled on the fly.
    fn relay(&self, name: &str) -> String {
        let path = match resolve_sound(&self.sounds.clips, name, RELAY_EXTENSION) {
            Ok(path) => path,
            Err(reply) => return reply,
        };

        let player = self.player.clone();
        let ratio = self.device_ratio;
        tokio::spawn(async move {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    log::error!("Failed to open {}: {}", path.display(), e);
                    return;
                }
            };

            // 设备采样率 -> 升采样 -> 播放
            let (tx_device, rx_device) = mpsc::channel(16);
            let (tx_up, rx_up) = mpsc::channel(16);
            tokio::spawn(async move {
                if let Err(e) = pcm_stream::read_pcm(file, tx_device).await {
                    log::error!("Relay read error: {}", e);
                }
            });
            tokio::spawn(resample::up_sample(ratio, rx_device, tx_up));

            if let Err(e) = player.stream(rx_up).await {
                log::error!("Relay of {} failed: {}", path.display(), e);
            }
        });
        format!("Relaying {}", name)
    }

    fn stop(&self) -> String {
        if !self.player.is_playing() {
            return "Nothing is playing".to_string();
        }
        self.player.stop_audio();
        "Stopped".to_string()
    }

    fn show_volume(&self) -> String {
        let (min, max) = self.player.volume_range();
        format!("Volume: {} dB ({}..{} dB)", self.player.volume(), min, max)
    }

    fn set_volume(&self, db: &str) -> String {
        let Ok(db) = db.trim_start_matches('+').parse::<i32>() else {
            return format!("Invalid volume: {}", db);
        };
        match self.player.set_volume(db) {
            Ok(()) => format!("Volume set to {} dB", db),
            Err(e) => e.to_string(),
        }
    }

    fn step_volume(&self, direction: i32) -> String {
        let db = self.player.change_volume(direction * self.player.volume_step());
        format!("Volume: {} dB", db)
    }
}


/// Only bare names inside `dir` are accepted.
fn resolve_sound(dir: &Path, name: &str, extension: &str) -> Result<PathBuf, String> {
    // 只允许目录内的文件名
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(format!("Invalid sound name: {}", name));
    }
    let path = dir.join(format!("{}.{}", name, extension));
    if !path.is_file() {
        return Err(format!("No such sound: {}", name));
    }
    Ok(path)
}

const HELP: &str = "Commands: play <name>, hold <name>, loop <n> <name>, relay <name>, \
stop, volume [dB], volume++, volume--";
