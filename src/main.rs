mod audio;
mod audio_bridge;
mod config;
mod controller;

use anyhow::Context;
use audio::{resample, pcm_stream, Mixer, Player};
use audio_bridge::AudioBridge;
use config::Config;
use controller::CoreController;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().map_err(anyhow::Error::msg)?;
    log::info!("{} v{} starting", config.app_name, config.app_version);

    let ratio = downsample_ratio(config.audio.sample_rate, config.bridge.device_rate)?;

    // 启动音频桥，收发UDP语音帧
    let (bridge, rx_outgoing) =
        AudioBridge::bind(&config.bridge, config.audio.outgoing_queue_frames).await?;
    let bridge = Arc::new(bridge);

    let bridge_clone = bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = bridge_clone.run_outgoing(rx_outgoing).await {
            log::error!("AudioBridge outgoing error: {}", e);
        }
    });

    // 接收到的说话人音频进入混音器
    let mixer = Mixer::from_config(&config.audio);
    let bridge_clone = bridge.clone();
    let mixer_clone = mixer.clone();
    let idle = config.bridge.speaker_idle;
    tokio::spawn(async move {
        if let Err(e) = bridge_clone.run_incoming(mixer_clone, idle).await {
            log::error!("AudioBridge incoming error: {}", e);
        }
    });

    // 混音 -> 降采样 -> 写入录音文件
    let record = tokio::fs::File::create(&config.bridge.record_path)
        .await
        .with_context(|| format!("Failed to create {}", config.bridge.record_path.display()))?;
    let recorder = Recorder::spawn(mixer, ratio, record);
    log::info!(
        "Recording mixed audio at {} Hz to {}",
        config.bridge.device_rate,
        config.bridge.record_path.display()
    );

    // 播放器和命令控制器
    let player = Player::new(bridge.clone(), &config.audio);
    let controller = CoreController::new(player.clone(), config.sounds.clone(), ratio);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    // 主循环：处理命令行输入，直到 Ctrl+C
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        let reply = controller.handle(&line);
                        if !reply.is_empty() {
                            println!("{}", reply);
                        }
                    }
                    None => {
                        log::info!("stdin closed, waiting for Ctrl+C");
                        stdin_open = false;
                    }
                }
            }
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                player.stop_audio();
                break;
            }
        }
    }

    recorder.finish().await;
    Ok(())
}

/// Mixed speaker audio, down-sampled to the device rate and written out.
struct Recorder {
    mixer: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Recorder {
    fn spawn<W>(mixer: Mixer, ratio: usize, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx_mixed, rx_mixed) = mpsc::channel::<Vec<i16>>(16);
        let (tx_device, rx_device) = mpsc::channel::<Vec<i16>>(16);
        let mixer = tokio::spawn(mixer.stream(tx_mixed));
        tokio::spawn(resample::down_sample(ratio, rx_mixed, tx_device));
        let writer = tokio::spawn(async move {
            if let Err(e) = pcm_stream::write_pcm(writer, rx_device).await {
                log::error!("Recording error: {}", e);
            }
        });
        Self { mixer, writer }
    }

    /// Stop mixing and wait until everything already mixed is written.
    ///
    /// Ending the mixer closes the down-sampler's input, which in turn lets
    /// the writer flush its tail and return.
    async fn finish(self) {
        self.mixer.abort();
        let _ = self.mixer.await;
        if let Err(e) = self.writer.await {
            log::error!("Recording task failed: {}", e);
        }
        log::info!("Recording closed");
    }
}

/// The mixer runs at `sample_rate`; the recording device takes an integer
/// fraction of it.
fn downsample_ratio(sample_rate: u32, device_rate: u32) -> anyhow::Result<usize> {
    if device_rate == 0 || sample_rate % device_rate != 0 {
        anyhow::bail!(
            "Device rate {} Hz does not divide the sample rate {} Hz",
            device_rate,
            sample_rate
        );
    }
    Ok((sample_rate / device_rate) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[tokio::test]
    async fn test_recorder_finish_writes_everything_mixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.raw");
        let file = tokio::fs::File::create(&path).await.unwrap();

        let mixer = Mixer::new(960, 48000);
        let recorder = Recorder::spawn(mixer.clone(), 6, file);

        let (tx, rx) = mpsc::channel(4);
        let producer = mixer.add_speaker("a", rx);
        tx.send(vec![300; 2000]).await.unwrap();
        drop(tx);
        producer.await.unwrap();

        for _ in 0..200 {
            if mixer.active_speakers() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(mixer.active_speakers(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        recorder.finish().await;

        // 2000 samples at a ratio of 6: 333 complete groups
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 666);
        assert!(bytes
            .chunks_exact(2)
            .all(|b| i16::from_le_bytes([b[0], b[1]]) == 300));
    }

    #[test]
    fn test_downsample_ratio() {
        assert_eq!(downsample_ratio(48000, 8000).unwrap(), 6);
        assert_eq!(downsample_ratio(48000, 48000).unwrap(), 1);
        assert!(downsample_ratio(48000, 44100).is_err());
        assert!(downsample_ratio(48000, 0).is_err());
    }
}
