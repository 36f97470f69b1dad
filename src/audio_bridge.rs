use crate::audio::{Mixer, VoiceLink};
use crate::config::BridgeConfig;
use bytes::{Buf, BufMut};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

/// Packets buffered per remote speaker before new ones are dropped.
const SPEAKER_QUEUE_PACKETS: usize = 32;

/// Receiving ends of outgoing playback sessions, in the order they opened.
pub type OutgoingSessions = mpsc::UnboundedReceiver<mpsc::Receiver<Vec<i16>>>;

struct Speaker {
    tx: mpsc::Sender<Vec<i16>>,
    last_heard: Instant,
}

/// Voice transport over UDP: raw little-endian PCM frames, one per datagram.
///
/// Outgoing frames go to the configured remote address, one playback session
/// after another. Incoming datagrams are grouped by sender address, each
/// sender being one speaker in the mix.
pub struct AudioBridge {
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
    sessions: mpsc::UnboundedSender<mpsc::Receiver<Vec<i16>>>,
    /// Frame capacity of each session's channel
    queue_frames: usize,
    muted: AtomicBool,
    deafened: AtomicBool,
}

impl AudioBridge {
    /// Bind the local port. Returns the bridge and the queue of outgoing
    /// sessions, to be handed to [`AudioBridge::run_outgoing`].
    pub async fn bind(
        config: &BridgeConfig,
        queue_frames: usize,
    ) -> anyhow::Result<(Self, OutgoingSessions)> {
        let socket = UdpSocket::bind(format!("0.0.0.0:{}", config.local_port)).await?;
        let (sessions, rx) = mpsc::unbounded_channel();

        log::info!(
            "Audio bridge listening on {}, sending to {}",
            socket.local_addr()?,
            config.remote_addr
        );

        let bridge = Self {
            socket: Arc::new(socket),
            remote_addr: config.remote_addr,
            sessions,
            queue_frames: queue_frames.max(1),
            muted: AtomicBool::new(false),
            deafened: AtomicBool::new(false),
        };
        Ok((bridge, rx))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Transmit every session's frames in turn until the bridge is dropped.
    ///
    /// A session is done once its sender is dropped and its frames are sent.
    pub async fn run_outgoing(&self, mut sessions: OutgoingSessions) -> anyhow::Result<()> {
        while let Some(mut rx) = sessions.recv().await {
            let mut frames = 0usize;
            while let Some(frame) = rx.recv().await {
                if self.self_muted() {
                    continue;
                }
                let data = encode_frame(&frame);
                // 远端未启动时发送会失败，丢弃该帧即可
                if let Err(e) = self.socket.send_to(&data, self.remote_addr).await {
                    log::warn!("Failed to send audio frame: {}", e);
                    continue;
                }
                frames += 1;
            }
            log::debug!("Outgoing session closed after {} frames", frames);
        }
        Ok(())
    }

    /// Receive speaker audio and feed it to the mixer.
    ///
    /// A speaker that has been silent for `idle` is closed: whatever it sent
    /// is still mixed, then it leaves the mix. It rejoins as a new speaker
    /// with its next datagram.
    pub async fn run_incoming(&self, mixer: Mixer, idle: Duration) -> anyhow::Result<()> {
        let mut speakers: HashMap<SocketAddr, Speaker> = HashMap::new();
        let mut buf = [0u8; 4096]; // 单个数据包最大4KB
        let mut sweep = time::interval((idle / 2).max(Duration::from_millis(1)));

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, addr) = received?;
                    if self.self_deafened() {
                        continue;
                    }
                    let packet = decode_datagram(&buf[..len]);
                    if packet.is_empty() {
                        continue;
                    }

                    let speaker = speakers.entry(addr).or_insert_with(|| {
                        let (tx, rx) = mpsc::channel(SPEAKER_QUEUE_PACKETS);
                        mixer.add_speaker(addr.to_string(), rx);
                        log::debug!("{} speaker(s) in the mix", mixer.active_speakers());
                        Speaker { tx, last_heard: Instant::now() }
                    });
                    speaker.last_heard = Instant::now();
                    if speaker.tx.try_send(packet).is_err() {
                        log::warn!("Speaker {} is backed up, dropping packet", addr);
                    }
                }
                _ = sweep.tick() => {
                    speakers.retain(|addr, speaker| {
                        let active = speaker.last_heard.elapsed() < idle;
                        if !active {
                            log::debug!("Speaker {} went idle", addr);
                        }
                        active
                    });
                }
            }
        }
    }
}

impl VoiceLink for AudioBridge {
    fn audio_outgoing(&self) -> mpsc::Sender<Vec<i16>> {
        let (tx, rx) = mpsc::channel(self.queue_frames);
        // With run_outgoing gone the session gets a closed sink
        if self.sessions.send(rx).is_err() {
            log::warn!("Audio bridge is no longer transmitting");
        }
        tx
    }

    fn self_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    fn set_self_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn self_deafened(&self) -> bool {
        self.deafened.load(Ordering::SeqCst)
    }

    fn set_self_deafened(&self, deafened: bool) {
        self.deafened.store(deafened, Ordering::SeqCst);
    }
}

fn encode_frame(frame: &[i16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(frame.len() * 2);
    for &s in frame {
        data.put_i16_le(s);
    }
    data
}

/// Decode a datagram as PCM; an odd trailing byte is ignored.
fn decode_datagram(mut data: &[u8]) -> Vec<i16> {
    let mut packet = Vec::with_capacity(data.len() / 2);
    while data.remaining() >= 2 {
        packet.push(data.get_i16_le());
    }
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bridge_to(peer: &UdpSocket, idle_ms: u64) -> (Arc<AudioBridge>, OutgoingSessions) {
        let config = BridgeConfig {
            local_port: 0,
            remote_addr: peer.local_addr().unwrap(),
            speaker_idle: Duration::from_millis(idle_ms),
            device_rate: 8000,
            record_path: "unused.raw".into(),
        };
        let (bridge, rx) = AudioBridge::bind(&config, 4).await.unwrap();
        (Arc::new(bridge), rx)
    }

    fn loopback(addr: SocketAddr) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], addr.port()))
    }

    #[test]
    fn test_datagram_codec() {
        let frame = [0i16, 1, -1, i16::MAX, i16::MIN];
        let mut data = encode_frame(&frame);
        assert_eq!(&data[..4], &[0, 0, 1, 0]);
        data.push(0x7f);
        assert_eq!(decode_datagram(&data), frame);
    }

    async fn recv_frame(peer: &UdpSocket) -> Vec<i16> {
        let mut buf = [0u8; 2048];
        let (len, _) = time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        decode_datagram(&buf[..len])
    }

    #[tokio::test]
    async fn test_outgoing_frames_skip_while_muted() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, sessions) = bridge_to(&peer, 200).await;
        let sender = bridge.audio_outgoing();
        let task = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.run_outgoing(sessions).await })
        };

        bridge.set_self_muted(true);
        sender.send(vec![1; 480]).await.unwrap();
        // Let the muted frame be consumed before unmuting
        while sender.capacity() < sender.max_capacity() {
            time::sleep(Duration::from_millis(1)).await;
        }
        time::sleep(Duration::from_millis(20)).await;
        bridge.set_self_muted(false);
        sender.send(vec![2; 480]).await.unwrap();

        assert_eq!(recv_frame(&peer).await, vec![2; 480]);

        task.abort();
    }

    #[tokio::test]
    async fn test_each_session_gets_its_own_closing_channel() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, sessions) = bridge_to(&peer, 200).await;

        let first = bridge.audio_outgoing();
        let second = bridge.audio_outgoing();
        assert!(!first.same_channel(&second));
        first.send(vec![1; 480]).await.unwrap();
        second.send(vec![2; 480]).await.unwrap();
        drop(first);

        let task = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.run_outgoing(sessions).await })
        };

        // The second session is only served once the first has closed
        assert_eq!(recv_frame(&peer).await, vec![1; 480]);
        assert_eq!(recv_frame(&peer).await, vec![2; 480]);
        drop(second);

        task.abort();
    }

    #[tokio::test]
    async fn test_session_without_transmitter_sees_closed_sink() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, sessions) = bridge_to(&peer, 200).await;
        drop(sessions);

        let sender = bridge.audio_outgoing();
        assert!(sender.is_closed());
        assert!(sender.send(vec![1; 480]).await.is_err());
    }

    #[tokio::test]
    async fn test_incoming_speaker_is_mixed_then_leaves() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (bridge, _sessions) = bridge_to(&peer, 50).await;
        let mixer = Mixer::new(960, 48000);
        let task = {
            let bridge = bridge.clone();
            let mixer = mixer.clone();
            tokio::spawn(async move { bridge.run_incoming(mixer, Duration::from_millis(50)).await })
        };

        let target = loopback(bridge.local_addr().unwrap());
        for _ in 0..3 {
            peer.send_to(&encode_frame(&[250; 480]), target).await.unwrap();
        }

        let mut mixed = Vec::new();
        let mut joined = false;
        for _ in 0..200 {
            joined |= mixer.active_speakers() > 0;
            while let Some(s) = mixer.sample() {
                mixed.push(s);
            }
            if joined && mixed.len() == 1440 && mixer.active_speakers() == 0 {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }

        assert!(joined);
        assert_eq!(mixed.len(), 1440);
        assert!(mixed.iter().all(|&s| s == 250));
        assert_eq!(mixer.active_speakers(), 0);

        task.abort();
    }
}
