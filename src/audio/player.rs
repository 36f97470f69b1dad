//! Paced playback into the outgoing voice channel.
//!
//! A session holds the playback gate for its whole lifetime: it saves the
//! link's self-muted/self-deafened state, unmutes, and restores the saved
//! state when it ends, whichever way it ends. Frames are pushed at the
//! configured frame interval with the current volume applied. The stop flag
//! and the volume are read at the top of every frame, so a stop request
//! never lets another frame out once it is seen.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, MutexGuard as GateGuard};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};

use super::audio_config::AudioConfig;
use super::audio_loop::AudioLoop;
use super::decoders::Decoders;
use super::error::AudioError;
use super::gain::Volume;
use super::lock;
use super::sample::scale_frame;
use super::source::{check_count, read_all, BufferSource, SampleSource};

/// The voice connection as seen by the playback engine.
pub trait VoiceLink: Send + Sync {
    /// Open the outgoing frame channel for one session. The session drops
    /// the sender when it ends, which closes the channel for the receiver.
    fn audio_outgoing(&self) -> mpsc::Sender<Vec<i16>>;

    fn self_muted(&self) -> bool;
    fn set_self_muted(&self, muted: bool);
    fn self_deafened(&self) -> bool;
    fn set_self_deafened(&self, deafened: bool);
}

struct ClientState {
    volume: Volume,
    stop: bool,
}

struct Inner {
    link: Arc<dyn VoiceLink>,
    decoders: Decoders,
    state: Mutex<ClientState>,
    /// Held by the playback session in flight
    gate: tokio::sync::Mutex<()>,
    frame_size: usize,
    interval: Duration,
}

/// Scoped playback session state. Dropping it restores the link's
/// mute/deafen flags and releases the gate.
struct AudioLock<'a> {
    _gate: GateGuard<'a, ()>,
    link: &'a dyn VoiceLink,
    muted: bool,
    deafened: bool,
}

impl Drop for AudioLock<'_> {
    fn drop(&mut self) {
        self.link.set_self_muted(self.muted);
        self.link.set_self_deafened(self.deafened);
        log::debug!(
            "Audio unlocked, restored muted={} deafened={}",
            self.muted,
            self.deafened
        );
    }
}

/// Cloning is cheap; clones share volume, stop flag and playback gate.
#[derive(Clone)]
pub struct Player {
    inner: Arc<Inner>,
}

impl Player {
    pub fn new(link: Arc<dyn VoiceLink>, config: &AudioConfig) -> Self {
        Self::with_decoders(link, config, Decoders::default())
    }

    pub fn with_decoders(link: Arc<dyn VoiceLink>, config: &AudioConfig, decoders: Decoders) -> Self {
        Self {
            inner: Arc::new(Inner {
                link,
                decoders,
                state: Mutex::new(ClientState {
                    volume: Volume::from_config(config),
                    stop: false,
                }),
                gate: tokio::sync::Mutex::new(()),
                frame_size: config.frame_size(),
                interval: config.frame_interval(),
            }),
        }
    }

    // =========================================================================
    // Volume and stop
    // =========================================================================

    pub fn volume(&self) -> i32 {
        lock(&self.inner.state).volume.db()
    }

    pub fn set_volume(&self, db: i32) -> Result<(), AudioError> {
        lock(&self.inner.state).volume.set(db)?;
        log::info!("Volume set to {} dB (amplitude {:.3})", db, self.amplitude());
        Ok(())
    }

    /// Shift the volume by `delta` dB, clamped. Returns the new volume.
    pub fn change_volume(&self, delta: i32) -> i32 {
        let db = lock(&self.inner.state).volume.change(delta);
        log::info!("Volume changed to {} dB (amplitude {:.3})", db, self.amplitude());
        db
    }

    pub fn volume_step(&self) -> i32 {
        lock(&self.inner.state).volume.step()
    }

    pub fn volume_range(&self) -> (i32, i32) {
        lock(&self.inner.state).volume.range()
    }

    pub fn amplitude(&self) -> f32 {
        lock(&self.inner.state).volume.amplitude()
    }

    /// Ask the session in flight to end before its next frame.
    pub fn stop_audio(&self) {
        lock(&self.inner.state).stop = true;
        log::info!("Audio stop requested");
    }

    /// Amplitude and stop flag, read together once per frame.
    fn frame_state(&self) -> (f32, bool) {
        let state = lock(&self.inner.state);
        (state.volume.amplitude(), state.stop)
    }

    pub fn is_playing(&self) -> bool {
        self.inner.gate.try_lock().is_err()
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Wait for the gate, then take over the link for one session.
    async fn lock_audio(&self) -> AudioLock<'_> {
        let gate = self.inner.gate.lock().await;
        let link = self.inner.link.as_ref();

        let session = AudioLock {
            _gate: gate,
            link,
            muted: link.self_muted(),
            deafened: link.self_deafened(),
        };
        link.set_self_deafened(false);
        link.set_self_muted(false);
        lock(&self.inner.state).stop = false;

        log::debug!(
            "Audio locked, saved muted={} deafened={}",
            session.muted,
            session.deafened
        );
        session
    }

    fn ticker(&self) -> Interval {
        let mut ticker = time::interval(self.inner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// Play a source to the end, or until stopped.
    ///
    /// Waits for any session already in flight. The source is closed on
    /// every exit path.
    pub async fn play<S: SampleSource>(&self, mut source: S) -> Result<(), AudioError> {
        let _session = self.lock_audio().await;
        let result = self.send_frames(&mut source).await;
        source.close();
        result
    }

    async fn send_frames<S: SampleSource>(&self, source: &mut S) -> Result<(), AudioError> {
        let sink = self.inner.link.audio_outgoing();
        let frame_size = self.inner.frame_size;
        let mut ticker = self.ticker();
        ticker.tick().await;

        let mut frames = 0usize;
        loop {
            let (amplitude, stop) = self.frame_state();
            if stop {
                log::info!("Playback stopped after {} frames", frames);
                return Ok(());
            }

            let mut frame = vec![0i16; frame_size];
            let (filled, ended) = match fill_frame(source, &mut frame) {
                Ok(r) => r,
                Err(e) => {
                    log::error!("Playback aborted after {} frames: {}", frames, e);
                    return Err(e);
                }
            };
            if filled == 0 && ended {
                break;
            }

            scale_frame(&mut frame, amplitude);
            sink.send(frame).await.map_err(|_| AudioError::SinkClosed)?;
            frames += 1;

            if ended {
                break;
            }
            ticker.tick().await;
        }

        log::info!("Playback finished: {} frames", frames);
        Ok(())
    }

    /// Play live samples from a channel until it closes, or until stopped.
    ///
    /// Incoming chunks are re-cut into frames; a trailing partial frame is
    /// sent as is.
    pub async fn stream(&self, mut rx: mpsc::Receiver<Vec<i16>>) -> Result<(), AudioError> {
        let _session = self.lock_audio().await;
        let sink = self.inner.link.audio_outgoing();
        let frame_size = self.inner.frame_size;
        let mut ticker = self.ticker();
        ticker.tick().await;

        let mut pending: Vec<i16> = Vec::with_capacity(frame_size * 2);
        let mut frames = 0usize;
        while let Some(chunk) = rx.recv().await {
            pending.extend(chunk);
            while pending.len() >= frame_size {
                let (amplitude, stop) = self.frame_state();
                if stop {
                    log::info!("Stream stopped after {} frames", frames);
                    return Ok(());
                }
                let mut frame: Vec<i16> = pending.drain(..frame_size).collect();
                scale_frame(&mut frame, amplitude);
                sink.send(frame).await.map_err(|_| AudioError::SinkClosed)?;
                frames += 1;
                ticker.tick().await;
            }
        }

        if !pending.is_empty() {
            let (amplitude, stop) = self.frame_state();
            if stop {
                log::info!("Stream stopped after {} frames", frames);
                return Ok(());
            }
            scale_frame(&mut pending, amplitude);
            sink.send(pending).await.map_err(|_| AudioError::SinkClosed)?;
            frames += 1;
        }
        log::info!("Stream finished: {} frames", frames);
        Ok(())
    }

    // =========================================================================
    // Convenience
    // =========================================================================

    /// Play in-memory samples once.
    pub async fn send_audio(&self, samples: Vec<i16>) -> Result<(), AudioError> {
        self.play(BufferSource::new(samples)).await
    }

    /// Decode and play a sound file `count` times, or forever with `None`.
    pub async fn play_loop(&self, path: impl AsRef<Path>, count: Option<usize>) -> Result<(), AudioError> {
        let source = self.inner.decoders.open(path)?;
        self.play(AudioLoop::new(source, count)).await
    }

    /// Decode a sound file up front, then play it once in the background.
    ///
    /// Open and decode errors are returned here; the file is closed before
    /// playback starts.
    pub fn play_sound(&self, path: impl AsRef<Path>) -> Result<JoinHandle<Result<(), AudioError>>, AudioError> {
        let path = path.as_ref();
        let mut source = self.inner.decoders.open(path)?;
        let samples = read_all(&mut source);
        source.close();
        let samples = samples?;
        log::debug!("Decoded {}: {} samples", path.display(), samples.len());

        let player = self.clone();
        let path = path.to_path_buf();
        Ok(tokio::spawn(async move {
            let result = player.send_audio(samples).await;
            if let Err(e) = &result {
                log::error!("Failed to play {}: {}", path.display(), e);
            }
            result
        }))
    }

    /// Loop a sound file in the background until stopped.
    pub fn play_hold(&self, path: impl AsRef<Path>) -> JoinHandle<Result<(), AudioError>> {
        let player = self.clone();
        let path = path.as_ref().to_path_buf();
        tokio::spawn(async move {
            let result = player.play_loop(&path, None).await;
            if let Err(e) = &result {
                log::error!("Failed to hold {}: {}", path.display(), e);
            }
            result
        })
    }
}

/// Fill `frame` from `source`. Returns the samples written and whether the
/// source has ended. Unfilled samples are left at zero.
fn fill_frame<S: SampleSource + ?Sized>(
    source: &mut S,
    frame: &mut [i16],
) -> Result<(usize, bool), AudioError> {
    let mut filled = 0;
    while filled < frame.len() {
        let room = frame.len() - filled;
        let status = check_count(source.read(&mut frame[filled..])?, room);
        filled += status.len();
        if status.is_end() {
            return Ok((filled, true));
        }
    }
    Ok((filled, false))
}
