//! Jitter-buffered mixer for concurrent speakers.
//!
//! Every speaker gets its own sample queue, fed by a producer task as packets
//! arrive. A single consumer mixes one sample from each queue per round once
//! the fullest queue holds at least the jitter threshold (20 ms by default),
//! so irregular packet arrival is smoothed out at the cost of that latency.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::audio_config::AudioConfig;
use super::lock;
use super::sample::mix;

/// Rounds batched into one output chunk by [`Mixer::stream`].
const STREAM_CHUNK: usize = 480;

/// Back-off while no round is ready.
const IDLE_POLL: Duration = Duration::from_millis(1);

// =============================================================================
// Speaker Queue
// =============================================================================

struct QueueState {
    samples: VecDeque<i16>,
    /// The packet sequence has ended, no more samples will arrive
    closed: bool,
    /// The queue has reached the jitter threshold at least once
    primed: bool,
}

/// Outcome of pulling one sample from a speaker.
#[derive(Debug, PartialEq, Eq)]
enum Pull {
    Sample(i16),
    /// Open but momentarily empty: contributes silence
    Empty,
    /// Closed and drained: the speaker leaves the mix
    Exhausted,
}

struct SpeakerQueue {
    name: String,
    /// Older samples are dropped beyond this many
    max_queued: usize,
    state: Mutex<QueueState>,
}

impl SpeakerQueue {
    fn new(name: String, max_queued: usize) -> Self {
        Self {
            name,
            max_queued,
            state: Mutex::new(QueueState {
                samples: VecDeque::new(),
                closed: false,
                primed: false,
            }),
        }
    }

    fn push(&self, packet: &[i16]) {
        let mut state = lock(&self.state);
        state.samples.extend(packet.iter().copied());

        let excess = state.samples.len().saturating_sub(self.max_queued);
        if excess > 0 {
            state.samples.drain(..excess);
            log::trace!("Speaker {}: dropped {} stale samples", self.name, excess);
        }
    }

    fn close(&self) {
        lock(&self.state).closed = true;
    }

    fn pull(&self) -> Pull {
        let mut state = lock(&self.state);
        match state.samples.pop_front() {
            Some(s) => Pull::Sample(s),
            None if state.closed => Pull::Exhausted,
            None => Pull::Empty,
        }
    }
}

// =============================================================================
// Mixer
// =============================================================================

/// Mixes any number of speakers into one sample stream.
///
/// Cloning is cheap; clones share the same set of speakers.
#[derive(Clone)]
pub struct Mixer {
    speakers: Arc<Mutex<Vec<Arc<SpeakerQueue>>>>,
    threshold: usize,
    max_queued: usize,
}

impl Mixer {
    /// `threshold` is the number of samples the fullest queue must hold
    /// before a round is mixed; `max_queued` caps every speaker's queue.
    pub fn new(threshold: usize, max_queued: usize) -> Self {
        Self {
            speakers: Arc::new(Mutex::new(Vec::new())),
            threshold,
            max_queued: max_queued.max(threshold),
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.jitter_buffer_samples(), config.max_queued_samples())
    }

    /// Number of speakers currently in the mix.
    pub fn active_speakers(&self) -> usize {
        lock(&self.speakers).len()
    }

    fn register(&self, name: String) -> Arc<SpeakerQueue> {
        let queue = Arc::new(SpeakerQueue::new(name, self.max_queued));
        lock(&self.speakers).push(queue.clone());
        queue
    }

    /// Add a speaker whose audio arrives as packets on `packets`.
    ///
    /// Spawns the producer task; the speaker leaves the mix once the channel
    /// is closed and everything it sent has been mixed.
    pub fn add_speaker(
        &self,
        name: impl Into<String>,
        mut packets: mpsc::Receiver<Vec<i16>>,
    ) -> JoinHandle<()> {
        let queue = self.register(name.into());
        log::info!("Speaker {} joined the mix", queue.name);

        tokio::spawn(async move {
            while let Some(packet) = packets.recv().await {
                queue.push(&packet);
            }
            queue.close();
            log::debug!("Speaker {} stopped transmitting", queue.name);
        })
    }

    /// Mix a single round. `None` means not ready: retry later.
    pub fn sample(&self) -> Option<i16> {
        let mut speakers = lock(&self.speakers);
        self.round(&mut speakers)
    }

    fn round(&self, speakers: &mut Vec<Arc<SpeakerQueue>>) -> Option<i16> {
        let mut max = 0;
        let mut draining = false;
        speakers.retain(|queue| {
            let mut state = lock(&queue.state);
            let len = state.samples.len();
            if len >= self.threshold {
                state.primed = true;
            }
            if state.closed && len == 0 {
                log::info!("Speaker {} left the mix", queue.name);
                return false;
            }
            // A finished speaker flushes what it has left below the threshold
            draining |= state.closed && state.primed;
            max = max.max(len);
            true
        });

        if max < self.threshold && !draining {
            return None;
        }

        let mut out = 0i16;
        speakers.retain(|queue| match queue.pull() {
            Pull::Sample(s) => {
                out = mix(out, s);
                true
            }
            Pull::Empty => true,
            Pull::Exhausted => {
                log::info!("Speaker {} left the mix", queue.name);
                false
            }
        });
        Some(out)
    }

    /// Consumer loop: send mixed chunks to `out` until it is dropped.
    pub async fn stream(self, out: mpsc::Sender<Vec<i16>>) {
        loop {
            let mut chunk = Vec::with_capacity(STREAM_CHUNK);
            while chunk.len() < STREAM_CHUNK {
                match self.sample() {
                    Some(s) => chunk.push(s),
                    None => break,
                }
            }
            if chunk.is_empty() {
                if out.is_closed() {
                    break;
                }
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }
            if out.send(chunk).await.is_err() {
                break;
            }
        }
        log::debug!("Mixer output closed");
    }
}
