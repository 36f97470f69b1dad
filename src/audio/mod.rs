//! audio - Voice bot audio pipeline
//!
//! Everything is mono 16-bit PCM at 48 kHz, moved around in 10 ms frames.
//! - Sources: decoders registered by file extension (raw PCM, Ogg Opus),
//!   in-memory buffers, and a loop wrapper replaying any of them
//! - Mixer: jitter-buffered sum of every speaker currently heard
//! - Player: paced playback into the outgoing voice channel with live gain
//! - Resampling and PCM byte streams for devices at other rates

use std::sync::{Mutex, MutexGuard};

mod audio_config;
mod audio_loop;
mod decoders;
mod error;
mod gain;
mod mixer;
#[cfg(test)]
pub(crate) mod mock_link;
mod opus_file;
pub mod pcm_stream;
mod player;
pub mod resample;
mod sample;
mod source;

pub use audio_config::AudioConfig;
pub use mixer::Mixer;
pub use player::{Player, VoiceLink};

/// Lock a short-held std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
