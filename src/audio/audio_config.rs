use std::time::Duration;

/// Audio pipeline configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Internal sample rate of the voice protocol (mono, 16-bit)
    pub sample_rate: u32,
    /// Duration of one outgoing frame in ms (e.g. 10)
    pub frame_duration_ms: u32,
    /// Audio the mixer buffers before it starts emitting, in ms
    pub jitter_buffer_ms: u32,
    /// Capacity of the outgoing frame channel, in frames
    pub outgoing_queue_frames: usize,
    /// Lowest allowed volume in dB
    pub min_volume_db: i32,
    /// Highest allowed volume in dB
    pub max_volume_db: i32,
    /// Volume at startup in dB
    pub default_volume_db: i32,
    /// Step used by relative volume changes in dB
    pub volume_step_db: i32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_duration_ms: 10,
            jitter_buffer_ms: 20,
            outgoing_queue_frames: 4,
            min_volume_db: -30,
            max_volume_db: 10,
            default_volume_db: 0,
            volume_step_db: 3,
        }
    }
}

impl AudioConfig {
    /// Number of samples in one outgoing frame.
    pub fn frame_size(&self) -> usize {
        (self.sample_rate * self.frame_duration_ms / 1000) as usize
    }

    /// Spacing between two outgoing frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    /// Mixer readiness threshold in samples.
    pub fn jitter_buffer_samples(&self) -> usize {
        (self.sample_rate * self.jitter_buffer_ms / 1000) as usize
    }

    /// Per-speaker mixer queue cap in samples: one second of audio.
    pub fn max_queued_samples(&self) -> usize {
        self.sample_rate as usize
    }
}
