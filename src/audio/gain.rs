//! Volume in decibels, converted to a linear amplitude on read.

use super::audio_config::AudioConfig;
use super::error::AudioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume {
    db: i32,
    min: i32,
    max: i32,
    step: i32,
}

impl Volume {
    pub fn new(db: i32, min: i32, max: i32, step: i32) -> Self {
        Self {
            db: db.clamp(min, max),
            min,
            max,
            step,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(
            config.default_volume_db,
            config.min_volume_db,
            config.max_volume_db,
            config.volume_step_db,
        )
    }

    /// Current volume in dB.
    pub fn db(&self) -> i32 {
        self.db
    }

    pub fn range(&self) -> (i32, i32) {
        (self.min, self.max)
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    /// Set an absolute volume. Values outside the range are rejected.
    pub fn set(&mut self, db: i32) -> Result<(), AudioError> {
        if db < self.min || db > self.max {
            return Err(AudioError::VolumeOutOfRange {
                value: db,
                min: self.min,
                max: self.max,
            });
        }
        self.db = db;
        Ok(())
    }

    /// Change the volume relative to the current one, clamped to the range.
    pub fn change(&mut self, delta: i32) -> i32 {
        self.db = self.db.saturating_add(delta).clamp(self.min, self.max);
        self.db
    }

    /// Linear amplitude multiplier: `10^(dB/20)`.
    pub fn amplitude(&self) -> f32 {
        amplitude(self.db)
    }
}

pub fn amplitude(db: i32) -> f32 {
    10f32.powf(db as f32 / 20.0)
}
