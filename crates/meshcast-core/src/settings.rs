// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed, validated playback configuration.

use thiserror::Error;
use tracing::debug;

use crate::{BUFFER_CAPACITY, DEFAULT_ROLLBACK_THRESHOLD};

/// Lowest accepted target frame rate.
pub const MIN_FRAME_RATE: u32 = 1;
/// Highest accepted target frame rate.
pub const MAX_FRAME_RATE: u32 = 240;

/// Rejected playback setting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// Freeze threshold larger than the buffer can ever hold.
    #[error("minimum playable frame {requested} exceeds buffer capacity {capacity}")]
    MinimumPlayableTooLarge {
        /// Requested threshold.
        requested: usize,
        /// Buffer capacity.
        capacity: usize,
    },
    /// Tick rate of zero.
    #[error("tick rate must be at least 1 Hz")]
    ZeroTickRate,
}

/// Playback knobs read by the pacer and reconciliation every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSettings {
    frame_rate: u32,
    minimum_playable_frame: usize,
    tick_rate_hz: u32,
    rollback_threshold: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            frame_rate: 60,
            minimum_playable_frame: 0,
            tick_rate_hz: 60,
            rollback_threshold: DEFAULT_ROLLBACK_THRESHOLD,
        }
    }
}

impl PlaybackSettings {
    /// Target playback frame rate.
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Set the target frame rate, clamped to `MIN_FRAME_RATE..=MAX_FRAME_RATE`.
    /// Returns the applied value.
    pub fn set_frame_rate(&mut self, fps: u32) -> u32 {
        let applied = fps.clamp(MIN_FRAME_RATE, MAX_FRAME_RATE);
        if applied != fps {
            debug!(requested = fps, applied, "frame rate clamped");
        }
        self.frame_rate = applied;
        applied
    }

    /// Buffered-frame count below which playback freezes.
    pub fn minimum_playable_frame(&self) -> usize {
        self.minimum_playable_frame
    }

    /// Set the freeze threshold; must not exceed [`BUFFER_CAPACITY`].
    pub fn set_minimum_playable_frame(&mut self, frames: usize) -> Result<(), SettingsError> {
        if frames > BUFFER_CAPACITY {
            return Err(SettingsError::MinimumPlayableTooLarge {
                requested: frames,
                capacity: BUFFER_CAPACITY,
            });
        }
        self.minimum_playable_frame = frames;
        Ok(())
    }

    /// Rate at which the host calls the pacer.
    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    /// Set the host tick rate.
    pub fn set_tick_rate_hz(&mut self, hz: u32) -> Result<(), SettingsError> {
        if hz == 0 {
            return Err(SettingsError::ZeroTickRate);
        }
        self.tick_rate_hz = hz;
        Ok(())
    }

    /// Largest backward gap treated as WAIT rather than ROLLBACK.
    pub fn rollback_threshold(&self) -> u64 {
        self.rollback_threshold
    }

    /// Set the WAIT/ROLLBACK boundary.
    pub fn set_rollback_threshold(&mut self, frames: u64) {
        self.rollback_threshold = frames;
    }

    /// `floor(1000 / frame_rate)` milliseconds between dequeues.
    pub fn desired_frame_interval_ms(&self) -> u64 {
        1000 / u64::from(self.frame_rate)
    }

    /// Whether the target rate is slower than the tick source, so dequeues
    /// must be spaced out in time.
    pub fn needs_pacing(&self) -> bool {
        self.frame_rate < self.tick_rate_hz
    }
}
