// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Saved preferences for the meshcast viewer and producer host.

use meshcast_core::{PlaybackSettings, SettingsError, DEFAULT_ROLLBACK_THRESHOLD};
use meshcast_proto::{default_server_addr, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Saved preferences for a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerPrefs {
    /// Producer address to connect to.
    pub server_addr: SocketAddr,
    /// Playback knobs.
    pub playback: PlaybackPrefs,
    /// Start playing as soon as the preview frame is shown.
    pub autoplay: bool,
}

impl Default for ViewerPrefs {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            playback: PlaybackPrefs::default(),
            autoplay: true,
        }
    }
}

/// Persisted form of [`PlaybackSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackPrefs {
    /// Target playback rate in frames per second.
    pub frame_rate: u32,
    /// Buffered frames required before playback resumes from a freeze.
    pub minimum_playable_frame: usize,
    /// Render tick rate in Hz.
    pub tick_rate_hz: u32,
    /// Largest stale gap tolerated before repositioning the producer.
    pub rollback_threshold: u64,
}

impl Default for PlaybackPrefs {
    fn default() -> Self {
        Self::from(&PlaybackSettings::default())
    }
}

impl From<&PlaybackSettings> for PlaybackPrefs {
    fn from(s: &PlaybackSettings) -> Self {
        Self {
            frame_rate: s.frame_rate(),
            minimum_playable_frame: s.minimum_playable_frame(),
            tick_rate_hz: s.tick_rate_hz(),
            rollback_threshold: s.rollback_threshold(),
        }
    }
}

impl PlaybackPrefs {
    /// Validate into runtime settings. The frame rate is clamped; the other
    /// knobs are rejected when out of range.
    pub fn to_settings(&self) -> Result<PlaybackSettings, SettingsError> {
        let mut settings = PlaybackSettings::default();
        settings.set_frame_rate(self.frame_rate);
        settings.set_minimum_playable_frame(self.minimum_playable_frame)?;
        settings.set_tick_rate_hz(self.tick_rate_hz)?;
        settings.set_rollback_threshold(self.rollback_threshold);
        Ok(settings)
    }
}

/// Saved preferences for the producer host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPrefs {
    /// Address the producer listens on.
    pub listen_addr: SocketAddr,
    /// Pipeline to load on connect.
    pub pipeline_name: String,
    /// Clip length for synthetic pipelines.
    pub num_frames: u64,
    /// Pause after a reposition before producing again, in milliseconds.
    pub state_relief_ms: u64,
    /// Pause between steps while the viewer's buffer is closed, in milliseconds.
    pub buffer_relief_ms: u64,
}

impl Default for HostPrefs {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            pipeline_name: "pulsing_icosphere".into(),
            num_frames: 120,
            state_relief_ms: 500,
            buffer_relief_ms: 50,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_runtime_defaults() {
        let prefs = PlaybackPrefs::default();
        assert_eq!(prefs.frame_rate, 60);
        assert_eq!(prefs.minimum_playable_frame, 0);
        assert_eq!(prefs.rollback_threshold, DEFAULT_ROLLBACK_THRESHOLD);
        assert_eq!(prefs.to_settings().unwrap(), PlaybackSettings::default());
    }

    #[test]
    fn out_of_range_prefs_are_rejected_or_clamped() {
        let clamped = PlaybackPrefs {
            frame_rate: 1000,
            ..PlaybackPrefs::default()
        };
        assert_eq!(clamped.to_settings().unwrap().frame_rate(), 240);

        let too_many = PlaybackPrefs {
            minimum_playable_frame: 10_000,
            ..PlaybackPrefs::default()
        };
        assert!(too_many.to_settings().is_err());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let prefs: ViewerPrefs =
            serde_json::from_str(r#"{"playback": {"frame_rate": 24}}"#).unwrap();
        assert_eq!(prefs.server_addr, default_server_addr());
        assert_eq!(prefs.playback.frame_rate, 24);
        assert_eq!(prefs.playback.tick_rate_hz, 60);
        assert!(prefs.autoplay);

        let host: HostPrefs = serde_json::from_str(r#"{"num_frames": 30}"#).unwrap();
        assert_eq!(host.num_frames, 30);
        assert_eq!(host.listen_addr.port(), DEFAULT_PORT);
    }
}
