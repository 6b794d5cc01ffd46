// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Viewer-side snapshot of published session state, logged as it changes.

use meshcast_core::{FrameIndex, StateChange, StateObserver};
use tracing::{debug, info, trace, warn};

/// Latest value of every observable the session publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerState {
    pub frame_index: Option<FrameIndex>,
    pub frames_shown: u64,
    pub buffered: usize,
    pub buffer_open: bool,
    pub num_frames: u64,
    pub pipeline: Option<String>,
    pub playing: bool,
    pub connected: bool,
    pub alerts: Vec<String>,
}

impl StateObserver for ViewerState {
    fn publish(&mut self, change: StateChange) {
        match change {
            StateChange::FrameIndex(index) => {
                self.frame_index = Some(index);
                self.frames_shown += 1;
                debug!(index, num_frames = self.num_frames, buffered = self.buffered, "frame");
            }
            StateChange::BufferedCount(n) => {
                self.buffered = n;
                trace!(buffered = n, "buffer level");
            }
            StateChange::BufferOpen(open) => {
                self.buffer_open = open;
                debug!(open, "buffer admission");
            }
            StateChange::NumFrames(n) => {
                self.num_frames = n;
                info!(num_frames = n, "clip length");
            }
            StateChange::PipelineName(name) => {
                info!(pipeline = %name, "connected to pipeline");
                self.pipeline = Some(name);
            }
            StateChange::Playing(playing) => {
                self.playing = playing;
                info!(playing, "playback");
            }
            StateChange::Connected(connected) => {
                self.connected = connected;
                info!(connected, "connection");
            }
            StateChange::Alert(message) => {
                warn!(%message, "alert");
                self.alerts.push(message);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tracks_latest_values() {
        let mut state = ViewerState::default();
        for change in [
            StateChange::Connected(true),
            StateChange::PipelineName("pulsing_icosphere".into()),
            StateChange::NumFrames(120),
            StateChange::FrameIndex(0),
            StateChange::FrameIndex(1),
            StateChange::BufferedCount(7),
            StateChange::Alert("hello".into()),
        ] {
            state.publish(change);
        }
        assert!(state.connected);
        assert_eq!(state.pipeline.as_deref(), Some("pulsing_icosphere"));
        assert_eq!(state.num_frames, 120);
        assert_eq!(state.frame_index, Some(1));
        assert_eq!(state.frames_shown, 2);
        assert_eq!(state.buffered, 7);
        assert_eq!(state.alerts, vec!["hello".to_owned()]);
    }
}
