// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-tick playback driver: the only consumer of the frame buffer.
//!
//! One [`PlaybackPacer::tick`] runs per render tick and never overlaps with
//! inbound message handling. Within a tick the order is fixed:
//!
//! 1. a pending seek/clear runs and ends the tick;
//! 2. admission is re-evaluated;
//! 3. until a preview exists the head frame is peeked and shown;
//! 4. paused sessions hold the last shown frame;
//! 5. playing sessions freeze on starvation, unfreeze once enough frames are
//!    buffered (or the clip cannot supply more), and dequeue at most once per
//!    `floor(1000 / frame_rate)` ms;
//! 6. running past the clip end schedules a clear back to frame 0.

use tracing::{debug, trace};

use crate::{
    FlowController, FlowTransition, Frame, FrameBuffer, FrameIndex, PlaybackSettings, Ports,
    StateChange, SyncState, Topology,
};

/// Mutable playback state owned by the pacer.
///
/// Starts paused and frozen: the first dequeue waits for the minimum
/// playable frame count like any other restart from starvation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackState {
    /// Play/pause.
    pub is_playing: bool,
    /// Dequeue suspended until enough frames are buffered.
    pub freeze_buffer_head: bool,
    /// Set at loop wrap so the first tick after the clear freezes.
    pub replay_pending: bool,
    /// Whether a preview frame has been shown since the last reset.
    pub preview_established: bool,
    /// Seek/clear target to run on the next tick.
    pub pending_seek: Option<FrameIndex>,
    /// Tick time of the last dequeue, in host milliseconds.
    pub last_dequeue_ms: Option<u64>,
    /// Last frame index published as displayed.
    pub displayed: Option<FrameIndex>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            freeze_buffer_head: true,
            replay_pending: false,
            preview_established: false,
            pending_seek: None,
            last_dequeue_ms: None,
            displayed: None,
        }
    }
}

/// Coarse pacer state, derived from [`PlaybackState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerPhase {
    /// Waiting for the first frame after a reset.
    AwaitingPreview,
    /// Preview shown, playback paused.
    Paused,
    /// Playing and dequeuing.
    PlayingUnfrozen,
    /// Playing but starved; holding the head.
    PlayingFrozen,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Phase after the tick.
    pub phase: PacerPhase,
    /// Frame uploaded to the renderer this tick, if any.
    pub shown: Option<FrameIndex>,
    /// Whether that frame was dequeued (as opposed to a peeked preview).
    pub dequeued: bool,
    /// Seek/clear executed this tick.
    pub seek: Option<FrameIndex>,
    /// Admission change signalled this tick.
    pub flow: Option<FlowTransition>,
    /// Whether this tick scheduled a loop restart.
    pub loop_restart: bool,
}

impl TickOutcome {
    fn held(phase: PacerPhase) -> Self {
        Self {
            phase,
            shown: None,
            dequeued: false,
            seek: None,
            flow: None,
            loop_restart: false,
        }
    }
}

/// Buffer, cursor and configuration a tick operates on.
pub struct Stage<'a> {
    /// Frame queue.
    pub buffer: &'a mut FrameBuffer,
    /// Clip length and buffer head.
    pub sync: &'a mut SyncState,
    /// Playback knobs.
    pub settings: &'a PlaybackSettings,
    /// Session topology used for normals; `None` before it arrives.
    pub topology: Option<&'a Topology>,
}

/// Per-tick consumer of the frame buffer.
#[derive(Debug, Clone, Default)]
pub struct PlaybackPacer {
    state: PlaybackState,
    flow: FlowController,
}

impl PlaybackPacer {
    /// Paused pacer awaiting its first preview.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current playback state.
    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Phase derived from the current state.
    pub fn phase(&self) -> PacerPhase {
        if !self.state.preview_established {
            PacerPhase::AwaitingPreview
        } else if !self.state.is_playing {
            PacerPhase::Paused
        } else if self.state.freeze_buffer_head {
            PacerPhase::PlayingFrozen
        } else {
            PacerPhase::PlayingUnfrozen
        }
    }

    /// Play or pause. Returns whether the flag changed.
    pub fn set_playing(&mut self, playing: bool) -> bool {
        let changed = self.state.is_playing != playing;
        self.state.is_playing = playing;
        changed
    }

    /// Schedule a seek/clear to `target` for the next tick.
    pub fn request_seek(&mut self, target: FrameIndex) {
        self.state.pending_seek = Some(target);
    }

    /// Forget the preview and record `index` as already displayed, so the next
    /// frame shown at that index is not republished. Used on session reloads.
    pub fn reset_display(&mut self, index: FrameIndex) {
        self.state.preview_established = false;
        self.state.displayed = Some(index);
    }

    /// Drop all transient state (session teardown).
    pub fn clear(&mut self) {
        self.state = PlaybackState::default();
    }

    /// Run one render tick at host time `now_ms`.
    pub fn tick(&mut self, now_ms: u64, stage: Stage<'_>, ports: &mut Ports<'_>) -> TickOutcome {
        let Stage {
            buffer,
            sync,
            settings,
            topology,
        } = stage;

        if let Some(target) = self.state.pending_seek.take() {
            self.flow.seek(buffer, sync, target, ports.commands);
            self.state.preview_established = false;
            ports.observer.publish(StateChange::BufferedCount(0));
            ports.observer.publish(StateChange::BufferOpen(true));
            return TickOutcome {
                seek: Some(target),
                ..TickOutcome::held(self.phase())
            };
        }

        let flow = self.flow.evaluate(buffer, sync, ports.commands);
        if let Some(transition) = flow {
            let open = matches!(transition, FlowTransition::Opened { .. });
            ports.observer.publish(StateChange::BufferOpen(open));
        }

        let mut preview_now = false;
        if !self.state.preview_established {
            if buffer.head().is_none() {
                return TickOutcome {
                    flow,
                    ..TickOutcome::held(PacerPhase::AwaitingPreview)
                };
            }
            self.state.preview_established = true;
            preview_now = true;
        }

        let mut dequeued = None;
        if self.state.is_playing {
            self.update_freeze(buffer.len(), sync, settings);
            if !self.state.freeze_buffer_head && self.pace_allows(now_ms, settings) {
                if let Some(frame) = buffer.dequeue() {
                    sync.buffer_head += 1;
                    self.state.last_dequeue_ms = Some(now_ms);
                    ports.observer.publish(StateChange::BufferedCount(buffer.len()));
                    dequeued = Some(frame);
                }
            }
        }

        let shown = match (&dequeued, preview_now) {
            (Some(frame), _) => Some(self.present(frame, topology, ports)),
            (None, true) => buffer
                .head()
                .map(|frame| self.present(frame, topology, ports)),
            (None, false) => None,
        };

        let mut loop_restart = false;
        if sync.past_end() {
            debug!(num_frames = sync.num_frames, "clip finished; looping to frame 0");
            self.state.pending_seek = Some(0);
            self.state.replay_pending = true;
            self.state.displayed = Some(0);
            ports.observer.publish(StateChange::FrameIndex(0));
            loop_restart = true;
        }

        TickOutcome {
            phase: self.phase(),
            shown,
            dequeued: dequeued.is_some(),
            seek: None,
            flow,
            loop_restart,
        }
    }

    fn update_freeze(&mut self, buffered: usize, sync: &SyncState, settings: &PlaybackSettings) {
        if self.state.replay_pending || buffered == 0 {
            self.state.freeze_buffer_head = true;
            self.state.replay_pending = false;
        } else if buffered >= settings.minimum_playable_frame() || sync.source_exhausted(buffered) {
            self.state.freeze_buffer_head = false;
        }
    }

    fn pace_allows(&self, now_ms: u64, settings: &PlaybackSettings) -> bool {
        if !settings.needs_pacing() {
            return true;
        }
        match self.state.last_dequeue_ms {
            Some(last) => now_ms.saturating_sub(last) >= settings.desired_frame_interval_ms(),
            None => true,
        }
    }

    fn present(
        &mut self,
        frame: &Frame,
        topology: Option<&Topology>,
        ports: &mut Ports<'_>,
    ) -> FrameIndex {
        let normals = topology.map_or_else(Vec::new, |t| t.compute_normals(&frame.positions));
        ports.mesh.update_mesh(&frame.positions, &normals);
        if self.state.displayed != Some(frame.index) {
            self.state.displayed = Some(frame.index);
            ports.observer.publish(StateChange::FrameIndex(frame.index));
        }
        trace!(index = frame.index, "frame presented");
        frame.index
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mock::Recorder;
    use crate::{Command, SourceWinding};

    struct Rig {
        pacer: PlaybackPacer,
        buffer: FrameBuffer,
        sync: SyncState,
        settings: PlaybackSettings,
        topology: Topology,
        rec: Recorder,
    }

    impl Rig {
        fn new(num_frames: u64) -> Self {
            Self {
                pacer: PlaybackPacer::new(),
                buffer: FrameBuffer::new(),
                sync: SyncState {
                    num_frames,
                    buffer_head: 0,
                },
                settings: PlaybackSettings::default(),
                topology: Topology::from_source(vec![[0, 1, 2]], SourceWinding::CounterClockwise),
                rec: Recorder::default(),
            }
        }

        fn push(&mut self, from: FrameIndex, count: u64) {
            for i in from..from + count {
                self.buffer
                    .enqueue(Frame::new(i, vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, i as f32]));
            }
        }

        fn tick(&mut self, now_ms: u64) -> TickOutcome {
            let stage = Stage {
                buffer: &mut self.buffer,
                sync: &mut self.sync,
                settings: &self.settings,
                topology: Some(&self.topology),
            };
            self.pacer.tick(now_ms, stage, &mut self.rec.ports())
        }
    }

    #[test]
    fn empty_buffer_keeps_awaiting_preview() {
        let mut rig = Rig::new(10);
        for t in 0..5 {
            assert_eq!(rig.tick(t * 16).phase, PacerPhase::AwaitingPreview);
        }
        assert!(rig.rec.mesh.uploads.is_empty());
    }

    #[test]
    fn preview_is_peeked_not_dequeued() {
        let mut rig = Rig::new(10);
        rig.push(0, 3);
        let out = rig.tick(0);
        assert_eq!(out.phase, PacerPhase::Paused);
        assert_eq!(out.shown, Some(0));
        assert!(!out.dequeued);
        assert_eq!(rig.buffer.len(), 3);
        assert_eq!(rig.sync.buffer_head, 0);
        assert_eq!(rig.rec.mesh.uploads[0].normals.len(), 9);

        let held = rig.tick(16);
        assert_eq!(held.shown, None);
        assert_eq!(rig.rec.mesh.uploads.len(), 1);
        assert_eq!(rig.buffer.len(), 3);
    }

    #[test]
    fn never_dequeues_below_minimum_playable() {
        let mut rig = Rig::new(100);
        rig.settings.set_minimum_playable_frame(5).unwrap();
        rig.pacer.set_playing(true);
        rig.push(0, 3);
        for t in 0..10 {
            let out = rig.tick(t * 16);
            assert!(!out.dequeued);
            assert_eq!(out.phase, PacerPhase::PlayingFrozen);
        }
        rig.push(3, 2);
        let out = rig.tick(200);
        assert!(out.dequeued);
        assert_eq!(out.phase, PacerPhase::PlayingUnfrozen);
        assert_eq!(rig.sync.buffer_head, 1);
    }

    #[test]
    fn clip_end_unfreezes_below_threshold() {
        let mut rig = Rig::new(10);
        rig.settings.set_minimum_playable_frame(5).unwrap();
        rig.sync.buffer_head = 8;
        rig.pacer.set_playing(true);
        rig.push(8, 2);
        let out = rig.tick(0);
        assert!(out.dequeued);
        assert_eq!(out.shown, Some(8));
    }

    #[test]
    fn starvation_freezes_playback() {
        let mut rig = Rig::new(0);
        rig.pacer.set_playing(true);
        rig.push(0, 1);
        assert!(rig.tick(0).dequeued);
        let out = rig.tick(16);
        assert_eq!(out.phase, PacerPhase::PlayingFrozen);
        assert!(!out.dequeued);

        rig.push(1, 1);
        let out = rig.tick(32);
        assert!(out.dequeued);
        assert_eq!(out.shown, Some(1));
    }

    #[test]
    fn paused_never_dequeues() {
        let mut rig = Rig::new(0);
        rig.push(0, 10);
        for t in 0..20 {
            assert!(!rig.tick(t * 16).dequeued);
        }
        assert_eq!(rig.buffer.len(), 10);
    }

    #[test]
    fn loop_wrap_clears_once_and_publishes_zero_once() {
        let mut rig = Rig::new(3);
        rig.pacer.set_playing(true);
        rig.push(0, 3);
        for t in 0..3 {
            assert!(rig.tick(t * 16).dequeued);
        }
        assert_eq!(rig.sync.buffer_head, 3);
        let zeros_before = rig.rec.published_frame_indices().iter().filter(|&&i| i == 0).count();
        assert_eq!(zeros_before, 2, "first display plus the loop announcement");
        rig.rec.commands.clear();

        let out = rig.tick(48);
        assert_eq!(out.seek, Some(0));
        assert!(rig.buffer.is_empty());
        assert_eq!(rig.sync.buffer_head, 0);

        // Producer refills; replay freezes one tick, then playback resumes.
        rig.push(0, 3);
        let out = rig.tick(64);
        assert_eq!(out.phase, PacerPhase::PlayingFrozen);
        assert_eq!(out.shown, Some(0));
        for t in 5..7 {
            assert!(rig.tick(t * 16).dequeued);
        }

        let zeros_after = rig.rec.published_frame_indices().iter().filter(|&&i| i == 0).count();
        assert_eq!(zeros_after, zeros_before);
        let reopen_at_zero = rig
            .rec
            .commands
            .iter()
            .filter(|c| {
                **c == Command::BufferState {
                    open: true,
                    resume_index: 0,
                }
            })
            .count();
        assert_eq!(reopen_at_zero, 1);
    }

    #[test]
    fn slow_frame_rate_spaces_out_dequeues() {
        let mut rig = Rig::new(0);
        rig.settings.set_frame_rate(24);
        rig.pacer.set_playing(true);
        rig.push(0, 200);

        let mut dequeue_times = Vec::new();
        for k in 0..120u64 {
            let now = k * 1000 / 60;
            if rig.tick(now).dequeued {
                dequeue_times.push(now);
            }
        }
        assert!(dequeue_times.len() >= 30);
        for pair in dequeue_times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= 41, "dequeues {gap} ms apart");
            assert!(gap <= 42 + 17, "dequeues {gap} ms apart");
        }
    }

    #[test]
    fn seek_runs_alone_and_resets_preview() {
        let mut rig = Rig::new(100);
        rig.push(0, 4);
        rig.tick(0);
        rig.pacer.request_seek(40);
        let out = rig.tick(16);
        assert_eq!(out.seek, Some(40));
        assert_eq!(out.shown, None);
        assert_eq!(out.phase, PacerPhase::AwaitingPreview);
        assert!(rig.buffer.is_empty());
        assert_eq!(rig.sync.buffer_head, 40);
        assert_eq!(
            rig.rec.commands.last(),
            Some(&Command::BufferState {
                open: true,
                resume_index: 40
            })
        );
    }
}
