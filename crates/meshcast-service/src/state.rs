// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Producer-side view of the viewer's buffer: where to produce next and
//! whether to produce at all.

use meshcast_core::FrameIndex;

/// What the producer loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Generate and send this frame.
    Produce(FrameIndex),
    /// Ran past the clip end; the cached count was reset.
    Exhausted,
    /// Viewer buffer closed or no clip loaded.
    Idle,
}

/// Production cursor driven by viewer commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerState {
    /// Whether the viewer admits frames.
    pub is_buffer_open: bool,
    /// Viewer-requested production origin.
    pub buffer_frame_index: FrameIndex,
    /// Clip length; `0` while nothing is loaded.
    pub num_frames: u64,
    /// Frames produced since the cursor was last set.
    pub cached_frames: u64,
    /// Restart from the cursor on the next step.
    pub reload_pending: bool,
    /// Pause once before producing again.
    pub relief_pending: bool,
}

impl Default for ProducerState {
    fn default() -> Self {
        Self {
            is_buffer_open: true,
            buffer_frame_index: 0,
            num_frames: 0,
            cached_frames: 0,
            reload_pending: false,
            relief_pending: false,
        }
    }
}

impl ProducerState {
    /// Fresh state for a newly loaded clip.
    pub fn loaded(num_frames: u64) -> Self {
        Self {
            num_frames,
            ..Self::default()
        }
    }

    /// Apply a `buffer_state` command. Opening moves the cursor to the
    /// viewer's resume index.
    pub fn set_buffer_open(&mut self, open: bool, resume_index: FrameIndex) {
        self.is_buffer_open = open;
        if open {
            self.buffer_frame_index = resume_index;
            self.reload_pending = true;
        }
    }

    /// Apply a `reposition` command.
    pub fn reposition(&mut self, target_index: FrameIndex) {
        self.buffer_frame_index = target_index;
        self.reload_pending = true;
        self.relief_pending = true;
    }

    /// Consume the relief flag.
    pub fn take_relief(&mut self) -> bool {
        std::mem::take(&mut self.relief_pending)
    }

    /// Advance the cursor by one step.
    pub fn next_step(&mut self) -> Step {
        if !self.is_buffer_open || self.num_frames == 0 {
            return Step::Idle;
        }
        if std::mem::take(&mut self.reload_pending) {
            self.cached_frames = 0;
        }
        let index = self.buffer_frame_index + self.cached_frames;
        if index >= self.num_frames {
            self.cached_frames = 0;
            return Step::Exhausted;
        }
        self.cached_frames += 1;
        Step::Produce(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_sequentially_from_the_cursor() {
        let mut state = ProducerState::loaded(4);
        let steps: Vec<Step> = (0..5).map(|_| state.next_step()).collect();
        assert_eq!(
            steps,
            vec![
                Step::Produce(0),
                Step::Produce(1),
                Step::Produce(2),
                Step::Produce(3),
                Step::Exhausted
            ]
        );
        assert_eq!(state.next_step(), Step::Produce(0));
    }

    #[test]
    fn closed_buffer_or_empty_clip_idles() {
        let mut state = ProducerState::default();
        assert_eq!(state.next_step(), Step::Idle);
        let mut state = ProducerState::loaded(10);
        state.set_buffer_open(false, 3);
        assert_eq!(state.next_step(), Step::Idle);
        assert_eq!(state.buffer_frame_index, 0);
    }

    #[test]
    fn reopening_resumes_at_viewer_index() {
        let mut state = ProducerState::loaded(100);
        for _ in 0..10 {
            state.next_step();
        }
        state.set_buffer_open(false, 10);
        state.set_buffer_open(true, 7);
        assert_eq!(state.next_step(), Step::Produce(7));
        assert_eq!(state.next_step(), Step::Produce(8));
        assert!(!state.relief_pending);
    }

    #[test]
    fn reposition_restarts_with_relief() {
        let mut state = ProducerState::loaded(100);
        for _ in 0..20 {
            state.next_step();
        }
        state.reposition(5);
        assert!(state.take_relief());
        assert!(!state.take_relief());
        assert_eq!(state.next_step(), Step::Produce(5));
    }
}
