// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Clip length and buffer-head cursor shared by the buffering components.

use crate::FrameIndex;

/// Client/server synchronization cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Total clip length; `0` means unknown/unbounded.
    pub num_frames: u64,
    /// Index of the oldest retained (next to play) frame. Moves only on a
    /// successful dequeue or a reset.
    pub buffer_head: FrameIndex,
}

impl SyncState {
    /// Index the buffer expects next when `buffered` frames are queued.
    pub fn expected_next(&self, buffered: usize) -> FrameIndex {
        self.buffer_head + buffered as u64
    }

    /// Whether the clip length has been announced.
    pub fn clip_known(&self) -> bool {
        self.num_frames > 0
    }

    /// Whether no source frame can arrive beyond the ones already buffered.
    pub fn source_exhausted(&self, buffered: usize) -> bool {
        self.clip_known() && self.expected_next(buffered) >= self.num_frames
    }

    /// Whether the head has run past the end of a known clip.
    pub fn past_end(&self) -> bool {
        self.clip_known() && self.buffer_head >= self.num_frames
    }
}
