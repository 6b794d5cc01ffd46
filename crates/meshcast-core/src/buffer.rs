// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded FIFO of streamed frames.

use std::collections::VecDeque;

use crate::{Frame, FrameIndex};

/// Maximum number of frames retained at once.
pub const BUFFER_CAPACITY: usize = 256;

/// Bounded queue of `(index, positions)` records plus the admission flag.
///
/// Stored frames always cover the contiguous range
/// `[buffer_head, buffer_head + len - 1]`; the buffer itself does not check
/// that. Callers establish contiguity through
/// [`ReconciliationEngine`](crate::ReconciliationEngine) before enqueueing.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: VecDeque<Frame>,
    capacity: usize,
    is_open: bool,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// Empty, open buffer holding up to [`BUFFER_CAPACITY`] frames.
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    /// Empty, open buffer with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            is_open: true,
        }
    }

    /// True iff another frame fits and the clip still has frames past the
    /// buffered range. `total_frames == 0` means the clip length is unknown
    /// and only the capacity bound applies.
    pub fn is_pushable(&self, head: FrameIndex, total_frames: u64) -> bool {
        self.frames.len() < self.capacity
            && (total_frames == 0 || head + (self.frames.len() as u64) < total_frames)
    }

    /// Append at the tail. No validation.
    pub fn enqueue(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    /// Oldest frame, without removing it.
    pub fn head(&self) -> Option<&Frame> {
        self.frames.front()
    }

    /// Remove and return the oldest frame.
    pub fn dequeue(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Drop every frame and reopen.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.is_open = true;
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is buffered.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether the buffer is at capacity.
    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    /// Whether new frames are currently admitted.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Set the admission flag. Only [`FlowController`](crate::FlowController)
    /// should flip this, since every flip must be mirrored to the producer.
    pub fn set_open(&mut self, open: bool) {
        self.is_open = open;
    }
}
