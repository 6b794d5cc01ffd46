// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Buffer admission (backpressure) and seek/clear sequencing.

use tracing::{debug, info};

use crate::{Command, CommandSink, FrameBuffer, FrameIndex, SyncState};

/// Admission flag change emitted by [`FlowController::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTransition {
    /// Buffer stopped admitting frames.
    Closed {
        /// Next index the viewer will ask for once reopened.
        resume_index: FrameIndex,
    },
    /// Buffer admits frames again starting at `resume_index`.
    Opened {
        /// Next index the viewer expects.
        resume_index: FrameIndex,
    },
}

/// Mirrors the buffer's pushability into exactly one open/closed command per
/// transition. The flag itself lives on [`FrameBuffer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowController;

impl FlowController {
    /// Re-evaluate admission and signal the producer on a state change.
    /// Returns `None` when the flag is unchanged.
    pub fn evaluate(
        &self,
        buffer: &mut FrameBuffer,
        sync: &SyncState,
        commands: &mut dyn CommandSink,
    ) -> Option<FlowTransition> {
        let pushable = buffer.is_pushable(sync.buffer_head, sync.num_frames);
        let resume_index = sync.expected_next(buffer.len());
        match (buffer.is_open(), pushable) {
            (true, false) => {
                buffer.set_open(false);
                debug!(resume_index, buffered = buffer.len(), "buffer closed");
                commands.send_command(Command::BufferState {
                    open: false,
                    resume_index,
                });
                Some(FlowTransition::Closed { resume_index })
            }
            (false, true) => {
                buffer.set_open(true);
                debug!(resume_index, buffered = buffer.len(), "buffer reopened");
                commands.send_command(Command::BufferState {
                    open: true,
                    resume_index,
                });
                Some(FlowTransition::Opened { resume_index })
            }
            _ => None,
        }
    }

    /// Clear the buffer, move the head to `target`, and ask the producer to
    /// resume there.
    pub fn seek(
        &self,
        buffer: &mut FrameBuffer,
        sync: &mut SyncState,
        target: FrameIndex,
        commands: &mut dyn CommandSink,
    ) {
        info!(target, dropped = buffer.len(), "seek: clearing buffer");
        buffer.reset();
        sync.buffer_head = target;
        commands.send_command(Command::BufferState {
            open: true,
            resume_index: target,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::Frame;

    fn fill(buffer: &mut FrameBuffer, from: FrameIndex, count: u64) {
        for i in from..from + count {
            buffer.enqueue(Frame::new(i, vec![0.0; 3]));
        }
    }

    #[test]
    fn one_signal_per_transition() {
        let flow = FlowController;
        let mut buffer = FrameBuffer::with_capacity(3);
        let sync = SyncState {
            num_frames: 0,
            buffer_head: 0,
        };
        let mut sent = Vec::new();

        assert_eq!(flow.evaluate(&mut buffer, &sync, &mut sent), None);
        fill(&mut buffer, 0, 3);
        assert_eq!(
            flow.evaluate(&mut buffer, &sync, &mut sent),
            Some(FlowTransition::Closed { resume_index: 3 })
        );
        for _ in 0..5 {
            assert_eq!(flow.evaluate(&mut buffer, &sync, &mut sent), None);
        }
        assert_eq!(
            sent,
            vec![Command::BufferState {
                open: false,
                resume_index: 3
            }]
        );
    }

    #[test]
    fn dequeue_reopens_with_resume_index() {
        let flow = FlowController;
        let mut buffer = FrameBuffer::with_capacity(2);
        let mut sync = SyncState {
            num_frames: 50,
            buffer_head: 8,
        };
        let mut sent = Vec::new();
        fill(&mut buffer, 8, 2);
        flow.evaluate(&mut buffer, &sync, &mut sent);
        assert!(!buffer.is_open());

        buffer.dequeue();
        sync.buffer_head += 1;
        assert_eq!(
            flow.evaluate(&mut buffer, &sync, &mut sent),
            Some(FlowTransition::Opened { resume_index: 10 })
        );
        assert_eq!(flow.evaluate(&mut buffer, &sync, &mut sent), None);
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            Command::BufferState {
                open: true,
                resume_index: 10
            }
        );
    }

    #[test]
    fn clip_end_closes_even_with_room_left() {
        let flow = FlowController;
        let mut buffer = FrameBuffer::new();
        let sync = SyncState {
            num_frames: 12,
            buffer_head: 10,
        };
        let mut sent = Vec::new();
        fill(&mut buffer, 10, 2);
        assert_eq!(
            flow.evaluate(&mut buffer, &sync, &mut sent),
            Some(FlowTransition::Closed { resume_index: 12 })
        );
    }

    #[test]
    fn seek_resets_and_reopens_at_target() {
        let flow = FlowController;
        let mut buffer = FrameBuffer::new();
        let mut sync = SyncState {
            num_frames: 100,
            buffer_head: 30,
        };
        fill(&mut buffer, 30, 4);
        buffer.set_open(false);
        let mut sent = Vec::new();
        flow.seek(&mut buffer, &mut sync, 72, &mut sent);
        assert!(buffer.is_empty());
        assert!(buffer.is_open());
        assert_eq!(sync.buffer_head, 72);
        assert_eq!(
            sent,
            vec![Command::BufferState {
                open: true,
                resume_index: 72
            }]
        );
    }
}
