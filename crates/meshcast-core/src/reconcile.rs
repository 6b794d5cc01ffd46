// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Frame-order reconciliation between producer and buffer.
//!
//! This is a consistency policy, not a reorder buffer. A frame is kept only
//! if it is exactly the next index the buffer expects. Otherwise the frame is
//! dropped and, when the gap looks unrecoverable, the producer is told to
//! restart at the expected index.

use tracing::{debug, info};

use crate::{Command, CommandSink, Frame, FrameBuffer, FrameIndex, SyncState};

/// Backward gaps up to this many frames are waited out.
pub const DEFAULT_ROLLBACK_THRESHOLD: u64 = 10;

/// Outcome of reconciling one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Index matched; frame enqueued.
    Accepted {
        /// Index enqueued.
        index: FrameIndex,
    },
    /// Producer ahead, or too far behind. Frame dropped and a reposition to
    /// `expected` issued.
    Rollback {
        /// Index the buffer needs next.
        expected: FrameIndex,
        /// Index that arrived.
        received: FrameIndex,
    },
    /// Producer slightly behind. Frame dropped, no command issued.
    Wait {
        /// Index the buffer needs next.
        expected: FrameIndex,
        /// Index that arrived.
        received: FrameIndex,
        /// `expected - received`.
        gap: u64,
    },
}

/// Stateless classifier plus the side effects of each class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationEngine {
    threshold: u64,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ROLLBACK_THRESHOLD)
    }
}

impl ReconciliationEngine {
    /// Engine with a custom WAIT/ROLLBACK boundary.
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    /// Classify `received` against `expected` without side effects.
    pub fn classify(&self, expected: FrameIndex, received: FrameIndex) -> Reconciliation {
        if received == expected {
            return Reconciliation::Accepted { index: received };
        }
        if received > expected || expected - received > self.threshold {
            return Reconciliation::Rollback { expected, received };
        }
        Reconciliation::Wait {
            expected,
            received,
            gap: expected - received,
        }
    }

    /// Classify `frame` against the buffer tail and apply the outcome:
    /// enqueue on match, reposition on rollback, drop otherwise.
    pub fn reconcile(
        &self,
        frame: Frame,
        buffer: &mut FrameBuffer,
        sync: &SyncState,
        commands: &mut dyn CommandSink,
    ) -> Reconciliation {
        let expected = sync.expected_next(buffer.len());
        let outcome = self.classify(expected, frame.index);
        match outcome {
            Reconciliation::Accepted { .. } => buffer.enqueue(frame),
            Reconciliation::Rollback { expected, received } => {
                info!(expected, received, "unexpected frame; rolling producer back");
                commands.send_command(Command::Reposition {
                    target_index: expected,
                });
            }
            Reconciliation::Wait {
                expected,
                received,
                gap,
            } => {
                debug!(expected, received, gap, "stale frame; waiting for producer");
            }
        }
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// Buffer holding frames 10..15, so the next expected index is 15.
    fn primed() -> (FrameBuffer, SyncState) {
        let mut buffer = FrameBuffer::new();
        for i in 10..15 {
            buffer.enqueue(Frame::new(i, vec![0.0; 3]));
        }
        let sync = SyncState {
            num_frames: 100,
            buffer_head: 10,
        };
        (buffer, sync)
    }

    #[test]
    fn matching_index_is_enqueued() {
        let (mut buffer, sync) = primed();
        let mut sent = Vec::new();
        let out = ReconciliationEngine::default().reconcile(
            Frame::new(15, vec![0.0; 3]),
            &mut buffer,
            &sync,
            &mut sent,
        );
        assert_eq!(out, Reconciliation::Accepted { index: 15 });
        assert_eq!(buffer.len(), 6);
        assert!(sent.is_empty());
    }

    #[test]
    fn far_behind_rolls_back() {
        let (mut buffer, sync) = primed();
        let mut sent = Vec::new();
        let out = ReconciliationEngine::default().reconcile(
            Frame::new(3, vec![0.0; 3]),
            &mut buffer,
            &sync,
            &mut sent,
        );
        assert_eq!(
            out,
            Reconciliation::Rollback {
                expected: 15,
                received: 3
            }
        );
        assert_eq!(sent, vec![Command::Reposition { target_index: 15 }]);
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn slightly_behind_waits_silently() {
        let (mut buffer, sync) = primed();
        let mut sent = Vec::new();
        let out = ReconciliationEngine::default().reconcile(
            Frame::new(12, vec![0.0; 3]),
            &mut buffer,
            &sync,
            &mut sent,
        );
        assert_eq!(
            out,
            Reconciliation::Wait {
                expected: 15,
                received: 12,
                gap: 3
            }
        );
        assert!(sent.is_empty());
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn ahead_rolls_back() {
        let (mut buffer, sync) = primed();
        let mut sent = Vec::new();
        let out = ReconciliationEngine::default().reconcile(
            Frame::new(20, vec![0.0; 3]),
            &mut buffer,
            &sync,
            &mut sent,
        );
        assert_eq!(
            out,
            Reconciliation::Rollback {
                expected: 15,
                received: 20
            }
        );
        assert_eq!(sent, vec![Command::Reposition { target_index: 15 }]);
    }

    #[test]
    fn threshold_boundary_is_inclusive_for_wait() {
        let engine = ReconciliationEngine::default();
        assert!(matches!(engine.classify(15, 5), Reconciliation::Wait { gap: 10, .. }));
        assert!(matches!(engine.classify(15, 4), Reconciliation::Rollback { .. }));
    }

    #[test]
    fn first_frame_of_session_uses_head_as_expected() {
        let mut buffer = FrameBuffer::new();
        let sync = SyncState {
            num_frames: 0,
            buffer_head: 7,
        };
        let mut sent = Vec::new();
        let engine = ReconciliationEngine::default();
        let out = engine.reconcile(Frame::new(0, vec![0.0; 3]), &mut buffer, &sync, &mut sent);
        assert_eq!(
            out,
            Reconciliation::Wait {
                expected: 7,
                received: 0,
                gap: 7
            }
        );
        let out = engine.reconcile(Frame::new(7, vec![0.0; 3]), &mut buffer, &sync, &mut sent);
        assert_eq!(out, Reconciliation::Accepted { index: 7 });
    }
}
