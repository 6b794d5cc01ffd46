// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Streaming playback core for meshcast.
//!
//! Frames arrive from a remote producer over a jittery, reordering channel and
//! are played back at a user-chosen rate. The pieces, leaf first:
//!
//! - [`FrameBuffer`]: bounded FIFO of contiguous frames plus the open flag.
//! - [`ReconciliationEngine`]: accepts, waits on, or rolls back mismatched
//!   frame indices.
//! - [`FlowController`]: open/closed admission signalling and seek/clear.
//! - [`PlaybackPacer`]: per-tick consumer covering preview, pause, starvation
//!   freeze, rate pacing and loop restart.
//! - [`StreamSession`]: owns all of the above for one streaming session and
//!   routes inbound [`Message`](meshcast_proto::Message)s.
//!
//! # Threading
//!
//! Everything here is single-threaded and cooperative: inbound messages and
//! pacer ticks are separate calls on `&mut StreamSession` and never overlap.
//! Callers that feed a session from multiple threads must hand messages over
//! through a channel (see `meshcast-client`).
//!
//! Collaborators (renderer, command transport, state observers) are reached
//! only through the traits in [`ports`].

mod buffer;
mod flow;
mod frame;
pub mod mock;
mod pacer;
pub mod ports;
mod reconcile;
mod session;
mod settings;
mod sync;

pub use buffer::{FrameBuffer, BUFFER_CAPACITY};
pub use flow::{FlowController, FlowTransition};
pub use frame::{Frame, FrameError, SourceWinding, Topology};
pub use meshcast_proto::FrameIndex;
pub use pacer::{PacerPhase, PlaybackPacer, PlaybackState, Stage, TickOutcome};
pub use ports::{Command, CommandSink, MeshPort, Ports, StateChange, StateObserver};
pub use reconcile::{Reconciliation, ReconciliationEngine, DEFAULT_ROLLBACK_THRESHOLD};
pub use session::{FrameDisposition, SessionStats, StreamSession};
pub use settings::{PlaybackSettings, SettingsError, MAX_FRAME_RATE, MIN_FRAME_RATE};
pub use sync::SyncState;
