// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Collaborator ports consumed by the playback core.
//!
//! The core never owns a socket, a GPU buffer, or a UI store. It emits
//! [`Command`]s, pushes geometry to a [`MeshPort`], and announces
//! [`StateChange`]s; adapters decide what those mean.

use meshcast_proto::Message;

use crate::FrameIndex;

/// Outbound flow-control command (viewer → producer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Admission signal. `resume_index` is the next index the viewer expects.
    BufferState {
        /// Whether the viewer accepts frames.
        open: bool,
        /// Next expected frame index.
        resume_index: FrameIndex,
    },
    /// Restart production at `target_index`.
    Reposition {
        /// Index production should restart from.
        target_index: FrameIndex,
    },
}

impl From<Command> for Message {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::BufferState { open, resume_index } => {
                Message::buffer_state(open, resume_index)
            }
            Command::Reposition { target_index } => Message::reposition(target_index),
        }
    }
}

/// Fire-and-forget command transport.
pub trait CommandSink {
    /// Queue a command for delivery. Must not block.
    fn send_command(&mut self, command: Command);
}

impl CommandSink for Vec<Command> {
    fn send_command(&mut self, command: Command) {
        self.push(command);
    }
}

/// Renderer surface for the streamed mesh.
pub trait MeshPort {
    /// Replace the active index buffer (flat, clockwise triangles).
    fn set_topology(&mut self, indices: &[u32]);
    /// Upload positions and matching per-vertex normals for the active mesh.
    fn update_mesh(&mut self, positions: &[f32], normals: &[f32]);
}

/// Named state changes surfaced to observers (UI, logging, metrics).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// Frame index now on screen.
    FrameIndex(FrameIndex),
    /// Frames currently buffered.
    BufferedCount(usize),
    /// Admission flag changed.
    BufferOpen(bool),
    /// Clip length announced.
    NumFrames(u64),
    /// Producer pipeline name.
    PipelineName(String),
    /// Play/pause changed.
    Playing(bool),
    /// Transport connectivity changed.
    Connected(bool),
    /// User-facing alert text.
    Alert(String),
}

/// Sink for [`StateChange`] publications.
pub trait StateObserver {
    /// Publish one change.
    fn publish(&mut self, change: StateChange);
}

impl StateObserver for Vec<StateChange> {
    fn publish(&mut self, change: StateChange) {
        self.push(change);
    }
}

/// Borrowed bundle of the three collaborator ports for one call.
pub struct Ports<'a> {
    /// Outbound command transport.
    pub commands: &'a mut dyn CommandSink,
    /// Renderer surface.
    pub mesh: &'a mut dyn MeshPort,
    /// State observers.
    pub observer: &'a mut dyn StateObserver,
}

impl<'a> Ports<'a> {
    /// Bundle three ports.
    pub fn new(
        commands: &'a mut dyn CommandSink,
        mesh: &'a mut dyn MeshPort,
        observer: &'a mut dyn StateObserver,
    ) -> Self {
        Self {
            commands,
            mesh,
            observer,
        }
    }
}
