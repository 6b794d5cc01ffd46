// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Recording port implementations for tests and headless tooling.

use crate::{Command, FrameIndex, MeshPort, Ports, StateChange};

/// One `update_mesh` call.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshUpload {
    /// Positions passed to the renderer.
    pub positions: Vec<f32>,
    /// Normals passed alongside.
    pub normals: Vec<f32>,
}

/// Mesh port that remembers every topology and upload.
#[derive(Debug, Default, Clone)]
pub struct RecordingMesh {
    /// Last index buffer set.
    pub topology: Vec<u32>,
    /// Uploads in call order.
    pub uploads: Vec<MeshUpload>,
}

impl MeshPort for RecordingMesh {
    fn set_topology(&mut self, indices: &[u32]) {
        self.topology = indices.to_vec();
    }

    fn update_mesh(&mut self, positions: &[f32], normals: &[f32]) {
        self.uploads.push(MeshUpload {
            positions: positions.to_vec(),
            normals: normals.to_vec(),
        });
    }
}

/// All three ports, recording.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    /// Commands sent, in order.
    pub commands: Vec<Command>,
    /// Renderer calls.
    pub mesh: RecordingMesh,
    /// State changes published, in order.
    pub changes: Vec<StateChange>,
}

impl Recorder {
    /// Borrow the recorder as a [`Ports`] bundle.
    pub fn ports(&mut self) -> Ports<'_> {
        Ports::new(&mut self.commands, &mut self.mesh, &mut self.changes)
    }

    /// Every `FrameIndex` publication, in order.
    pub fn published_frame_indices(&self) -> Vec<FrameIndex> {
        self.changes
            .iter()
            .filter_map(|c| match c {
                StateChange::FrameIndex(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    /// Drain recorded commands.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }
}
