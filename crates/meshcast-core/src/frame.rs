// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Frames, session topology, and per-vertex normals.

use glam::Vec3;
use meshcast_proto::FrameVerticesPayload;
use thiserror::Error;

use crate::FrameIndex;

/// Reasons an inbound frame is rejected before it reaches the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The payload carried no positions.
    #[error("frame {index} has no vertex positions")]
    Empty {
        /// Offending frame index.
        index: FrameIndex,
    },
    /// Position count is not a multiple of three.
    #[error("frame {index} carries {len} floats, not a whole number of vertices")]
    Ragged {
        /// Offending frame index.
        index: FrameIndex,
        /// Number of floats received.
        len: usize,
    },
    /// Vertex count differs from the session's established count.
    #[error("frame {index} has {got} vertices, session expects {expected}")]
    VertexCount {
        /// Offending frame index.
        index: FrameIndex,
        /// Established vertex count.
        expected: usize,
        /// Vertex count received.
        got: usize,
    },
    /// Topology references a vertex the frame does not have.
    #[error("topology references vertex {vertex} but frame {index} has {vertex_count}")]
    TopologyOutOfRange {
        /// Offending frame index.
        index: FrameIndex,
        /// Largest referenced vertex index.
        vertex: u32,
        /// Vertices in the frame.
        vertex_count: usize,
    },
}

/// One time-step of vertex positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position of this frame within the clip.
    pub index: FrameIndex,
    /// Flat `[x, y, z, ...]` positions.
    pub positions: Vec<f32>,
}

impl Frame {
    /// Build a frame from raw parts.
    pub fn new(index: FrameIndex, positions: Vec<f32>) -> Self {
        Self { index, positions }
    }

    /// Number of vertices (positions / 3).
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Structural checks that do not depend on session state.
    pub fn check_shape(&self) -> Result<(), FrameError> {
        if self.positions.is_empty() {
            return Err(FrameError::Empty { index: self.index });
        }
        if self.positions.len() % 3 != 0 {
            return Err(FrameError::Ragged {
                index: self.index,
                len: self.positions.len(),
            });
        }
        Ok(())
    }
}

impl From<FrameVerticesPayload> for Frame {
    fn from(p: FrameVerticesPayload) -> Self {
        Self::new(p.index, p.positions)
    }
}

/// Winding order the producer uses for its triangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceWinding {
    /// Counter-clockwise front faces (e.g. SMPL-family body models).
    #[default]
    CounterClockwise,
    /// Clockwise front faces; already matches the renderer.
    Clockwise,
}

/// Immutable triangle list for a streaming session, stored in the renderer's
/// clockwise winding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Topology {
    triangles: Vec<[u32; 3]>,
    max_vertex: Option<u32>,
}

impl Topology {
    /// Ingest producer triangles, flipping counter-clockwise input to
    /// clockwise by swapping the second and third corner.
    pub fn from_source(mut triangles: Vec<[u32; 3]>, winding: SourceWinding) -> Self {
        if winding == SourceWinding::CounterClockwise {
            for tri in &mut triangles {
                tri.swap(1, 2);
            }
        }
        let max_vertex = triangles.iter().flatten().copied().max();
        Self {
            triangles,
            max_vertex,
        }
    }

    /// Triangles in renderer (clockwise) winding.
    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    /// Flat index buffer (`|F| x 3`).
    pub fn indices(&self) -> Vec<u32> {
        self.triangles.iter().flatten().copied().collect()
    }

    /// Smallest vertex count a frame needs to satisfy every triangle.
    pub fn min_vertex_count(&self) -> usize {
        self.max_vertex.map_or(0, |v| v as usize + 1)
    }

    /// Whether every referenced vertex exists in `frame`.
    pub fn check_frame(&self, frame: &Frame) -> Result<(), FrameError> {
        match self.max_vertex {
            Some(vertex) if vertex as usize >= frame.vertex_count() => {
                Err(FrameError::TopologyOutOfRange {
                    index: frame.index,
                    vertex,
                    vertex_count: frame.vertex_count(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Per-vertex unit normals for `positions`, as a flat `[x, y, z, ...]`
    /// array of the same length.
    ///
    /// Each vertex normal is the normalized sum of the unit normals of its
    /// adjacent faces. For a clockwise triangle `[a, b, c]` the face normal is
    /// `(c - a) x (b - a)`, which is the outward normal of the producer's
    /// counter-clockwise `[a, c, b]`. Vertices with no usable face keep a zero
    /// normal.
    pub fn compute_normals(&self, positions: &[f32]) -> Vec<f32> {
        let vertex_count = positions.len() / 3;
        let vertex = |i: u32| {
            let i = i as usize * 3;
            Vec3::new(positions[i], positions[i + 1], positions[i + 2])
        };
        let mut acc = vec![Vec3::ZERO; vertex_count];
        for &[a, b, c] in &self.triangles {
            if [a, b, c].iter().any(|&v| v as usize >= vertex_count) {
                continue;
            }
            let (pa, pb, pc) = (vertex(a), vertex(b), vertex(c));
            let face = (pc - pa).cross(pb - pa).normalize_or_zero();
            acc[a as usize] += face;
            acc[b as usize] += face;
            acc[c as usize] += face;
        }
        acc.into_iter()
            .flat_map(|n| n.normalize_or_zero().to_array())
            .collect()
    }
}
