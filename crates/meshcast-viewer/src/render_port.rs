// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Headless renderer: keeps the last uploaded mesh and a few measurements
//! instead of drawing.

use glam::Vec3;
use meshcast_core::MeshPort;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Default)]
pub struct HeadlessRenderer {
    pub indices: Vec<u32>,
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub uploads: u64,
}

impl HeadlessRenderer {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Distance of the farthest vertex from the origin.
    pub fn bounding_radius(&self) -> f32 {
        self.positions
            .chunks_exact(3)
            .map(|p| Vec3::new(p[0], p[1], p[2]).length())
            .fold(0.0, f32::max)
    }
}

impl MeshPort for HeadlessRenderer {
    fn set_topology(&mut self, indices: &[u32]) {
        debug!(triangles = indices.len() / 3, "index buffer replaced");
        self.indices = indices.to_vec();
    }

    fn update_mesh(&mut self, positions: &[f32], normals: &[f32]) {
        if !normals.is_empty() && normals.len() != positions.len() {
            warn!(
                positions = positions.len(),
                normals = normals.len(),
                "normal count does not match positions"
            );
        }
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        self.normals.clear();
        self.normals.extend_from_slice(normals);
        self.uploads += 1;
        trace!(
            vertices = self.vertex_count(),
            radius = self.bounding_radius(),
            "mesh uploaded"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn keeps_last_upload_and_measures_it() {
        let mut r = HeadlessRenderer::default();
        r.set_topology(&[0, 2, 1]);
        r.update_mesh(&[1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.5], &[]);
        r.update_mesh(&[3.0, 4.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0], &[0.0; 9]);
        assert_eq!(r.uploads, 2);
        assert_eq!(r.vertex_count(), 3);
        assert_eq!(r.indices, vec![0, 2, 1]);
        assert_relative_eq!(r.bounding_radius(), 5.0);
    }
}
