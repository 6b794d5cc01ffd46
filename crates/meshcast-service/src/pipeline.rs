// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Frame sources. A pipeline loads a clip, exposes its topology, and turns a
//! frame index into flat vertex positions.

use glam::Vec3;
use meshcast_core::{FrameIndex, SourceWinding};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use thiserror::Error;

/// Pipeline failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// No pipeline registered under this name.
    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),
    /// Uploaded stream data could not be parsed.
    #[error("invalid stream data: {0}")]
    InvalidStream(String),
    /// The clip has no frames.
    #[error("clip has no frames")]
    EmptyClip,
    /// Requested a frame outside the loaded clip.
    #[error("frame {index} out of range (clip has {num_frames})")]
    OutOfRange {
        /// Requested index.
        index: FrameIndex,
        /// Loaded clip length.
        num_frames: u64,
    },
}

/// A source of per-frame vertex positions.
pub trait Pipeline: Send {
    /// Name announced to viewers.
    fn name(&self) -> &str;
    /// Winding of [`Pipeline::triangles`].
    fn winding(&self) -> SourceWinding;
    /// Load the default clip (`None`) or one uploaded by the viewer. Returns
    /// the clip length.
    fn load(&mut self, data: Option<&[u8]>) -> Result<u64, PipelineError>;
    /// Triangle list of the loaded clip.
    fn triangles(&self) -> Vec<[u32; 3]>;
    /// Flat positions for frame `index`.
    fn forward(&mut self, index: FrameIndex) -> Result<Vec<f32>, PipelineError>;
}

/// Look up a built-in pipeline.
pub fn pipeline_by_name(name: &str, num_frames: u64) -> Result<Box<dyn Pipeline>, PipelineError> {
    match name {
        PulsingIcosphere::NAME => Ok(Box::new(PulsingIcosphere::new(num_frames))),
        other => Err(PipelineError::UnknownPipeline(other.to_owned())),
    }
}

/// Clip parameters for [`PulsingIcosphere`]; also the JSON shape it accepts
/// as uploaded stream data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseClip {
    /// Clip length in frames.
    pub num_frames: u64,
    /// Radial swing as a fraction of the unit radius.
    pub amplitude: f32,
    /// Frames per full pulse.
    pub period: u64,
}

impl Default for PulseClip {
    fn default() -> Self {
        Self {
            num_frames: 120,
            amplitude: 0.25,
            period: 60,
        }
    }
}

/// Synthetic unit icosahedron whose radius pulses sinusoidally. Faces are
/// counter-clockwise when seen from outside.
#[derive(Debug, Clone)]
pub struct PulsingIcosphere {
    default_clip: PulseClip,
    clip: Option<PulseClip>,
    base: Vec<Vec3>,
}

const ICOSAHEDRON_FACES: [[u32; 3]; 20] = [
    [0, 11, 5],
    [0, 5, 1],
    [0, 1, 7],
    [0, 7, 10],
    [0, 10, 11],
    [1, 5, 9],
    [5, 11, 4],
    [11, 10, 2],
    [10, 7, 6],
    [7, 1, 8],
    [3, 9, 4],
    [3, 4, 2],
    [3, 2, 6],
    [3, 6, 8],
    [3, 8, 9],
    [4, 9, 5],
    [2, 4, 11],
    [6, 2, 10],
    [8, 6, 7],
    [9, 8, 1],
];

impl PulsingIcosphere {
    /// Registry name.
    pub const NAME: &'static str = "pulsing_icosphere";

    /// Pipeline whose default clip has `num_frames` frames.
    pub fn new(num_frames: u64) -> Self {
        let t = (1.0 + 5f32.sqrt()) / 2.0;
        let base = [
            (-1.0, t, 0.0),
            (1.0, t, 0.0),
            (-1.0, -t, 0.0),
            (1.0, -t, 0.0),
            (0.0, -1.0, t),
            (0.0, 1.0, t),
            (0.0, -1.0, -t),
            (0.0, 1.0, -t),
            (t, 0.0, -1.0),
            (t, 0.0, 1.0),
            (-t, 0.0, -1.0),
            (-t, 0.0, 1.0),
        ]
        .into_iter()
        .map(|(x, y, z)| Vec3::new(x, y, z).normalize())
        .collect();
        Self {
            default_clip: PulseClip {
                num_frames,
                ..PulseClip::default()
            },
            clip: None,
            base,
        }
    }
}

impl Pipeline for PulsingIcosphere {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn winding(&self) -> SourceWinding {
        SourceWinding::CounterClockwise
    }

    fn load(&mut self, data: Option<&[u8]>) -> Result<u64, PipelineError> {
        let clip = match data {
            None => self.default_clip,
            Some(bytes) => serde_json::from_slice::<PulseClip>(bytes)
                .map_err(|err| PipelineError::InvalidStream(err.to_string()))?,
        };
        if clip.num_frames == 0 {
            self.clip = None;
            return Err(PipelineError::EmptyClip);
        }
        self.clip = Some(clip);
        Ok(clip.num_frames)
    }

    fn triangles(&self) -> Vec<[u32; 3]> {
        ICOSAHEDRON_FACES.to_vec()
    }

    fn forward(&mut self, index: FrameIndex) -> Result<Vec<f32>, PipelineError> {
        let clip = self.clip.ok_or(PipelineError::EmptyClip)?;
        if index >= clip.num_frames {
            return Err(PipelineError::OutOfRange {
                index,
                num_frames: clip.num_frames,
            });
        }
        let phase = (index % clip.period.max(1)) as f32 / clip.period.max(1) as f32;
        let scale = 1.0 + clip.amplitude * (phase * TAU).sin();
        Ok(self
            .base
            .iter()
            .flat_map(|v| (*v * scale).to_array())
            .collect())
    }
}
