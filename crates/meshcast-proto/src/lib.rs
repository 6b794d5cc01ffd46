// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema for meshcast: per-frame vertex pushes from the inference
//! server, flow-control commands from the viewer, and heartbeats.
//!
//! Every message travels as an [`Envelope`] (`{type, ts, data}`) encoded as
//! CBOR and wrapped in a checksummed packet (see [`wire`]).

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

pub mod wire;

/// Frame index within a clip.
pub type FrameIndex = u64;

/// Default TCP port the streaming server listens on.
pub const DEFAULT_PORT: u16 = 18805;

/// Default address a viewer connects to (`127.0.0.1:18805`).
pub fn default_server_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

/// Envelope carried as the payload of a packet.
///
/// * `type` – message type name (see [`Message::type_name`]).
/// * `ts` – sender-local sequence number, monotonic per connection.
/// * `data` – type specific body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<P> {
    /// Message type name (e.g. "frame_vertices", "buffer_state").
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender-local sequence number.
    pub ts: u64,
    /// Type-specific body.
    pub data: P,
}

/// Vertex positions for one frame (server → viewer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameVerticesPayload {
    /// Flat `[x0, y0, z0, x1, y1, z1, ...]` vertex positions.
    pub positions: Vec<f32>,
    /// Index of this frame within the clip.
    pub index: FrameIndex,
}

/// Triangle list shared by every frame of a session (server → viewer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopologyPayload {
    /// Vertex-index triples in the producer's winding order.
    pub triangles: Vec<[u32; 3]>,
}

/// Total clip length (server → viewer). Zero means unknown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameCountPayload {
    /// Number of frames in the clip.
    pub count: u64,
}

/// Result of loading new stream data on the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamUpdateAckPayload {
    /// Whether the pipeline accepted the new stream data.
    pub success: bool,
}

/// Name of the pipeline producing frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineIdentityPayload {
    /// Human readable pipeline name.
    pub name: String,
}

/// Sent once the server accepted the viewer as its single client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfirmedPayload {
    /// Always `true` when sent by a well-behaved server.
    pub confirmed: bool,
}

/// Server-driven play/pause.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackStatePayload {
    /// Whether playback should run.
    pub playing: bool,
}

/// Free-form alert surfaced to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertPayload {
    /// Alert text.
    pub message: String,
}

/// Buffer admission signal (viewer → server).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferStatePayload {
    /// Whether the viewer accepts more frames.
    pub open: bool,
    /// First frame index the viewer expects next.
    pub resume_index: FrameIndex,
}

/// Rewind/advance the server's production cursor (viewer → server).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositionPayload {
    /// Frame index production should restart at.
    pub target_index: FrameIndex,
}

/// Raw clip data uploaded by the viewer for the pipeline to load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamUploadPayload {
    /// Opaque pipeline-specific bytes.
    pub data: Vec<u8>,
}

/// Every message understood on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Vertex positions for one frame (type = "frame_vertices").
    FrameVertices(FrameVerticesPayload),
    /// Session topology (type = "topology").
    Topology(TopologyPayload),
    /// Clip length (type = "frame_count").
    FrameCount(FrameCountPayload),
    /// Stream data load result (type = "stream_update_ack").
    StreamUpdateAck(StreamUpdateAckPayload),
    /// Pipeline name (type = "pipeline_identity").
    PipelineIdentity(PipelineIdentityPayload),
    /// Viewer accepted as the server's client (type = "connection_confirmed").
    ConnectionConfirmed(ConnectionConfirmedPayload),
    /// Server-driven play/pause (type = "playback_state").
    PlaybackState(PlaybackStatePayload),
    /// User-facing alert (type = "alert").
    Alert(AlertPayload),
    /// Buffer open/closed signal (type = "buffer_state").
    BufferState(BufferStatePayload),
    /// Production cursor reposition (type = "reposition").
    Reposition(RepositionPayload),
    /// Clip upload (type = "stream_upload").
    StreamUpload(StreamUploadPayload),
    /// Keepalive request (type = "heartbeat_ping").
    HeartbeatPing,
    /// Keepalive answer (type = "heartbeat_pong").
    HeartbeatPong,
}

impl Message {
    /// Wire type name for this message variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::FrameVertices(_) => "frame_vertices",
            Message::Topology(_) => "topology",
            Message::FrameCount(_) => "frame_count",
            Message::StreamUpdateAck(_) => "stream_update_ack",
            Message::PipelineIdentity(_) => "pipeline_identity",
            Message::ConnectionConfirmed(_) => "connection_confirmed",
            Message::PlaybackState(_) => "playback_state",
            Message::Alert(_) => "alert",
            Message::BufferState(_) => "buffer_state",
            Message::Reposition(_) => "reposition",
            Message::StreamUpload(_) => "stream_upload",
            Message::HeartbeatPing => "heartbeat_ping",
            Message::HeartbeatPong => "heartbeat_pong",
        }
    }

    /// Convenience constructor for a buffer open/closed signal.
    pub fn buffer_state(open: bool, resume_index: FrameIndex) -> Self {
        Message::BufferState(BufferStatePayload { open, resume_index })
    }

    /// Convenience constructor for a reposition command.
    pub fn reposition(target_index: FrameIndex) -> Self {
        Message::Reposition(RepositionPayload { target_index })
    }
}
