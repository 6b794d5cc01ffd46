// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Packet framing and CBOR helpers.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * PAYLOAD is a CBOR [`Envelope`]
//! * CHECKSUM = blake3-256 over HEADER (first 12 bytes) || PAYLOAD

use blake3::Hasher;
use ciborium::value::Value;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{
    AlertPayload, BufferStatePayload, ConnectionConfirmedPayload, Envelope, FrameCountPayload,
    FrameVerticesPayload, Message, PipelineIdentityPayload, PlaybackStatePayload,
    RepositionPayload, StreamUpdateAckPayload, StreamUploadPayload, TopologyPayload,
};

/// Protocol magic constant "MSH1".
pub const MAGIC: [u8; 4] = [0x4d, 0x53, 0x48, 0x31];
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Reserved flags (set to zero for v1).
pub const FLAGS: u16 = 0x0000;
/// Header length in bytes.
pub const HEADER_BYTES: usize = 12;
/// Trailing checksum length in bytes.
pub const CHECKSUM_BYTES: usize = 32;
/// Fixed per-packet overhead (header + checksum).
pub const OVERHEAD_BYTES: usize = HEADER_BYTES + CHECKSUM_BYTES;
/// Largest payload accepted by default (16 MiB).
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Framing and codec failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes for a complete packet.
    #[error("incomplete packet: have {have} bytes, need {need}")]
    Incomplete {
        /// Bytes available.
        have: usize,
        /// Bytes required.
        need: usize,
    },
    /// The first four bytes are not [`MAGIC`].
    #[error("bad magic")]
    BadMagic,
    /// The header carries a version other than [`VERSION`].
    #[error("unsupported version {0:#06x}")]
    UnsupportedVersion(u16),
    /// The declared payload exceeds the configured limit.
    #[error("payload too large: {len} > {max}")]
    PayloadTooLarge {
        /// Declared payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// blake3 checksum did not match header||payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// Envelope carried a type name this build does not know.
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    /// CBOR encode/decode failure.
    #[error("cbor: {0}")]
    Codec(String),
}

/// Encode a value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(|e| WireError::Codec(e.to_string()))?;
    Ok(out)
}

/// Decode a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::de::from_reader(bytes).map_err(|e| WireError::Codec(e.to_string()))
}

fn checksum(header: &[u8], payload: &[u8]) -> [u8; CHECKSUM_BYTES] {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

/// Build a full packet around an already-encoded CBOR payload.
pub fn frame_payload(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    let mut header = [0u8; HEADER_BYTES];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_be_bytes());
    header[6..8].copy_from_slice(&FLAGS.to_be_bytes());
    header[8..12].copy_from_slice(&len.to_be_bytes());

    let mut out = Vec::with_capacity(OVERHEAD_BYTES + payload.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    out.extend_from_slice(&checksum(&header, payload));
    Ok(out)
}

/// Total packet length announced by a header, if enough bytes are buffered to
/// read it.
pub fn packet_len(buf: &[u8], max_payload: usize) -> Result<Option<usize>, WireError> {
    if buf.len() < HEADER_BYTES {
        return Ok(None);
    }
    if buf[0..4] != MAGIC {
        return Err(WireError::BadMagic);
    }
    let payload_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
    if payload_len > max_payload {
        return Err(WireError::PayloadTooLarge {
            len: payload_len,
            max: max_payload,
        });
    }
    Ok(Some(OVERHEAD_BYTES + payload_len))
}

/// Drain one complete packet from a stream accumulator, leaving any trailing
/// bytes in place. Returns `Ok(None)` until a whole packet is buffered.
pub fn try_extract_frame(
    acc: &mut Vec<u8>,
    max_payload: usize,
) -> Result<Option<Vec<u8>>, WireError> {
    let Some(frame_len) = packet_len(acc, max_payload)? else {
        return Ok(None);
    };
    if acc.len() < frame_len {
        return Ok(None);
    }
    Ok(Some(acc.drain(..frame_len).collect()))
}

/// Verify a packet and return its CBOR payload slice plus the bytes consumed.
pub fn unframe(bytes: &[u8]) -> Result<(&[u8], usize), WireError> {
    if bytes.len() < OVERHEAD_BYTES {
        return Err(WireError::Incomplete {
            have: bytes.len(),
            need: OVERHEAD_BYTES,
        });
    }
    if bytes[0..4] != MAGIC {
        return Err(WireError::BadMagic);
    }
    let version = u16::from_be_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let total = OVERHEAD_BYTES + len;
    if bytes.len() < total {
        return Err(WireError::Incomplete {
            have: bytes.len(),
            need: total,
        });
    }
    let header = &bytes[..HEADER_BYTES];
    let payload = &bytes[HEADER_BYTES..HEADER_BYTES + len];
    if checksum(header, payload) != bytes[HEADER_BYTES + len..total] {
        return Err(WireError::ChecksumMismatch);
    }
    Ok((payload, total))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, WireError> {
    Value::serialized(value).map_err(|e| WireError::Codec(e.to_string()))
}

fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, WireError> {
    value
        .deserialized()
        .map_err(|e| WireError::Codec(e.to_string()))
}

/// Encode a [`Message`] into a packet with the given sequence stamp.
pub fn encode_message(msg: &Message, ts: u64) -> Result<Vec<u8>, WireError> {
    let data = match msg {
        Message::FrameVertices(p) => to_value(p)?,
        Message::Topology(p) => to_value(p)?,
        Message::FrameCount(p) => to_value(p)?,
        Message::StreamUpdateAck(p) => to_value(p)?,
        Message::PipelineIdentity(p) => to_value(p)?,
        Message::ConnectionConfirmed(p) => to_value(p)?,
        Message::PlaybackState(p) => to_value(p)?,
        Message::Alert(p) => to_value(p)?,
        Message::BufferState(p) => to_value(p)?,
        Message::Reposition(p) => to_value(p)?,
        Message::StreamUpload(p) => to_value(p)?,
        Message::HeartbeatPing | Message::HeartbeatPong => Value::Null,
    };
    let env = Envelope {
        kind: msg.type_name().to_string(),
        ts,
        data,
    };
    frame_payload(&to_cbor(&env)?)
}

/// Decode one packet into `(Message, ts, bytes_consumed)`.
pub fn decode_message(bytes: &[u8]) -> Result<(Message, u64, usize), WireError> {
    let (payload, used) = unframe(bytes)?;
    let env: Envelope<Value> = from_cbor(payload)?;
    let data = &env.data;
    let msg = match env.kind.as_str() {
        "frame_vertices" => Message::FrameVertices(from_value::<FrameVerticesPayload>(data)?),
        "topology" => Message::Topology(from_value::<TopologyPayload>(data)?),
        "frame_count" => Message::FrameCount(from_value::<FrameCountPayload>(data)?),
        "stream_update_ack" => {
            Message::StreamUpdateAck(from_value::<StreamUpdateAckPayload>(data)?)
        }
        "pipeline_identity" => {
            Message::PipelineIdentity(from_value::<PipelineIdentityPayload>(data)?)
        }
        "connection_confirmed" => {
            Message::ConnectionConfirmed(from_value::<ConnectionConfirmedPayload>(data)?)
        }
        "playback_state" => Message::PlaybackState(from_value::<PlaybackStatePayload>(data)?),
        "alert" => Message::Alert(from_value::<AlertPayload>(data)?),
        "buffer_state" => Message::BufferState(from_value::<BufferStatePayload>(data)?),
        "reposition" => Message::Reposition(from_value::<RepositionPayload>(data)?),
        "stream_upload" => Message::StreamUpload(from_value::<StreamUploadPayload>(data)?),
        "heartbeat_ping" => Message::HeartbeatPing,
        "heartbeat_pong" => Message::HeartbeatPong,
        other => return Err(WireError::UnknownType(other.to_string())),
    };
    Ok((msg, env.ts, used))
}
