//! # FEC Wire Format
//!
//! Fixed 25-octet header followed by the block payload. All multi-octet
//! integers are big-endian; there is no escaping or variable-length
//! encoding.
//!
//! ```text
//!  0               1               9              13              17
//! +-+-+-+-+-+-+-+-+ ... +-+-+-+-+-+ ... +-+-+-+-+ ... +-+-+-+-+-+ ...
//! |  Frame Type   |   Group ID (8)   | Block Index(4)| Total Blk (4) |
//! +-+-+-+-+-+-+-+-+ ... +-+-+-+-+-+ ... +-+-+-+-+ ... +-+-+-+-+-+ ...
//! | Payload Length (4) | Payload (payload_length octets)            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Frame types:
//! - `0xF0` source — a systematic block carrying an original payload,
//!   zero-padded to the group's block size. `block_index < k`.
//! - `0xF1` repair — a parity block, exactly block-size octets.
//!   `k <= block_index < k + m`.
//! - `0xF2` params — out-of-band coding-parameter announcement. Reuses the
//!   same layout: `group_id` is the first group the parameters apply to,
//!   `block_index` carries k, `total_blocks` carries k + m, and the
//!   payload is empty.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FecError;

/// Serialized header size in octets.
pub const HEADER_SIZE: usize = 25;

// ─── Frame Type ─────────────────────────────────────────────────────────────

/// Discriminant octet of a FEC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Systematic source block.
    Source = 0xF0,
    /// Parity (repair) block.
    Repair = 0xF1,
    /// Coding-parameter announcement.
    Params = 0xF2,
}

impl FrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0xF0 => Some(FrameType::Source),
            0xF1 => Some(FrameType::Repair),
            0xF2 => Some(FrameType::Params),
            _ => None,
        }
    }
}

// ─── Frame Header ───────────────────────────────────────────────────────────

/// Decoded FEC frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    /// Coding-group identity, monotonic across the connection.
    pub group_id: u64,
    /// Position of this block within the group: `0..k` for source,
    /// `k..k+m` for repair.
    pub block_index: u32,
    /// k + m of the issuing group.
    pub total_blocks: u32,
    /// Payload length in octets.
    pub payload_length: u32,
}

impl FrameHeader {
    /// Encode the header into a buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.frame_type as u8);
        buf.put_u64(self.group_id);
        buf.put_u32(self.block_index);
        buf.put_u32(self.total_blocks);
        buf.put_u32(self.payload_length);
    }

    /// Decode a header from a buffer.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, FecError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(FecError::MalformedFrame("input shorter than header"));
        }

        let frame_type = FrameType::from_byte(buf.get_u8())
            .ok_or(FecError::MalformedFrame("unknown frame type"))?;
        let group_id = buf.get_u64();
        let block_index = buf.get_u32();
        let total_blocks = buf.get_u32();
        let payload_length = buf.get_u32();

        if block_index >= total_blocks {
            return Err(FecError::MalformedFrame("block index past group end"));
        }

        Ok(FrameHeader {
            frame_type,
            group_id,
            block_index,
            total_blocks,
            payload_length,
        })
    }
}

// ─── Frame ──────────────────────────────────────────────────────────────────

/// A complete FEC frame: header plus payload octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecFrame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl FecFrame {
    /// Build a source frame. `payload` must already be padded to the
    /// group's block size.
    pub fn source(group_id: u64, block_index: u32, total_blocks: u32, payload: Bytes) -> Self {
        FecFrame {
            header: FrameHeader {
                frame_type: FrameType::Source,
                group_id,
                block_index,
                total_blocks,
                payload_length: payload.len() as u32,
            },
            payload,
        }
    }

    /// Build a repair frame carrying one parity block.
    pub fn repair(group_id: u64, block_index: u32, total_blocks: u32, payload: Bytes) -> Self {
        FecFrame {
            header: FrameHeader {
                frame_type: FrameType::Repair,
                group_id,
                block_index,
                total_blocks,
                payload_length: payload.len() as u32,
            },
            payload,
        }
    }

    /// Build a params announcement: groups with id >= `from_group_id` are
    /// coded with (k, m) until a later announcement supersedes it.
    pub fn params(from_group_id: u64, k: u32, m: u32) -> Self {
        FecFrame {
            header: FrameHeader {
                frame_type: FrameType::Params,
                group_id: from_group_id,
                block_index: k,
                total_blocks: k + m,
                payload_length: 0,
            },
            payload: Bytes::new(),
        }
    }

    pub fn is_repair(&self) -> bool {
        self.header.frame_type == FrameType::Repair
    }

    pub fn is_params(&self) -> bool {
        self.header.frame_type == FrameType::Params
    }

    /// Serialize the entire frame (header + payload).
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a complete frame from raw octets.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, FecError> {
        let header = FrameHeader::decode(buf)?;
        let payload_len = header.payload_length as usize;
        if buf.remaining() < payload_len {
            return Err(FecError::MalformedFrame("truncated payload"));
        }
        let payload = buf.copy_to_bytes(payload_len);
        Ok(FecFrame { header, payload })
    }

    /// Total serialized size of this frame.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
