//! # Coding Group Lifecycle
//!
//! Source payloads accumulate into coding groups of `k` blocks. When a
//! group fills it is sealed and encoded in one step, so a sealed-but-
//! unencoded group is never observable. Encoded groups are held for frame
//! emission and retransmission bookkeeping until retired by GC.
//!
//! ```text
//!   Open ──k payloads──▶ Sealed+Encoded ──cleanup_old_groups──▶ Retired
//!     │
//!   flush_pending (zero-fill to k)
//! ```

use bytes::Bytes;
use quanta::Instant;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::codec::{BlockCodec, CodecKind};
use crate::error::FecError;
use crate::wire::FecFrame;

// ─── Encoded Group ──────────────────────────────────────────────────────────

/// A fully encoded coding group: `k` source blocks plus `m` parity blocks,
/// all exactly `block_size` octets.
#[derive(Debug, Clone)]
pub struct EncodedGroup {
    pub group_id: u64,
    pub k: u32,
    pub m: u32,
    pub block_size: usize,
    /// When the group was opened.
    pub created: Instant,
    /// Source payloads in arrival order, padded to `block_size`.
    pub source_blocks: Vec<Bytes>,
    /// Parity blocks in coding order.
    pub repair_blocks: Vec<Bytes>,
}

impl EncodedGroup {
    pub fn total_blocks(&self) -> u32 {
        self.k + self.m
    }

    /// Emit the group's wire frames: source frames in block order followed
    /// by repair frames in block order.
    pub fn frames(&self) -> Vec<FecFrame> {
        let total = self.total_blocks();
        let mut frames = Vec::with_capacity(total as usize);
        for (i, block) in self.source_blocks.iter().enumerate() {
            frames.push(FecFrame::source(
                self.group_id,
                i as u32,
                total,
                block.clone(),
            ));
        }
        for (j, block) in self.repair_blocks.iter().enumerate() {
            frames.push(FecFrame::repair(
                self.group_id,
                self.k + j as u32,
                total,
                block.clone(),
            ));
        }
        frames
    }
}

// ─── Group Manager ──────────────────────────────────────────────────────────

/// The group currently accepting source payloads.
struct OpenGroup {
    group_id: u64,
    created: Instant,
    payloads: Vec<Vec<u8>>,
}

/// Accumulates source payloads into groups, encodes them, and owns every
/// group from creation to retirement.
///
/// Invariants: exactly one open group exists at any time; group ids are
/// issued from a strictly monotonic counter starting at 1; a group's
/// (k, m) is fixed at seal time even if the active parameters change later.
pub struct GroupManager {
    k: u32,
    m: u32,
    block_size: usize,
    kind: CodecKind,
    codec: BlockCodec,
    next_group_id: u64,
    open: OpenGroup,
    encoded: BTreeMap<u64, EncodedGroup>,
}

impl GroupManager {
    pub fn new(k: u32, m: u32, block_size: usize, kind: CodecKind) -> Result<Self, FecError> {
        let codec = BlockCodec::new(k as usize, m as usize, block_size, kind)?;
        let mut next_group_id = 1;
        let open = OpenGroup {
            group_id: next_group_id,
            created: Instant::now(),
            payloads: Vec::with_capacity(k as usize),
        };
        next_group_id += 1;
        info!(k, m, block_size, "group manager initialized");
        Ok(GroupManager {
            k,
            m,
            block_size,
            kind,
            codec,
            next_group_id,
            open,
            encoded: BTreeMap::new(),
        })
    }

    /// Active coding parameters (k, m).
    pub fn coding_params(&self) -> (u32, u32) {
        (self.k, self.m)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of payloads queued in the open group.
    pub fn pending_len(&self) -> usize {
        self.open.payloads.len()
    }

    /// Number of encoded groups currently retained.
    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    /// Append a source payload (padded or truncated to the block size) to
    /// the open group. When the group reaches `k` payloads it is sealed and
    /// encoded atomically and its id returned.
    pub fn add_source_packet(&mut self, payload: &[u8]) -> Result<Option<u64>, FecError> {
        let mut block = payload.to_vec();
        block.resize(self.block_size, 0);
        self.open.payloads.push(block);

        debug!(
            group_id = self.open.group_id,
            queued = self.open.payloads.len(),
            k = self.k,
            "queued source payload"
        );

        if self.open.payloads.len() >= self.k as usize {
            let id = self.seal_and_encode()?;
            return Ok(Some(id));
        }
        Ok(None)
    }

    /// Look up an encoded group by id.
    pub fn get_encoded_group(&self, group_id: u64) -> Option<&EncodedGroup> {
        self.encoded.get(&group_id)
    }

    /// Seal the open group early: pad the remainder with zero-filled blocks
    /// up to `k`, encode, and return the group id. An empty open group is
    /// left untouched.
    pub fn flush_pending(&mut self) -> Result<Vec<u64>, FecError> {
        if self.open.payloads.is_empty() {
            return Ok(Vec::new());
        }
        while self.open.payloads.len() < self.k as usize {
            self.open.payloads.push(vec![0u8; self.block_size]);
        }
        let id = self.seal_and_encode()?;
        info!(group_id = id, "flushed partial group");
        Ok(vec![id])
    }

    /// Change the active coding parameters. Any partial open group is
    /// flushed under the old parameters first; subsequent groups use the
    /// new codec. Returns the ids of groups flushed by the change.
    pub fn update_coding_params(&mut self, k: u32, m: u32) -> Result<Vec<u64>, FecError> {
        if k == self.k && m == self.m {
            return Ok(Vec::new());
        }
        let flushed = self.flush_pending()?;

        info!(
            old_k = self.k,
            old_m = self.m,
            k,
            m,
            "updating coding parameters"
        );
        self.codec = BlockCodec::new(k as usize, m as usize, self.block_size, self.kind)?;
        self.k = k;
        self.m = m;
        Ok(flushed)
    }

    /// Retire every encoded group with id below `before_group_id`.
    /// Idempotent; unknown ids are ignored.
    pub fn cleanup_old_groups(&mut self, before_group_id: u64) {
        let retained = self.encoded.split_off(&before_group_id);
        let removed = self.encoded.len();
        self.encoded = retained;
        if removed > 0 {
            debug!(removed, before_group_id, "retired encoded groups");
        }
    }

    /// Encode the open group and replace it with a fresh one. Sealing and
    /// encoding happen in one step so no partial sealed group is observable.
    fn seal_and_encode(&mut self) -> Result<u64, FecError> {
        let repair = self.codec.encode(&self.open.payloads)?;

        let fresh = OpenGroup {
            group_id: self.next_group_id,
            created: Instant::now(),
            payloads: Vec::with_capacity(self.k as usize),
        };
        self.next_group_id += 1;
        let sealed = std::mem::replace(&mut self.open, fresh);

        let group = EncodedGroup {
            group_id: sealed.group_id,
            k: self.k,
            m: self.m,
            block_size: self.block_size,
            created: sealed.created,
            source_blocks: sealed.payloads.into_iter().map(Bytes::from).collect(),
            repair_blocks: repair.into_iter().map(Bytes::from).collect(),
        };
        let id = group.group_id;
        debug!(group_id = id, k = self.k, m = self.m, "group encoded");
        self.encoded.insert(id, group);
        Ok(id)
    }
}
