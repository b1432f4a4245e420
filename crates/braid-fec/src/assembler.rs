//! # Receive-Side Group Assembly
//!
//! Buffers incoming FEC frames by (group, block index) and recovers the
//! original source payloads as soon as any `k` distinct blocks of a group
//! have arrived.
//!
//! The wire header does not carry `k` directly; the sender announces it
//! out-of-band with params frames (see [`crate::wire`]). The assembler keeps
//! those announcements as epochs (`first group id -> (k, m)`) and resolves
//! each group against them. For traffic without an announcement it falls
//! back to the deployment default when `total_blocks` matches, and lastly to
//! the legacy 2:1 convention some older senders hard-code.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::codec::{BlockCodec, CodecKind};
use crate::wire::{FecFrame, FrameType};

// ─── Receive Group ──────────────────────────────────────────────────────────

/// Per-group receive buffer.
struct ReceiveGroup {
    k: u32,
    m: u32,
    block_size: usize,
    /// Received blocks by index; duplicates overwrite.
    blocks: BTreeMap<u32, Bytes>,
    /// Set once the group has been decoded; later frames are discarded.
    decoded: bool,
}

// ─── Assembler ──────────────────────────────────────────────────────────────

/// Reassembles coding groups on the receive side and invokes the decoder
/// when a group becomes solvable.
pub struct ReceiveAssembler {
    default_k: u32,
    default_m: u32,
    kind: CodecKind,
    /// Coding-parameter epochs: first group id -> (k, m).
    epochs: BTreeMap<u64, (u32, u32)>,
    groups: HashMap<u64, ReceiveGroup>,
    /// Decoder cache, keyed by (k, m, block_size).
    codecs: HashMap<(u32, u32, usize), BlockCodec>,
}

impl ReceiveAssembler {
    pub fn new(default_k: u32, default_m: u32, kind: CodecKind) -> Self {
        ReceiveAssembler {
            default_k,
            default_m,
            kind,
            epochs: BTreeMap::new(),
            groups: HashMap::new(),
            codecs: HashMap::new(),
        }
    }

    /// Number of groups currently buffered.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Ingest one frame. Returns the group's `k` recovered source payloads
    /// in block order the first time the group becomes decodable, otherwise
    /// an empty vec. A frame that cannot be used (size mismatch, stale
    /// group) is dropped; the group may still recover from later frames.
    pub fn on_frame_received(&mut self, frame: &FecFrame) -> Vec<Vec<u8>> {
        if frame.header.frame_type == FrameType::Params {
            self.record_params(frame);
            return Vec::new();
        }

        let group_id = frame.header.group_id;
        if frame.payload.is_empty() {
            warn!(group_id, "dropping data frame with empty payload");
            return Vec::new();
        }

        let (k, m) = self.resolve_params(group_id, frame.header.total_blocks);
        let group = self.groups.entry(group_id).or_insert_with(|| ReceiveGroup {
            k,
            m,
            block_size: frame.payload.len(),
            blocks: BTreeMap::new(),
            decoded: false,
        });

        if group.decoded {
            return Vec::new();
        }
        if frame.payload.len() != group.block_size {
            warn!(
                group_id,
                expected = group.block_size,
                actual = frame.payload.len(),
                "dropping frame with mismatched block size"
            );
            return Vec::new();
        }

        group
            .blocks
            .insert(frame.header.block_index, frame.payload.clone());
        debug!(
            group_id,
            block_index = frame.header.block_index,
            have = group.blocks.len(),
            need = group.k,
            "buffered FEC frame"
        );

        if group.blocks.len() < group.k as usize {
            return Vec::new();
        }
        Self::try_decode(group_id, group, self.kind, &mut self.codecs)
    }

    /// Whether a group has enough distinct blocks to attempt decoding.
    pub fn can_decode(&self, group_id: u64) -> bool {
        self.groups
            .get(&group_id)
            .map(|g| g.blocks.len() >= g.k as usize)
            .unwrap_or(false)
    }

    /// Drop buffered state for every group with id below `before_group_id`.
    /// The newest epoch at or below the cutoff is kept so retained groups
    /// still resolve their parameters.
    pub fn cleanup_old_groups(&mut self, before_group_id: u64) {
        self.groups.retain(|&id, _| id >= before_group_id);
        if let Some((&boundary, _)) = self.epochs.range(..=before_group_id).next_back() {
            self.epochs = self.epochs.split_off(&boundary);
        }
    }

    fn record_params(&mut self, frame: &FecFrame) {
        let k = frame.header.block_index;
        let total = frame.header.total_blocks;
        if k == 0 || total <= k {
            warn!(k, total, "ignoring malformed params announcement");
            return;
        }
        let m = total - k;
        debug!(
            from_group = frame.header.group_id,
            k, m, "recorded coding-parameter epoch"
        );
        self.epochs.insert(frame.header.group_id, (k, m));
    }

    /// Resolve (k, m) for a group: announcement epoch, then the deployment
    /// default, then the legacy 2:1 inference.
    fn resolve_params(&self, group_id: u64, total_blocks: u32) -> (u32, u32) {
        if let Some((_, &(k, m))) = self.epochs.range(..=group_id).next_back() {
            if k + m == total_blocks {
                return (k, m);
            }
        }
        if self.default_k + self.default_m == total_blocks {
            return (self.default_k, self.default_m);
        }
        let k = (total_blocks * 2 / 3).max(1);
        (k, total_blocks - k)
    }

    fn try_decode(
        group_id: u64,
        group: &mut ReceiveGroup,
        kind: CodecKind,
        codecs: &mut HashMap<(u32, u32, usize), BlockCodec>,
    ) -> Vec<Vec<u8>> {
        // All source blocks present: no solver needed.
        if (0..group.k).all(|i| group.blocks.contains_key(&i)) {
            group.decoded = true;
            return (0..group.k)
                .map(|i| group.blocks[&i].to_vec())
                .collect();
        }

        let key = (group.k, group.m, group.block_size);
        if !codecs.contains_key(&key) {
            match BlockCodec::new(group.k as usize, group.m as usize, group.block_size, kind) {
                Ok(codec) => {
                    codecs.insert(key, codec);
                }
                Err(e) => {
                    warn!(group_id, error = %e, "cannot build decoder for group");
                    return Vec::new();
                }
            }
        }
        let codec = &codecs[&key];

        let ids: Vec<u32> = group.blocks.keys().copied().collect();
        let blocks: Vec<Vec<u8>> = group.blocks.values().map(|b| b.to_vec()).collect();
        match codec.decode(&blocks, &ids) {
            Ok(recovered) => {
                group.decoded = true;
                debug!(group_id, recovered = recovered.len(), "group decoded");
                recovered
            }
            Err(e) => {
                // Leave the group undecoded; a later frame may succeed.
                warn!(group_id, error = %e, "decode attempt failed");
                Vec::new()
            }
        }
    }
}
