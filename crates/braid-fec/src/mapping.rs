//! # Packet-Number Mapping
//!
//! Reconciles per-path packet numbers with group-level coding identities.
//! Every frame handed to the transport gets exactly one mapping entry,
//! keyed by (path, packet number) and indexed by group id, until GC ages
//! it out.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// One emitted frame's identity on both axes: where it went on the wire
/// and what it is inside the coding group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMapping {
    pub group_id: u64,
    pub block_index: u32,
    pub path_id: u32,
    pub packet_number: u64,
    pub is_repair: bool,
}

/// Bidirectional mapping table. Key identity is (path_id, packet_number);
/// the group index holds the same entries for ranged lookup and GC.
#[derive(Debug, Default)]
pub struct PacketNumberMap {
    by_packet: HashMap<(u32, u64), PacketMapping>,
    by_group: BTreeMap<u64, Vec<(u32, u64)>>,
}

impl PacketNumberMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one emitted frame. Called exactly once per frame handed to
    /// the transport.
    pub fn add_mapping(
        &mut self,
        group_id: u64,
        block_index: u32,
        path_id: u32,
        packet_number: u64,
        is_repair: bool,
    ) {
        let mapping = PacketMapping {
            group_id,
            block_index,
            path_id,
            packet_number,
            is_repair,
        };
        self.by_packet.insert((path_id, packet_number), mapping);
        self.by_group
            .entry(group_id)
            .or_default()
            .push((path_id, packet_number));
    }

    /// Look up by wire identity.
    pub fn find_by_packet(&self, path_id: u32, packet_number: u64) -> Option<&PacketMapping> {
        self.by_packet.get(&(path_id, packet_number))
    }

    /// All mappings of a coding group, in emission order.
    pub fn find_by_group(&self, group_id: u64) -> Vec<PacketMapping> {
        self.by_group
            .get(&group_id)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| self.by_packet.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove every mapping whose group id is below `before_group_id`.
    /// Idempotent.
    pub fn cleanup_old_mappings(&mut self, before_group_id: u64) {
        let retained = self.by_group.split_off(&before_group_id);
        let removed = std::mem::replace(&mut self.by_group, retained);
        let mut dropped = 0usize;
        for keys in removed.values() {
            for key in keys {
                self.by_packet.remove(key);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, before_group_id, "cleaned up packet mappings");
        }
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.by_packet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_packet.is_empty()
    }
}
