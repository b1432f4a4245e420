//! # FEC Controller
//!
//! Composes the coding pipeline and the multipath schedulers behind two
//! hook operations: `send_stream_data` on the send path and
//! `receive_fec_frame` on the receive path. The transport drives it with
//! ACK/loss notifications, path-state updates, and a periodic tick.
//!
//! ```text
//! [stream data] -> GroupManager -> Codec -> (source, repair) path split
//!                      ^                          |
//!            periodic_update <- OcoController <- ACK/loss feedback
//! ```
//!
//! ## Locking
//!
//! Each sub-component sits behind its own mutex; the control state (current
//! decision, packet-number counters, stats, feedback window) is held for
//! the whole of every public operation so composed updates stay coherent.
//! Lock order is always control state first, then at most one component
//! lock at a time.

use bytes::Bytes;
use quanta::Instant;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use braid_fec::{CodecKind, EncodedGroup, FecFrame, GroupManager, PacketNumberMap, ReceiveAssembler};

use crate::config::FecConfig;
use crate::error::{ControlError, Result};
use crate::oco::{LinkMetrics, OcoController, RedundancyDecision};
use crate::scheduler::{PathScheduler, PathState};
use crate::stats::{ControllerStats, Ewma};
use crate::strategy::{FecStrategy, StrategySelector};

/// Smoothing factor for ACK-derived RTT feedback.
const RTT_EWMA_ALPHA: f64 = 0.125;

// ─── Send Metadata ──────────────────────────────────────────────────────────

/// One frame handed to the transport: where it goes, under which per-path
/// packet number, and its wire form.
#[derive(Debug, Clone)]
pub struct SendPacketMeta {
    pub packet_number: u64,
    pub path_id: u32,
    pub frame: FecFrame,
    pub is_repair: bool,
    pub send_time: Instant,
}

impl SendPacketMeta {
    /// Serialize the frame for the wire.
    pub fn to_wire(&self) -> Bytes {
        self.frame.encode().freeze()
    }
}

// ─── Control State ──────────────────────────────────────────────────────────

/// Per-path ACK/loss window accumulated between periodic updates.
struct PathFeedback {
    acked: u64,
    lost: u64,
    rtt_ms: Ewma,
}

impl PathFeedback {
    fn new() -> Self {
        PathFeedback {
            acked: 0,
            lost: 0,
            rtt_ms: Ewma::new(RTT_EWMA_ALPHA),
        }
    }

    fn reset(&mut self) {
        self.acked = 0;
        self.lost = 0;
        self.rtt_ms.reset();
    }
}

/// State guarded by the controller-level lock.
struct ControlState {
    fec_enabled: bool,
    decision: RedundancyDecision,
    /// Last (k, m) announced on the wire with a params frame.
    announced_params: Option<(u32, u32)>,
    /// Monotonic per-path packet-number counters, starting at 1.
    next_packet_numbers: BTreeMap<u32, u64>,
    feedback: BTreeMap<u32, PathFeedback>,
    stats: ControllerStats,
    last_update: Option<Instant>,
}

// ─── Controller ─────────────────────────────────────────────────────────────

/// The multipath FEC orchestrator.
pub struct FecController {
    cfg: FecConfig,
    groups: Mutex<GroupManager>,
    assembler: Mutex<ReceiveAssembler>,
    mappings: Mutex<PacketNumberMap>,
    scheduler: Mutex<PathScheduler>,
    oco: Mutex<OcoController>,
    strategy: StrategySelector,
    ctrl: Mutex<ControlState>,
}

/// A poisoned component lock only means another thread panicked mid-update;
/// the guarded state is still structurally valid, so recover the guard.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FecController {
    /// Build a controller with the production Reed-Solomon codec.
    pub fn new(cfg: FecConfig) -> Result<Self> {
        Self::with_codec_kind(cfg, CodecKind::CauchyRs)
    }

    /// Build a controller with an explicit codec construction.
    pub fn with_codec_kind(cfg: FecConfig, kind: CodecKind) -> Result<Self> {
        cfg.validate()?;

        let groups = GroupManager::new(cfg.k, cfg.m, cfg.block_size, kind)?;
        let assembler = ReceiveAssembler::new(cfg.k, cfg.m, kind);
        let oco = OcoController::new(
            cfg.cost_weights,
            (cfg.min_redundancy_rate, cfg.max_redundancy_rate),
            cfg.learning_rate,
        );
        let scheduler = PathScheduler::new(cfg.scheduler);

        info!(
            k = cfg.k,
            m = cfg.m,
            block_size = cfg.block_size,
            "FEC controller initialized"
        );

        let state = ControlState {
            fec_enabled: true,
            decision: RedundancyDecision {
                k: cfg.k,
                m: cfg.m,
                redundancy_rate: cfg.m as f64 / cfg.k as f64,
                ..RedundancyDecision::default()
            },
            announced_params: None,
            next_packet_numbers: BTreeMap::new(),
            feedback: BTreeMap::new(),
            stats: ControllerStats::new(),
            last_update: None,
        };

        Ok(FecController {
            cfg,
            groups: Mutex::new(groups),
            assembler: Mutex::new(assembler),
            mappings: Mutex::new(PacketNumberMap::new()),
            scheduler: Mutex::new(scheduler),
            oco: Mutex::new(oco),
            strategy: StrategySelector::default(),
            ctrl: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &FecConfig {
        &self.cfg
    }

    // ─── Path registry ──────────────────────────────────────────────────

    /// Register a path with the scheduler and the redundancy controller
    /// and start its packet-number sequence at 1.
    pub fn add_path(&self, path_id: u32, mut state: PathState) {
        state.path_id = path_id;
        let mut ctrl = lock(&self.ctrl);
        ctrl.next_packet_numbers.entry(path_id).or_insert(1);
        lock(&self.scheduler).update_path_state(state);
        lock(&self.oco).update_link_metrics(LinkMetrics::from(state));
        info!(path_id, "added path");
    }

    /// Fan a path-state update out to the scheduler and OCO.
    pub fn update_path_state(&self, state: PathState) {
        let _ctrl = lock(&self.ctrl);
        lock(&self.scheduler).update_path_state(state);
        lock(&self.oco).update_link_metrics(LinkMetrics::from(state));
    }

    /// Fan a loss-correlation observation out to the scheduler and OCO.
    pub fn update_loss_correlation(&self, path_i: u32, path_j: u32, rho: f64) {
        let _ctrl = lock(&self.ctrl);
        lock(&self.scheduler).update_correlation(path_i, path_j, rho);
        lock(&self.oco).update_loss_correlation(path_i, path_j, rho);
    }

    // ─── Send hook ──────────────────────────────────────────────────────

    /// Ingest one application payload. Returns the frames to transmit:
    /// nothing while the current group is still filling; a full group of
    /// source and repair frames (preceded by a params announcement when
    /// (k, m) changed) once it seals.
    pub fn send_stream_data(
        &self,
        payload: &[u8],
        origin_path: u32,
    ) -> Result<Vec<SendPacketMeta>> {
        let mut ctrl = lock(&self.ctrl);

        if !ctrl.fec_enabled {
            // Pass-through: one raw source-shaped frame on the origin path.
            if !ctrl.next_packet_numbers.contains_key(&origin_path) {
                return Err(ControlError::UnknownPath(origin_path));
            }
            let packet_number = Self::next_packet_number(&mut ctrl, origin_path);
            ctrl.stats.total_packets_sent += 1;
            ctrl.stats.source_packets_sent += 1;
            return Ok(vec![SendPacketMeta {
                packet_number,
                path_id: origin_path,
                frame: FecFrame::source(0, 0, 1, Bytes::copy_from_slice(payload)),
                is_repair: false,
                send_time: Instant::now(),
            }]);
        }

        let completed = lock(&self.groups).add_source_packet(payload)?;
        let Some(group_id) = completed else {
            return Ok(Vec::new());
        };

        let group = lock(&self.groups)
            .get_encoded_group(group_id)
            .cloned()
            .ok_or_else(|| {
                braid_fec::FecError::InvalidParameter(format!(
                    "completed group {group_id} missing from manager"
                ))
            })?;
        ctrl.stats.groups_created += 1;
        self.emit_group(&mut ctrl, &group, origin_path)
    }

    /// Seal and emit the current partial group in response to an external
    /// deadline. An empty group produces no frames.
    pub fn flush_pending(&self) -> Result<Vec<SendPacketMeta>> {
        let mut ctrl = lock(&self.ctrl);
        let flushed = lock(&self.groups).flush_pending()?;
        self.emit_flushed(&mut ctrl, &flushed)
    }

    // ─── Receive hook ───────────────────────────────────────────────────

    /// Ingest one frame from the transport. Returns recovered source
    /// payloads when the frame completes its group.
    pub fn receive_fec_frame(&self, frame: &FecFrame, from_path: u32) -> Vec<Vec<u8>> {
        let mut ctrl = lock(&self.ctrl);
        let recovered = lock(&self.assembler).on_frame_received(frame);
        if !recovered.is_empty() {
            ctrl.stats.packets_recovered += recovered.len() as u64;
            info!(
                group_id = frame.header.group_id,
                from_path,
                recovered = recovered.len(),
                "recovered payloads from FEC decoding"
            );
        }
        recovered
    }

    // ─── Transport feedback ─────────────────────────────────────────────

    /// ACK notification: feeds the per-path feedback window driving the
    /// next OCO learning step.
    pub fn on_ack_received(&self, path_id: u32, packet_number: u64, rtt_us: u64) {
        let mut ctrl = lock(&self.ctrl);
        if let Some(mapping) = lock(&self.mappings).find_by_packet(path_id, packet_number) {
            debug!(
                path_id,
                packet_number,
                group_id = mapping.group_id,
                rtt_ms = rtt_us as f64 / 1000.0,
                "ack received"
            );
        }
        let fb = ctrl.feedback.entry(path_id).or_insert_with(PathFeedback::new);
        fb.acked += 1;
        fb.rtt_ms.update(rtt_us as f64 / 1000.0);
    }

    /// Loss notification from the transport's loss detector.
    pub fn on_packet_lost(&self, path_id: u32, packet_number: u64) {
        let mut ctrl = lock(&self.ctrl);
        if let Some(mapping) = lock(&self.mappings).find_by_packet(path_id, packet_number) {
            info!(
                path_id,
                packet_number,
                group_id = mapping.group_id,
                is_repair = mapping.is_repair,
                "packet lost"
            );
        }
        let fb = ctrl.feedback.entry(path_id).or_insert_with(PathFeedback::new);
        fb.lost += 1;
    }

    // ─── Periodic update ────────────────────────────────────────────────

    /// Drive the adaptation loop: at most once per configured interval,
    /// feed the accumulated ACK/loss window to OCO, recompute the
    /// decision, apply (k, m) to the group manager, and GC old state.
    /// Returns frames for any group flushed by a parameter change.
    pub fn periodic_update(&self) -> Result<Vec<SendPacketMeta>> {
        let mut ctrl = lock(&self.ctrl);

        let now = Instant::now();
        if let Some(last) = ctrl.last_update {
            if now.duration_since(last)
                < Duration::from_millis(self.cfg.periodic_min_interval_ms)
            {
                return Ok(Vec::new());
            }
        }
        ctrl.last_update = Some(now);

        {
            let mut oco = lock(&self.oco);

            // Learn from the window observed under the previous decision.
            let source = ctrl.decision.source_path;
            if let Some(fb) = ctrl.feedback.get(&source) {
                let total = fb.acked + fb.lost;
                if total > 0 {
                    let actual_loss = fb.lost as f64 / total as f64;
                    oco.feedback_update(actual_loss, fb.rtt_ms.value());
                }
            }
            for fb in ctrl.feedback.values_mut() {
                fb.reset();
            }

            ctrl.decision = oco.compute_optimal_redundancy();
        }
        ctrl.stats.current_redundancy_rate = ctrl.decision.redundancy_rate;

        let (k, m) = (ctrl.decision.k, ctrl.decision.m);
        let flushed = lock(&self.groups).update_coding_params(k, m)?;
        let metas = self.emit_flushed(&mut ctrl, &flushed)?;

        if ctrl.stats.groups_created > self.cfg.gc_trigger_groups {
            let before = ctrl.stats.groups_created - self.cfg.gc_keep_groups;
            lock(&self.mappings).cleanup_old_mappings(before);
            lock(&self.groups).cleanup_old_groups(before);
            lock(&self.assembler).cleanup_old_groups(before);
            debug!(before, "garbage-collected mappings and groups");
        }

        Ok(metas)
    }

    // ─── Switches and accessors ─────────────────────────────────────────

    pub fn set_fec_enabled(&self, enabled: bool) {
        let mut ctrl = lock(&self.ctrl);
        ctrl.fec_enabled = enabled;
        info!(enabled, "FEC toggled");
    }

    /// Apply a strategy's redundancy band to the OCO bounds.
    pub fn set_fec_strategy(&self, strategy: FecStrategy) {
        let _ctrl = lock(&self.ctrl);
        let (min_rate, max_rate) = strategy.band();
        lock(&self.oco).set_redundancy_bounds(min_rate, max_rate);
        info!(?strategy, min_rate, max_rate, "FEC strategy set");
    }

    /// Strategy the selector would pick for current link conditions.
    pub fn recommended_strategy(&self) -> FecStrategy {
        let metrics = lock(&self.oco).all_metrics();
        self.strategy.select(&metrics)
    }

    pub fn stats(&self) -> ControllerStats {
        lock(&self.ctrl).stats.clone()
    }

    /// The redundancy decision currently steering path assignment.
    pub fn decision(&self) -> RedundancyDecision {
        lock(&self.ctrl).decision
    }

    /// Mappings recorded for one group (diagnostics and tests).
    pub fn mappings_for_group(&self, group_id: u64) -> Vec<braid_fec::PacketMapping> {
        lock(&self.mappings).find_by_group(group_id)
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn next_packet_number(ctrl: &mut ControlState, path_id: u32) -> u64 {
        let counter = ctrl.next_packet_numbers.entry(path_id).or_insert(1);
        let number = *counter;
        *counter += 1;
        number
    }

    /// Assign paths and packet numbers to a group's frames, record the
    /// mappings, and update counters. Source frames go to the decision's
    /// source path, repair frames to its repair path; unregistered
    /// decision paths degrade to scheduler picks and finally to
    /// `fallback_path`.
    fn emit_group(
        &self,
        ctrl: &mut ControlState,
        group: &EncodedGroup,
        fallback_path: u32,
    ) -> Result<Vec<SendPacketMeta>> {
        let (source_path, repair_path) = self.pick_paths(ctrl, group, fallback_path);

        let mut metas = Vec::with_capacity(group.total_blocks() as usize + 1);

        if ctrl.announced_params != Some((group.k, group.m)) {
            let packet_number = Self::next_packet_number(ctrl, source_path);
            metas.push(SendPacketMeta {
                packet_number,
                path_id: source_path,
                frame: FecFrame::params(group.group_id, group.k, group.m),
                is_repair: false,
                send_time: Instant::now(),
            });
            ctrl.announced_params = Some((group.k, group.m));
            ctrl.stats.params_frames_sent += 1;
            ctrl.stats.total_packets_sent += 1;
        }

        let mut mappings = lock(&self.mappings);
        for frame in group.frames() {
            let (path_id, is_repair) = if frame.is_repair() {
                (repair_path, true)
            } else {
                (source_path, false)
            };
            let packet_number = Self::next_packet_number(ctrl, path_id);
            mappings.add_mapping(
                group.group_id,
                frame.header.block_index,
                path_id,
                packet_number,
                is_repair,
            );
            ctrl.stats.total_packets_sent += 1;
            if is_repair {
                ctrl.stats.repair_packets_sent += 1;
            } else {
                ctrl.stats.source_packets_sent += 1;
            }
            metas.push(SendPacketMeta {
                packet_number,
                path_id,
                frame,
                is_repair,
                send_time: Instant::now(),
            });
        }

        debug!(
            group_id = group.group_id,
            frames = metas.len(),
            source_path,
            repair_path,
            "assigned group frames to paths"
        );
        Ok(metas)
    }

    /// Emit every group flushed by a deadline or parameter change so its
    /// frames are not silently dropped.
    fn emit_flushed(
        &self,
        ctrl: &mut ControlState,
        flushed: &[u64],
    ) -> Result<Vec<SendPacketMeta>> {
        let mut metas = Vec::new();
        for &group_id in flushed {
            let group = lock(&self.groups).get_encoded_group(group_id).cloned();
            if let Some(group) = group {
                ctrl.stats.groups_created += 1;
                ctrl.stats.groups_flushed += 1;
                let fallback = ctrl.decision.source_path;
                metas.extend(self.emit_group(ctrl, &group, fallback)?);
            }
        }
        Ok(metas)
    }

    /// Resolve the (source, repair) pair: the OCO decision is authoritative
    /// when its paths are registered; otherwise the scheduler picks, and a
    /// pathless scheduler degrades to the fallback path.
    fn pick_paths(
        &self,
        ctrl: &ControlState,
        group: &EncodedGroup,
        fallback_path: u32,
    ) -> (u32, u32) {
        let scheduler = lock(&self.scheduler);

        let mut source_path = ctrl.decision.source_path;
        if !scheduler.contains(source_path) {
            source_path = match scheduler.select_source_path(group.block_size) {
                Ok(id) => id,
                Err(_) => {
                    warn!(fallback_path, "no schedulable paths, using fallback");
                    fallback_path
                }
            };
        }

        let mut repair_path = ctrl.decision.repair_path;
        if !scheduler.contains(repair_path) || repair_path == source_path {
            repair_path = scheduler
                .select_repair_path(source_path, group.block_size)
                .unwrap_or(source_path);
        }

        (source_path, repair_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(path_id: u32, rtt_ms: f64, loss_rate: f64, bandwidth_mbps: f64) -> PathState {
        PathState {
            path_id,
            rtt_ms,
            loss_rate,
            bandwidth_mbps,
            ..PathState::default()
        }
    }

    fn two_path_controller(cfg: FecConfig) -> FecController {
        let controller = FecController::new(cfg).unwrap();
        controller.add_path(0, path(0, 20.0, 0.01, 100.0));
        controller.add_path(1, path(1, 60.0, 0.03, 50.0));
        controller.update_loss_correlation(0, 1, 0.02);
        controller
    }

    #[test]
    fn group_completion_emits_params_then_frames() {
        let cfg = FecConfig {
            k: 3,
            m: 2,
            block_size: 16,
            ..FecConfig::default()
        };
        let controller = two_path_controller(cfg);

        assert!(controller.send_stream_data(b"a", 0).unwrap().is_empty());
        assert!(controller.send_stream_data(b"b", 0).unwrap().is_empty());
        let metas = controller.send_stream_data(b"c", 0).unwrap();

        // 1 params + 3 source + 2 repair.
        assert_eq!(metas.len(), 6);
        assert!(metas[0].frame.is_params());
        assert_eq!(
            metas[1..4]
                .iter()
                .filter(|m| !m.is_repair && !m.frame.is_params())
                .count(),
            3
        );
        assert_eq!(metas[4..].iter().filter(|m| m.is_repair).count(), 2);

        // A second group under the same params skips the announcement.
        for b in [b"d" as &[u8], b"e", b"f"] {
            let metas = controller.send_stream_data(b, 0).unwrap();
            if !metas.is_empty() {
                assert!(!metas[0].frame.is_params());
                assert_eq!(metas.len(), 5);
            }
        }
    }

    #[test]
    fn frames_split_across_decision_paths() {
        let cfg = FecConfig {
            k: 2,
            m: 2,
            block_size: 8,
            ..FecConfig::default()
        };
        let controller = two_path_controller(cfg);

        // Default decision names path 0 twice; the repair flow must still
        // land on the least-correlated other path.
        controller.send_stream_data(b"x", 0).unwrap();
        let metas: Vec<SendPacketMeta> = controller
            .send_stream_data(b"y", 0)
            .unwrap()
            .into_iter()
            .filter(|m| !m.frame.is_params())
            .collect();
        assert_eq!(metas.len(), 4);
        assert!(metas.iter().filter(|m| !m.is_repair).all(|m| m.path_id == 0));
        assert!(metas.iter().filter(|m| m.is_repair).all(|m| m.path_id == 1));
    }

    #[test]
    fn per_path_packet_numbers_increase_from_one() {
        let cfg = FecConfig {
            k: 2,
            m: 1,
            block_size: 8,
            ..FecConfig::default()
        };
        let controller = two_path_controller(cfg);

        let mut per_path: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
        for i in 0..8u8 {
            for meta in controller.send_stream_data(&[i], 0).unwrap() {
                per_path.entry(meta.path_id).or_default().push(meta.packet_number);
            }
        }
        for numbers in per_path.values() {
            assert_eq!(numbers[0], 1);
            assert!(numbers.windows(2).all(|w| w[1] == w[0] + 1));
        }
    }

    #[test]
    fn mappings_recorded_per_emitted_frame() {
        let cfg = FecConfig {
            k: 2,
            m: 1,
            block_size: 8,
            ..FecConfig::default()
        };
        let controller = two_path_controller(cfg);
        controller.send_stream_data(b"a", 0).unwrap();
        let metas = controller.send_stream_data(b"b", 0).unwrap();
        let group_id = metas
            .iter()
            .find(|m| !m.frame.is_params())
            .unwrap()
            .frame
            .header
            .group_id;

        let mappings = controller.mappings_for_group(group_id);
        assert_eq!(mappings.len(), 3); // 2 source + 1 repair, params unmapped
        for meta in metas.iter().filter(|m| !m.frame.is_params()) {
            let found = mappings
                .iter()
                .find(|mapping| {
                    mapping.path_id == meta.path_id
                        && mapping.packet_number == meta.packet_number
                })
                .unwrap();
            assert_eq!(found.is_repair, meta.is_repair);
            assert_eq!(found.block_index, meta.frame.header.block_index);
        }
    }

    #[test]
    fn fec_disabled_passes_payload_through() {
        let controller = two_path_controller(FecConfig::default());
        controller.set_fec_enabled(false);

        let metas = controller.send_stream_data(b"raw payload", 1).unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].path_id, 1);
        assert!(!metas[0].is_repair);
        assert_eq!(&metas[0].frame.payload[..], b"raw payload");

        // Unregistered origin path is an error.
        assert!(matches!(
            controller.send_stream_data(b"x", 9),
            Err(ControlError::UnknownPath(9))
        ));
    }

    #[test]
    fn flush_pending_emits_partial_group() {
        let cfg = FecConfig {
            k: 4,
            m: 2,
            block_size: 8,
            ..FecConfig::default()
        };
        let controller = two_path_controller(cfg);
        controller.send_stream_data(b"only-one", 0).unwrap();

        let metas = controller.flush_pending().unwrap();
        // params + 4 source (3 zero-padded) + 2 repair.
        assert_eq!(metas.len(), 7);
        assert_eq!(controller.stats().groups_flushed, 1);

        assert!(controller.flush_pending().unwrap().is_empty());
    }

    #[test]
    fn feedback_window_resets_after_periodic_update() {
        let controller = two_path_controller(FecConfig {
            periodic_min_interval_ms: 0,
            ..FecConfig::default()
        });
        for pkt in 1..=20 {
            controller.on_ack_received(0, pkt, 20_000);
        }
        controller.on_packet_lost(0, 21);
        controller.periodic_update().unwrap();

        let ctrl = lock(&controller.ctrl);
        assert!(ctrl.feedback.values().all(|fb| fb.acked == 0 && fb.lost == 0));
    }

    #[test]
    fn periodic_update_respects_min_interval() {
        let controller = two_path_controller(FecConfig::default());
        controller.periodic_update().unwrap();
        let decision_before = controller.decision();

        // Immediately after, the update is a no-op.
        controller.update_path_state(path(0, 500.0, 0.4, 1.0));
        controller.periodic_update().unwrap();
        assert_eq!(controller.decision(), decision_before);
    }
}
