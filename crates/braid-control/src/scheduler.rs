//! # Path Scheduler
//!
//! Maintains per-path state and a weight distribution refreshed by an
//! exponentiated-gradient step on a cost mixing RTT, loss, and inverse
//! bandwidth. Weighted sampling spreads general traffic; the dedicated
//! source/repair selectors pick the best path and its least-correlated
//! partner for FEC flows.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::SchedulerTuning;
use crate::correlation::CorrelationMatrix;
use crate::error::ControlError;

/// Weights never drop below this floor, so no path starves completely.
const WEIGHT_FLOOR: f64 = 0.001;
/// Per-path cost floor, avoiding zero-cost degenerate updates.
const COST_FLOOR: f64 = 0.001;

// ─── Path State ─────────────────────────────────────────────────────────────

/// Transport-reported state of one path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PathState {
    pub path_id: u32,
    pub rtt_ms: f64,
    /// Loss rate in [0, 1].
    pub loss_rate: f64,
    pub bandwidth_mbps: f64,
    pub jitter_ms: f64,
    pub cwnd_bytes: u64,
    pub bytes_sent: u64,
    pub bytes_acked: u64,
}

impl PathState {
    /// A path is usable for scheduling while its loss stays below 50% and
    /// it reports more than 0.1 Mbps of bandwidth.
    pub fn is_available(&self) -> bool {
        self.loss_rate < 0.5 && self.bandwidth_mbps > 0.1
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────────────

/// Weighted multipath scheduler.
pub struct PathScheduler {
    tuning: SchedulerTuning,
    paths: BTreeMap<u32, PathState>,
    weights: BTreeMap<u32, f64>,
    correlation: CorrelationMatrix,
    rng: SmallRng,
}

impl PathScheduler {
    pub fn new(tuning: SchedulerTuning) -> Self {
        PathScheduler {
            tuning,
            paths: BTreeMap::new(),
            weights: BTreeMap::new(),
            correlation: CorrelationMatrix::new(),
            rng: SmallRng::seed_from_u64(0xB41D),
        }
    }

    /// Register or refresh a path. A new path starts at weight 1/|paths|;
    /// every update then refreshes the whole distribution.
    pub fn update_path_state(&mut self, state: PathState) {
        let path_id = state.path_id;
        let is_new = self.paths.insert(path_id, state).is_none();
        if is_new {
            let initial = 1.0 / self.paths.len().max(1) as f64;
            self.weights.insert(path_id, initial);
            info!(path_id, weight = initial, "registered path");
        }
        self.refresh_weights();
        debug!(
            path_id,
            rtt_ms = state.rtt_ms,
            loss_rate = state.loss_rate,
            bandwidth_mbps = state.bandwidth_mbps,
            "path state updated"
        );
    }

    /// Record pairwise loss correlation, used by repair-path selection.
    pub fn update_correlation(&mut self, path_i: u32, path_j: u32, rho: f64) {
        self.correlation.update(path_i, path_j, rho);
    }

    pub fn contains(&self, path_id: u32) -> bool {
        self.paths.contains_key(&path_id)
    }

    /// State of a registered path.
    pub fn path(&self, path_id: u32) -> Result<&PathState, ControlError> {
        self.paths
            .get(&path_id)
            .ok_or(ControlError::UnknownPath(path_id))
    }

    /// Current weight distribution (sums to 1 over registered paths).
    pub fn path_weights(&self) -> &BTreeMap<u32, f64> {
        &self.weights
    }

    pub fn all_paths(&self) -> Vec<PathState> {
        self.paths.values().copied().collect()
    }

    /// Sample a path from the weight distribution for general traffic.
    pub fn select_path(&mut self, _packet_size: usize) -> Result<u32, ControlError> {
        let candidates = self.candidate_ids()?;

        let total: f64 = candidates
            .iter()
            .map(|id| self.weights.get(id).copied().unwrap_or(WEIGHT_FLOOR))
            .sum();
        let draw: f64 = self.rng.random::<f64>() * total;

        let mut cumulative = 0.0;
        for id in &candidates {
            cumulative += self.weights.get(id).copied().unwrap_or(WEIGHT_FLOOR);
            if draw <= cumulative {
                return Ok(*id);
            }
        }
        // Floating-point slack: the draw can land a hair past the last bin.
        Ok(*candidates.last().ok_or(ControlError::NoPathsAvailable)?)
    }

    /// Best path for source frames: lowest RTT and loss, highest bandwidth.
    /// Ties break toward the lowest path id.
    pub fn select_source_path(&self, _packet_size: usize) -> Result<u32, ControlError> {
        let candidates = self.candidate_ids()?;

        let mut best: Option<(u32, f64)> = None;
        for id in candidates {
            let state = &self.paths[&id];
            let score = -0.4 * state.rtt_ms - 0.5 * state.loss_rate * 1000.0
                + 0.1 * state.bandwidth_mbps;
            if best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((id, score));
            }
        }
        best.map(|(id, _)| id).ok_or(ControlError::NoPathsAvailable)
    }

    /// Path for repair frames: the one least loss-correlated with the
    /// source path. A lone path carries its own repair traffic.
    pub fn select_repair_path(
        &self,
        source_path: u32,
        _packet_size: usize,
    ) -> Result<u32, ControlError> {
        let candidates = self.candidate_ids()?;
        let others: Vec<u32> = candidates
            .iter()
            .copied()
            .filter(|&id| id != source_path)
            .collect();
        if others.is_empty() {
            return Ok(source_path);
        }
        match self.correlation.least_correlated(source_path, &others) {
            Some(id) if id != source_path => Ok(id),
            _ => Ok(others[0]),
        }
    }

    /// Available paths, falling back to every registered path when the
    /// availability filter would empty a non-empty set.
    fn candidate_ids(&self) -> Result<Vec<u32>, ControlError> {
        if self.paths.is_empty() {
            return Err(ControlError::NoPathsAvailable);
        }
        let available: Vec<u32> = self
            .paths
            .iter()
            .filter(|(_, s)| s.is_available())
            .map(|(&id, _)| id)
            .collect();
        if available.is_empty() {
            Ok(self.paths.keys().copied().collect())
        } else {
            Ok(available)
        }
    }

    /// Exponentiated-gradient refresh: each weight decays with its share of
    /// the total cost, floored, then the distribution is renormalised.
    fn refresh_weights(&mut self) {
        if self.paths.is_empty() {
            return;
        }

        let costs: BTreeMap<u32, f64> = self
            .paths
            .iter()
            .map(|(&id, state)| (id, self.path_cost(state)))
            .collect();
        let total_cost: f64 = costs.values().sum();

        for (id, weight) in self.weights.iter_mut() {
            if let Some(cost) = costs.get(id) {
                let gradient = cost / total_cost.max(COST_FLOOR);
                *weight = (*weight * (-self.tuning.learning_rate * gradient).exp())
                    .max(WEIGHT_FLOOR);
            }
        }

        let sum: f64 = self.weights.values().sum();
        for weight in self.weights.values_mut() {
            *weight /= sum;
        }
    }

    fn path_cost(&self, state: &PathState) -> f64 {
        let rtt_normalized = state.rtt_ms / 100.0;
        let inverse_bandwidth = 100.0 / state.bandwidth_mbps.max(1.0);
        let cost = self.tuning.rtt_weight * rtt_normalized
            + self.tuning.loss_weight * state.loss_rate
            + self.tuning.bandwidth_weight * inverse_bandwidth;
        cost.max(COST_FLOOR)
    }
}
