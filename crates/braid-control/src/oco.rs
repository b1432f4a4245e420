//! # OCO Redundancy Controller
//!
//! Online-convex-optimisation style controller that picks the coding
//! parameters (k, m) and the (source, repair) path pair by minimising a
//! cost weighted over loss, delay, and redundancy overhead, then learns
//! from ACK-derived feedback with a gradient step.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info, warn};

use braid_fec::FecError;

use crate::config::CostWeights;
use crate::correlation::CorrelationMatrix;
use crate::scheduler::PathState;

/// Decisions remembered for feedback learning.
const MAX_HISTORY: usize = 100;

// ─── Link Metrics ───────────────────────────────────────────────────────────

/// Quality snapshot of one path, as seen by the redundancy controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LinkMetrics {
    pub path_id: u32,
    pub rtt_ms: f64,
    pub loss_rate: f64,
    pub bandwidth_mbps: f64,
    pub jitter_ms: f64,
    pub packets_sent: u64,
    pub packets_lost: u64,
    pub bytes_in_flight: u64,
}

impl From<PathState> for LinkMetrics {
    fn from(state: PathState) -> Self {
        LinkMetrics {
            path_id: state.path_id,
            rtt_ms: state.rtt_ms,
            loss_rate: state.loss_rate,
            bandwidth_mbps: state.bandwidth_mbps,
            jitter_ms: state.jitter_ms,
            packets_sent: state.bytes_sent / 1200,
            packets_lost: 0,
            bytes_in_flight: state.cwnd_bytes,
        }
    }
}

// ─── Redundancy Decision ────────────────────────────────────────────────────

/// Output of one optimisation round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RedundancyDecision {
    pub k: u32,
    pub m: u32,
    /// m / k.
    pub redundancy_rate: f64,
    pub source_path: u32,
    pub repair_path: u32,
    /// 1 - loss(source_path); how much the prediction can be trusted.
    pub confidence: f64,
}

impl Default for RedundancyDecision {
    fn default() -> Self {
        RedundancyDecision {
            k: 4,
            m: 2,
            redundancy_rate: 0.5,
            source_path: 0,
            repair_path: 0,
            confidence: 1.0,
        }
    }
}

/// One past decision with its predicted and observed loss.
#[derive(Debug, Clone)]
struct DecisionRecord {
    decision: RedundancyDecision,
    predicted_loss: f64,
    cost: f64,
    actual_loss: Option<f64>,
}

// ─── Controller ─────────────────────────────────────────────────────────────

/// Online redundancy optimiser.
pub struct OcoController {
    metrics: BTreeMap<u32, LinkMetrics>,
    correlation: CorrelationMatrix,
    weights: CostWeights,
    min_rate: f64,
    max_rate: f64,
    learning_rate: f64,
    gradient_acc: BTreeMap<u32, f64>,
    history: VecDeque<DecisionRecord>,
}

impl OcoController {
    pub fn new(weights: CostWeights, bounds: (f64, f64), learning_rate: f64) -> Self {
        let mut controller = OcoController {
            metrics: BTreeMap::new(),
            correlation: CorrelationMatrix::new(),
            weights,
            min_rate: 0.1,
            max_rate: 1.0,
            learning_rate,
            gradient_acc: BTreeMap::new(),
            history: VecDeque::with_capacity(MAX_HISTORY),
        };
        controller.set_redundancy_bounds(bounds.0, bounds.1);
        controller
    }

    /// Refresh the quality snapshot of one path.
    pub fn update_link_metrics(&mut self, metrics: LinkMetrics) {
        self.gradient_acc.entry(metrics.path_id).or_insert(0.0);
        debug!(
            path_id = metrics.path_id,
            rtt_ms = metrics.rtt_ms,
            loss_rate = metrics.loss_rate,
            "updated link metrics"
        );
        self.metrics.insert(metrics.path_id, metrics);
    }

    pub fn update_loss_correlation(&mut self, path_i: u32, path_j: u32, rho: f64) {
        self.correlation.update(path_i, path_j, rho);
    }

    /// Replace the cost weights; they are renormalised to sum 1.
    pub fn set_cost_weights(
        &mut self,
        loss: f64,
        delay: f64,
        overhead: f64,
    ) -> Result<(), FecError> {
        let sum = loss + delay + overhead;
        if !(sum > 0.0) || loss < 0.0 || delay < 0.0 || overhead < 0.0 {
            return Err(FecError::InvalidParameter(
                "cost weights must be non-negative with a positive sum".into(),
            ));
        }
        self.weights = CostWeights {
            loss: loss / sum,
            delay: delay / sum,
            overhead: overhead / sum,
        };
        info!(weights = ?self.weights, "updated cost weights");
        Ok(())
    }

    /// Constrain the redundancy rate. Inputs are clamped to [0, 1]; if the
    /// clamped bounds conflict, the narrower (upper) constraint wins.
    pub fn set_redundancy_bounds(&mut self, min_rate: f64, max_rate: f64) {
        let max = max_rate.clamp(0.0, 1.0);
        let min = min_rate.clamp(0.0, 1.0).min(max);
        self.min_rate = min;
        self.max_rate = max;
        info!(min_rate = min, max_rate = max, "updated redundancy bounds");
    }

    pub fn redundancy_bounds(&self) -> (f64, f64) {
        (self.min_rate, self.max_rate)
    }

    pub fn all_metrics(&self) -> Vec<LinkMetrics> {
        self.metrics.values().copied().collect()
    }

    /// Accumulated gradient state for a path (diagnostics and tests).
    pub fn gradient(&self, path_id: u32) -> Option<f64> {
        self.gradient_acc.get(&path_id).copied()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Compute the next redundancy decision from current link quality.
    /// With no known paths, returns the default decision and warns.
    pub fn compute_optimal_redundancy(&mut self) -> RedundancyDecision {
        if self.metrics.is_empty() {
            warn!("no link metrics available, using default redundancy");
            return RedundancyDecision::default();
        }

        let source_path = self.select_source_path();
        let repair_path = self.select_repair_path(source_path);
        let source = self.metrics[&source_path];

        let required = source.loss_rate * 2.0 * (1.0 + source.rtt_ms / 200.0 * 0.3);
        let redundancy_rate = required.clamp(self.min_rate, self.max_rate);
        let (k, m) = self.rate_to_params(redundancy_rate);

        let decision = RedundancyDecision {
            k,
            m,
            redundancy_rate: m as f64 / k as f64,
            source_path,
            repair_path,
            confidence: 1.0 - source.loss_rate,
        };

        let repair = self.metrics[&repair_path];
        let cost = self.decision_cost(k, m, &source, &repair);
        info!(
            k,
            m,
            redundancy_rate = decision.redundancy_rate,
            source_path,
            repair_path,
            cost,
            correlation = self.correlation.get(source_path, repair_path),
            "redundancy decision"
        );

        if self.history.len() >= MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(DecisionRecord {
            decision,
            predicted_loss: source.loss_rate,
            cost,
            actual_loss: None,
        });

        decision
    }

    /// Learn from observed loss and RTT: each path's gradient accumulator
    /// steps against the prediction error.
    pub fn feedback_update(&mut self, actual_loss: f64, actual_rtt_ms: f64) {
        let Some(record) = self.history.back_mut() else {
            return;
        };
        record.actual_loss = Some(actual_loss);
        let error = actual_loss - record.predicted_loss;

        for (path_id, acc) in self.gradient_acc.iter_mut() {
            let Some(metrics) = self.metrics.get(path_id) else {
                continue;
            };
            let gradient = self.weights.loss * metrics.loss_rate
                + self.weights.delay * (metrics.rtt_ms / 100.0);
            *acc -= self.learning_rate * gradient * error;
        }
        debug!(
            actual_loss,
            actual_rtt_ms,
            predicted_loss = record.predicted_loss,
            error,
            "feedback update"
        );
    }

    /// Cost of a (k, m, path pair) configuration.
    pub fn decision_cost(
        &self,
        k: u32,
        m: u32,
        source: &LinkMetrics,
        repair: &LinkMetrics,
    ) -> f64 {
        let loss_cost = source.loss_rate;
        let delay_cost = (source.rtt_ms + repair.rtt_ms) / 1000.0;
        let overhead_cost = m as f64 / k as f64;
        self.weights.loss * loss_cost
            + self.weights.delay * delay_cost
            + self.weights.overhead * overhead_cost
    }

    /// Best source path: low RTT and loss, high bandwidth. Ties break
    /// toward the lowest path id.
    fn select_source_path(&self) -> u32 {
        let mut best: Option<(u32, f64)> = None;
        for (&path_id, m) in &self.metrics {
            let score =
                -0.3 * m.rtt_ms - 0.5 * m.loss_rate * 1000.0 + 0.2 * m.bandwidth_mbps;
            if best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((path_id, score));
            }
        }
        best.map(|(id, _)| id).unwrap_or(0)
    }

    /// Repair path least loss-correlated with the source; a lone path
    /// falls back to itself.
    fn select_repair_path(&self, source_path: u32) -> u32 {
        let others: Vec<u32> = self
            .metrics
            .keys()
            .copied()
            .filter(|&id| id != source_path)
            .collect();
        if others.is_empty() {
            return source_path;
        }
        self.correlation
            .least_correlated(source_path, &others)
            .unwrap_or(others[0])
    }

    /// Map a redundancy rate onto concrete (k, m): k shrinks as the rate
    /// grows so high-redundancy groups seal (and recover) sooner.
    fn rate_to_params(&self, rate: f64) -> (u32, u32) {
        let k = if rate < 0.2 {
            10
        } else if rate > 0.6 {
            4
        } else {
            8
        };
        let m = ((k as f64 * rate).ceil() as u32).clamp(1, k);
        (k, m)
    }
}
