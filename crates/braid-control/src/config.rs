//! Controller configuration with deployment defaults.

use braid_fec::FecError;
use serde::{Deserialize, Serialize};

/// Weights of the OCO decision cost, renormalised to sum 1 on update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    pub loss: f64,
    pub delay: f64,
    pub overhead: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        CostWeights {
            loss: 0.5,
            delay: 0.3,
            overhead: 0.2,
        }
    }
}

/// Path-scheduler cost coefficients and learning rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerTuning {
    /// RTT coefficient (applied to rtt_ms / 100).
    pub rtt_weight: f64,
    /// Loss-rate coefficient.
    pub loss_weight: f64,
    /// Inverse-bandwidth coefficient (applied to 100 / bandwidth).
    pub bandwidth_weight: f64,
    /// Exponentiated-gradient step size.
    pub learning_rate: f64,
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        SchedulerTuning {
            rtt_weight: 0.5,
            loss_weight: 0.3,
            bandwidth_weight: 0.2,
            learning_rate: 0.1,
        }
    }
}

/// Full controller configuration. Defaults match the deployment baseline:
/// (k, m) = (4, 2) over 1200-octet blocks, redundancy rate within
/// [0.1, 1.0], 100 ms periodic cadence, mapping GC at 1000 groups keeping
/// the newest 500.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FecConfig {
    pub k: u32,
    pub m: u32,
    pub block_size: usize,
    pub cost_weights: CostWeights,
    pub min_redundancy_rate: f64,
    pub max_redundancy_rate: f64,
    /// OCO feedback learning rate (eta).
    pub learning_rate: f64,
    pub scheduler: SchedulerTuning,
    pub periodic_min_interval_ms: u64,
    /// GC arms once this many groups have been created.
    pub gc_trigger_groups: u64,
    /// GC keeps the newest N groups' mappings and buffers.
    pub gc_keep_groups: u64,
}

impl Default for FecConfig {
    fn default() -> Self {
        FecConfig {
            k: 4,
            m: 2,
            block_size: 1200,
            cost_weights: CostWeights::default(),
            min_redundancy_rate: 0.1,
            max_redundancy_rate: 1.0,
            learning_rate: 0.05,
            scheduler: SchedulerTuning::default(),
            periodic_min_interval_ms: 100,
            gc_trigger_groups: 1000,
            gc_keep_groups: 500,
        }
    }
}

impl FecConfig {
    /// Reject configurations the pipeline cannot honour.
    pub fn validate(&self) -> Result<(), FecError> {
        if self.k == 0 || self.m == 0 {
            return Err(FecError::InvalidParameter(
                "k and m must be greater than 0".into(),
            ));
        }
        if self.k + self.m > 255 {
            return Err(FecError::InvalidParameter(format!(
                "k + m = {} exceeds GF(2^8) limit of 255",
                self.k + self.m
            )));
        }
        if self.block_size == 0 {
            return Err(FecError::InvalidParameter(
                "block size must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_redundancy_rate)
            || !(0.0..=1.0).contains(&self.max_redundancy_rate)
            || self.min_redundancy_rate > self.max_redundancy_rate
        {
            return Err(FecError::InvalidParameter(format!(
                "redundancy bounds out of order: [{}, {}]",
                self.min_redundancy_rate, self.max_redundancy_rate
            )));
        }
        Ok(())
    }
}
