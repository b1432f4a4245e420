//! # Adaptive Strategy Bands
//!
//! Maps aggregate link conditions to a redundancy-rate band that bounds the
//! OCO controller's decisions.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::oco::LinkMetrics;

/// Redundancy posture for the current network conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FecStrategy {
    /// Hostile network: high redundancy.
    Aggressive,
    /// Middle-of-the-road conditions.
    Balanced,
    /// Clean network: minimal overhead.
    Conservative,
    /// Operator override: the full range, OCO decides alone.
    Dynamic,
}

impl FecStrategy {
    /// The (min_rate, max_rate) band this strategy allows.
    pub fn band(self) -> (f64, f64) {
        match self {
            FecStrategy::Aggressive => (0.4, 1.0),
            FecStrategy::Balanced => (0.2, 0.6),
            FecStrategy::Conservative => (0.1, 0.3),
            FecStrategy::Dynamic => (0.1, 1.0),
        }
    }
}

/// Picks a strategy from current link metrics.
#[derive(Debug, Clone, Copy)]
pub struct StrategySelector {
    /// Max loss above this selects Aggressive.
    pub aggressive_loss_threshold: f64,
    /// Mean loss below this selects Conservative.
    pub conservative_loss_threshold: f64,
}

impl Default for StrategySelector {
    fn default() -> Self {
        StrategySelector {
            aggressive_loss_threshold: 0.15,
            conservative_loss_threshold: 0.02,
        }
    }
}

impl StrategySelector {
    pub fn select(&self, metrics: &[LinkMetrics]) -> FecStrategy {
        if metrics.is_empty() {
            return FecStrategy::Balanced;
        }

        let max_loss = metrics.iter().map(|m| m.loss_rate).fold(0.0, f64::max);
        let mean_loss =
            metrics.iter().map(|m| m.loss_rate).sum::<f64>() / metrics.len() as f64;

        let strategy = if max_loss > self.aggressive_loss_threshold {
            FecStrategy::Aggressive
        } else if mean_loss < self.conservative_loss_threshold {
            FecStrategy::Conservative
        } else {
            FecStrategy::Balanced
        };
        info!(?strategy, max_loss, mean_loss, "selected FEC strategy");
        strategy
    }
}
