//! # Loss-Correlation Matrix
//!
//! Symmetric table of pairwise loss correlation between paths. On bonded
//! cellular + Wi-Fi deployments losses are often correlated (shared
//! bottleneck, same radio tower); sending repair traffic on the path least
//! correlated with the source path decorrelates group losses and is what
//! makes the redundancy actually pay off.

use std::collections::BTreeMap;
use tracing::debug;

/// Pairwise loss correlation, stored on the canonical key
/// (min(i, j), max(i, j)). Values are clamped to [-1, 1]; self-correlation
/// is 1; absent pairs default to 0 (independence assumption).
#[derive(Debug, Default, Clone)]
pub struct CorrelationMatrix {
    entries: BTreeMap<(u32, u32), f64>,
}

impl CorrelationMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the correlation coefficient between two paths.
    pub fn update(&mut self, path_i: u32, path_j: u32, rho: f64) {
        let rho = rho.clamp(-1.0, 1.0);
        let key = (path_i.min(path_j), path_i.max(path_j));
        self.entries.insert(key, rho);
        debug!(path_i, path_j, rho, "updated loss correlation");
    }

    /// Correlation between two paths.
    pub fn get(&self, path_i: u32, path_j: u32) -> f64 {
        if path_i == path_j {
            return 1.0;
        }
        let key = (path_i.min(path_j), path_i.max(path_j));
        self.entries.get(&key).copied().unwrap_or(0.0)
    }

    /// The candidate whose absolute correlation with `path_id` is lowest.
    /// Ties break toward the lowest path id. Returns `None` when no
    /// candidate other than `path_id` exists.
    pub fn least_correlated(&self, path_id: u32, candidates: &[u32]) -> Option<u32> {
        let mut sorted: Vec<u32> = candidates.iter().copied().filter(|&c| c != path_id).collect();
        sorted.sort_unstable();

        let mut best: Option<(u32, f64)> = None;
        for candidate in sorted {
            let corr = self.get(path_id, candidate).abs();
            if best.map(|(_, b)| corr < b).unwrap_or(true) {
                best = Some((candidate, corr));
            }
        }
        best.map(|(id, _)| id)
    }
}
