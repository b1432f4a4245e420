//! # Controller Statistics
//!
//! Counters for the send/receive hooks, designed for JSON export, plus the
//! EWMA smoother used for ACK-derived RTT feedback.

use serde::Serialize;

// ─── Controller Stats ───────────────────────────────────────────────────────

/// Aggregate controller counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerStats {
    /// All frames handed to the transport.
    pub total_packets_sent: u64,
    /// Source frames handed to the transport.
    pub source_packets_sent: u64,
    /// Repair frames handed to the transport.
    pub repair_packets_sent: u64,
    /// Coding-parameter announcements sent.
    pub params_frames_sent: u64,
    /// Source payloads recovered by decoding on the receive side.
    pub packets_recovered: u64,
    /// Coding groups sealed and encoded.
    pub groups_created: u64,
    /// Groups sealed early by flush (deadline or parameter change).
    pub groups_flushed: u64,
    /// m/k of the most recent redundancy decision.
    pub current_redundancy_rate: f64,
}

impl ControllerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of sent frames that were repair traffic.
    pub fn repair_overhead(&self) -> f64 {
        if self.total_packets_sent == 0 {
            0.0
        } else {
            self.repair_packets_sent as f64 / self.total_packets_sent as f64
        }
    }
}

// ─── EWMA ───────────────────────────────────────────────────────────────────

/// Exponentially weighted moving average. The first sample seeds the value
/// directly; later samples blend in with weight `alpha`.
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    value: f64,
    initialized: bool,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&alpha));
        Ewma {
            alpha,
            value: 0.0,
            initialized: false,
        }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        self.value = if self.initialized {
            self.alpha * sample + (1.0 - self.alpha) * self.value
        } else {
            self.initialized = true;
            sample
        };
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_overhead_ratio() {
        let stats = ControllerStats {
            total_packets_sent: 120,
            repair_packets_sent: 40,
            ..ControllerStats::default()
        };
        assert!((stats.repair_overhead() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn repair_overhead_zero_div() {
        assert_eq!(ControllerStats::new().repair_overhead(), 0.0);
    }

    #[test]
    fn stats_serialize_to_json() {
        let stats = ControllerStats {
            groups_created: 3,
            current_redundancy_rate: 0.5,
            ..ControllerStats::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"groups_created\":3"));
    }

    #[test]
    fn ewma_first_sample_seeds() {
        let mut ewma = Ewma::new(0.25);
        assert_eq!(ewma.update(80.0), 80.0);
    }

    #[test]
    fn ewma_blends_later_samples() {
        let mut ewma = Ewma::new(0.5);
        ewma.update(100.0);
        assert!((ewma.update(200.0) - 150.0).abs() < 1e-9);
    }

    #[test]
    fn ewma_reset_clears_state() {
        let mut ewma = Ewma::new(0.5);
        ewma.update(10.0);
        ewma.reset();
        assert!(!ewma.is_initialized());
        assert_eq!(ewma.update(40.0), 40.0);
    }
}
