//! # braid-control
//!
//! Multipath scheduling and redundancy control for the braid FEC overlay.
//!
//! Source payloads are coded into groups by `braid-fec`; this crate decides
//! where the resulting frames go and how much redundancy to spend. Source
//! and repair traffic are split across the least loss-correlated path pair
//! so a burst on one path rarely takes out both the data and its parity,
//! and an online-convex-optimisation controller keeps (k, m) matched to
//! observed link quality.
//!
//! ## Crate structure
//!
//! - [`correlation`] — pairwise loss-correlation matrix
//! - [`scheduler`] — weighted multipath scheduler
//! - [`oco`] — online redundancy optimiser
//! - [`strategy`] — redundancy-band strategy selection
//! - [`controller`] — the orchestrating send/receive hooks
//! - [`config`] — deployment configuration
//! - [`stats`] — counters and smoothing
//! - [`error`] — typed error surface

pub mod config;
pub mod controller;
pub mod correlation;
pub mod error;
pub mod oco;
pub mod scheduler;
pub mod stats;
pub mod strategy;

pub use config::{CostWeights, FecConfig, SchedulerTuning};
pub use controller::{FecController, SendPacketMeta};
pub use correlation::CorrelationMatrix;
pub use error::ControlError;
pub use oco::{LinkMetrics, OcoController, RedundancyDecision};
pub use scheduler::{PathScheduler, PathState};
pub use stats::{ControllerStats, Ewma};
pub use strategy::{FecStrategy, StrategySelector};
