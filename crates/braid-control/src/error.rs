//! Error types for the scheduling and control layer.

use braid_fec::FecError;
use thiserror::Error;

/// Errors surfaced by path scheduling and the controller hooks.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Framing or coding failure bubbled up from the FEC pipeline.
    #[error(transparent)]
    Fec(#[from] FecError),

    /// An operation referenced a path id that was never registered.
    #[error("unknown path {0}")]
    UnknownPath(u32),

    /// A selection operation ran against an empty path set.
    #[error("no paths available")]
    NoPathsAvailable,
}

pub type Result<T> = std::result::Result<T, ControlError>;
