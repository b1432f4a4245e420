//! Error types for the FEC pipeline.

use thiserror::Error;

/// Errors surfaced by the framing and coding layers.
#[derive(Debug, Error)]
pub enum FecError {
    /// A coding parameter is out of its legal range (k = 0, m = 0,
    /// k + m exceeding the field size, a block index past the group end).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An encode or decode input block does not match the configured
    /// block size.
    #[error("block size mismatch: expected {expected}, got {actual}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    /// Decode was attempted with fewer than k distinct blocks.
    #[error("insufficient blocks to decode: have {have}, need {need}")]
    InsufficientBlocks { have: usize, need: usize },

    /// A frame failed deserialisation validation.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
}

pub type Result<T> = std::result::Result<T, FecError>;
