//! # braid-fec
//!
//! Group-based systematic FEC pipeline for multipath transports.
//!
//! Source payloads accumulate into coding groups of `k` blocks; each sealed
//! group is erasure-encoded into `m` parity blocks over GF(2^8). Any `k` of
//! the `k + m` blocks reconstruct the group, so a receiver survives up to
//! `m` losses per group without retransmission.
//!
//! ## Crate structure
//!
//! - [`wire`] — FEC frame header serialization (source / repair / params)
//! - [`codec`] — erasure codec engine (Cauchy Reed-Solomon, XOR reference)
//! - [`group`] — send-side group lifecycle and encoding
//! - [`assembler`] — receive-side buffering and recovery
//! - [`mapping`] — (path, packet number) to coding-identity table
//! - [`error`] — typed error surface

pub mod assembler;
pub mod codec;
pub mod error;
pub mod group;
pub mod mapping;
pub mod wire;

pub use assembler::ReceiveAssembler;
pub use codec::{BlockCodec, CodecKind};
pub use error::FecError;
pub use group::{EncodedGroup, GroupManager};
pub use mapping::{PacketMapping, PacketNumberMap};
pub use wire::{FecFrame, FrameHeader, FrameType, HEADER_SIZE};
