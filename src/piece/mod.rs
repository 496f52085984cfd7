//! Piece commitments
//!
//! - [`PieceHasher`] / [`HashingReader`]: streaming commitment over a byte stream
//! - [`PieceCid`]: v1/v2 identifiers and conversion between them
//! - [`AggregateComposer`]: aggregate commitment from an ordered list of pieces

mod aggregate;
mod hasher;
mod link;
pub mod tree;

pub use aggregate::{AggregateComposer, DEFAULT_DEAL_HEIGHT};
pub use hasher::{HashingReader, PieceHasher, hash_reader};
pub use link::{
    FIL_COMMITMENT_UNSEALED, FR32_SHA256_TRUNC254_PADBINTREE, PieceCid, PieceDigest, RAW,
    SHA2_256_TRUNC254_PADDED, height_from_log2_size,
};
