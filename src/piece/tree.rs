//! Binary Merkle tree primitives shared by the piece hasher and the aggregate composer.
//!
//! Nodes are 32-byte SHA-256 outputs with the two most significant bits of the
//! final byte cleared, so every node is a valid 254-bit field element.

use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Size of a tree node in bytes
pub const NODE_SIZE: usize = 32;

/// Largest tree height whose padded size still fits in a `u64`
pub const MAX_HEIGHT: u8 = 58;

/// Smallest height a hashed piece can have (one 127-byte quad = 4 leaves)
pub const MIN_PIECE_HEIGHT: u8 = 2;

/// A single tree node
pub type Node = [u8; NODE_SIZE];

/// Commitments of all-zero subtrees, indexed by height
static ZERO_COMMS: LazyLock<Vec<Node>> = LazyLock::new(|| {
    let mut comms = Vec::with_capacity(MAX_HEIGHT as usize + 1);
    let mut node = [0u8; NODE_SIZE];
    comms.push(node);
    for _ in 0..MAX_HEIGHT {
        node = hash_pair(&node, &node);
        comms.push(node);
    }
    comms
});

/// Hash two sibling nodes into their parent
pub fn hash_pair(left: &Node, right: &Node) -> Node {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut parent: Node = hasher.finalize().into();
    parent[NODE_SIZE - 1] &= 0b0011_1111;
    parent
}

/// Commitment of a subtree of `height` whose leaves are all zero.
///
/// Heights above [`MAX_HEIGHT`] are clamped; callers validate heights on parse.
pub fn zero_comm(height: u8) -> Node {
    ZERO_COMMS[height.min(MAX_HEIGHT) as usize]
}

/// Padded size in bytes of a tree of the given height
pub fn padded_size(height: u8) -> u64 {
    (NODE_SIZE as u64) << height
}

/// Number of payload bytes a tree of the given height can hold before FR32 expansion
pub fn unpadded_size(height: u8) -> u64 {
    padded_size(height) / 128 * 127
}

/// Smallest height whose leaf count is at least `leaves`
pub fn height_for_leaves(leaves: u64) -> u8 {
    if leaves <= 1 {
        return 0;
    }
    (u64::BITS - (leaves - 1).leading_zeros()) as u8
}
