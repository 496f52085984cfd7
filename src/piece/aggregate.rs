//! Aggregate commitment composition
//!
//! An aggregate is the commitment of a deal-sized tree holding the padded
//! pieces in order, followed by a data segment index at the tail. Each piece
//! starts at an offset aligned to its own size. The index area holds one
//! 64-byte entry per piece (`root || offset || size || checksum`, offsets
//! and sizes in padded bytes, little endian). Everything else is zero.

use sha2::{Digest, Sha256};

use super::link::{PieceCid, PieceDigest};
use super::tree::{MAX_HEIGHT, NODE_SIZE, Node, hash_pair, padded_size, zero_comm};
use crate::error::{Error, Result};

/// Height of a 32 GiB deal, the default aggregate size
pub const DEFAULT_DEAL_HEIGHT: u8 = 30;

/// Bytes per segment index entry
const ENTRY_SIZE: u64 = 64;

/// Bytes of the truncated SHA-256 checksum closing each entry
const CHECKSUM_SIZE: usize = 16;

/// Subtree of the aggregate tree with a known root
#[derive(Clone, Copy, Debug)]
struct Placement {
    /// First leaf covered
    offset: u64,
    height: u8,
    root: Node,
}

/// Recomputes aggregate identifiers from an ordered list of pieces.
///
/// Composition is a pure function of the input order: swapping two
/// different pieces moves them to different offsets and changes the root.
#[derive(Clone, Copy, Debug)]
pub struct AggregateComposer {
    deal_height: u8,
}

impl Default for AggregateComposer {
    fn default() -> Self {
        Self {
            deal_height: DEFAULT_DEAL_HEIGHT,
        }
    }
}

impl AggregateComposer {
    /// Composer for 32 GiB deals
    pub fn new() -> Self {
        Self::default()
    }

    /// Composer for deals of `32 << height` padded bytes
    pub fn with_deal_height(height: u8) -> Self {
        Self {
            deal_height: height,
        }
    }

    /// Height of the aggregates this composer produces
    pub fn deal_height(&self) -> u8 {
        self.deal_height
    }

    /// Compose `pieces` into one aggregate PieceCIDv2
    pub fn compose(&self, pieces: &[PieceCid]) -> Result<PieceCid> {
        if pieces.is_empty() {
            return Err(Error::EmptyInput);
        }
        let height = self.deal_height;
        if height > MAX_HEIGHT {
            return Err(Error::InvalidInput(format!(
                "deal height {height} exceeds maximum {MAX_HEIGHT}"
            )));
        }

        let deal_size = padded_size(height);
        let entries = max_index_entries(deal_size);
        let index_bytes = entries * ENTRY_SIZE;
        if index_bytes >= deal_size {
            return Err(Error::InvalidInput(format!(
                "deal height {height} leaves no room for pieces"
            )));
        }
        if pieces.len() as u64 > entries {
            return Err(Error::InvalidInput(format!(
                "{} pieces exceed the {entries} index entries of a deal of height {height}",
                pieces.len()
            )));
        }
        let index_start = (deal_size - index_bytes) / NODE_SIZE as u64;

        let mut placements = layout(pieces, index_start)?;
        let index = index_nodes(&placements, index_start);
        placements.extend(index);

        tracing::debug!(pieces = pieces.len(), height, index_start, "composed aggregate layout");

        Ok(PieceCid::V2(PieceDigest {
            root: subtree_root(&placements, height, 0),
            height,
            padding: 0,
        }))
    }
}

/// Index entries a deal of `deal_size` padded bytes reserves room for
fn max_index_entries(deal_size: u64) -> u64 {
    (deal_size / 2048 / ENTRY_SIZE).next_power_of_two().max(4)
}

/// Assign each piece its aligned offset; every piece must end before `limit`
fn layout(pieces: &[PieceCid], limit: u64) -> Result<Vec<Placement>> {
    let mut placements = Vec::with_capacity(pieces.len() * 3);
    let mut offset = 0u64;

    for piece in pieces {
        let digest = piece.digest().ok_or_else(|| {
            Error::InvalidInput(format!(
                "{piece} has no embedded height; aggregation needs PieceCIDv2"
            ))
        })?;
        if digest.height > MAX_HEIGHT {
            return Err(Error::InvalidInput(format!("{piece} is taller than any deal")));
        }
        let size = 1u64 << digest.height;
        offset = offset
            .div_ceil(size)
            .checked_mul(size)
            .filter(|start| start.checked_add(size).is_some_and(|end| end <= limit))
            .ok_or_else(|| {
                Error::InvalidInput(format!("{piece} does not fit before the segment index"))
            })?;

        placements.push(Placement {
            offset,
            height: digest.height,
            root: digest.root,
        });
        offset += size;
    }

    Ok(placements)
}

/// Two leaves per piece at the start of the index area
fn index_nodes(pieces: &[Placement], index_start: u64) -> Vec<Placement> {
    let mut nodes = Vec::with_capacity(pieces.len() * 2);
    for (n, piece) in pieces.iter().enumerate() {
        let [root, meta] = segment_entry(piece);
        let at = index_start + 2 * n as u64;
        nodes.push(Placement {
            offset: at,
            height: 0,
            root,
        });
        nodes.push(Placement {
            offset: at + 1,
            height: 0,
            root: meta,
        });
    }
    nodes
}

/// Serialized index entry for one piece, split into its two leaves
fn segment_entry(piece: &Placement) -> [Node; 2] {
    let mut meta = [0u8; NODE_SIZE];
    meta[..8].copy_from_slice(&(piece.offset * NODE_SIZE as u64).to_le_bytes());
    meta[8..16].copy_from_slice(&padded_size(piece.height).to_le_bytes());

    // Checksum covers the entry with its checksum field zeroed
    let mut hasher = Sha256::new();
    hasher.update(piece.root);
    hasher.update(meta);
    let digest = hasher.finalize();
    meta[16..].copy_from_slice(&digest[..CHECKSUM_SIZE]);
    meta[NODE_SIZE - 1] &= 0b0011_1111;

    [piece.root, meta]
}

/// Root of the subtree of `height` starting at leaf `start`.
///
/// `placements` are sorted by offset and all lie inside the subtree; pieces
/// never straddle a split because each is aligned to its own size.
fn subtree_root(placements: &[Placement], height: u8, start: u64) -> Node {
    match placements {
        [] => zero_comm(height),
        [only] if only.height == height => only.root,
        _ => {
            let mid = start + (1u64 << (height - 1));
            let split = placements.partition_point(|p| p.offset < mid);
            let left = subtree_root(&placements[..split], height - 1, start);
            let right = subtree_root(&placements[split..], height - 1, mid);
            hash_pair(&left, &right)
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::PieceHasher;

    fn piece_of(byte: u8, len: usize) -> PieceCid {
        let mut hasher = PieceHasher::new();
        hasher.update(&vec![byte; len]);
        hasher.link()
    }

    fn root_of(piece: &PieceCid) -> Node {
        *piece.root()
    }

    fn fold(mut level: Vec<Node>) -> Node {
        while level.len() > 1 {
            level = level
                .chunks_exact(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
        }
        level[0]
    }

    /// Index entry leaves written out field by field
    fn entry_leaves(root: Node, offset_bytes: u64, size_bytes: u64) -> [Node; 2] {
        let mut entry = [0u8; 64];
        entry[..32].copy_from_slice(&root);
        entry[32..40].copy_from_slice(&offset_bytes.to_le_bytes());
        entry[40..48].copy_from_slice(&size_bytes.to_le_bytes());
        let checksum = Sha256::digest(entry);
        entry[48..64].copy_from_slice(&checksum[..16]);
        entry[63] &= 0x3f;

        let mut meta = [0u8; 32];
        meta.copy_from_slice(&entry[32..]);
        [root, meta]
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = AggregateComposer::new().compose(&[]).unwrap_err();
        assert!(matches!(err, Error::EmptyInput));
    }

    #[test]
    fn default_deal_is_32_gib() {
        let composer = AggregateComposer::new();
        assert_eq!(composer.deal_height(), DEFAULT_DEAL_HEIGHT);

        let aggregate = composer.compose(&[piece_of(1, 1000)]).unwrap();
        assert_eq!(aggregate.height(), Some(30));
        assert_eq!(aggregate.digest().unwrap().padding, 0);
        assert_eq!(aggregate.digest().unwrap().padded_size(), 32 << 30);
    }

    #[test]
    fn index_entries_count_scales_with_deal_size() {
        assert_eq!(max_index_entries(padded_size(6)), 4);
        assert_eq!(max_index_entries(padded_size(14)), 4);
        assert_eq!(max_index_entries(padded_size(15)), 8);
        assert_eq!(max_index_entries(padded_size(30)), 1 << 18);
    }

    #[test]
    fn small_deal_matches_dense_tree() {
        // height 6: 64 leaves, 4 index entries occupy leaves 56..64
        let a = piece_of(1, 127);
        let b = piece_of(2, 254);
        assert_eq!((a.height(), b.height()), (Some(2), Some(3)));

        let aggregate = AggregateComposer::with_deal_height(6)
            .compose(&[a, b])
            .unwrap();

        let [a0, a1] = entry_leaves(root_of(&a), 0, 128);
        let [b0, b1] = entry_leaves(root_of(&b), 8 * 32, 256);
        let index = fold(vec![a0, a1, b0, b1, [0; 32], [0; 32], [0; 32], [0; 32]]);

        // level-3 view: eight subtrees of eight leaves each
        let mut level = vec![zero_comm(3); 8];
        level[0] = hash_pair(&root_of(&a), &zero_comm(2));
        level[1] = root_of(&b);
        level[7] = index;

        assert_eq!(aggregate.height(), Some(6));
        assert_eq!(*aggregate.root(), fold(level));
    }

    #[test]
    fn entry_checksum_is_a_valid_field_element() {
        let placement = Placement {
            offset: 16,
            height: 4,
            root: [0xff; 32],
        };
        let [root, meta] = segment_entry(&placement);
        assert_eq!(root, [0xff; 32]);
        assert_eq!(u64::from_le_bytes(meta[..8].try_into().unwrap()), 512);
        assert_eq!(u64::from_le_bytes(meta[8..16].try_into().unwrap()), 512);
        assert_eq!(meta[31] & 0xc0, 0);
        assert_eq!([root, meta], entry_leaves([0xff; 32], 512, 512));
    }

    #[test]
    fn known_32_gib_aggregate() {
        let pieces = [piece_of(1, 1000), piece_of(2, 127), piece_of(3, 5000)];
        assert_eq!(
            pieces.map(|p| p.height()),
            [Some(5), Some(2), Some(8)]
        );

        let aggregate = AggregateComposer::new().compose(&pieces).unwrap();
        assert_eq!(
            hex::encode(aggregate.root()),
            "472b0e06b469140acd3360e75a9712918a96c7b7435ed0b12204bc1eec3ee633"
        );
        assert_eq!(
            aggregate.to_string(),
            "bafkzcibcaapeokyoa22gsfakzuzwbz22s4jjdcuwy63ugxwqwerajpa65q7ommy"
        );
    }

    #[test]
    fn composition_is_order_sensitive() {
        let pieces = [piece_of(1, 127), piece_of(2, 254), piece_of(3, 127)];
        let mut reversed = pieces;
        reversed.reverse();

        let composer = AggregateComposer::new();
        assert_ne!(
            composer.compose(&pieces).unwrap(),
            composer.compose(&reversed).unwrap()
        );
    }

    #[test]
    fn composition_is_pure() {
        let pieces = [piece_of(4, 500), piece_of(5, 300)];
        let composer = AggregateComposer::new();
        assert_eq!(
            composer.compose(&pieces).unwrap(),
            composer.compose(&pieces).unwrap()
        );
    }

    #[test]
    fn pieces_must_end_before_the_index() {
        // two height-5 pieces need leaves 0..64, the index starts at 56
        let pieces = [piece_of(1, 1000), piece_of(2, 1000)];
        let err = AggregateComposer::with_deal_height(6)
            .compose(&pieces)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{err}");
    }

    #[test]
    fn more_pieces_than_index_entries_is_invalid() {
        let pieces: Vec<_> = (0..5).map(|i| piece_of(i, 127)).collect();
        let err = AggregateComposer::with_deal_height(6)
            .compose(&pieces)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{err}");
    }

    #[test]
    fn unusable_deal_heights_are_invalid() {
        let piece = piece_of(1, 127);
        for height in [3, MAX_HEIGHT + 1] {
            let err = AggregateComposer::with_deal_height(height)
                .compose(&[piece])
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "height {height}: {err}");
        }
    }

    #[test]
    fn v1_pieces_cannot_be_aggregated() {
        let err = AggregateComposer::new()
            .compose(&[PieceCid::V1 { root: [0; 32] }])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
