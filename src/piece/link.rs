//! PieceCID parsing, formatting and v1 → v2 conversion

use cid::Cid;
use cid::multihash::Multihash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::tree::{MAX_HEIGHT, MIN_PIECE_HEIGHT, NODE_SIZE, Node, padded_size, unpadded_size};
use crate::error::{Error, Result};

/// Multicodec `fil-commitment-unsealed`, the PieceCIDv1 codec
pub const FIL_COMMITMENT_UNSEALED: u64 = 0xf101;

/// Multihash `sha2-256-trunc254-padded`, the PieceCIDv1 hash
pub const SHA2_256_TRUNC254_PADDED: u64 = 0x1012;

/// Multicodec `raw`, the PieceCIDv2 codec
pub const RAW: u64 = 0x55;

/// Multihash `fr32-sha256-trunc254-padbintree`, the PieceCIDv2 hash
pub const FR32_SHA256_TRUNC254_PADBINTREE: u64 = 0x1011;

/// Smallest log2 padded size accepted for v1 → v2 conversion (128 bytes)
const MIN_LOG2_SIZE: u32 = 7;

/// Commitment produced by the piece hasher: tree root plus its size metadata
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PieceDigest {
    /// Merkle root
    pub root: Node,
    /// Tree height; padded size is `32 << height`
    pub height: u8,
    /// Zero bytes added to the payload to fill the tree
    pub padding: u64,
}

impl PieceDigest {
    /// Padded size of the piece in bytes
    pub fn padded_size(&self) -> u64 {
        padded_size(self.height)
    }

    /// Payload size the digest was computed over
    pub fn payload_size(&self) -> u64 {
        unpadded_size(self.height).saturating_sub(self.padding)
    }

    /// Multihash digest bytes: `uvarint(padding) || height || root`
    fn to_multihash_digest(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(10 + 1 + NODE_SIZE);
        write_uvarint(&mut bytes, self.padding);
        bytes.push(self.height);
        bytes.extend_from_slice(&self.root);
        bytes
    }

    fn from_multihash_digest(bytes: &[u8]) -> std::result::Result<Self, String> {
        let (padding, used) = read_uvarint(bytes).ok_or("malformed padding varint")?;
        let rest = &bytes[used..];
        if rest.len() != 1 + NODE_SIZE {
            return Err(format!(
                "expected {} bytes of height and root, found {}",
                1 + NODE_SIZE,
                rest.len()
            ));
        }
        let height = rest[0];
        if height > MAX_HEIGHT {
            return Err(format!("height {height} exceeds maximum {MAX_HEIGHT}"));
        }
        if padding > unpadded_size(height) {
            return Err(format!(
                "padding {padding} exceeds capacity of a height {height} tree"
            ));
        }
        let mut root = [0u8; NODE_SIZE];
        root.copy_from_slice(&rest[1..]);
        Ok(Self {
            root,
            height,
            padding,
        })
    }
}

/// Piece identifier in either of its two encodings.
///
/// Equality compares the embedded digest byte for byte, so a v1 and a v2
/// identifier for the same root are different values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PieceCid {
    /// Legacy PieceCIDv1: root only
    V1 {
        /// Merkle root
        root: Node,
    },
    /// PieceCIDv2: root with height and padding embedded
    V2(PieceDigest),
}

impl PieceCid {
    /// Parse a PieceCID string (v1 or v2)
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let cid = Cid::try_from(trimmed).map_err(|e| Error::InvalidPiece {
            input: trimmed.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_cid(&cid).map_err(|reason| Error::InvalidPiece {
            input: trimmed.to_string(),
            reason,
        })
    }

    fn from_cid(cid: &Cid) -> std::result::Result<Self, String> {
        let hash = cid.hash();
        match (cid.codec(), hash.code()) {
            (FIL_COMMITMENT_UNSEALED, SHA2_256_TRUNC254_PADDED) => {
                let root: Node = hash
                    .digest()
                    .try_into()
                    .map_err(|_| format!("v1 digest must be {NODE_SIZE} bytes"))?;
                Ok(Self::V1 { root })
            }
            (RAW, FR32_SHA256_TRUNC254_PADBINTREE) => {
                PieceDigest::from_multihash_digest(hash.digest()).map(Self::V2)
            }
            (codec, code) => Err(format!(
                "not a piece CID (codec {codec:#x}, multihash {code:#x})"
            )),
        }
    }

    /// The CID this identifier encodes
    pub fn to_cid(&self) -> Cid {
        match self {
            Self::V1 { root } => Cid::new_v1(
                FIL_COMMITMENT_UNSEALED,
                wrap_digest(SHA2_256_TRUNC254_PADDED, root),
            ),
            Self::V2(digest) => Cid::new_v1(
                RAW,
                wrap_digest(FR32_SHA256_TRUNC254_PADBINTREE, &digest.to_multihash_digest()),
            ),
        }
    }

    /// Merkle root
    pub fn root(&self) -> &Node {
        match self {
            Self::V1 { root } => root,
            Self::V2(digest) => &digest.root,
        }
    }

    /// Tree height, known only for v2
    pub fn height(&self) -> Option<u8> {
        self.digest().map(|d| d.height)
    }

    /// Full digest, available only for v2
    pub fn digest(&self) -> Option<&PieceDigest> {
        match self {
            Self::V1 { .. } => None,
            Self::V2(digest) => Some(digest),
        }
    }

    /// Convert a v1 identifier to v2 by embedding `height`.
    ///
    /// Aggregates carry no padding, so the result always has zero padding.
    pub fn to_v2(&self, height: u8) -> Result<Self> {
        if !(MIN_PIECE_HEIGHT..=MAX_HEIGHT).contains(&height) {
            return Err(Error::InvalidInput(format!(
                "height {height} out of range {MIN_PIECE_HEIGHT}..={MAX_HEIGHT}"
            )));
        }
        match self {
            Self::V1 { root } => Ok(Self::V2(PieceDigest {
                root: *root,
                height,
                padding: 0,
            })),
            Self::V2(_) => Err(Error::InvalidPiece {
                input: self.to_string(),
                reason: "already a PieceCIDv2".to_string(),
            }),
        }
    }
}

/// Tree height of a piece whose padded size is `2^log2_size` bytes
pub fn height_from_log2_size(log2_size: u32) -> Result<u8> {
    let max = u32::from(MAX_HEIGHT) + 5;
    if !(MIN_LOG2_SIZE..=max).contains(&log2_size) {
        return Err(Error::InvalidInput(format!(
            "log2 size {log2_size} out of range {MIN_LOG2_SIZE}..={max}"
        )));
    }
    Ok((log2_size - 5) as u8)
}

impl fmt::Display for PieceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_cid())
    }
}

impl FromStr for PieceCid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PieceCid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PieceCid> for String {
    fn from(piece: PieceCid) -> Self {
        piece.to_string()
    }
}

// Digests passed here are at most 43 bytes, well under the 64-byte multihash capacity
#[allow(clippy::expect_used)]
fn wrap_digest(code: u64, digest: &[u8]) -> Multihash<64> {
    Multihash::<64>::wrap(code, digest).expect("piece digest always fits in a 64-byte multihash")
}

fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_uvarint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate().take(10) {
        let low = u64::from(byte & 0x7f);
        if i == 9 && low > 1 {
            return None;
        }
        value |= low << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}
