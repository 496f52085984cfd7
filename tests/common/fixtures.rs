//! Deterministic CAR payloads, offers and content identifiers

use cid::Cid;
use cid::multihash::Multihash;
use piece_dl::{AggregateComposer, Offer, PieceCid, PieceHasher};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Multicodec for CAR content identifiers
pub const CAR_CODEC: u64 = 0x0202;

/// Multihash code of sha2-256
pub const SHA2_256: u64 = 0x12;

/// Payload sizes used by the default set; spans several tree heights
pub const DEFAULT_SIZES: &[usize] = &[127, 1000, 4064, 9000, 300];

/// Deterministic bytes for a payload of `len` bytes
pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32 * 7) as u8)
        .collect()
}

/// PieceCIDv2 of `data`
pub fn piece_of(data: &[u8]) -> PieceCid {
    let mut hasher = PieceHasher::new();
    hasher.update(data);
    hasher.link()
}

/// CAR content identifier of `data`, as a lookup service would return it
pub fn content_cid(data: &[u8]) -> Cid {
    let digest = Sha256::digest(data);
    Cid::new_v1(CAR_CODEC, Multihash::<64>::wrap(SHA2_256, &digest).unwrap())
}

/// A directory of `<piece>.car` files plus the offer that describes them
pub struct CarSet {
    /// Keeps the directory alive
    pub dir: TempDir,
    /// Contents of each file, in offer order
    pub payloads: Vec<Vec<u8>>,
    /// Offer with a correctly composed aggregate
    pub offer: Offer,
}

impl CarSet {
    /// Write one CAR per entry of `sizes`
    pub fn new(sizes: &[usize]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let payloads: Vec<Vec<u8>> = sizes
            .iter()
            .enumerate()
            .map(|(i, len)| payload(i as u8 + 1, *len))
            .collect();
        let pieces: Vec<PieceCid> = payloads.iter().map(|p| piece_of(p)).collect();

        for (piece, data) in pieces.iter().zip(&payloads) {
            std::fs::write(dir.path().join(format!("{piece}.car")), data).unwrap();
        }

        let aggregate = AggregateComposer::new().compose(&pieces).unwrap();
        Self {
            dir,
            payloads,
            offer: Offer { aggregate, pieces },
        }
    }

    /// The default five piece set
    pub fn standard() -> Self {
        Self::new(DEFAULT_SIZES)
    }

    /// Directory holding the files
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// File of the piece at `index`
    pub fn car_path(&self, index: usize) -> PathBuf {
        self.path().join(format!("{}.car", self.offer.pieces[index]))
    }

    /// Flip one byte of the piece at `index`, keeping its length
    pub fn corrupt(&self, index: usize) {
        let path = self.car_path(index);
        let mut data = std::fs::read(&path).unwrap();
        let middle = data.len() / 2;
        data[middle] ^= 0xff;
        std::fs::write(path, data).unwrap();
    }

    /// Delete the piece at `index`
    pub fn remove(&self, index: usize) {
        std::fs::remove_file(self.car_path(index)).unwrap();
    }

    /// Write the offer as JSON next to the CAR files
    pub fn write_offer(&self) -> PathBuf {
        let path = self.path().join("offer.json");
        std::fs::write(&path, serde_json::to_string_pretty(&self.offer).unwrap()).unwrap();
        path
    }
}
