//! Core types for piece-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::piece::PieceCid;

/// Outcome of hashing one artifact against its declared piece
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Declared piece
    pub target: PieceCid,
    /// Artifact that was hashed
    pub path: PathBuf,
    /// True when the computed piece equals the declared one
    pub ok: bool,
    /// Why verification failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReason>,
    /// Piece computed from the artifact, when hashing finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<PieceCid>,
}

impl VerificationResult {
    /// Compare a computed piece with the declared one
    pub fn compared(target: PieceCid, path: PathBuf, actual: PieceCid) -> Self {
        let ok = actual == target;
        Self {
            target,
            path,
            ok,
            error: (!ok).then_some(FailureReason::Mismatch),
            actual: Some(actual),
        }
    }

    /// Record a verification that could not compute a piece
    pub fn failed(target: PieceCid, path: PathBuf, reason: FailureReason) -> Self {
        Self {
            target,
            path,
            ok: false,
            error: Some(reason),
            actual: None,
        }
    }
}

/// Reason a single verification failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Artifact hashed to a different piece
    Mismatch,
    /// Artifact could not be read
    Io {
        /// Error message
        message: String,
    },
    /// The hashing worker went away before reporting
    WorkerLost,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Mismatch => write!(f, "piece mismatch"),
            FailureReason::Io { message } => write!(f, "I/O error: {message}"),
            FailureReason::WorkerLost => write!(f, "hashing worker lost"),
        }
    }
}

/// Result of verifying a whole offer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OfferReport {
    /// Declared aggregate
    pub aggregate: PieceCid,
    /// True when the pieces compose into the declared aggregate
    pub aggregate_ok: bool,
    /// One result per piece, in offer order
    pub results: Vec<VerificationResult>,
    /// Bytes hashed across all artifacts
    pub total_bytes: u64,
}

impl OfferReport {
    /// True when the aggregate matched and every piece verified
    pub fn is_ok(&self) -> bool {
        self.aggregate_ok && self.results.iter().all(|r| r.ok)
    }

    /// Results that did not verify
    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| !r.ok)
    }
}

/// An artifact that was absent or empty when an offer was checked
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingArtifact {
    /// Piece the artifact should hold
    pub piece: String,
    /// Where it was expected
    pub path: PathBuf,
    /// What was wrong
    pub reason: String,
}

impl std::fmt::Display for MissingArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} missing: {}", self.path.display(), self.reason)
    }
}

/// Where a piece can be downloaded from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    /// Piece that was resolved
    pub piece: PieceCid,
    /// CID of the CAR file holding the piece
    pub content_id: String,
    /// Redirect target
    pub url: String,
    /// Lookup service URL that was queried
    pub lookup_url: String,
    /// SHA-256 of the CAR file, from the content CID's multihash
    #[serde(with = "hex_digest")]
    pub checksum: [u8; 32],
}

impl ResolvedLocation {
    /// Checksum as lowercase hex
    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }
}

/// One block of an aria2 input file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// URL to download
    pub url: String,
    /// Lowercase hex SHA-256 the download must match
    pub checksum: String,
    /// Output file name
    pub out: String,
}

impl PlanEntry {
    /// Render as an aria2 input block (no trailing newline)
    pub fn render(&self) -> String {
        format!(
            "{}\n  checksum=sha-256={}\n  out={}",
            self.url, self.checksum, self.out
        )
    }
}

/// Event emitted while verifying or planning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Declared aggregate matched the pieces
    AggregateVerified {
        /// Aggregate
        aggregate: PieceCid,
    },

    /// Hashing is about to start
    HashingStarted {
        /// Number of artifacts
        pieces: usize,
        /// Sum of artifact sizes
        total_bytes: u64,
    },

    /// One artifact has been hashed
    PieceHashed {
        /// Declared piece
        piece: PieceCid,
        /// Whether it matched
        ok: bool,
        /// Size of this artifact
        bytes: u64,
        /// Bytes hashed so far across the run
        processed_bytes: u64,
        /// Bytes to hash across the run
        total_bytes: u64,
    },

    /// A piece location lookup finished
    PieceResolved {
        /// Piece
        piece: PieceCid,
        /// Position in the input list
        index: usize,
        /// Whether the lookup succeeded
        ok: bool,
    },
}

mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S>(digest: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("checksum must be 32 bytes"))
    }
}
