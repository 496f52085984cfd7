//! Local verification of pieces and offers
//!
//! Verifying an offer runs in three stages and stops at the first fatal one:
//!
//! 1. the pieces must compose into the declared aggregate
//! 2. every artifact must exist and be non-empty
//! 3. artifacts are hashed in parallel and compared with their pieces
//!
//! Stage 3 never aborts: mismatches and read errors are reported per piece.

mod artifacts;
mod pool;

pub use artifacts::{ArtifactSource, CarDirectory, piece_from_path};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};

use crate::config::VerifyConfig;
use crate::error::{Error, Result};
use crate::offer::Offer;
use crate::piece::{AggregateComposer, PieceCid, PieceDigest, hash_reader};
use crate::types::{Event, FailureReason, MissingArtifact, OfferReport, VerificationResult};
use pool::{HashJob, HashPool};

/// Capacity of the event channel; slow subscribers see `Lagged` rather than blocking hashing
const EVENT_CAPACITY: usize = 1024;

/// Verifies local artifacts against their declared pieces
#[derive(Debug)]
pub struct BatchVerifier {
    workers: usize,
    read_buffer_size: usize,
    composer: AggregateComposer,
    event_tx: broadcast::Sender<Event>,
    processed_bytes: Arc<AtomicU64>,
}

impl BatchVerifier {
    /// Verifier using the configured worker count, buffer size and deal height
    pub fn new(config: &VerifyConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let composer = AggregateComposer::with_deal_height(config.deal_height);
        Self {
            workers: config.workers.max(1),
            read_buffer_size: config.read_buffer_size,
            composer,
            event_tx,
            processed_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Receive progress events from subsequent runs
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Bytes hashed so far in the current or last run
    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::Relaxed)
    }

    /// Verify an offer against artifacts found through `artifacts`
    pub async fn verify_offer(
        &self,
        offer: &Offer,
        artifacts: &dyn ArtifactSource,
    ) -> Result<OfferReport> {
        let computed = self.composer.compose(&offer.pieces)?;
        let declared = offer.aggregate;
        if as_declared(&declared, &computed) != declared {
            tracing::warn!(%declared, %computed, "aggregate mismatch");
            return Err(Error::AggregateMismatch {
                expected: declared.to_string(),
                actual: computed.to_string(),
            });
        }
        tracing::info!(aggregate = %declared, pieces = offer.pieces.len(), "aggregate verified");
        self.emit(Event::AggregateVerified {
            aggregate: declared,
        });

        let sizes = stat_artifacts(&offer.pieces, artifacts).await?;
        let total_bytes: u64 = sizes.iter().map(|(_, size)| size).sum();

        let results = self.hash_all(&offer.pieces, &sizes, total_bytes).await?;
        let failures = results.iter().filter(|r| !r.ok).count();
        tracing::info!(
            pieces = results.len(),
            failures,
            total_bytes,
            "offer verification finished"
        );

        Ok(OfferReport {
            aggregate: declared,
            aggregate_ok: true,
            results,
            total_bytes,
        })
    }

    /// Hash one artifact and compare it with `expected`.
    ///
    /// Without `expected` the piece is inferred from a `<piece>.car` file name.
    /// A mismatch is returned as [`Error::PieceMismatch`].
    pub async fn verify_one(
        &self,
        path: &Path,
        expected: Option<PieceCid>,
    ) -> Result<VerificationResult> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;
        let size = metadata.len();

        let expected = match expected {
            Some(piece) => piece,
            None => piece_from_path(path)?,
        };

        self.processed_bytes.store(0, Ordering::Relaxed);
        self.emit(Event::HashingStarted {
            pieces: 1,
            total_bytes: size,
        });

        let owned = path.to_path_buf();
        let buffer_size = self.read_buffer_size;
        let digest = tokio::task::spawn_blocking(move || {
            std::fs::File::open(&owned).and_then(|file| hash_reader(file, buffer_size))
        })
        .await
        .map_err(|e| Error::WorkerPool(format!("hashing task failed: {e}")))??;

        let result =
            VerificationResult::compared(expected, path.to_path_buf(), as_declared_digest(&expected, digest));
        self.record_progress(&result, size, size);

        match &result.actual {
            Some(actual) if !result.ok => Err(Error::PieceMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
            _ => Ok(result),
        }
    }

    async fn hash_all(
        &self,
        pieces: &[PieceCid],
        sizes: &[(PathBuf, u64)],
        total_bytes: u64,
    ) -> Result<Vec<VerificationResult>> {
        self.processed_bytes.store(0, Ordering::Relaxed);
        self.emit(Event::HashingStarted {
            pieces: pieces.len(),
            total_bytes,
        });

        let pool = HashPool::new(self.workers.min(pieces.len()), self.read_buffer_size)?;
        let (reply, mut outcomes) = mpsc::unbounded_channel();
        for (index, (path, _)) in sizes.iter().enumerate() {
            pool.submit(HashJob {
                index,
                path: path.clone(),
                reply: reply.clone(),
            })?;
        }
        drop(reply);
        tracing::debug!(jobs = pieces.len(), workers = pool.size(), "hashing jobs queued");

        let mut slots: Vec<Option<VerificationResult>> = vec![None; pieces.len()];
        while let Some(outcome) = outcomes.recv().await {
            let index = outcome.index;
            let target = pieces[index];
            let (path, size) = &sizes[index];

            let result = match outcome.result {
                Ok(digest) => VerificationResult::compared(
                    target,
                    path.clone(),
                    as_declared_digest(&target, digest),
                ),
                Err(e) => VerificationResult::failed(
                    target,
                    path.clone(),
                    FailureReason::Io {
                        message: e.to_string(),
                    },
                ),
            };
            if !result.ok {
                tracing::warn!(piece = %target, path = %path.display(), reason = ?result.error, "piece failed verification");
            }

            self.record_progress(&result, *size, total_bytes);
            slots[index] = Some(result);
        }

        Ok(slots
            .into_iter()
            .zip(pieces.iter().zip(sizes))
            .map(|(slot, (piece, (path, _)))| {
                slot.unwrap_or_else(|| {
                    VerificationResult::failed(*piece, path.clone(), FailureReason::WorkerLost)
                })
            })
            .collect())
    }

    fn record_progress(&self, result: &VerificationResult, bytes: u64, total_bytes: u64) {
        let processed_bytes = self.processed_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        tracing::debug!(piece = %result.target, ok = result.ok, bytes, processed_bytes, "piece hashed");
        self.emit(Event::PieceHashed {
            piece: result.target,
            ok: result.ok,
            bytes,
            processed_bytes,
            total_bytes,
        });
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}

/// Stat every artifact; any missing or empty one aborts the run
async fn stat_artifacts(
    pieces: &[PieceCid],
    artifacts: &dyn ArtifactSource,
) -> Result<Vec<(PathBuf, u64)>> {
    let mut found = Vec::with_capacity(pieces.len());
    let mut missing = Vec::new();

    for piece in pieces {
        let path = artifacts.locate(piece);
        let problem = match tokio::fs::metadata(&path).await {
            Ok(meta) if !meta.is_file() => Some("not a regular file".to_string()),
            Ok(meta) if meta.len() == 0 => Some("file is empty".to_string()),
            Ok(meta) => {
                found.push((path.clone(), meta.len()));
                None
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some("not found".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = problem {
            missing.push(MissingArtifact {
                piece: piece.to_string(),
                path,
                reason,
            });
        }
    }

    if missing.is_empty() {
        Ok(found)
    } else {
        tracing::warn!(missing = missing.len(), "artifacts missing, nothing hashed");
        Err(Error::MissingArtifacts(missing))
    }
}

/// Express a computed piece in the encoding it is compared against.
///
/// A v1 declaration carries only a root, so only the root can be compared.
fn as_declared(declared: &PieceCid, computed: &PieceCid) -> PieceCid {
    match declared {
        PieceCid::V1 { .. } => PieceCid::V1 {
            root: *computed.root(),
        },
        PieceCid::V2(_) => *computed,
    }
}

fn as_declared_digest(declared: &PieceCid, digest: PieceDigest) -> PieceCid {
    as_declared(declared, &PieceCid::V2(digest))
}
