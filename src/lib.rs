//! # piece-dl
//!
//! Resolve, plan and verify downloads of Filecoin pieces.
//!
//! A piece is identified by its commitment: the root of a binary Merkle tree
//! over the FR32-padded piece bytes, written as a PieceCID. This crate
//!
//! - computes commitments over streams ([`piece::PieceHasher`])
//! - recomputes aggregate commitments from piece lists ([`piece::AggregateComposer`])
//! - finds where a piece can be downloaded ([`resolver::LocationResolver`])
//! - writes checksummed aria2 download plans ([`plan::PlanBuilder`])
//! - verifies local CAR files against their pieces in parallel ([`verify::BatchVerifier`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use piece_dl::{BatchVerifier, CarDirectory, Config, Offer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let offer = Offer::from_path("offer.json")?;
//!
//!     let verifier = BatchVerifier::new(&config.verify);
//!     let mut events = verifier.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = verifier.verify_offer(&offer, &CarDirectory::new("cars")).await?;
//!     println!("{} failures", report.failures().count());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Offer manifests
pub mod offer;
/// Piece commitments and identifiers
pub mod piece;
/// Download plans
pub mod plan;
/// Piece location lookups
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;
/// Local verification
pub mod verify;

pub use config::{Config, PlanConfig, PlanUrl, ResolverConfig, RetryConfig, VerifyConfig};
pub use error::{Error, ResolveError, Result, ToExitCode};
pub use offer::Offer;
pub use piece::{AggregateComposer, HashingReader, PieceCid, PieceDigest, PieceHasher};
pub use plan::{Plan, PlanBuilder, PlanFailure};
pub use resolver::{LocationResolver, Resolve};
pub use types::{
    Event, FailureReason, MissingArtifact, OfferReport, PlanEntry, ResolvedLocation,
    VerificationResult,
};
pub use verify::{ArtifactSource, BatchVerifier, CarDirectory};
