//! Error types for piece-dl
//!
//! This module provides:
//! - The crate-wide [`Error`] enum and [`Result`] alias
//! - [`ResolveError`], the failure of a single location lookup attempt
//! - Exit code mapping for the command line boundary ([`ToExitCode`])

use crate::types::MissingArtifact;
use thiserror::Error;

/// Result type alias for piece-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for piece-dl
///
/// Variants carry the identifiers involved so a failure can be reported
/// without the caller holding on to its inputs.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "plan.concurrency")
        key: Option<String>,
    },

    /// Malformed input (offer contents, heights, flags)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A string that does not parse as a PieceCID
    #[error("invalid piece CID {input:?}: {reason}")]
    InvalidPiece {
        /// The rejected text
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// Input file or artifact does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// One or more artifacts of an offer are missing or empty
    #[error("{} artifact(s) missing: {}", .0.len(), list_missing(.0))]
    MissingArtifacts(Vec<MissingArtifact>),

    /// The pieces of an offer do not compose into its declared aggregate
    #[error("aggregate mismatch: expected {expected}, computed {actual}")]
    AggregateMismatch {
        /// Declared aggregate
        expected: String,
        /// Aggregate composed from the pieces
        actual: String,
    },

    /// A local artifact does not hash to its declared piece
    #[error("piece mismatch: expected {expected}, computed {actual}")]
    PieceMismatch {
        /// Declared piece
        expected: String,
        /// Piece computed from the artifact
        actual: String,
    },

    /// Nothing to work on
    #[error("empty input: at least one piece is required")]
    EmptyInput,

    /// Location lookup failed after all attempts
    #[error("failed to resolve {piece} after {attempts} attempt(s): {source}")]
    Resolution {
        /// Piece being resolved
        piece: String,
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        #[source]
        source: ResolveError,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hashing worker pool failure (spawn failure, lost worker)
    #[error("worker pool error: {0}")]
    WorkerPool(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn list_missing(missing: &[MissingArtifact]) -> String {
    missing
        .iter()
        .map(|m| format!("{} ({})", m.path.display(), m.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure of one location lookup attempt
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Lookup service answered with a status other than the expected redirect
    #[error("unexpected status {status} (expected {expected})")]
    UnexpectedStatus {
        /// Status received
        status: u16,
        /// Status required
        expected: u16,
    },

    /// Redirect without a Location header
    #[error("response has no Location header")]
    MissingLocation,

    /// Location header present but unusable
    #[error("malformed location {location:?}: {reason}")]
    MalformedLocation {
        /// Header value
        location: String,
        /// What was wrong with it
        reason: String,
    },

    /// Transport failure, including per-attempt timeouts
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl Error {
    /// Shorthand for a configuration error on `key`
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Map errors to process exit codes at the command line boundary
///
/// The library never exits; the binary calls this once on the error that ended a run.
pub trait ToExitCode {
    /// Process exit code for this error
    fn exit_code(&self) -> u8;

    /// Machine-readable error code
    fn error_code(&self) -> &str;
}

/// Exit code for a run that found a mismatch
pub const EXIT_MISMATCH: u8 = 1;
/// Exit code for bad input, empty input or configuration
pub const EXIT_INVALID: u8 = 2;
/// Exit code for missing input files or artifacts
pub const EXIT_NOT_FOUND: u8 = 3;
/// Exit code for location lookups that exhausted their attempts
pub const EXIT_RESOLUTION: u8 = 4;
/// Exit code for internal failures (sysexits `EX_SOFTWARE`)
pub const EXIT_INTERNAL: u8 = 70;

impl ToExitCode for Error {
    fn exit_code(&self) -> u8 {
        match self {
            Error::AggregateMismatch { .. } | Error::PieceMismatch { .. } => EXIT_MISMATCH,

            Error::Config { .. }
            | Error::InvalidInput(_)
            | Error::InvalidPiece { .. }
            | Error::EmptyInput
            | Error::Serialization(_) => EXIT_INVALID,

            Error::NotFound(_) | Error::MissingArtifacts(_) => EXIT_NOT_FOUND,

            Error::Resolution { .. } => EXIT_RESOLUTION,

            Error::Io(_) | Error::WorkerPool(_) | Error::Other(_) => EXIT_INTERNAL,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidInput(_) => "invalid_input",
            Error::InvalidPiece { .. } => "invalid_piece",
            Error::NotFound(_) => "not_found",
            Error::MissingArtifacts(_) => "missing_artifacts",
            Error::AggregateMismatch { .. } => "aggregate_mismatch",
            Error::PieceMismatch { .. } => "piece_mismatch",
            Error::EmptyInput => "empty_input",
            Error::Resolution { .. } => "resolution_failure",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::WorkerPool(_) => "worker_pool_error",
            Error::Other(_) => "internal_error",
        }
    }
}
