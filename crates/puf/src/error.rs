//! Error types for the PUF layer.

use thiserror::Error;

/// Errors from PUF providers and the fuzzy extractor.
#[derive(Debug, Error)]
pub enum PufError {
    /// No PUF mechanism is usable on this device
    #[error("PUF unavailable: {0}")]
    Unavailable(String),

    /// Malformed challenge or under-length response
    #[error("invalid PUF challenge: {0}")]
    ChallengeInvalid(String),

    /// The fresh reading is too far from the enrolled one
    #[error("PUF key reconstruction failed")]
    ReconstructFailed,

    /// Seed file exists but is not exactly 32 bytes
    #[error("PUF seed file corrupted: {length} bytes, expected 32")]
    SeedCorrupted { length: usize },

    /// Persisting the seed failed
    #[error("PUF seed write failed: {0}")]
    WriteFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core platform error
    #[error(transparent)]
    Core(#[from] witnessd_core::CoreError),
}

/// Result type for PUF operations.
pub type Result<T> = std::result::Result<T, PufError>;
