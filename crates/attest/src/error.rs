//! Error types for the attestation session.

use thiserror::Error;

/// Errors from session and chain operations.
#[derive(Debug, Error)]
pub enum AttestError {
    /// TPM provider error (unavailable, quote failed, counter failed)
    #[error(transparent)]
    Tpm(#[from] witnessd_tpm::TpmError),

    /// The monotonic counter did not advance
    #[error("TPM counter mismatch: read {current}, previous was {previous}")]
    CounterMismatch { previous: u64, current: u64 },

    /// PUF provider error
    #[error(transparent)]
    Puf(#[from] witnessd_puf::PufError),

    /// Operation on a session in the wrong lifecycle phase
    #[error("invalid session state: {0}")]
    InvalidState(String),
}

/// Result type for attestation operations.
pub type Result<T> = std::result::Result<T, AttestError>;
