//! Error types for the enrollment and verification protocol.
//!
//! Note the propagation split: protocol *operations* (enroll, challenge
//! creation, export) return these errors, while `verify` itself always
//! returns a [`VerificationReport`](crate::report::VerificationReport) -
//! a report with `verified: false` is an ordinary outcome, not an error.

use thiserror::Error;

/// Errors from the verifier and prover state machines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The device has no enrollment record
    #[error("device not enrolled")]
    DeviceNotEnrolled,

    /// The enrollment record has passed its TTL
    #[error("enrollment expired")]
    EnrollmentExpired,

    /// Unknown, already consumed, or mismatched challenge
    #[error("challenge mismatch: {0}")]
    ChallengeMismatch(String),

    /// The challenge has passed its deadline
    #[error("challenge expired")]
    ChallengeExpired,

    /// Quote missing, unbound, or malformed where one was required
    #[error("invalid quote: {0}")]
    InvalidQuote(String),

    /// Quoted platform state conflicts with the trusted baseline
    #[error("platform state changed: {0}")]
    PlatformStateChanged(String),

    /// TPM provider error on the prover side
    #[error(transparent)]
    Tpm(#[from] witnessd_tpm::TpmError),

    /// PUF provider error on the prover side
    #[error(transparent)]
    Puf(#[from] witnessd_puf::PufError),

    /// Operation out of order for the current protocol phase
    #[error("invalid protocol state: {0}")]
    InvalidState(String),

    /// Enrollment export/import serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
