//! Enrollment and challenge-response verification protocol for witnessd.
//!
//! Two cooperating state machines decide whether a submitted checkpoint
//! chain genuinely originated on an enrolled device:
//!
//! - the [`RemoteVerifier`] holds enrollment records, mints single-use
//!   challenges, and scores responses into a [`VerificationReport`]
//! - the [`Prover`] runs on the device and answers challenges from its TPM
//!   and PUF
//!
//! The verifier never trusts the device operator: quotes must bind fresh
//! nonces, PUF responses must differ from the enrolled ones (replay
//! detection), counters must not roll back, and the chain must pass the
//! local verifier. Ordinary verification failure is expressed in the
//! report, never as an error.

pub mod audit;
pub mod challenge;
pub mod enrollment;
pub mod error;
pub mod prover;
pub mod report;
pub mod verifier;

pub use audit::{AuditEvent, AuditEventKind};
pub use challenge::{VerificationChallenge, VerificationRequest, VerificationResponse};
pub use enrollment::{
    derive_device_id, DeviceEnrollment, EnrollmentChallenge, EnrollmentResponse,
};
pub use error::{ProtocolError, Result};
pub use prover::{Prover, ProverPhase};
pub use report::VerificationReport;
pub use verifier::{RemoteVerifier, VerifierConfig};
