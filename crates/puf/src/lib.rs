//! Physically Unclonable Function abstraction.
//!
//! A PUF answers challenges with responses determined by manufacturing
//! variation; a physical duplicate of the device answers differently. The
//! attestation session binds checkpoints to PUF responses, and the remote
//! verifier compares fresh responses against enrolled ones.
//!
//! This crate ships:
//!
//! - the [`Puf`] trait - challenge/response plus key enrollment and
//!   reconstruction built on the fuzzy extractor
//! - [`SoftwarePuf`] - a seed-file-backed implementation (HKDF-SHA256 over
//!   a 32-byte device seed) for machines without PUF hardware
//! - [`fuzzy`] - a code-offset fuzzy extractor turning noisy responses into
//!   stable keys
//!
//! Hardware providers plug in by implementing [`Puf`]; the enrollment and
//! reconstruction flows come for free from the trait's provided methods.

pub mod error;
pub mod fuzzy;
pub mod software;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use witnessd_core::SecretBytes;

pub use error::{PufError, Result};
pub use fuzzy::HelperData;
pub use software::SoftwarePuf;

/// Sub-responses gathered for key enrollment. 16 blocks of 32 bytes give
/// the extractor a 512-byte noisy string and a full-strength 256-bit key.
const ENROLL_BLOCKS: u8 = 16;

/// The fixed set of PUF kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PufKind {
    /// Seed-file emulation (no hardware)
    Software,
    /// SRAM power-up state
    Sram,
    /// Ring-oscillator frequency comparison
    RingOscillator,
}

/// A challenge/response PUF.
pub trait Puf: Send + Sync {
    fn kind(&self) -> PufKind;

    /// Whether the underlying mechanism is usable right now.
    fn available(&self) -> bool;

    /// Answer a challenge. Responses are 32 bytes; equal challenges yield
    /// equal (hardware: Hamming-close) responses on the same device.
    fn challenge(&self, challenge: &[u8]) -> Result<Vec<u8>>;

    /// Stable device fingerprint: the hash of a well-known challenge.
    fn fingerprint(&self) -> Result<[u8; 32]> {
        let response = self.challenge(b"device-fingerprint")?;
        let mut hasher = Sha256::new();
        hasher.update(&response);
        Ok(hasher.finalize().into())
    }

    /// Derive a stable key from this device, returning the key and the
    /// public helper data needed to reconstruct it later.
    fn enroll(&self, challenge: &[u8]) -> Result<(SecretBytes, HelperData)> {
        let noisy = self.gather_extended(challenge)?;
        fuzzy::generate(&noisy)
    }

    /// Reconstruct a previously enrolled key from a fresh (possibly noisy)
    /// reading. Fails with `ReconstructFailed` when the device has drifted
    /// beyond the extractor's correction capacity - or is a different
    /// device.
    fn reconstruct(&self, challenge: &[u8], helper: &HelperData) -> Result<SecretBytes> {
        let noisy = self.gather_extended(challenge)?;
        fuzzy::reproduce(&noisy, helper)
    }

    /// Concatenate sub-responses to widen the noisy string for the
    /// extractor. Each block uses a domain-separated sub-challenge.
    fn gather_extended(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        if challenge.is_empty() {
            return Err(PufError::ChallengeInvalid("empty challenge".to_string()));
        }
        let mut noisy = Vec::with_capacity(ENROLL_BLOCKS as usize * 32);
        for block in 0..ENROLL_BLOCKS {
            let mut hasher = Sha256::new();
            hasher.update(challenge);
            hasher.update([block]);
            let sub_challenge = hasher.finalize();
            let response = self.challenge(&sub_challenge)?;
            if response.len() < 16 {
                return Err(PufError::ChallengeInvalid(format!(
                    "response of {} bytes is too short",
                    response.len()
                )));
            }
            noisy.extend_from_slice(&response);
        }
        Ok(noisy)
    }
}
