//! Trusted Platform Module capability consumed by the witnessd core.
//!
//! The core never links a vendor TPM stack. It consumes the [`Tpm`] trait:
//! PCR reads, nonce-bound quotes, a monotonic counter, sealing, and hardware
//! randomness. Real bindings (tss-esapi on Linux, TBS on Windows) live in
//! platform crates; this crate ships the trait, the wire-level types, and an
//! in-memory [`MockTpm`] used by tests and software-only deployments.
//!
//! # Capability Surface
//!
//! - `quote(nonce, pcrs)` binds a caller nonce to the current PCR values
//! - `increment_counter(idx)` is strictly monotone across calls
//! - `seal`/`unseal` round-trip small secrets through the device
//! - `get_random(n)` taps the device RNG (one of the entropy pool sources)

pub mod mock;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use mock::MockTpm;

/// Errors from a TPM provider.
#[derive(Debug, Error)]
pub enum TpmError {
    /// No device present or the provider is not usable
    #[error("TPM unavailable: {0}")]
    Unavailable(String),

    /// Quote generation failed
    #[error("TPM quote failed: {0}")]
    QuoteFailed(String),

    /// PCR read failed
    #[error("PCR read failed for index {index}: {reason}")]
    PcrReadFailed { index: u8, reason: String },

    /// Monotonic counter operation failed
    #[error("counter operation failed: {0}")]
    CounterFailed(String),

    /// Sealing failed
    #[error("seal failed: {0}")]
    SealFailed(String),

    /// Unsealing failed (wrong device, corrupted blob, policy mismatch)
    #[error("unseal failed: {0}")]
    UnsealFailed(String),

    /// The device RNG refused to produce bytes
    #[error("TPM random generation failed: {0}")]
    RandomFailed(String),
}

/// Result type for TPM operations.
pub type Result<T> = std::result::Result<T, TpmError>;

/// A signed TPM quote binding a nonce to a PCR snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpmQuote {
    /// PCR values at the moment the quote was produced
    pub pcr_values: BTreeMap<u8, Vec<u8>>,
    /// Caller-supplied nonce the quote is bound to
    pub nonce: Vec<u8>,
    /// Wall clock at quote creation, nanoseconds since the Unix epoch
    pub timestamp: i64,
    /// Signature over the attested structure, vendor format
    pub signature: Vec<u8>,
    /// The raw attested structure as produced by the device
    pub raw_quote: Vec<u8>,
}

/// What a concrete provider can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpmCapabilities {
    pub hardware_backed: bool,
    pub supports_pcrs: bool,
    pub supports_sealing: bool,
    pub supports_attestation: bool,
    pub monotonic_counter: bool,
}

/// TPM capability consumed by the attestation session and the verifier.
///
/// Implementations must be safe to share across threads; the session issues
/// calls while holding its own lock, so providers should keep individual
/// operations short.
pub trait Tpm: Send + Sync {
    /// Whether the provider is currently usable.
    fn available(&self) -> bool;

    /// What this provider supports.
    fn capabilities(&self) -> TpmCapabilities;

    /// Public part of the endorsement key, vendor encoding.
    fn get_endorsement_key_public(&self) -> Result<Vec<u8>>;

    /// Read a single PCR.
    fn read_pcr(&self, index: u8) -> Result<Vec<u8>>;

    /// Read a set of PCRs in one pass.
    fn read_pcrs(&self, indices: &[u8]) -> Result<BTreeMap<u8, Vec<u8>>> {
        let mut values = BTreeMap::new();
        for &index in indices {
            values.insert(index, self.read_pcr(index)?);
        }
        Ok(values)
    }

    /// Produce a quote over `pcrs` bound to `nonce`.
    fn quote(&self, nonce: &[u8], pcrs: &[u8]) -> Result<TpmQuote>;

    /// Increment the monotonic counter at `index` and return the new value.
    /// Successive calls return strictly increasing values.
    fn increment_counter(&self, index: u8) -> Result<u64>;

    /// Read the monotonic counter at `index` without incrementing it.
    fn read_counter(&self, index: u8) -> Result<u64>;

    /// Seal `data` to the current values of `pcrs`.
    fn seal(&self, data: &[u8], pcrs: &[u8]) -> Result<Vec<u8>>;

    /// Reverse of [`Tpm::seal`].
    fn unseal(&self, blob: &[u8]) -> Result<Vec<u8>>;

    /// Draw `n` bytes from the device RNG.
    fn get_random(&self, n: usize) -> Result<Vec<u8>>;
}

/// Probe the conventional Linux TPM device nodes.
///
/// Prefers the in-kernel resource manager (`/dev/tpmrm0`) over raw device
/// access, matching what vendor stacks do.
pub fn detect_tpm_device() -> Option<PathBuf> {
    for candidate in ["/dev/tpmrm0", "/dev/tpm0"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_pcrs_default_collects_each_index() {
        let tpm = MockTpm::new();
        let values = tpm.read_pcrs(&[0, 1, 7]).unwrap();
        assert_eq!(values.len(), 3);
        assert!(values.contains_key(&7));
    }

    #[test]
    fn quote_serializes_round_trip() {
        let tpm = MockTpm::new();
        let quote = tpm.quote(&[9u8; 32], &[0, 1]).unwrap();
        let json = serde_json::to_string(&quote).unwrap();
        let back: TpmQuote = serde_json::from_str(&json).unwrap();
        assert_eq!(quote, back);
    }
}
