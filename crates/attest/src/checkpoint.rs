//! Checkpoint: one link of the attestation chain.
//!
//! A checkpoint binds the content typed so far, the TPM's monotonic counter
//! and platform state, and (optionally) a PUF response into a hash-linked
//! record. The canonical hash is byte-exact across implementations: any
//! verifier recomputing it over the same fields must produce the same
//! 32 bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use witnessd_tpm::TpmQuote;

/// 32-byte hash value.
pub type Hash32 = [u8; 32];

/// All-zero hash: the previous-hash sentinel of checkpoint 0 and the
/// content hash of content-free checkpoints.
pub const ZERO_HASH: Hash32 = [0u8; 32];

/// One link of the attestation chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Session this checkpoint belongs to
    pub session_id: Hash32,
    /// Dense index within the session, starting at 0
    pub sequence_no: u64,
    /// Wall clock at creation, nanoseconds since the Unix epoch
    pub timestamp_nanos: i64,
    /// Monotonic counter value consumed for this checkpoint
    pub tpm_counter: u64,
    /// SHA-256 of the text typed so far (opaque to this layer)
    pub content_hash: Hash32,
    /// Keystrokes recorded in the session so far
    pub keystroke_count: u64,
    /// SHA-256 of opaque timing bytes, or zeros when none were supplied
    pub timing_hash: Hash32,
    /// `checkpoint_hash` of the predecessor, zeros for checkpoint 0
    pub previous_hash: Hash32,
    /// Most recent TPM quote at creation time
    pub tpm_quote: Option<TpmQuote>,
    /// PCR snapshot when platform-state inclusion is enabled
    pub pcr_values: Option<BTreeMap<u8, Vec<u8>>>,
    /// Challenge issued to the PUF for this checkpoint
    pub puf_challenge: Option<Hash32>,
    /// The PUF's raw response
    pub puf_response: Option<Vec<u8>>,
    /// Canonical hash over the fields above
    pub checkpoint_hash: Hash32,
    /// Signature bytes lifted from the quote
    pub tpm_signature: Vec<u8>,
    /// Reserved for device-key countersignatures
    pub device_signature: Vec<u8>,
}

impl Checkpoint {
    /// Recompute the canonical hash from this checkpoint's fields.
    pub fn compute_hash(&self) -> Hash32 {
        compute_checkpoint_hash(
            &self.session_id,
            self.sequence_no,
            self.timestamp_nanos,
            self.tpm_counter,
            &self.content_hash,
            self.keystroke_count,
            &self.timing_hash,
            &self.previous_hash,
            self.tpm_quote.as_ref().map(|q| q.raw_quote.as_slice()),
            self.puf_response.as_deref(),
        )
    }
}

/// The canonical checkpoint hash.
///
/// `SHA256(session_id || sequence_no || timestamp || tpm_counter ||
/// content_hash || keystroke_count || timing_hash || previous_hash ||
/// raw_quote? || puf_response?)` with all integers big-endian. Optional
/// fields contribute nothing when absent.
#[allow(clippy::too_many_arguments)]
pub fn compute_checkpoint_hash(
    session_id: &Hash32,
    sequence_no: u64,
    timestamp_nanos: i64,
    tpm_counter: u64,
    content_hash: &Hash32,
    keystroke_count: u64,
    timing_hash: &Hash32,
    previous_hash: &Hash32,
    raw_quote: Option<&[u8]>,
    puf_response: Option<&[u8]>,
) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(session_id);
    hasher.update(sequence_no.to_be_bytes());
    hasher.update(timestamp_nanos.to_be_bytes());
    hasher.update(tpm_counter.to_be_bytes());
    hasher.update(content_hash);
    hasher.update(keystroke_count.to_be_bytes());
    hasher.update(timing_hash);
    hasher.update(previous_hash);
    if let Some(raw_quote) = raw_quote {
        hasher.update(raw_quote);
    }
    if let Some(puf_response) = puf_response {
        hasher.update(puf_response);
    }
    hasher.finalize().into()
}

/// Hash opaque timing bytes; empty timing hashes to all zeros.
pub fn timing_hash(timing: &[u8]) -> Hash32 {
    if timing.is_empty() {
        return ZERO_HASH;
    }
    let mut hasher = Sha256::new();
    hasher.update(timing);
    hasher.finalize().into()
}
