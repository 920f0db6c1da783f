//! Device enrollment: messages and the verifier's persistent record.
//!
//! Enrollment binds a device's TPM endorsement key and PUF fingerprint into
//! a single device identity the verifier can recognise later:
//!
//! `device_id = SHA256("device-id-v1" || EK || PUF_fingerprint)`
//!
//! The record keeps the device's initial PCR values and the PUF response it
//! gave at enrollment time; a later verification presenting byte-identical
//! PUF bytes is a replay, not a fresh reading.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use witnessd_tpm::TpmQuote;

/// Domain-separation prefix of the device-id derivation.
const DEVICE_ID_DOMAIN: &[u8] = b"device-id-v1";

/// Challenge the verifier issues to a device asking to enroll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentChallenge {
    /// Nonce the enrollment quote must be bound to
    pub nonce: [u8; 32],
    /// Challenge the device's PUF must answer
    pub puf_challenge: [u8; 32],
    /// PCRs that must appear in the quote
    pub required_pcrs: Vec<u8>,
    /// Deadline, milliseconds since the Unix epoch
    pub expires_at_millis: u64,
}

/// The device's answer to an [`EnrollmentChallenge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentResponse {
    /// Echo of the challenge nonce this response answers
    pub challenge_nonce: [u8; 32],
    /// TPM endorsement key public part
    pub endorsement_key: Vec<u8>,
    /// Attestation key public part (may equal the EK)
    pub attestation_key: Vec<u8>,
    /// Quote bound to the challenge nonce
    pub tpm_quote: Option<TpmQuote>,
    /// `SHA256(Puf.challenge("device-fingerprint"))`
    pub puf_fingerprint: [u8; 32],
    /// Response to the challenge's `puf_challenge`
    pub puf_response: Vec<u8>,
    /// Free-form device metadata (model, OS, embedder version)
    pub metadata: HashMap<String, String>,
}

/// The verifier's persistent record for an enrolled device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEnrollment {
    pub device_id: [u8; 32],
    pub enrolled_at_millis: u64,
    pub expires_at_millis: u64,
    pub endorsement_key: Vec<u8>,
    pub attestation_key: Vec<u8>,
    /// PCR values quoted at enrollment time
    pub initial_pcrs: BTreeMap<u8, Vec<u8>>,
    pub puf_fingerprint: [u8; 32],
    /// PUF response given at enrollment; equality on a later verify means
    /// replay
    pub original_puf_response: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

impl DeviceEnrollment {
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.expires_at_millis
    }
}

/// Derive the device identity from its two hardware roots.
pub fn derive_device_id(endorsement_key: &[u8], puf_fingerprint: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DEVICE_ID_DOMAIN);
    hasher.update(endorsement_key);
    hasher.update(puf_fingerprint);
    hasher.finalize().into()
}
