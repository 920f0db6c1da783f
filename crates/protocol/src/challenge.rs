//! Verification round-trip messages.

use serde::{Deserialize, Serialize};

use witnessd_attest::SessionExport;
use witnessd_tpm::TpmQuote;

/// Opening message: the prover submits a chain for verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub device_id: [u8; 32],
    pub session_export: SessionExport,
}

/// Fresh single-use challenge minted per verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationChallenge {
    pub challenge_id: [u8; 32],
    pub device_id: [u8; 32],
    pub issued_at_millis: u64,
    pub expires_at_millis: u64,
    /// Nonce the response quote must be bound to
    pub tpm_nonce: [u8; 32],
    pub required_pcrs: Vec<u8>,
    /// Challenge the device's PUF must answer freshly
    pub puf_challenge: [u8; 32],
    /// Floor for the device's current monotonic counter, taken from the
    /// submitted chain's final counter
    pub min_counter: u64,
}

impl VerificationChallenge {
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.expires_at_millis
    }
}

/// The prover's answer to a [`VerificationChallenge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub challenge_id: [u8; 32],
    pub device_id: [u8; 32],
    pub tpm_quote: Option<TpmQuote>,
    pub puf_response: Vec<u8>,
    /// Counter value read (not incremented) at response time
    pub current_counter: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_expiry() {
        let challenge = VerificationChallenge {
            challenge_id: [1u8; 32],
            device_id: [2u8; 32],
            issued_at_millis: 0,
            expires_at_millis: 500,
            tpm_nonce: [3u8; 32],
            required_pcrs: vec![0, 7],
            puf_challenge: [4u8; 32],
            min_counter: 9,
        };
        assert!(!challenge.is_expired(499));
        assert!(challenge.is_expired(500));
    }
}
