//! Prover-side protocol driver.
//!
//! Runs on the device. Assembles enrollment and verification responses from
//! the TPM and PUF capabilities and tracks the protocol phase:
//!
//! `Unenrolled → EnrollChallenged → Enrolled → Verifying → Verified/Rejected`
//!
//! The prover never judges anything; it answers challenges honestly and
//! records what the verifier decided.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use witnessd_puf::Puf;
use witnessd_tpm::Tpm;

use crate::challenge::{VerificationChallenge, VerificationResponse};
use crate::enrollment::{EnrollmentChallenge, EnrollmentResponse};
use crate::error::{ProtocolError, Result};
use crate::report::VerificationReport;

/// Prover lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProverPhase {
    Unenrolled,
    EnrollChallenged,
    Enrolled,
    Verifying,
    Verified,
    Rejected,
}

struct ProverState {
    phase: ProverPhase,
    device_id: Option<[u8; 32]>,
}

/// Device-side protocol participant.
pub struct Prover {
    tpm: Arc<dyn Tpm>,
    puf: Arc<dyn Puf>,
    counter_index: u8,
    metadata: HashMap<String, String>,
    state: Mutex<ProverState>,
}

impl Prover {
    pub fn new(tpm: Arc<dyn Tpm>, puf: Arc<dyn Puf>, counter_index: u8) -> Self {
        Self {
            tpm,
            puf,
            counter_index,
            metadata: HashMap::new(),
            state: Mutex::new(ProverState {
                phase: ProverPhase::Unenrolled,
                device_id: None,
            }),
        }
    }

    /// Attach device metadata sent with enrollment responses.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn phase(&self) -> ProverPhase {
        self.state.lock().unwrap().phase
    }

    /// Device id assigned at enrollment, if any.
    pub fn device_id(&self) -> Option<[u8; 32]> {
        self.state.lock().unwrap().device_id
    }

    /// Answer an enrollment challenge with the device's hardware evidence.
    pub fn respond_to_enrollment(
        &self,
        challenge: &EnrollmentChallenge,
    ) -> Result<EnrollmentResponse> {
        {
            let mut state = self.state.lock().unwrap();
            match state.phase {
                ProverPhase::Unenrolled | ProverPhase::EnrollChallenged | ProverPhase::Rejected => {
                    state.phase = ProverPhase::EnrollChallenged;
                }
                phase => {
                    return Err(ProtocolError::InvalidState(format!(
                        "cannot enroll from phase {phase:?}"
                    )));
                }
            }
        }

        let endorsement_key = self.tpm.get_endorsement_key_public()?;
        let tpm_quote = Some(self.tpm.quote(&challenge.nonce, &challenge.required_pcrs)?);
        let puf_fingerprint = self.puf.fingerprint()?;
        let puf_response = self.puf.challenge(&challenge.puf_challenge)?;

        Ok(EnrollmentResponse {
            challenge_nonce: challenge.nonce,
            // The mock EK doubles as the AK; a real binding substitutes a
            // dedicated attestation key here.
            attestation_key: endorsement_key.clone(),
            endorsement_key,
            tpm_quote,
            puf_fingerprint,
            puf_response,
            metadata: self.metadata.clone(),
        })
    }

    /// Record the verifier's acceptance of enrollment.
    pub fn mark_enrolled(&self, device_id: [u8; 32]) {
        let mut state = self.state.lock().unwrap();
        state.phase = ProverPhase::Enrolled;
        state.device_id = Some(device_id);
    }

    /// Answer a verification challenge with fresh evidence.
    pub fn respond_to_verification(
        &self,
        challenge: &VerificationChallenge,
    ) -> Result<VerificationResponse> {
        {
            let mut state = self.state.lock().unwrap();
            match state.phase {
                ProverPhase::Enrolled
                | ProverPhase::Verifying
                | ProverPhase::Verified
                | ProverPhase::Rejected => {
                    state.phase = ProverPhase::Verifying;
                }
                phase => {
                    return Err(ProtocolError::InvalidState(format!(
                        "cannot verify from phase {phase:?}"
                    )));
                }
            }
        }

        let tpm_quote = Some(
            self.tpm
                .quote(&challenge.tpm_nonce, &challenge.required_pcrs)?,
        );
        let puf_response = self.puf.challenge(&challenge.puf_challenge)?;
        let current_counter = self.tpm.read_counter(self.counter_index)?;

        Ok(VerificationResponse {
            challenge_id: challenge.challenge_id,
            device_id: challenge.device_id,
            tpm_quote,
            puf_response,
            current_counter,
        })
    }

    /// Record the verifier's verdict.
    pub fn complete(&self, report: &VerificationReport) {
        let mut state = self.state.lock().unwrap();
        state.phase = if report.verified {
            ProverPhase::Verified
        } else {
            ProverPhase::Rejected
        };
    }
}
