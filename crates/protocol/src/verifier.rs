//! The remote verifier.
//!
//! Holds the enrollment map and the active-challenge set behind one lock.
//! Challenges are strictly single-use: whatever `verify` decides, the
//! challenge is removed before the report is returned, so a second call
//! with the same id is rejected outright.
//!
//! # Verification sub-checks
//!
//! | Check | Hard? | Penalty |
//! |---|---|---|
//! | TPM quote bound to the challenge nonce, initial PCRs stable | yes | 30 |
//! | PUF response fresh (≥ 16 bytes, non-zero, not the enrolled bytes) | yes | 30 |
//! | Counter at or above the challenge floor | yes | 20 |
//! | Chain passes local verification | yes | 20 |
//! | Timeline plausible (ordering, rate, start window) | warnings | 10 each |
//!
//! `verified` is true iff no hard check failed; strict-PCR drift against
//! the trusted set downgrades confidence via warnings but never flips the
//! verdict by itself.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;

use witnessd_attest::verify_chain;

use crate::audit::{AuditEvent, AuditEventKind, AuditLog};
use crate::challenge::{VerificationChallenge, VerificationRequest, VerificationResponse};
use crate::enrollment::{
    derive_device_id, DeviceEnrollment, EnrollmentChallenge, EnrollmentResponse,
};
use crate::error::{ProtocolError, Result};
use crate::report::{
    ScoreCard, VerificationReport, PENALTY_CHAIN, PENALTY_COUNTER, PENALTY_PUF, PENALTY_TIMELINE,
    PENALTY_TPM,
};

/// Minimum acceptable PUF response length.
const MIN_PUF_RESPONSE_LEN: usize = 16;

/// Verifier policy knobs.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Require TPM evidence (quote bound to the challenge nonce).
    pub require_tpm: bool,
    /// Require fresh PUF evidence.
    pub require_puf: bool,
    /// Warn on drift from `trusted_pcrs` during the TPM sub-check.
    pub strict_pcr_check: bool,
    /// Golden PCR values for strict checking and chain warnings.
    pub trusted_pcrs: BTreeMap<u8, Vec<u8>>,
    /// PCRs a response quote must cover.
    pub required_pcrs: Vec<u8>,
    /// Enrollment record lifetime.
    pub enrollment_ttl: Duration,
    /// Challenge lifetime.
    pub challenge_ttl: Duration,
    /// Timeline policy: maximum sustained typing rate.
    pub max_keystrokes_per_sec: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            require_tpm: true,
            require_puf: true,
            strict_pcr_check: false,
            trusted_pcrs: BTreeMap::new(),
            required_pcrs: witnessd_attest::DEFAULT_PCRS.to_vec(),
            enrollment_ttl: Duration::from_secs(365 * 24 * 60 * 60),
            challenge_ttl: Duration::from_secs(300),
            max_keystrokes_per_sec: 50.0,
        }
    }
}

struct ActiveChallenge {
    challenge: VerificationChallenge,
    export: witnessd_attest::SessionExport,
}

struct VerifierState {
    enrollments: HashMap<[u8; 32], DeviceEnrollment>,
    /// Verification challenges awaiting their single response
    challenges: HashMap<[u8; 32], ActiveChallenge>,
    /// Enrollment challenges issued but not yet consumed, keyed by nonce
    pending_enrollments: HashMap<[u8; 32], EnrollmentChallenge>,
    audit: AuditLog,
}

/// Remote verifier: enrollment registry plus challenge-response engine.
pub struct RemoteVerifier {
    config: VerifierConfig,
    state: Mutex<VerifierState>,
}

impl RemoteVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self {
            config,
            state: Mutex::new(VerifierState {
                enrollments: HashMap::new(),
                challenges: HashMap::new(),
                pending_enrollments: HashMap::new(),
                audit: AuditLog::default(),
            }),
        }
    }

    /// Issue an enrollment challenge.
    pub fn create_enrollment_challenge(&self) -> EnrollmentChallenge {
        let mut nonce = [0u8; 32];
        let mut puf_challenge = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        OsRng.fill_bytes(&mut puf_challenge);

        let challenge = EnrollmentChallenge {
            nonce,
            puf_challenge,
            required_pcrs: self.config.required_pcrs.clone(),
            expires_at_millis: witnessd_core::now_millis()
                + self.config.challenge_ttl.as_millis() as u64,
        };

        let mut state = self.state.lock().unwrap();
        state.pending_enrollments.insert(nonce, challenge.clone());
        state.audit.record(AuditEvent::new(
            AuditEventKind::EnrollmentChallengeIssued,
            None,
            format!("nonce {}", hex::encode(&nonce[..8])),
        ));
        challenge
    }

    /// Process an enrollment response and store the device record.
    pub fn enroll(&self, response: EnrollmentResponse) -> Result<DeviceEnrollment> {
        let now = witnessd_core::now_millis();

        let challenge = {
            let mut state = self.state.lock().unwrap();
            match state.pending_enrollments.remove(&response.challenge_nonce) {
                Some(challenge) => challenge,
                None => {
                    state.audit.record(AuditEvent::new(
                        AuditEventKind::EnrollmentRejected,
                        None,
                        "unknown enrollment challenge",
                    ));
                    return Err(ProtocolError::ChallengeMismatch(
                        "unknown enrollment challenge".to_string(),
                    ));
                }
            }
        };

        if now >= challenge.expires_at_millis {
            self.record_audit(AuditEvent::new(
                AuditEventKind::EnrollmentRejected,
                None,
                "enrollment challenge expired",
            ));
            return Err(ProtocolError::ChallengeExpired);
        }

        let initial_pcrs = if self.config.require_tpm {
            let quote = response
                .tpm_quote
                .as_ref()
                .ok_or_else(|| ProtocolError::InvalidQuote("quote required".to_string()))?;
            if quote.nonce != challenge.nonce {
                return Err(ProtocolError::InvalidQuote(
                    "quote not bound to enrollment nonce".to_string(),
                ));
            }
            if self.config.strict_pcr_check {
                for (index, expected) in &self.config.trusted_pcrs {
                    if let Some(actual) = quote.pcr_values.get(index) {
                        if actual != expected {
                            return Err(ProtocolError::PlatformStateChanged(format!(
                                "PCR {index} deviates from trusted baseline"
                            )));
                        }
                    }
                }
            }
            quote.pcr_values.clone()
        } else {
            response
                .tpm_quote
                .as_ref()
                .map(|q| q.pcr_values.clone())
                .unwrap_or_default()
        };

        let device_id = derive_device_id(&response.endorsement_key, &response.puf_fingerprint);
        let enrollment = DeviceEnrollment {
            device_id,
            enrolled_at_millis: now,
            expires_at_millis: now + self.config.enrollment_ttl.as_millis() as u64,
            endorsement_key: response.endorsement_key,
            attestation_key: response.attestation_key,
            initial_pcrs,
            puf_fingerprint: response.puf_fingerprint,
            original_puf_response: response.puf_response,
            metadata: response.metadata,
        };

        let mut state = self.state.lock().unwrap();
        state.enrollments.insert(device_id, enrollment.clone());
        state.audit.record(AuditEvent::new(
            AuditEventKind::DeviceEnrolled,
            Some(device_id),
            format!("TTL {} ms", self.config.enrollment_ttl.as_millis()),
        ));
        tracing::info!(device = %hex::encode(&device_id[..8]), "device enrolled");
        Ok(enrollment)
    }

    fn record_audit(&self, event: AuditEvent) {
        self.state.lock().unwrap().audit.record(event);
    }

    /// Snapshot of the bounded audit trail.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.lock().unwrap().audit.snapshot()
    }

    /// Begin a verification round: look up the enrollment and mint a fresh
    /// single-use challenge tied to the submitted chain.
    pub fn begin_verification(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationChallenge> {
        let now = witnessd_core::now_millis();
        let mut state = self.state.lock().unwrap();

        let enrollment = state
            .enrollments
            .get(&request.device_id)
            .ok_or(ProtocolError::DeviceNotEnrolled)?;
        if enrollment.is_expired(now) {
            state.enrollments.remove(&request.device_id);
            state.audit.record(AuditEvent::new(
                AuditEventKind::EnrollmentExpired,
                Some(request.device_id),
                "evicted on verification attempt",
            ));
            return Err(ProtocolError::EnrollmentExpired);
        }

        let mut challenge_id = [0u8; 32];
        let mut tpm_nonce = [0u8; 32];
        let mut puf_challenge = [0u8; 32];
        OsRng.fill_bytes(&mut challenge_id);
        OsRng.fill_bytes(&mut tpm_nonce);
        OsRng.fill_bytes(&mut puf_challenge);

        let challenge = VerificationChallenge {
            challenge_id,
            device_id: request.device_id,
            issued_at_millis: now,
            expires_at_millis: now + self.config.challenge_ttl.as_millis() as u64,
            tpm_nonce,
            required_pcrs: self.config.required_pcrs.clone(),
            puf_challenge,
            min_counter: request.session_export.final_counter,
        };

        state.challenges.insert(
            challenge_id,
            ActiveChallenge {
                challenge: challenge.clone(),
                export: request.session_export.clone(),
            },
        );
        state.audit.record(AuditEvent::new(
            AuditEventKind::VerificationChallengeIssued,
            Some(request.device_id),
            format!("min_counter {}", challenge.min_counter),
        ));
        Ok(challenge)
    }

    /// Decide a verification round. Always returns a report; the consumed
    /// challenge is removed no matter the outcome.
    pub fn verify(&self, response: &VerificationResponse) -> VerificationReport {
        let now = witnessd_core::now_millis();

        // Single-use: take the challenge out before any judgement.
        let active = {
            let mut state = self.state.lock().unwrap();
            state.challenges.remove(&response.challenge_id)
        };
        let Some(active) = active else {
            self.record_audit(AuditEvent::new(
                AuditEventKind::ChallengeReplayDetected,
                Some(response.device_id),
                format!("challenge {}", hex::encode(&response.challenge_id[..8])),
            ));
            return VerificationReport::rejected("invalid or already used challenge");
        };

        let enrollment = {
            let state = self.state.lock().unwrap();
            state.enrollments.get(&response.device_id).cloned()
        };
        let Some(enrollment) = enrollment else {
            return VerificationReport::rejected("device not enrolled");
        };

        if active.challenge.is_expired(now) {
            return VerificationReport::rejected("challenge expired");
        }
        if active.challenge.device_id != response.device_id {
            return VerificationReport::rejected("challenge issued to a different device");
        }

        let mut card = ScoreCard::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let tpm_verified = self.check_tpm(response, &enrollment, &active.challenge, &mut errors, &mut warnings);
        if !tpm_verified {
            card.penalize(PENALTY_TPM);
        }

        let puf_verified = check_puf(
            self.config.require_puf,
            &response.puf_response,
            &enrollment.original_puf_response,
            &mut errors,
        );
        if !puf_verified {
            card.penalize(PENALTY_PUF);
        }

        let counter_verified = response.current_counter >= active.challenge.min_counter;
        if !counter_verified {
            card.penalize(PENALTY_COUNTER);
            errors.push(format!(
                "monotonic counter rollback: reported {} below required {}",
                response.current_counter, active.challenge.min_counter
            ));
        }

        let trusted = if self.config.trusted_pcrs.is_empty() {
            None
        } else {
            Some(&self.config.trusted_pcrs)
        };
        let chain_result = verify_chain(&active.export, trusted);
        let chain_verified = chain_result.valid;
        if !chain_verified {
            card.penalize(PENALTY_CHAIN);
            errors.extend(chain_result.errors);
        }
        warnings.extend(chain_result.warnings);

        let timeline_verified = check_timeline(
            &active.export,
            self.config.max_keystrokes_per_sec,
            &mut card,
            &mut warnings,
        );

        let verified = tpm_verified && puf_verified && counter_verified && chain_verified;
        let report = VerificationReport {
            verified,
            confidence_score: card.clamped(),
            tpm_verified,
            puf_verified,
            counter_verified,
            chain_verified,
            timeline_verified,
            checkpoint_count: active.export.chain.len(),
            errors,
            warnings,
            verified_at_millis: now,
        };

        self.record_audit(AuditEvent::new(
            AuditEventKind::VerificationDecided,
            Some(response.device_id),
            format!(
                "verified={} confidence={}",
                report.verified, report.confidence_score
            ),
        ));
        tracing::info!(
            device = %hex::encode(&response.device_id[..8]),
            verified = report.verified,
            confidence = report.confidence_score,
            "verification decided"
        );
        report
    }

    fn check_tpm(
        &self,
        response: &VerificationResponse,
        enrollment: &DeviceEnrollment,
        challenge: &VerificationChallenge,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> bool {
        if !self.config.require_tpm {
            return true;
        }

        let Some(quote) = &response.tpm_quote else {
            errors.push("TPM quote required but absent".to_string());
            return false;
        };
        if quote.nonce != challenge.tpm_nonce {
            errors.push("TPM quote not bound to the challenge nonce".to_string());
            return false;
        }

        // Enrollment-initial PCRs must be stable.
        for (index, expected) in &enrollment.initial_pcrs {
            match quote.pcr_values.get(index) {
                Some(actual) if actual == expected => {}
                Some(_) => {
                    errors.push(format!("PCR {index} changed since enrollment"));
                    return false;
                }
                None => {
                    errors.push(format!("PCR {index} missing from quote"));
                    return false;
                }
            }
        }

        // Strict mode additionally compares against the golden set; drift
        // there is a warning, not a verdict change.
        if self.config.strict_pcr_check {
            for (index, expected) in &self.config.trusted_pcrs {
                if let Some(actual) = quote.pcr_values.get(index) {
                    if actual != expected {
                        warnings.push(format!("PCR {index} deviates from trusted baseline"));
                    }
                }
            }
        }

        true
    }

    /// Drop expired challenges; returns how many were reclaimed.
    pub fn cleanup_expired_challenges(&self) -> usize {
        let now = witnessd_core::now_millis();
        let mut state = self.state.lock().unwrap();
        let before = state.challenges.len() + state.pending_enrollments.len();
        state.challenges.retain(|_, active| !active.challenge.is_expired(now));
        state
            .pending_enrollments
            .retain(|_, challenge| now < challenge.expires_at_millis);
        let reclaimed = before - state.challenges.len() - state.pending_enrollments.len();
        if reclaimed > 0 {
            state.audit.record(AuditEvent::new(
                AuditEventKind::CleanupRun,
                None,
                format!("{reclaimed} expired challenges reclaimed"),
            ));
        }
        reclaimed
    }

    /// Drop expired enrollments; returns how many were reclaimed.
    pub fn cleanup_expired_enrollments(&self) -> usize {
        let now = witnessd_core::now_millis();
        let mut state = self.state.lock().unwrap();
        let before = state.enrollments.len();
        state.enrollments.retain(|_, enrollment| !enrollment.is_expired(now));
        let reclaimed = before - state.enrollments.len();
        if reclaimed > 0 {
            state.audit.record(AuditEvent::new(
                AuditEventKind::CleanupRun,
                None,
                format!("{reclaimed} expired enrollments reclaimed"),
            ));
        }
        reclaimed
    }

    /// Remove one enrollment outright.
    pub fn purge_enrollment(&self, device_id: &[u8; 32]) -> bool {
        self.state
            .lock()
            .unwrap()
            .enrollments
            .remove(device_id)
            .is_some()
    }

    pub fn enrollment_count(&self) -> usize {
        self.state.lock().unwrap().enrollments.len()
    }

    pub fn active_challenge_count(&self) -> usize {
        self.state.lock().unwrap().challenges.len()
    }

    /// Look up an enrollment record.
    pub fn enrollment(&self, device_id: &[u8; 32]) -> Option<DeviceEnrollment> {
        self.state.lock().unwrap().enrollments.get(device_id).cloned()
    }

    /// Export all enrollments as an opaque blob (UTF-8 JSON).
    pub fn export_enrollments(&self) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let records: Vec<&DeviceEnrollment> = state.enrollments.values().collect();
        Ok(serde_json::to_vec(&records)?)
    }

    /// Merge enrollments from a previously exported blob. Returns how many
    /// records were imported.
    pub fn import_enrollments(&self, blob: &[u8]) -> Result<usize> {
        let records: Vec<DeviceEnrollment> = serde_json::from_slice(blob)?;
        let mut state = self.state.lock().unwrap();
        let count = records.len();
        for record in records {
            state.enrollments.insert(record.device_id, record);
        }
        Ok(count)
    }
}

fn check_puf(
    required: bool,
    response: &[u8],
    original: &[u8],
    errors: &mut Vec<String>,
) -> bool {
    if !required {
        return true;
    }
    if response.len() < MIN_PUF_RESPONSE_LEN {
        errors.push(format!(
            "PUF response too short: {} bytes",
            response.len()
        ));
        return false;
    }
    if response.iter().all(|b| *b == 0) {
        errors.push("PUF response is all zeros".to_string());
        return false;
    }
    if response == original {
        errors.push("PUF response replays the enrollment response".to_string());
        return false;
    }
    true
}

/// Timeline plausibility. Failures are warnings with a confidence penalty;
/// they never flip the verdict.
fn check_timeline(
    export: &witnessd_attest::SessionExport,
    max_keystrokes_per_sec: f64,
    card: &mut ScoreCard,
    warnings: &mut Vec<String>,
) -> bool {
    const YEAR_NANOS: i64 = 365 * 24 * 60 * 60 * 1_000_000_000;
    let now = witnessd_core::now_nanos();
    let mut ok = true;

    for window in export.chain.windows(2) {
        if window[1].timestamp_nanos < window[0].timestamp_nanos {
            warnings.push(format!(
                "checkpoint timestamps regress at sequence {}",
                window[1].sequence_no
            ));
            card.penalize(PENALTY_TIMELINE);
            ok = false;
            break;
        }
    }

    if let (Some(first), Some(last)) = (export.chain.first(), export.chain.last()) {
        let span_nanos = last.timestamp_nanos - first.timestamp_nanos;
        let keystrokes = last.keystroke_count.saturating_sub(first.keystroke_count);
        // Rate is only meaningful over a sustained span; sessions shorter
        // than a second cannot be judged at this resolution.
        if span_nanos >= 1_000_000_000 && keystrokes > 0 {
            let rate = keystrokes as f64 / (span_nanos as f64 / 1e9);
            if rate > max_keystrokes_per_sec {
                warnings.push(format!(
                    "typing rate {rate:.1}/s exceeds the {max_keystrokes_per_sec:.0}/s policy"
                ));
                card.penalize(PENALTY_TIMELINE);
                ok = false;
            }
        }
    }

    if export.session_start_nanos > now {
        warnings.push("session start is in the future".to_string());
        card.penalize(PENALTY_TIMELINE);
        ok = false;
    }
    if export.session_start_nanos < now - YEAR_NANOS {
        warnings.push("session start is more than a year old".to_string());
        card.penalize(PENALTY_TIMELINE);
        ok = false;
    }

    ok
}
