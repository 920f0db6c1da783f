//! Verification report.
//!
//! `verify` always produces a report; it never errors for an ordinary
//! failed verification. Hard failures (TPM, PUF, counter, chain) deny
//! `verified` and subtract from confidence; timeline anomalies and PCR
//! drift subtract but only warn.

use serde::{Deserialize, Serialize};

/// Penalty for a failed TPM sub-check.
pub const PENALTY_TPM: i32 = 30;
/// Penalty for a failed PUF sub-check.
pub const PENALTY_PUF: i32 = 30;
/// Penalty for a counter below the challenge floor.
pub const PENALTY_COUNTER: i32 = 20;
/// Penalty for a chain that fails local verification.
pub const PENALTY_CHAIN: i32 = 20;
/// Penalty per failed timeline check (warning only).
pub const PENALTY_TIMELINE: i32 = 10;

/// Outcome of one verification round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True iff no hard sub-check failed
    pub verified: bool,
    /// Confidence in [0, 100]
    pub confidence_score: u8,
    pub tpm_verified: bool,
    pub puf_verified: bool,
    pub counter_verified: bool,
    pub chain_verified: bool,
    pub timeline_verified: bool,
    /// Checkpoints in the submitted chain
    pub checkpoint_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// When the verdict was produced, milliseconds since the Unix epoch
    pub verified_at_millis: u64,
}

impl VerificationReport {
    /// A flat rejection with a single explanatory error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            verified: false,
            confidence_score: 0,
            tpm_verified: false,
            puf_verified: false,
            counter_verified: false,
            chain_verified: false,
            timeline_verified: false,
            checkpoint_count: 0,
            errors: vec![reason.into()],
            warnings: Vec::new(),
            verified_at_millis: witnessd_core::now_millis(),
        }
    }
}

/// Running score builder used by the verifier.
#[derive(Debug)]
pub(crate) struct ScoreCard {
    confidence: i32,
}

impl ScoreCard {
    pub(crate) fn new() -> Self {
        Self { confidence: 100 }
    }

    pub(crate) fn penalize(&mut self, penalty: i32) {
        self.confidence -= penalty;
    }

    pub(crate) fn clamped(&self) -> u8 {
        self.confidence.clamp(0, 100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_report_is_zero_confidence() {
        let report = VerificationReport::rejected("invalid or already used challenge");
        assert!(!report.verified);
        assert_eq!(report.confidence_score, 0);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn scorecard_clamps_low() {
        let mut card = ScoreCard::new();
        for _ in 0..6 {
            card.penalize(PENALTY_TPM);
        }
        assert_eq!(card.clamped(), 0);
    }

    #[test]
    fn scorecard_full_marks() {
        assert_eq!(ScoreCard::new().clamped(), 100);
    }
}
