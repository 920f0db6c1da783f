//! Local chain verifier.
//!
//! Walks an exported chain and checks, in order, sequence density, hash
//! linkage, counter monotonicity, and canonical-hash integrity. PCR
//! snapshots are compared against a trusted set when one is supplied;
//! mismatches are warnings, not errors - a platform update changes PCRs
//! without invalidating the chain's internal integrity.
//!
//! The remote verifier reuses this walk as its chain sub-check.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::SessionExport;

/// Outcome of a chain walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub checkpoints_verified: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ChainVerification {
    fn passed(count: usize, warnings: Vec<String>) -> Self {
        Self {
            valid: true,
            checkpoints_verified: count,
            errors: Vec::new(),
            warnings,
        }
    }
}

/// Verify an exported chain.
///
/// An empty chain is valid. `trusted_pcrs` maps PCR index to the expected
/// digest; snapshots deviating from it produce warnings.
pub fn verify_chain(
    export: &SessionExport,
    trusted_pcrs: Option<&BTreeMap<u8, Vec<u8>>>,
) -> ChainVerification {
    let chain = &export.chain;
    if chain.is_empty() {
        return ChainVerification::passed(0, Vec::new());
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut last_counter: Option<u64> = None;

    for (index, checkpoint) in chain.iter().enumerate() {
        if checkpoint.sequence_no != index as u64 {
            errors.push(format!(
                "sequence number {} at index {index}, expected {index}",
                checkpoint.sequence_no
            ));
        }

        if index > 0 {
            let previous = &chain[index - 1];
            if checkpoint.previous_hash != previous.checkpoint_hash {
                errors.push(format!("hash chain broken at index {index}"));
            }
        }

        if let Some(last) = last_counter {
            if checkpoint.tpm_counter <= last {
                errors.push(format!(
                    "monotonic counter regressed at index {index}: {} after {last}",
                    checkpoint.tpm_counter
                ));
            }
        }
        last_counter = Some(checkpoint.tpm_counter);

        if checkpoint.compute_hash() != checkpoint.checkpoint_hash {
            errors.push(format!("checkpoint hash mismatch at index {index}"));
        }

        if let (Some(trusted), Some(snapshot)) = (trusted_pcrs, checkpoint.pcr_values.as_ref()) {
            for (pcr_index, expected) in trusted {
                match snapshot.get(pcr_index) {
                    Some(actual) if actual == expected => {}
                    Some(_) => warnings.push(format!(
                        "PCR {pcr_index} deviates from trusted value at index {index}"
                    )),
                    None => warnings.push(format!(
                        "PCR {pcr_index} missing from snapshot at index {index}"
                    )),
                }
            }
        }
    }

    if errors.is_empty() {
        ChainVerification::passed(chain.len(), warnings)
    } else {
        ChainVerification {
            valid: false,
            checkpoints_verified: chain.len(),
            errors,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::ZERO_HASH;
    use crate::session::{AttestationSession, SessionConfig};
    use std::sync::Arc;
    use witnessd_tpm::{MockTpm, Tpm};

    fn exported_session(keystrokes: u8) -> SessionExport {
        let session = Arc::new(AttestationSession::new(
            Arc::new(MockTpm::new()),
            None,
            SessionConfig {
                checkpoint_interval: 1,
                ..SessionConfig::default()
            },
        ));
        session.start().unwrap();
        for i in 0..keystrokes {
            session.record_keystroke([i; 32], &[]).unwrap();
        }
        session.stop();
        session.export()
    }

    #[tokio::test]
    async fn empty_chain_is_valid() {
        let mut export = exported_session(0);
        export.chain.clear();
        let result = verify_chain(&export, None);
        assert!(result.valid);
        assert_eq!(result.checkpoints_verified, 0);
    }

    #[tokio::test]
    async fn honest_chain_verifies() {
        let export = exported_session(5);
        let result = verify_chain(&export, None);
        assert!(result.valid, "errors: {:?}", result.errors);
        assert_eq!(result.checkpoints_verified, 6);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn tampered_keystroke_count_is_detected() {
        let mut export = exported_session(4);
        export.chain[2].keystroke_count = 999_999;

        let result = verify_chain(&export, None);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("hash mismatch at index 2")));
    }

    #[tokio::test]
    async fn tampered_content_hash_is_detected() {
        let mut export = exported_session(4);
        export.chain[1].content_hash = [0xAA; 32];
        let result = verify_chain(&export, None);
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn broken_link_is_detected() {
        let mut export = exported_session(4);
        export.chain[3].previous_hash = ZERO_HASH;
        // Re-seal the checkpoint so only the linkage is wrong.
        export.chain[3].checkpoint_hash = export.chain[3].compute_hash();

        let result = verify_chain(&export, None);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("chain broken at index 3")));
    }

    #[tokio::test]
    async fn sequence_gap_is_detected() {
        let mut export = exported_session(4);
        export.chain.remove(2);
        let result = verify_chain(&export, None);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("sequence number")));
    }

    #[tokio::test]
    async fn counter_regression_is_detected() {
        let mut export = exported_session(4);
        export.chain[2].tpm_counter = export.chain[1].tpm_counter;
        export.chain[2].checkpoint_hash = export.chain[2].compute_hash();
        // Repair downstream linkage so only the counter check fires there.
        export.chain[3].previous_hash = export.chain[2].checkpoint_hash;
        export.chain[3].checkpoint_hash = export.chain[3].compute_hash();

        let result = verify_chain(&export, None);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("counter regressed at index 2")));
    }

    #[tokio::test]
    async fn every_single_field_mutation_invalidates() {
        let export = exported_session(3);

        for index in 0..export.chain.len() {
            let mut tampered = export.clone();
            tampered.chain[index].timestamp_nanos += 1;
            assert!(!verify_chain(&tampered, None).valid, "timestamp at {index}");

            let mut tampered = export.clone();
            tampered.chain[index].tpm_counter += 100;
            assert!(!verify_chain(&tampered, None).valid, "counter at {index}");

            let mut tampered = export.clone();
            tampered.chain[index].keystroke_count += 1;
            assert!(!verify_chain(&tampered, None).valid, "keystrokes at {index}");
        }
    }

    #[tokio::test]
    async fn pcr_mismatch_is_warning_only() {
        let export = exported_session(2);
        let mut trusted = MockTpm::new().read_pcrs(&[0]).unwrap();
        trusted.insert(0, vec![0xDD; 32]);

        let result = verify_chain(&export, Some(&trusted));
        assert!(result.valid);
        assert!(!result.warnings.is_empty());
        assert!(result.warnings[0].contains("PCR 0"));
    }

    #[tokio::test]
    async fn matching_trusted_pcrs_produce_no_warnings() {
        let export = exported_session(2);
        // The mock PCR bank is deterministic, so a fresh mock agrees.
        let trusted = MockTpm::new().read_pcrs(&[0, 7]).unwrap();
        let result = verify_chain(&export, Some(&trusted));
        assert!(result.valid);
        assert!(result.warnings.is_empty());
    }
}
