//! The end-to-end protocol scenarios.

use std::time::Duration;

use witnessd_protocol::{ProtocolError, VerificationRequest, VerifierConfig};

use crate::test_utils::Rig;

#[tokio::test]
async fn honest_device_session_verifies() {
    let rig = Rig::new();
    let enrollment = rig.enroll();

    // 12 keystrokes at a threshold of 3: four threshold checkpoints plus
    // the initial one.
    let export = rig.run_session(12);
    assert_eq!(export.keystroke_count, 12);

    let report = rig.verify_export(enrollment.device_id, export);

    assert!(report.verified, "errors: {:?}", report.errors);
    assert!(report.confidence_score >= 50);
    assert!(report.tpm_verified);
    assert!(report.puf_verified);
    assert!(report.chain_verified);
    assert!(report.counter_verified);
    assert!(report.timeline_verified);
    assert_eq!(report.checkpoint_count, 5);
}

#[tokio::test]
async fn counter_rollback_fails_verification() {
    let rig = Rig::new();
    let enrollment = rig.enroll();
    let export = rig.run_session(6);

    let request = VerificationRequest {
        device_id: enrollment.device_id,
        session_export: export,
    };
    let challenge = rig.verifier.begin_verification(&request).unwrap();
    assert!(challenge.min_counter > 1);

    let mut response = rig.prover.respond_to_verification(&challenge).unwrap();
    response.current_counter = 1;

    let report = rig.verifier.verify(&response);
    assert!(!report.verified);
    assert!(!report.counter_verified);
    assert!(report.errors.iter().any(|e| e.contains("monotonic counter")));
}

#[tokio::test]
async fn tampered_checkpoint_fails_verification() {
    let rig = Rig::new();
    let enrollment = rig.enroll();

    let mut export = rig.run_session(12);
    export.chain[2].keystroke_count = 999_999;

    let report = rig.verify_export(enrollment.device_id, export);
    assert!(!report.verified);
    assert!(!report.chain_verified);
    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("hash mismatch at index 2")));
}

#[tokio::test]
async fn challenge_replay_is_rejected() {
    let rig = Rig::new();
    let enrollment = rig.enroll();
    let export = rig.run_session(6);

    let request = VerificationRequest {
        device_id: enrollment.device_id,
        session_export: export,
    };
    let challenge = rig.verifier.begin_verification(&request).unwrap();
    let response = rig.prover.respond_to_verification(&challenge).unwrap();

    let first = rig.verifier.verify(&response);
    assert!(first.verified);

    let second = rig.verifier.verify(&response);
    assert!(!second.verified);
    assert_eq!(second.confidence_score, 0);
    assert!(second
        .errors
        .iter()
        .any(|e| e.contains("invalid or already used challenge")));
}

#[tokio::test]
async fn expired_enrollment_blocks_challenge_creation() {
    let rig = Rig::with_configs(
        witnessd_attest::SessionConfig {
            checkpoint_interval: 3,
            ..witnessd_attest::SessionConfig::default()
        },
        VerifierConfig {
            enrollment_ttl: Duration::from_millis(50),
            ..VerifierConfig::default()
        },
    );
    let enrollment = rig.enroll();
    let export = rig.run_session(3);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let request = VerificationRequest {
        device_id: enrollment.device_id,
        session_export: export,
    };
    assert!(matches!(
        rig.verifier.begin_verification(&request),
        Err(ProtocolError::EnrollmentExpired)
    ));
}

#[tokio::test]
async fn enrollment_export_import_round_trips() {
    let rig = Rig::new();
    let enrollment = rig.enroll();

    let blob = rig.verifier.export_enrollments().unwrap();
    // The blob is self-describing JSON; a fresh verifier accepts it.
    let restored = witnessd_protocol::RemoteVerifier::new(VerifierConfig::default());
    restored.import_enrollments(&blob).unwrap();

    assert_eq!(restored.enrollment_count(), 1);
    let record = restored.enrollment(&enrollment.device_id).unwrap();
    assert_eq!(record.device_id, enrollment.device_id);
    assert_eq!(record.puf_fingerprint, enrollment.puf_fingerprint);
}

#[tokio::test]
async fn two_devices_get_distinct_identities() {
    let rig_a = Rig::new();
    let rig_b = Rig::new();
    let enrollment_a = rig_a.enroll();
    let enrollment_b = rig_b.enroll();
    assert_ne!(enrollment_a.device_id, enrollment_b.device_id);
}

#[tokio::test]
async fn verification_against_wrong_device_chain_still_scores_chain() {
    // A valid chain from device A submitted under device B's identity:
    // the chain itself verifies, but B's PUF answers the challenge, so the
    // report reflects B's hardware - the chain check alone cannot transfer
    // authorship.
    let rig_a = Rig::new();
    let rig_b = Rig::new();
    rig_a.enroll();
    let enrollment_b = rig_b.enroll();

    let export_a = rig_a.run_session(6);
    let report = rig_b.verify_export(enrollment_b.device_id, export_a);
    // Chain integrity holds; the decision still rests on B's own evidence.
    assert!(report.chain_verified);
}
