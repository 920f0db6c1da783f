//! Shared fixtures for the integration suite.

use std::sync::Arc;

use witnessd_attest::{AttestationSession, SessionConfig, SessionExport};
use witnessd_protocol::{
    DeviceEnrollment, Prover, RemoteVerifier, VerificationRequest, VerifierConfig,
};
use witnessd_puf::SoftwarePuf;
use witnessd_tpm::{MockTpm, Tpm};

/// A complete device + verifier fixture.
pub struct Rig {
    pub tpm: Arc<MockTpm>,
    pub session: Arc<AttestationSession>,
    pub prover: Prover,
    pub verifier: RemoteVerifier,
    _seed_dir: tempfile::TempDir,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_configs(
            SessionConfig {
                checkpoint_interval: 3,
                ..SessionConfig::default()
            },
            VerifierConfig::default(),
        )
    }

    pub fn with_configs(session_config: SessionConfig, verifier_config: VerifierConfig) -> Self {
        let seed_dir = tempfile::tempdir().unwrap();
        let tpm = Arc::new(MockTpm::new());
        let puf: Arc<dyn witnessd_puf::Puf> =
            Arc::new(SoftwarePuf::init(&seed_dir.path().join("seed")).unwrap());

        let session = Arc::new(AttestationSession::new(
            Arc::clone(&tpm) as Arc<dyn Tpm>,
            Some(Arc::clone(&puf)),
            session_config,
        ));
        let prover = Prover::new(Arc::clone(&tpm) as Arc<dyn Tpm>, puf, 0);

        Self {
            tpm,
            session,
            prover,
            verifier: RemoteVerifier::new(verifier_config),
            _seed_dir: seed_dir,
        }
    }

    /// Run the enrollment flow to completion.
    pub fn enroll(&self) -> DeviceEnrollment {
        let challenge = self.verifier.create_enrollment_challenge();
        let response = self.prover.respond_to_enrollment(&challenge).unwrap();
        let enrollment = self.verifier.enroll(response).unwrap();
        self.prover.mark_enrolled(enrollment.device_id);
        enrollment
    }

    /// Type `keystrokes` characters and export the finished session.
    pub fn run_session(&self, keystrokes: u8) -> SessionExport {
        self.session.start().unwrap();
        for i in 0..keystrokes {
            self.session
                .record_keystroke(content_hash(i), b"interval")
                .unwrap();
        }
        self.session.stop();
        self.session.export()
    }

    /// Full verification round for an already exported session.
    pub fn verify_export(
        &self,
        device_id: [u8; 32],
        export: SessionExport,
    ) -> witnessd_protocol::VerificationReport {
        let request = VerificationRequest {
            device_id,
            session_export: export,
        };
        let challenge = self.verifier.begin_verification(&request).unwrap();
        let response = self.prover.respond_to_verification(&challenge).unwrap();
        self.verifier.verify(&response)
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthetic content hash for keystroke `i`.
pub fn content_hash(i: u8) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash[0] = i;
    hash[31] = i.wrapping_mul(37);
    hash
}
