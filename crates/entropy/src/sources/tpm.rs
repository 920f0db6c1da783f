//! TPM device RNG as an entropy source.

use std::sync::Arc;

use witnessd_tpm::Tpm;

use crate::error::{EntropyError, Result};
use crate::source::{EntropySource, SourceKind, SourceStats, SourceSupervisor};

/// Entropy drawn from a TPM's hardware RNG through the [`Tpm`] capability.
pub struct TpmSource {
    supervisor: SourceSupervisor,
    tpm: Arc<dyn Tpm>,
}

impl TpmSource {
    pub fn new(tpm: Arc<dyn Tpm>) -> Self {
        Self {
            supervisor: SourceSupervisor::new("tpm-rng", SourceKind::Tpm),
            tpm,
        }
    }
}

impl EntropySource for TpmSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Tpm
    }

    fn name(&self) -> &str {
        self.supervisor.name()
    }

    fn get_bytes(&self, n: usize) -> Result<Vec<u8>> {
        match self.tpm.get_random(n) {
            Ok(bytes) => {
                self.supervisor.record_success(&bytes);
                Ok(bytes)
            }
            Err(e) => {
                let reason = e.to_string();
                self.supervisor.record_failure(&reason);
                Err(EntropyError::SourceFailed {
                    name: self.supervisor.name().to_string(),
                    reason,
                })
            }
        }
    }

    fn available(&self) -> bool {
        self.tpm.available()
    }

    fn healthy(&self) -> bool {
        self.available() && self.supervisor.healthy()
    }

    fn stats(&self) -> SourceStats {
        self.supervisor.stats(self.available())
    }
}
