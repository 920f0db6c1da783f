//! Kernel CSPRNG source.

use crate::error::{EntropyError, Result};
use crate::source::{EntropySource, SourceKind, SourceStats, SourceSupervisor};

/// Entropy from the operating system CSPRNG (`getrandom(2)` or platform
/// equivalent). Always available; the baseline source every pool carries.
pub struct OsSource {
    supervisor: SourceSupervisor,
}

impl OsSource {
    pub fn new() -> Self {
        Self {
            supervisor: SourceSupervisor::new("os-csprng", SourceKind::Os),
        }
    }
}

impl Default for OsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for OsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Os
    }

    fn name(&self) -> &str {
        self.supervisor.name()
    }

    fn get_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; n];
        match getrandom::getrandom(&mut bytes) {
            Ok(()) => {
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
        true
    }

    fn healthy(&self) -> bool {
        self.supervisor.healthy()
    }

    fn stats(&self) -> SourceStats {
        self.supervisor.stats(self.available())
    }
}
