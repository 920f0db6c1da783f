//! Embedder-supplied entropy source.

use crate::error::{EntropyError, Result};
use crate::source::{EntropySource, SourceKind, SourceStats, SourceSupervisor};

type ProducerFn =
    dyn Fn(usize) -> std::result::Result<Vec<u8>, String> + Send + Sync + 'static;

/// Wraps an arbitrary byte producer (audio noise, network beacon, test
/// fixture) in the standard supervision harness. The producer's output is
/// health-tested exactly like the built-in sources, so a misbehaving
/// external feed takes itself out of rotation.
pub struct ExternalSource {
    supervisor: SourceSupervisor,
    producer: Box<ProducerFn>,
}

impl ExternalSource {
    pub fn new(
        name: impl Into<String>,
        producer: impl Fn(usize) -> std::result::Result<Vec<u8>, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            supervisor: SourceSupervisor::new(name, SourceKind::External),
            producer: Box::new(producer),
        }
    }
}

impl EntropySource for ExternalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::External
    }

    fn name(&self) -> &str {
        self.supervisor.name()
    }

    fn get_bytes(&self, n: usize) -> Result<Vec<u8>> {
        match (self.producer)(n) {
            Ok(bytes) if bytes.len() == n => {
                self.supervisor.record_success(&bytes);
                Ok(bytes)
            }
            Ok(bytes) => {
                let reason = format!("producer returned {} bytes, wanted {n}", bytes.len());
                self.supervisor.record_failure(&reason);
                Err(EntropyError::SourceFailed {
                    name: self.supervisor.name().to_string(),
                    reason,
                })
            }
            Err(reason) => {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_source_passes_through_producer() {
        let source = ExternalSource::new("fixture", |n| Ok((0..n as u8).collect()));
        let bytes = source.get_bytes(8).unwrap();
        assert_eq!(bytes, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn external_source_rejects_wrong_length() {
        let source = ExternalSource::new("short", |_| Ok(vec![1, 2]));
        assert!(matches!(
            source.get_bytes(8),
            Err(EntropyError::SourceFailed { .. })
        ));
    }

    #[test]
    fn stuck_external_source_goes_unhealthy() {
        let source = ExternalSource::new("stuck", |n| Ok(vec![0xEE; n]));
        assert!(source.healthy());
        source.get_bytes(32).unwrap();
        assert!(!source.healthy());
    }

    #[test]
    fn failing_external_source_records_error() {
        let source = ExternalSource::new("dead", |_| Err("unplugged".to_string()));
        assert!(source.get_bytes(4).is_err());
        assert_eq!(source.stats().last_error.as_deref(), Some("unplugged"));
    }
}
