//! Entropy source abstraction.
//!
//! A source is a noise producer with continuous health supervision. The pool
//! treats sources uniformly through [`EntropySource`]; the fixed set of
//! kinds lives in [`SourceKind`] so reports and policies can match on it.
//!
//! Health gating follows SP 800-90B: the repetition-count and
//! adaptive-proportion tests run continuously over every byte a source
//! produces and a `Failed` verdict from either takes the source out of
//! rotation. The chi-square and autocorrelation tests also consume the
//! stream; their verdicts are reported in [`SourceStats`] for operators but
//! do not gate, because at the configured window sizes they reject a
//! non-negligible fraction of ideal windows.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::health::{
    AdaptiveProportionTest, AutocorrelationTest, ChiSquareTest, HealthStatus, HealthTest,
    RepetitionCountTest,
};

/// The fixed set of source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Kernel CSPRNG
    Os,
    /// x86 RDRAND instruction
    Rdrand,
    /// x86 RDSEED instruction
    Rdseed,
    /// TPM device RNG
    Tpm,
    /// CPU timing jitter
    CpuJitter,
    /// Embedder-supplied source
    External,
}

/// Point-in-time verdict of one health test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSnapshot {
    pub name: String,
    pub status: HealthStatus,
    pub failure_count: u64,
}

/// Per-source statistics exposed through the pool's health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStats {
    pub name: String,
    pub kind: SourceKind,
    pub available: bool,
    pub status: HealthStatus,
    pub bytes_generated: u64,
    pub requests: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub tests: Vec<TestSnapshot>,
}

/// A polymorphic entropy producer.
pub trait EntropySource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn name(&self) -> &str;

    /// Produce `n` bytes. The implementation must feed its own output
    /// through its health monitor before returning.
    fn get_bytes(&self, n: usize) -> Result<Vec<u8>>;

    /// Whether the underlying mechanism exists on this machine right now.
    fn available(&self) -> bool;

    /// Whether the source may contribute to a pool. A source advertises
    /// `Healthy` status only after passing its most recent test window; it
    /// stops being usable the moment a gating test fails.
    fn healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Full test battery attached to one source.
pub struct HealthMonitor {
    repetition: RepetitionCountTest,
    adaptive: AdaptiveProportionTest,
    chi_square: ChiSquareTest,
    autocorrelation: AutocorrelationTest,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            repetition: RepetitionCountTest::default(),
            adaptive: AdaptiveProportionTest::default(),
            chi_square: ChiSquareTest::default(),
            autocorrelation: AutocorrelationTest::default(),
        }
    }

    /// Feed produced bytes through the battery.
    pub fn observe(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.repetition.feed(byte);
            self.adaptive.feed(byte);
            self.chi_square.feed(byte);
            self.autocorrelation.feed(byte);
        }
    }

    /// Aggregated status over the gating tests.
    pub fn status(&self) -> HealthStatus {
        match (self.repetition.status(), self.adaptive.status()) {
            (HealthStatus::Failed, _) | (_, HealthStatus::Failed) => HealthStatus::Failed,
            (HealthStatus::Recovering, _) | (_, HealthStatus::Recovering) => {
                HealthStatus::Recovering
            }
            (HealthStatus::Unknown, _) | (_, HealthStatus::Unknown) => HealthStatus::Unknown,
            _ => HealthStatus::Healthy,
        }
    }

    /// Whether the gating tests permit pool participation.
    pub fn gating_ok(&self) -> bool {
        self.repetition.status() != HealthStatus::Failed
            && self.adaptive.status() != HealthStatus::Failed
    }

    pub fn snapshots(&self) -> Vec<TestSnapshot> {
        [
            (&self.repetition as &dyn HealthTest),
            &self.adaptive,
            &self.chi_square,
            &self.autocorrelation,
        ]
        .iter()
        .map(|test| TestSnapshot {
            name: test.name().to_string(),
            status: test.status(),
            failure_count: test.failure_count(),
        })
        .collect()
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

struct SupervisorState {
    monitor: HealthMonitor,
    bytes_generated: u64,
    requests: u64,
    failures: u64,
    last_error: Option<String>,
}

/// Shared bookkeeping every concrete source embeds: name, kind, health
/// battery and counters, all behind one lock.
pub struct SourceSupervisor {
    name: String,
    kind: SourceKind,
    state: Mutex<SupervisorState>,
}

impl SourceSupervisor {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            state: Mutex::new(SupervisorState {
                monitor: HealthMonitor::new(),
                bytes_generated: 0,
                requests: 0,
                failures: 0,
                last_error: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Record a successful draw and supervise its bytes.
    pub fn record_success(&self, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        state.bytes_generated += bytes.len() as u64;
        state.monitor.observe(bytes);
    }

    pub fn record_failure(&self, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        state.failures += 1;
        state.last_error = Some(reason.to_string());
    }

    pub fn healthy(&self) -> bool {
        self.state.lock().unwrap().monitor.gating_ok()
    }

    pub fn stats(&self, available: bool) -> SourceStats {
        let state = self.state.lock().unwrap();
        SourceStats {
            name: self.name.clone(),
            kind: self.kind,
            available,
            status: state.monitor.status(),
            bytes_generated: state.bytes_generated,
            requests: state.requests,
            failures: state.failures,
            last_error: state.last_error.clone(),
            tests: state.monitor.snapshots(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_monitor_is_usable_but_unknown() {
        let monitor = HealthMonitor::new();
        assert_eq!(monitor.status(), HealthStatus::Unknown);
        assert!(monitor.gating_ok());
    }

    #[test]
    fn monitor_fails_on_stuck_source() {
        let mut monitor = HealthMonitor::new();
        monitor.observe(&[0x42; 64]);
        assert_eq!(monitor.status(), HealthStatus::Failed);
        assert!(!monitor.gating_ok());
    }

    #[test]
    fn supervisor_tracks_counters() {
        let supervisor = SourceSupervisor::new("test", SourceKind::External);
        supervisor.record_success(&[1, 2, 3, 4]);
        supervisor.record_failure("boom");

        let stats = supervisor.stats(true);
        assert_eq!(stats.bytes_generated, 4);
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.last_error.as_deref(), Some("boom"));
        assert_eq!(stats.tests.len(), 4);
    }

    #[test]
    fn supervisor_goes_unhealthy_on_repetition() {
        let supervisor = SourceSupervisor::new("stuck", SourceKind::External);
        assert!(supervisor.healthy());
        supervisor.record_success(&[9u8; 32]);
        assert!(!supervisor.healthy());
    }
}
