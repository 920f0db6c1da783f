//! Start-up self-test battery.
//!
//! Before a pool starts serving, the daemon (or an embedder) can run every
//! available source through a fresh instance of the full test battery over
//! a dedicated sample draw. Unlike the continuous monitors, this exercises
//! the windowed statistics (chi-square, autocorrelation) over a known
//! sample size and reports them per source, so a bad source is visible at
//! start-up instead of minutes into a session.
//!
//! The verdict mirrors the continuous gating rule: a source passes when
//! neither the repetition-count nor the adaptive-proportion test failed.
//! The windowed statistics are reported for operators.

use serde::{Deserialize, Serialize};

use crate::health::HealthStatus;
use crate::source::{EntropySource, HealthMonitor, SourceKind, TestSnapshot};

/// Sample drawn from each source by default.
pub const DEFAULT_SELF_TEST_BYTES: usize = 1024;

/// Result of self-testing one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSelfTest {
    pub name: String,
    pub kind: SourceKind,
    pub sample_bytes: usize,
    pub passed: bool,
    pub tests: Vec<TestSnapshot>,
    pub error: Option<String>,
}

/// Aggregate self-test outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfTestReport {
    /// True when every available source passed its gating tests
    pub passed: bool,
    pub sources: Vec<SourceSelfTest>,
}

/// Run the battery over each available source.
pub(crate) fn run_self_test(
    sources: &[Box<dyn EntropySource>],
    sample_bytes: usize,
) -> SelfTestReport {
    let mut results = Vec::with_capacity(sources.len());

    for source in sources {
        if !source.available() {
            continue;
        }
        match source.get_bytes(sample_bytes) {
            Ok(sample) => {
                let mut monitor = HealthMonitor::new();
                monitor.observe(&sample);
                let passed = monitor.gating_ok();
                let tests = monitor.snapshots();
                if !passed {
                    tracing::warn!(source = source.name(), "source failed start-up self-test");
                }
                results.push(SourceSelfTest {
                    name: source.name().to_string(),
                    kind: source.kind(),
                    sample_bytes,
                    passed,
                    tests,
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(source = source.name(), error = %e, "self-test draw failed");
                results.push(SourceSelfTest {
                    name: source.name().to_string(),
                    kind: source.kind(),
                    sample_bytes,
                    passed: false,
                    tests: Vec::new(),
                    error: Some(e.to_string()),
                });
            }
        }
    }

    SelfTestReport {
        passed: !results.is_empty() && results.iter().all(|r| r.passed),
        sources: results,
    }
}

/// Whether a snapshot list shows a hard failure.
pub fn any_failed(tests: &[TestSnapshot]) -> bool {
    tests.iter().any(|t| t.status == HealthStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{ExternalSource, OsSource};

    #[test]
    fn os_source_passes_self_test() {
        let sources: Vec<Box<dyn EntropySource>> = vec![Box::new(OsSource::new())];
        let report = run_self_test(&sources, DEFAULT_SELF_TEST_BYTES);
        assert!(report.passed);
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].tests.len(), 4);
    }

    #[test]
    fn stuck_source_fails_self_test() {
        let sources: Vec<Box<dyn EntropySource>> = vec![
            Box::new(OsSource::new()),
            Box::new(ExternalSource::new("stuck", |n| Ok(vec![0x77; n]))),
        ];
        let report = run_self_test(&sources, 256);
        assert!(!report.passed);

        let stuck = report.sources.iter().find(|s| s.name == "stuck").unwrap();
        assert!(!stuck.passed);
        assert!(any_failed(&stuck.tests));
    }

    #[test]
    fn erroring_source_is_reported_not_skipped() {
        let sources: Vec<Box<dyn EntropySource>> = vec![Box::new(ExternalSource::new(
            "dead",
            |_| Err("offline".to_string()),
        ))];
        let report = run_self_test(&sources, 64);
        assert!(!report.passed);
        assert_eq!(report.sources[0].error.as_deref().unwrap(), "offline");
    }

    #[test]
    fn empty_source_set_does_not_pass() {
        let sources: Vec<Box<dyn EntropySource>> = Vec::new();
        let report = run_self_test(&sources, 64);
        assert!(!report.passed);
        assert!(report.sources.is_empty());
    }
}
