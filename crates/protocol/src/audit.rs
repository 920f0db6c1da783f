//! Audit trail for verifier decisions.
//!
//! Every security-relevant transition the verifier takes is recorded as an
//! [`AuditEvent`]: challenges issued, devices enrolled or refused, verdicts
//! produced, replays detected, state reclaimed. Embedders ship the trail to
//! their logging pipeline; the verifier itself keeps a bounded in-memory
//! window and never blocks on it.

use serde::{Deserialize, Serialize};

/// Retained events; older entries are dropped FIFO.
pub const MAX_AUDIT_EVENTS: usize = 1024;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventKind {
    /// An enrollment challenge was minted
    EnrollmentChallengeIssued,
    /// A device enrollment was accepted and stored
    DeviceEnrolled,
    /// An enrollment response was refused
    EnrollmentRejected,
    /// A verification challenge was minted
    VerificationChallengeIssued,
    /// A verification round produced a report
    VerificationDecided,
    /// A consumed or unknown challenge was presented again
    ChallengeReplayDetected,
    /// An enrollment was refused because its TTL had passed
    EnrollmentExpired,
    /// Expired challenges or enrollments were reclaimed
    CleanupRun,
}

/// One entry of the verifier's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    /// Milliseconds since the Unix epoch
    pub timestamp_millis: u64,
    /// Device the event concerns, when known
    pub device_id: Option<[u8; 32]>,
    /// Human-readable context (already sanitised; never key material)
    pub detail: String,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, device_id: Option<[u8; 32]>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp_millis: witnessd_core::now_millis(),
            device_id,
            detail: detail.into(),
        }
    }
}

/// Bounded FIFO event window.
#[derive(Debug, Default)]
pub(crate) struct AuditLog {
    events: Vec<AuditEvent>,
}

impl AuditLog {
    pub(crate) fn record(&mut self, event: AuditEvent) {
        if self.events.len() >= MAX_AUDIT_EVENTS {
            self.events.remove(0);
        }
        self.events.push(event);
    }

    pub(crate) fn snapshot(&self) -> Vec<AuditEvent> {
        self.events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_fifo_bounded() {
        let mut log = AuditLog::default();
        for i in 0..(MAX_AUDIT_EVENTS + 10) {
            log.record(AuditEvent::new(
                AuditEventKind::VerificationDecided,
                None,
                format!("round {i}"),
            ));
        }
        let events = log.snapshot();
        assert_eq!(events.len(), MAX_AUDIT_EVENTS);
        assert_eq!(events[0].detail, "round 10");
    }

    #[test]
    fn events_carry_timestamps() {
        let event = AuditEvent::new(AuditEventKind::DeviceEnrolled, Some([1u8; 32]), "ok");
        assert!(event.timestamp_millis > 0);
        assert_eq!(event.device_id, Some([1u8; 32]));
    }
}
