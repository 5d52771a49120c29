use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::counts::{CountObserver, CountSnapshot};
use crate::evidence::EvidenceRecord;

/// Exam being taken. `id` is the durable store identifier; `code` is the
/// human-facing exam code, kept so the store can match older logs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExamRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ExamRef {
    pub fn new(id: impl Into<String>, code: Option<String>) -> Self {
        Self {
            id: id.into(),
            code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identity {
    pub exam: ExamRef,
    pub username: String,
    pub email: String,
}

impl Identity {
    pub fn new(exam: ExamRef, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            exam,
            username: username.into(),
            email: email.into(),
        }
    }
}

/// Aggregated violation record for one exam phase.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLog {
    pub identity: Identity,
    pub attempt_id: Uuid,
    pub counts: CountSnapshot,
    pub evidence: Vec<EvidenceRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Monitoring,
    Terminated,
    Submitted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Monitoring)
    }

    /// Only `Monitoring -> Terminated` and `Monitoring -> Submitted` exist.
    pub fn transition(self, next: SessionStatus) -> Result<SessionStatus, SessionError> {
        match (self, next) {
            (SessionStatus::Monitoring, SessionStatus::Terminated)
            | (SessionStatus::Monitoring, SessionStatus::Submitted) => Ok(next),
            (from, to) => Err(SessionError::IllegalTransition { from, to }),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Monitoring => write!(f, "monitoring"),
            SessionStatus::Terminated => write!(f, "terminated"),
            SessionStatus::Submitted => write!(f, "submitted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    IllegalTransition { from: SessionStatus, to: SessionStatus },
    ResetAfterSubmit,
    SessionEnded,
    AlreadyPersisted,
    /// The log is being committed; it is frozen until the commit ends.
    PersistInFlight,
    StalePhase { expected: u64, current: u64 },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::IllegalTransition { from, to } => {
                write!(f, "cannot move session from {from} to {to}")
            }
            SessionError::ResetAfterSubmit => {
                write!(f, "session log was already submitted for this phase")
            }
            SessionError::SessionEnded => write!(f, "session has been terminated"),
            SessionError::AlreadyPersisted => write!(f, "session log was already persisted"),
            SessionError::PersistInFlight => write!(f, "session log is being saved"),
            SessionError::StalePhase { expected, current } => {
                write!(f, "phase {expected} was superseded by phase {current}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Holds the log of the active phase and the phase's status.
#[derive(Debug)]
pub struct SessionLogAggregator {
    log: SessionLog,
    status: SessionStatus,
    persisted: bool,
    phase: u64,
}

impl SessionLogAggregator {
    pub fn new(identity: Identity) -> Self {
        Self {
            log: Self::fresh_log(identity),
            status: SessionStatus::Monitoring,
            persisted: false,
            phase: 0,
        }
    }

    fn fresh_log(identity: Identity) -> SessionLog {
        SessionLog {
            identity,
            attempt_id: Uuid::new_v4(),
            counts: CountSnapshot::default(),
            evidence: Vec::new(),
        }
    }

    /// Starts a new phase with a zeroed log and a new attempt id.
    pub fn reset(&mut self, exam: ExamRef, username: &str, email: &str) -> Result<u64, SessionError> {
        match self.status {
            SessionStatus::Submitted => return Err(SessionError::ResetAfterSubmit),
            SessionStatus::Terminated => return Err(SessionError::SessionEnded),
            SessionStatus::Monitoring => {}
        }

        self.log = Self::fresh_log(Identity::new(exam, username, email));
        self.status = SessionStatus::Monitoring;
        self.persisted = false;
        self.phase += 1;
        log::info!(
            "session log reset for exam {} (phase {})",
            self.log.identity.exam.id,
            self.phase
        );
        Ok(self.phase)
    }

    /// Begins a new session whatever the current status. The phase counter
    /// keeps advancing so uploads from the old session stay stale.
    pub fn start_over(&mut self, identity: Identity) -> u64 {
        self.log = Self::fresh_log(identity);
        self.status = SessionStatus::Monitoring;
        self.persisted = false;
        self.phase += 1;
        self.phase
    }

    /// Appends one evidence record produced during `phase`.
    pub fn attach_evidence(&mut self, record: EvidenceRecord, phase: u64) -> Result<(), SessionError> {
        if phase != self.phase {
            return Err(SessionError::StalePhase {
                expected: phase,
                current: self.phase,
            });
        }
        if self.persisted {
            return Err(SessionError::AlreadyPersisted);
        }
        self.log.evidence.push(record);
        Ok(())
    }

    pub fn snapshot(&self) -> SessionLog {
        self.log.clone()
    }

    pub fn counts(&self) -> CountSnapshot {
        self.log.counts
    }

    pub fn evidence_len(&self) -> usize {
        self.log.evidence.len()
    }

    pub fn identity(&self) -> &Identity {
        &self.log.identity
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn phase(&self) -> u64 {
        self.phase
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn mark_terminated(&mut self) -> Result<(), SessionError> {
        self.status = self.status.transition(SessionStatus::Terminated)?;
        Ok(())
    }

    /// Records a successful commit to the log store. A monitoring phase
    /// becomes `Submitted`; a terminated one keeps its status.
    pub fn mark_persisted(&mut self, phase: u64) -> Result<SessionStatus, SessionError> {
        if phase != self.phase {
            return Err(SessionError::StalePhase {
                expected: phase,
                current: self.phase,
            });
        }
        if self.persisted {
            return Err(SessionError::AlreadyPersisted);
        }
        if self.status == SessionStatus::Monitoring {
            self.status = self.status.transition(SessionStatus::Submitted)?;
        }
        self.persisted = true;
        Ok(self.status)
    }
}

impl CountObserver for SessionLogAggregator {
    fn observe(&mut self, snapshot: &CountSnapshot) {
        if self.persisted {
            log::debug!("ignoring counts for an already persisted log");
            return;
        }
        self.log.counts = *snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::violation::ViolationType;
    use chrono::Utc;

    fn aggregator() -> SessionLogAggregator {
        SessionLogAggregator::new(Identity::new(
            ExamRef::new("42", Some("exam-uuid".into())),
            "alice",
            "alice@example.com",
        ))
    }

    fn record(kind: ViolationType) -> EvidenceRecord {
        EvidenceRecord {
            url: "https://cdn.example.com/a/".into(),
            kind,
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn observe_merges_counts_without_touching_evidence() {
        let mut log = aggregator();
        log.attach_evidence(record(ViolationType::NoFace), 0).expect("attach");
        log.observe(&CountSnapshot {
            cell_phone: 2,
            ..CountSnapshot::default()
        });
        assert_eq!(log.counts().cell_phone, 2);
        assert_eq!(log.evidence_len(), 1);
    }

    #[test]
    fn reset_zeroes_counts_and_evidence() {
        let mut log = aggregator();
        let attempt = log.snapshot().attempt_id;
        log.observe(&CountSnapshot {
            no_face: 3,
            ..CountSnapshot::default()
        });
        log.attach_evidence(record(ViolationType::NoFace), 0).expect("attach");

        let phase = log.reset(ExamRef::new("42", None), "alice", "alice@example.com").expect("reset");

        assert_eq!(phase, 1);
        assert_eq!(log.counts(), CountSnapshot::default());
        assert_eq!(log.evidence_len(), 0);
        assert_ne!(log.snapshot().attempt_id, attempt);
    }

    #[test]
    fn evidence_from_old_phase_is_rejected() {
        let mut log = aggregator();
        log.reset(ExamRef::new("42", None), "alice", "alice@example.com").expect("reset");
        let err = log.attach_evidence(record(ViolationType::CellPhone), 0).unwrap_err();
        assert_eq!(err, SessionError::StalePhase { expected: 0, current: 1 });
        assert_eq!(log.evidence_len(), 0);
    }

    #[test]
    fn reset_refused_after_submit() {
        let mut log = aggregator();
        assert_eq!(log.mark_persisted(0), Ok(SessionStatus::Submitted));
        let err = log.reset(ExamRef::new("42", None), "alice", "alice@example.com").unwrap_err();
        assert_eq!(err, SessionError::ResetAfterSubmit);
    }

    #[test]
    fn reset_refused_after_termination() {
        let mut log = aggregator();
        log.mark_terminated().expect("terminate");
        let err = log.reset(ExamRef::new("42", None), "alice", "alice@example.com").unwrap_err();
        assert_eq!(err, SessionError::SessionEnded);
    }

    #[test]
    fn terminated_log_persists_without_becoming_submitted() {
        let mut log = aggregator();
        log.mark_terminated().expect("terminate");
        assert_eq!(log.mark_persisted(0), Ok(SessionStatus::Terminated));
        assert_eq!(log.mark_persisted(0), Err(SessionError::AlreadyPersisted));
    }

    #[test]
    fn status_transitions_are_one_way() {
        assert!(SessionStatus::Monitoring.transition(SessionStatus::Terminated).is_ok());
        assert!(SessionStatus::Monitoring.transition(SessionStatus::Submitted).is_ok());
        assert!(SessionStatus::Terminated.transition(SessionStatus::Submitted).is_err());
        assert!(SessionStatus::Submitted.transition(SessionStatus::Terminated).is_err());
        assert!(SessionStatus::Terminated.transition(SessionStatus::Terminated).is_err());
        assert!(SessionStatus::Monitoring.transition(SessionStatus::Monitoring).is_err());
    }

    #[test]
    fn start_over_clears_terminal_status() {
        let mut log = aggregator();
        log.mark_terminated().expect("terminate");
        let phase = log.start_over(Identity::new(ExamRef::new("43", None), "bob", "bob@example.com"));
        assert_eq!(phase, 1);
        assert_eq!(log.status(), SessionStatus::Monitoring);
        assert!(!log.is_persisted());
        assert_eq!(log.identity().exam.id, "43");
    }

    #[test]
    fn persisted_log_ignores_further_counts() {
        let mut log = aggregator();
        log.mark_persisted(0).expect("persist");
        log.observe(&CountSnapshot {
            no_face: 9,
            ..CountSnapshot::default()
        });
        assert_eq!(log.counts().total(), 0);
    }
}
