use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info};

use crate::api::{ApiError, CheatingLogPayload, PersistedLog};
use crate::session_log::{SessionError, SessionLog};

/// External store the finished log is committed to.
pub trait LogStore: Send + Sync {
    fn save_log(&self, payload: &CheatingLogPayload) -> Result<PersistedLog, ApiError>;
    fn fetch_logs(&self, exam_id: &str) -> Result<Vec<PersistedLog>, ApiError>;
}

#[derive(Debug)]
pub enum SubmitError {
    /// Identity incomplete; caught before any network call.
    MalformedIdentity { field: &'static str },
    /// Another submission is already running.
    InFlight,
    Api(ApiError),
    Session(SessionError),
}

impl SubmitError {
    /// Whether the host should offer the candidate a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Api(_))
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::MalformedIdentity { field } => write!(f, "{field} is required"),
            SubmitError::InFlight => write!(f, "a submission is already in progress"),
            SubmitError::Api(err) => write!(f, "failed to save test logs: {err}"),
            SubmitError::Session(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SubmitError {}

impl From<ApiError> for SubmitError {
    fn from(value: ApiError) -> Self {
        SubmitError::Api(value)
    }
}

impl From<SessionError> for SubmitError {
    fn from(value: SessionError) -> Self {
        SubmitError::Session(value)
    }
}

/// Rejects a log whose identity cannot be stored.
pub fn validate(log: &SessionLog) -> Result<(), SubmitError> {
    let identity = &log.identity;
    if identity.exam.id.trim().is_empty() {
        return Err(SubmitError::MalformedIdentity { field: "examId" });
    }
    if identity.username.trim().is_empty() {
        return Err(SubmitError::MalformedIdentity { field: "username" });
    }
    if identity.email.trim().is_empty() {
        return Err(SubmitError::MalformedIdentity { field: "email" });
    }
    Ok(())
}

/// Released when the submission finishes, whichever way it went.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Commits session logs, one network interaction at a time.
///
/// It does not retry. A retry after a failure that the server actually
/// stored is deduplicated server-side by the payload's attempt id.
pub struct PersistenceSubmitter {
    store: Box<dyn LogStore>,
    in_flight: AtomicBool,
}

impl PersistenceSubmitter {
    pub fn new(store: Box<dyn LogStore>) -> Self {
        Self {
            store,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &dyn LogStore {
        self.store.as_ref()
    }

    pub fn submit(&self, log: &SessionLog) -> Result<PersistedLog, SubmitError> {
        validate(log)?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SubmitError::InFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let payload = CheatingLogPayload::from_log(log);
        info!(
            "Submitting cheating log for exam {} ({} violations, {} screenshots)",
            payload.exam_id,
            payload.counts.total(),
            payload.screenshots.len()
        );

        match self.store.save_log(&payload) {
            Ok(persisted) => {
                info!("Cheating log saved as {}", persisted.id);
                Ok(persisted)
            }
            Err(err) => {
                error!("Error saving cheating log: {err}");
                Err(SubmitError::Api(err))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::counts::CountSnapshot;
    use crate::session_log::{ExamRef, Identity};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use uuid::Uuid;

    /// In-memory store. `gate` makes `save_log` block until released.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub calls: AtomicUsize,
        pub fail: AtomicBool,
        pub saved: Mutex<Vec<CheatingLogPayload>>,
        pub gate: Mutex<Option<Arc<Barrier>>>,
    }

    impl LogStore for Arc<MemoryStore> {
        fn save_log(&self, payload: &CheatingLogPayload) -> Result<PersistedLog, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().expect("gate").clone();
            if let Some(gate) = gate {
                gate.wait();
                gate.wait();
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::InvalidUrl("offline".into()));
            }
            let mut saved = self.saved.lock().expect("saved");
            saved.push(payload.clone());
            Ok(PersistedLog {
                id: saved.len().to_string(),
                exam_id: payload.exam_id.clone(),
                exam_uuid: payload.exam_uuid.clone(),
                attempt_id: Some(payload.attempt_id),
                username: payload.username.clone(),
                email: payload.email.clone(),
                counts: payload.counts,
                screenshots: payload.screenshots.clone(),
                created_at: None,
            })
        }

        fn fetch_logs(&self, _exam_id: &str) -> Result<Vec<PersistedLog>, ApiError> {
            Ok(Vec::new())
        }
    }

    fn log(exam_id: &str, username: &str, email: &str) -> SessionLog {
        SessionLog {
            identity: Identity::new(ExamRef::new(exam_id, None), username, email),
            attempt_id: Uuid::new_v4(),
            counts: CountSnapshot {
                no_face: 1,
                ..CountSnapshot::default()
            },
            evidence: vec![],
        }
    }

    #[test]
    fn missing_exam_id_is_rejected_locally() {
        let store = Arc::new(MemoryStore::default());
        let submitter = PersistenceSubmitter::new(Box::new(Arc::clone(&store)));

        let err = submitter.submit(&log("", "a", "a@b.com")).unwrap_err();

        assert!(matches!(err, SubmitError::MalformedIdentity { field: "examId" }));
        assert!(!err.is_retryable());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn blank_username_or_email_is_rejected_locally() {
        let store = Arc::new(MemoryStore::default());
        let submitter = PersistenceSubmitter::new(Box::new(Arc::clone(&store)));

        assert!(matches!(
            submitter.submit(&log("1", "  ", "a@b.com")),
            Err(SubmitError::MalformedIdentity { field: "username" })
        ));
        assert!(matches!(
            submitter.submit(&log("1", "a", "")),
            Err(SubmitError::MalformedIdentity { field: "email" })
        ));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn success_returns_persisted_log() {
        let store = Arc::new(MemoryStore::default());
        let submitter = PersistenceSubmitter::new(Box::new(Arc::clone(&store)));

        let persisted = submitter.submit(&log("9", "a", "a@b.com")).expect("submit");

        assert_eq!(persisted.exam_id, "9");
        assert_eq!(persisted.counts.no_face, 1);
        assert!(!submitter.is_in_flight());
    }

    #[test]
    fn failure_releases_guard_for_retry() {
        let store = Arc::new(MemoryStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let submitter = PersistenceSubmitter::new(Box::new(Arc::clone(&store)));
        let attempt = log("9", "a", "a@b.com");

        let err = submitter.submit(&attempt).unwrap_err();
        assert!(err.is_retryable());
        assert!(!submitter.is_in_flight());

        store.fail.store(false, Ordering::SeqCst);
        submitter.submit(&attempt).expect("retry");
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_submits_collapse_to_one_call() {
        let store = Arc::new(MemoryStore::default());
        let gate = Arc::new(Barrier::new(2));
        *store.gate.lock().expect("gate") = Some(Arc::clone(&gate));
        let submitter = Arc::new(PersistenceSubmitter::new(Box::new(Arc::clone(&store))));

        let background = {
            let submitter = Arc::clone(&submitter);
            thread::spawn(move || submitter.submit(&log("9", "a", "a@b.com")))
        };

        // First wait: the background submit is inside save_log.
        gate.wait();
        assert!(submitter.is_in_flight());
        let second = submitter.submit(&log("9", "a", "a@b.com"));
        assert!(matches!(second, Err(SubmitError::InFlight)));
        gate.wait();

        background.join().expect("join").expect("first submit");
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert!(!submitter.is_in_flight());
    }
}
