//! The sampling loop and the state every tick touches.
//!
//! [`ProctorSession`] is the single owner of the debounce clocks, the
//! counters, the termination latch and the session log. [`Monitor`] drives it
//! from a fixed-rate timer, feeds it frames from the camera and the detector,
//! queues evidence uploads and talks to the host UI.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::api::{ApiError, PersistedLog};
use crate::config::MonitoringSettings;
use crate::counts::{CountAggregator, CountObserver, CountSnapshot};
use crate::debounce::DebounceController;
use crate::detector::Detector;
use crate::evidence::{Camera, EvidenceCapturer, Frame, UploadCompletion};
use crate::session_log::{ExamRef, Identity, SessionError, SessionLog, SessionLogAggregator, SessionStatus};
use crate::submitter::{LogStore, PersistenceSubmitter, SubmitError};
use crate::tasks::{BusyFlag, RepeatingTask};
use crate::termination::{Termination, TerminationMonitor};
use crate::upload::BlobStore;
use crate::violation::{DetectionFrame, ViolationType, classify};

/// Message shown to the candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A violation was counted. `count` is the per-type count.
    Warning {
        kind: ViolationType,
        count: u32,
        total: u32,
        threshold: u32,
    },
    Terminated {
        total: u32,
        threshold: u32,
    },
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Notice::Warning { kind, .. } => kind.headline(),
            Notice::Terminated { .. } => "Exam Terminated",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notice::Warning {
                count,
                total,
                threshold,
                ..
            } => format!("Violation #{count} (Total: {total}/{threshold})"),
            Notice::Terminated { total, .. } => format!("You have reached {total} violations"),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title(), self.message())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Success,
}

/// The exam page hosting the monitor.
pub trait HostUi: Send + Sync {
    fn show_notice(&self, notice: Notice);
    fn navigate(&self, route: Route);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredViolation {
    pub kind: ViolationType,
    pub counts: CountSnapshot,
}

/// What one frame did to the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub fired: Vec<FiredViolation>,
    /// Set on the tick whose last fired violation crossed the threshold.
    pub termination: Option<Termination>,
}

/// Classifier, debounce, counters, termination latch and session log.
#[derive(Debug)]
pub struct ProctorSession {
    debounce: DebounceController,
    counts: CountAggregator,
    termination: TerminationMonitor,
    log: SessionLogAggregator,
    persisting: bool,
}

impl ProctorSession {
    pub fn new(identity: Identity, debounce_window: Duration, threshold: u32) -> Self {
        Self {
            debounce: DebounceController::new(debounce_window),
            counts: CountAggregator::new(),
            termination: TerminationMonitor::new(threshold),
            log: SessionLogAggregator::new(identity),
            persisting: false,
        }
    }

    /// Runs one frame through classify, debounce and increment.
    ///
    /// Once the threshold is crossed the remaining signals of the frame are
    /// dropped, so the total never passes the threshold.
    pub fn record(&mut self, frame: &DetectionFrame) -> Result<TickReport, SessionError> {
        if self.log.status().is_terminal() {
            return Err(SessionError::SessionEnded);
        }
        if self.persisting {
            return Err(SessionError::PersistInFlight);
        }

        let mut report = TickReport::default();
        for kind in classify(frame) {
            if self.termination.is_terminated() {
                debug!("session terminated, dropping {kind}");
                break;
            }
            if !self.debounce.should_fire(kind, frame.captured_at) {
                debug!("{kind} suppressed by debounce");
                continue;
            }

            let mut observers: [&mut dyn CountObserver; 2] = [&mut self.log, &mut self.termination];
            let counts = self.counts.increment(kind, &mut observers);
            info!(
                "Violation {kind} recorded ({} of this type, total {})",
                counts.get(kind),
                counts.total()
            );
            report.fired.push(FiredViolation { kind, counts });

            if let Some(termination) = self.termination.take_transition() {
                self.log.mark_terminated()?;
                report.termination = Some(termination);
            }
        }
        Ok(report)
    }

    /// Attaches finished uploads. Uploads from a superseded phase are dropped.
    pub fn attach_completions(&mut self, completions: Vec<UploadCompletion>) -> usize {
        let mut attached = 0;
        for UploadCompletion { phase, record } in completions {
            match self.log.attach_evidence(record, phase) {
                Ok(()) => attached += 1,
                Err(err) => debug!("dropping evidence upload: {err}"),
            }
        }
        attached
    }

    /// Phase-scoped reset: fresh log and counters, debounce clocks kept.
    pub fn begin_phase(&mut self, identity: Identity) -> Result<u64, SessionError> {
        if self.termination.is_terminated() {
            return Err(SessionError::SessionEnded);
        }
        if self.persisting {
            return Err(SessionError::PersistInFlight);
        }
        let Identity { exam, username, email } = identity;
        let phase = self.log.reset(exam, &username, &email)?;
        self.counts.reset();
        Ok(phase)
    }

    /// Full session reset, debounce clocks and termination latch included.
    pub fn restart(&mut self, identity: Identity) -> u64 {
        self.debounce.reset();
        self.counts.reset();
        self.termination.reset();
        self.persisting = false;
        self.log.start_over(identity)
    }

    /// Freezes the log for a commit and returns its phase. Frames are
    /// refused until [`finish_persist`](Self::finish_persist) or
    /// [`abandon_persist`](Self::abandon_persist).
    pub fn begin_persist(&mut self) -> Result<u64, SessionError> {
        if self.log.is_persisted() {
            return Err(SessionError::AlreadyPersisted);
        }
        if self.persisting {
            return Err(SessionError::PersistInFlight);
        }
        self.persisting = true;
        Ok(self.log.phase())
    }

    pub fn finish_persist(&mut self, phase: u64) -> Result<SessionStatus, SessionError> {
        self.persisting = false;
        self.log.mark_persisted(phase)
    }

    /// Unfreezes the log after a failed commit so monitoring can resume.
    pub fn abandon_persist(&mut self) {
        self.persisting = false;
    }

    pub fn is_persisting(&self) -> bool {
        self.persisting
    }

    pub fn counts(&self) -> CountSnapshot {
        self.counts.snapshot()
    }

    pub fn snapshot(&self) -> SessionLog {
        self.log.snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        self.log.status()
    }

    pub fn phase(&self) -> u64 {
        self.log.phase()
    }

    pub fn is_persisted(&self) -> bool {
        self.log.is_persisted()
    }

    pub fn threshold(&self) -> u32 {
        self.termination.threshold()
    }
}

/// External collaborators a [`Monitor`] runs against.
pub struct Collaborators {
    pub camera: Arc<dyn Camera>,
    pub detector: Arc<dyn Detector>,
    pub blob_store: Arc<dyn BlobStore>,
    pub log_store: Box<dyn LogStore>,
    pub host: Arc<dyn HostUi>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The previous tick was still running.
    Busy,
    /// No readable frame; treated as no signal.
    NotReady,
    InferenceFailed,
    /// The session is terminated or submitted.
    Ended,
    /// The log is being committed; the frame was not recorded.
    Persisting,
    Processed { fired: usize },
    Terminated(Termination),
}

#[derive(Debug)]
pub enum MonitorError {
    Session(SessionError),
    Spawn(io::Error),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Session(err) => write!(f, "{err}"),
            MonitorError::Spawn(err) => write!(f, "failed to start sampling timer: {err}"),
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<SessionError> for MonitorError {
    fn from(value: SessionError) -> Self {
        MonitorError::Session(value)
    }
}

impl From<io::Error> for MonitorError {
    fn from(value: io::Error) -> Self {
        MonitorError::Spawn(value)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Monitor {
    settings: MonitoringSettings,
    camera: Arc<dyn Camera>,
    detector: Arc<dyn Detector>,
    host: Arc<dyn HostUi>,
    submitter: PersistenceSubmitter,
    capturer: Mutex<EvidenceCapturer>,
    session: Mutex<ProctorSession>,
    busy: BusyFlag,
    persisting: Mutex<()>,
    timer: Mutex<Option<RepeatingTask>>,
    auto_persist: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(identity: Identity, settings: MonitoringSettings, collaborators: Collaborators) -> Arc<Self> {
        let Collaborators {
            camera,
            detector,
            blob_store,
            log_store,
            host,
        } = collaborators;
        let session = ProctorSession::new(
            identity,
            settings.debounce_window(),
            settings.termination_threshold,
        );
        let capturer = EvidenceCapturer::start(blob_store, settings.upload_workers);

        Arc::new(Self {
            settings,
            camera,
            detector,
            host,
            submitter: PersistenceSubmitter::new(log_store),
            capturer: Mutex::new(capturer),
            session: Mutex::new(session),
            busy: BusyFlag::new(),
            persisting: Mutex::new(()),
            timer: Mutex::new(None),
            auto_persist: Mutex::new(None),
        })
    }

    /// Full reset for a new exam session. Stops the timer first.
    pub fn start_session(&self, identity: Identity) -> u64 {
        self.stop_timer();
        let phase = lock(&self.session).restart(identity);
        info!("Monitoring session started (phase {phase})");
        phase
    }

    /// Moves to the next exam phase (MCQ to coding). Stops the timer; the
    /// host restarts it for the new phase.
    pub fn begin_phase(&self, exam: ExamRef, username: &str, email: &str) -> Result<u64, SessionError> {
        self.stop_timer();
        lock(&self.session).begin_phase(Identity::new(exam, username, email))
    }

    pub fn start_timer(self: &Arc<Self>) -> Result<(), MonitorError> {
        if lock(&self.session).status().is_terminal() {
            return Err(MonitorError::Session(SessionError::SessionEnded));
        }

        let mut timer = lock(&self.timer);
        if timer.as_ref().is_some_and(RepeatingTask::is_running) {
            return Ok(());
        }
        let monitor = Arc::downgrade(self);
        let task = RepeatingTask::start("proctor-sampler", self.settings.tick_interval(), move || {
            if let Some(monitor) = monitor.upgrade() {
                monitor.tick();
            }
        })?;
        *timer = Some(task);
        info!("Sampling every {:?}", self.settings.tick_interval());
        Ok(())
    }

    pub fn stop_timer(&self) {
        let task = lock(&self.timer).take();
        if let Some(mut task) = task {
            task.stop();
            if task.missed_ticks() > 0 {
                info!("Sampling stopped, {} ticks dropped on overrun", task.missed_ticks());
            }
        }
    }

    pub fn is_sampling(&self) -> bool {
        lock(&self.timer).as_ref().is_some_and(RepeatingTask::is_running)
    }

    pub fn tick(self: &Arc<Self>) -> TickOutcome {
        self.tick_at(Instant::now(), Utc::now())
    }

    /// One sampling tick with explicit clocks: `now` drives debouncing,
    /// `detected_at` is stamped on evidence.
    pub fn tick_at(self: &Arc<Self>, now: Instant, detected_at: DateTime<Utc>) -> TickOutcome {
        let Some(_busy) = self.busy.try_acquire() else {
            debug!("previous tick still running, skipping");
            return TickOutcome::Busy;
        };
        {
            let session = lock(&self.session);
            if session.status().is_terminal() {
                return TickOutcome::Ended;
            }
            if session.is_persisting() {
                return TickOutcome::Persisting;
            }
        }

        let frame = match self.camera.grab() {
            Some(frame) if frame.is_readable() => frame,
            _ => {
                debug!("video source not ready, skipping tick");
                return TickOutcome::NotReady;
            }
        };
        let detections = match self.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                warn!("Inference failed, skipping tick: {err:#}");
                return TickOutcome::InferenceFailed;
            }
        };
        let labeled = DetectionFrame::new(now, detected_at, &detections);

        let (report, phase) = {
            let mut session = lock(&self.session);
            match session.record(&labeled) {
                Ok(report) => (report, session.phase()),
                Err(SessionError::PersistInFlight) => return TickOutcome::Persisting,
                Err(err) => {
                    debug!("tick ignored: {err}");
                    return TickOutcome::Ended;
                }
            }
        };

        self.capture_evidence(&frame, &report, detected_at, phase);
        self.notify(&report);

        match report.termination {
            Some(termination) => {
                self.on_terminated(termination);
                TickOutcome::Terminated(termination)
            }
            None => TickOutcome::Processed {
                fired: report.fired.len(),
            },
        }
    }

    fn capture_evidence(&self, frame: &Frame, report: &TickReport, detected_at: DateTime<Utc>, phase: u64) {
        let completions = {
            let capturer = lock(&self.capturer);
            for fired in &report.fired {
                if let Err(err) = capturer.capture(frame, fired.kind, detected_at, phase) {
                    warn!("Evidence capture for {} failed: {err}", fired.kind);
                }
            }
            capturer.drain()
        };
        if !completions.is_empty() {
            lock(&self.session).attach_completions(completions);
        }
    }

    fn notify(&self, report: &TickReport) {
        // The violation that crossed the threshold gets the termination notice.
        let crossing = report.termination.map(|_| report.fired.len().saturating_sub(1));
        for (index, fired) in report.fired.iter().enumerate() {
            if Some(index) == crossing {
                continue;
            }
            self.host.show_notice(Notice::Warning {
                kind: fired.kind,
                count: fired.counts.get(fired.kind),
                total: fired.counts.total(),
                threshold: self.settings.termination_threshold,
            });
        }
    }

    fn on_terminated(self: &Arc<Self>, termination: Termination) {
        warn!(
            "Exam terminated after {} violations (threshold {})",
            termination.total, termination.threshold
        );
        self.stop_timer();
        self.host.show_notice(Notice::Terminated {
            total: termination.total,
            threshold: termination.threshold,
        });
        self.host.navigate(Route::Home);

        let monitor = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("proctor-auto-persist".into())
            .spawn(move || match monitor.persist() {
                Ok(persisted) => info!("Terminated session log saved as {}", persisted.id),
                Err(err) => error!("Failed to save terminated session log: {err}"),
            });
        match spawned {
            Ok(handle) => *lock(&self.auto_persist) = Some(handle),
            Err(err) => error!("Failed to start auto-persist for terminated session: {err}"),
        }
    }

    /// Waits for the background save of a terminated session, if one ran.
    pub fn join_auto_persist(&self) -> bool {
        let handle = lock(&self.auto_persist).take();
        match handle {
            Some(handle) => {
                if handle.join().is_err() {
                    error!("auto-persist thread panicked");
                }
                true
            }
            None => false,
        }
    }

    /// Candidate-initiated submission. Ends sampling, commits the log and
    /// navigates to the success page.
    pub fn submit(&self) -> Result<PersistedLog, SubmitError> {
        self.stop_timer();
        let persisted = self.persist()?;
        if self.status() == SessionStatus::Submitted {
            self.host.navigate(Route::Success);
        }
        Ok(persisted)
    }

    fn persist(&self) -> Result<PersistedLog, SubmitError> {
        let _persisting = match self.persisting.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(SubmitError::InFlight),
        };

        let phase = lock(&self.session).begin_persist()?;
        let committed = self.commit(phase);
        if committed.is_err() {
            lock(&self.session).abandon_persist();
        }
        committed
    }

    /// Commits the frozen log of `phase`.
    fn commit(&self, phase: u64) -> Result<PersistedLog, SubmitError> {
        let log = {
            // A tick that recorded before the freeze may still be queueing uploads.
            let wait = self.settings.upload_settle();
            let idle = self.busy.acquire_within(wait);
            if idle.is_none() {
                warn!("tick still running after {wait:?}, saving without waiting");
            }
            let completions = lock(&self.capturer).settle(wait);
            let mut session = lock(&self.session);
            session.attach_completions(completions);
            session.snapshot()
        };

        let persisted = self.submitter.submit(&log)?;
        let status = lock(&self.session).finish_persist(phase)?;
        debug!("session log for phase {phase} persisted, status {status}");
        Ok(persisted)
    }

    pub fn fetch_logs(&self, exam_id: &str) -> Result<Vec<PersistedLog>, ApiError> {
        self.submitter.store().fetch_logs(exam_id)
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.session).status()
    }

    pub fn counts(&self) -> CountSnapshot {
        lock(&self.session).counts()
    }

    pub fn snapshot(&self) -> SessionLog {
        lock(&self.session).snapshot()
    }

    pub fn phase(&self) -> u64 {
        lock(&self.session).phase()
    }

    pub fn pending_uploads(&self) -> usize {
        lock(&self.capturer).pending()
    }
}
