//! Evidence capture: snapshot the offending frame on the tick, upload it on
//! a worker pool, and hand successful uploads back as [`EvidenceRecord`]s.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use png::{BitDepth, ColorType, Encoder, EncodingError};
use serde::{Deserialize, Serialize};

use crate::upload::BlobStore;
use crate::violation::ViolationType;

const PNG_MIME: &str = "image/png";

/// Raw RGBA frame from the video source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// A frame with no pixels or a short buffer is treated as "not ready".
    pub fn is_readable(&self) -> bool {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|pixels| pixels.checked_mul(4));
        self.width > 0 && self.height > 0 && expected == Some(self.rgba.len())
    }
}

/// Video source. `None` means no frame is available yet.
pub trait Camera: Send + Sync {
    fn grab(&self) -> Option<Frame>;
}

/// Stored reference to the frame captured for one violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ViolationType,
    #[serde(rename = "detectedAt")]
    pub detected_at: DateTime<Utc>,
}

/// A finished upload, tagged with the phase that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadCompletion {
    pub phase: u64,
    pub record: EvidenceRecord,
}

#[derive(Debug)]
pub enum CaptureError {
    UnreadableFrame,
    ImageEncoding(String),
    QueueClosed,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::UnreadableFrame => write!(f, "frame is not readable"),
            CaptureError::ImageEncoding(err) => write!(f, "failed to encode image: {err}"),
            CaptureError::QueueClosed => write!(f, "upload queue is closed"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<EncodingError> for CaptureError {
    fn from(value: EncodingError) -> Self {
        CaptureError::ImageEncoding(value.to_string())
    }
}

pub fn encode_png(frame: &Frame) -> Result<Vec<u8>, CaptureError> {
    if !frame.is_readable() {
        return Err(CaptureError::UnreadableFrame);
    }
    let mut buffer = Vec::new();
    {
        let mut encoder = Encoder::new(&mut buffer, frame.width, frame.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&frame.rgba)?;
    }
    Ok(buffer)
}

struct UploadJob {
    phase: u64,
    kind: ViolationType,
    detected_at: DateTime<Utc>,
    png: Vec<u8>,
}

/// Queues evidence uploads on a fixed pool of worker threads.
///
/// The sampling loop only pays for the PNG encode; uploads complete in any
/// order and are observed through [`EvidenceCapturer::drain`].
pub struct EvidenceCapturer {
    jobs: Option<Sender<UploadJob>>,
    completions: Receiver<UploadCompletion>,
    pending: Arc<AtomicUsize>,
}

impl EvidenceCapturer {
    pub fn start(store: Arc<dyn BlobStore>, workers: usize) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<UploadJob>();
        let (done_tx, done_rx) = mpsc::channel();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let pending = Arc::new(AtomicUsize::new(0));

        for index in 0..workers.max(1) {
            let job_rx = Arc::clone(&job_rx);
            let done_tx = done_tx.clone();
            let store = Arc::clone(&store);
            let pending = Arc::clone(&pending);
            let spawned = thread::Builder::new()
                .name(format!("evidence-upload-{index}"))
                .spawn(move || Self::run_worker(job_rx, done_tx, store, pending));
            if let Err(err) = spawned {
                error!("Failed to spawn evidence upload worker {index}: {err}");
            }
        }

        Self {
            jobs: Some(job_tx),
            completions: done_rx,
            pending,
        }
    }

    fn run_worker(
        jobs: Arc<Mutex<Receiver<UploadJob>>>,
        done: Sender<UploadCompletion>,
        store: Arc<dyn BlobStore>,
        pending: Arc<AtomicUsize>,
    ) {
        loop {
            let next = jobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
            let Ok(job) = next else {
                break;
            };

            let file_name = format!("violation_{}_{}.png", job.kind, job.detected_at.timestamp_millis());
            match store.upload(job.png, &file_name, PNG_MIME) {
                Ok(url) => {
                    info!("Uploaded {} evidence to {}", job.kind, url);
                    let completion = UploadCompletion {
                        phase: job.phase,
                        record: EvidenceRecord {
                            url,
                            kind: job.kind,
                            detected_at: job.detected_at,
                        },
                    };
                    if done.send(completion).is_err() {
                        debug!("evidence capturer dropped before upload finished");
                    }
                }
                Err(err) => {
                    warn!("Evidence upload for {} failed: {}", job.kind, err);
                }
            }
            pending.fetch_sub(1, Ordering::SeqCst);
        }
        debug!("evidence upload worker exiting");
    }

    /// Encodes `frame` now and queues its upload. Never waits on the network.
    pub fn capture(
        &self,
        frame: &Frame,
        kind: ViolationType,
        detected_at: DateTime<Utc>,
        phase: u64,
    ) -> Result<(), CaptureError> {
        let jobs = self.jobs.as_ref().ok_or(CaptureError::QueueClosed)?;
        let png = encode_png(frame)?;

        self.pending.fetch_add(1, Ordering::SeqCst);
        let job = UploadJob {
            phase,
            kind,
            detected_at,
            png,
        };
        if jobs.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(CaptureError::QueueClosed);
        }
        Ok(())
    }

    /// Completed uploads so far, in completion order.
    pub fn drain(&self) -> Vec<UploadCompletion> {
        self.completions.try_iter().collect()
    }

    /// Uploads queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for in-flight uploads, returning everything
    /// that completed meanwhile.
    pub fn settle(&self, timeout: Duration) -> Vec<UploadCompletion> {
        let deadline = Instant::now() + timeout;
        let mut completed = self.drain();

        while self.pending() > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "{} evidence uploads still pending after {:?}",
                    self.pending(),
                    timeout
                );
                break;
            }
            let wait = (deadline - now).min(Duration::from_millis(50));
            match self.completions.recv_timeout(wait) {
                Ok(completion) => completed.push(completion),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        completed.extend(self.drain());
        completed
    }

    /// Stops accepting jobs. Workers finish what is queued and exit on their
    /// own so shutdown never blocks on a slow upload.
    pub fn shutdown(&mut self) {
        self.jobs.take();
    }
}

impl Drop for EvidenceCapturer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
