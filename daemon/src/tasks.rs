use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error};

const TASK_SLEEP_CHUNK_MS: u64 = 100;
const BUSY_POLL_MS: u64 = 5;

/// Fixed-rate background task.
///
/// Deadlines are laid out on a grid from the start time. When an action
/// overruns, the deadlines it covered are dropped rather than run back to
/// back, and counted in `missed_ticks`.
pub struct RepeatingTask {
    name: String,
    stop: Arc<AtomicBool>,
    missed: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RepeatingTask {
    pub fn start<F>(name: &str, interval: Duration, mut action: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let interval = interval.max(Duration::from_millis(1));
        let stop = Arc::new(AtomicBool::new(false));
        let missed = Arc::new(AtomicU64::new(0));
        let flag = Arc::clone(&stop);
        let missed_count = Arc::clone(&missed);
        let task_name = name.to_string();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut deadline = Instant::now() + interval;
            loop {
                if sleep_until_with_cancellation(&flag, deadline) {
                    break;
                }
                action();
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                deadline += interval;
                let skipped = missed_deadlines(deadline, Instant::now(), interval);
                if skipped > 0 {
                    deadline += interval * skipped;
                    missed_count.fetch_add(u64::from(skipped), Ordering::Relaxed);
                    debug!("`{task_name}` overran, dropped {skipped} tick(s)");
                }
            }
        })?;

        Ok(Self {
            name: name.to_string(),
            stop,
            missed,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Relaxed)
            && self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn missed_ticks(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    /// Signals the thread and waits for the current action to return.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        join_task_handle(&mut self.handle, &self.name);
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Number of whole deadlines at or before `now`, starting with `deadline`.
fn missed_deadlines(deadline: Instant, now: Instant, interval: Duration) -> u32 {
    if deadline > now {
        return 0;
    }
    let behind = now.duration_since(deadline).as_nanos() / interval.as_nanos();
    u32::try_from(behind + 1).unwrap_or(u32::MAX)
}

/// Sleeps until `deadline` in short chunks. Returns true if cancelled.
fn sleep_until_with_cancellation(flag: &AtomicBool, deadline: Instant) -> bool {
    loop {
        if flag.load(Ordering::Relaxed) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(TASK_SLEEP_CHUNK_MS)));
    }
}

fn join_task_handle(handle: &mut Option<thread::JoinHandle<()>>, task_name: &str) {
    if let Some(handle) = handle.take() {
        if handle.thread().id() == thread::current().id() {
            debug!("`{task_name}` stopped from its own thread, not joining");
            return;
        }

        if handle.join().is_err() {
            error!("`{task_name}` thread panicked during shutdown");
        }
    }
}

/// Makes overlapping invocations skip instead of queueing.
#[derive(Debug, Default)]
pub struct BusyFlag(AtomicBool);

impl BusyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(&self.0))
    }

    /// Waits up to `timeout` for the current holder to finish.
    pub fn acquire_within(&self, timeout: Duration) -> Option<BusyGuard<'_>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire() {
                return Some(guard);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(BUSY_POLL_MS));
        }
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
