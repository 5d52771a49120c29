use crate::counts::{CountObserver, CountSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationState {
    Active,
    Terminated,
}

/// Emitted exactly once, by the snapshot that first reaches the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub total: u32,
    pub threshold: u32,
}

/// Watches the running total and latches into `Terminated` at the threshold.
#[derive(Debug)]
pub struct TerminationMonitor {
    threshold: u32,
    state: TerminationState,
    pending: Option<Termination>,
}

impl TerminationMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            state: TerminationState::Active,
            pending: None,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self) -> TerminationState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == TerminationState::Terminated
    }

    /// Hands out the transition once; later calls return `None`.
    pub fn take_transition(&mut self) -> Option<Termination> {
        self.pending.take()
    }

    /// Back to `Active`. Only a full session reset calls this.
    pub fn reset(&mut self) {
        self.state = TerminationState::Active;
        self.pending = None;
    }
}

impl CountObserver for TerminationMonitor {
    fn observe(&mut self, snapshot: &CountSnapshot) {
        if self.state == TerminationState::Terminated {
            return;
        }
        let total = snapshot.total();
        if total >= self.threshold {
            log::warn!("violation total {total} reached threshold {}", self.threshold);
            self.state = TerminationState::Terminated;
            self.pending = Some(Termination {
                total,
                threshold: self.threshold,
            });
        }
    }
}
