use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::violation::ViolationType;

/// Suppresses repeats of the same violation type inside a cooldown window.
///
/// `should_fire` takes `&mut self`, so the check and the timestamp update
/// happen under one exclusive borrow and two ticks can never both pass.
#[derive(Debug)]
pub struct DebounceController {
    window: Duration,
    last_fired: HashMap<ViolationType, Instant>,
}

impl DebounceController {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true and records `now` when `kind` is outside its cooldown.
    pub fn should_fire(&mut self, kind: ViolationType, now: Instant) -> bool {
        if let Some(last) = self.last_fired.get(&kind) {
            // A clock reading older than the last fire counts as zero elapsed.
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_fired.insert(kind, now);
        true
    }

    pub fn last_fired(&self, kind: ViolationType) -> Option<Instant> {
        self.last_fired.get(&kind).copied()
    }

    /// Forgets every cooldown. Only used for a full session reset.
    pub fn reset(&mut self) {
        self.last_fired.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WINDOW: Duration = Duration::from_millis(3000);

    #[test]
    fn first_signal_fires() {
        let mut debounce = DebounceController::new(WINDOW);
        assert!(debounce.should_fire(ViolationType::NoFace, Instant::now()));
    }

    #[test]
    fn repeat_inside_window_is_suppressed() {
        let mut debounce = DebounceController::new(WINDOW);
        let start = Instant::now();
        assert!(debounce.should_fire(ViolationType::NoFace, start));
        assert!(!debounce.should_fire(ViolationType::NoFace, start + Duration::from_millis(1000)));
        assert!(!debounce.should_fire(ViolationType::NoFace, start + Duration::from_millis(2999)));
        assert!(debounce.should_fire(ViolationType::NoFace, start + WINDOW));
    }

    #[test]
    fn suppressed_signal_does_not_extend_cooldown() {
        let mut debounce = DebounceController::new(WINDOW);
        let start = Instant::now();
        debounce.should_fire(ViolationType::CellPhone, start);
        debounce.should_fire(ViolationType::CellPhone, start + Duration::from_millis(2000));
        assert_eq!(debounce.last_fired(ViolationType::CellPhone), Some(start));
        assert!(debounce.should_fire(ViolationType::CellPhone, start + Duration::from_millis(3000)));
    }

    #[test]
    fn types_are_independent() {
        let mut debounce = DebounceController::new(WINDOW);
        let now = Instant::now();
        assert!(debounce.should_fire(ViolationType::CellPhone, now));
        assert!(debounce.should_fire(ViolationType::ProhibitedObject, now));
        assert!(!debounce.should_fire(ViolationType::CellPhone, now));
    }

    #[test]
    fn reset_clears_cooldowns() {
        let mut debounce = DebounceController::new(WINDOW);
        let now = Instant::now();
        debounce.should_fire(ViolationType::NoFace, now);
        debounce.reset();
        assert!(debounce.should_fire(ViolationType::NoFace, now));
    }

    proptest! {
        #[test]
        fn fires_are_at_least_one_window_apart(
            gaps in proptest::collection::vec(0u64..5_000, 1..200),
        ) {
            let mut debounce = DebounceController::new(WINDOW);
            let start = Instant::now();
            let mut offset = 0u64;
            let mut fired: Vec<u64> = Vec::new();
            for gap in gaps {
                offset += gap;
                if debounce.should_fire(ViolationType::MultipleFace, start + Duration::from_millis(offset)) {
                    fired.push(offset);
                }
            }
            for pair in fired.windows(2) {
                prop_assert!(pair[1] - pair[0] >= 3_000);
            }
        }
    }
}
