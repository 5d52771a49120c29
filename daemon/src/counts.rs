use serde::{Deserialize, Serialize};

use crate::violation::ViolationType;

/// Per-type violation counters. `total` is always derived, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSnapshot {
    #[serde(rename = "noFaceCount", default)]
    pub no_face: u32,
    #[serde(rename = "multipleFaceCount", default)]
    pub multiple_face: u32,
    #[serde(rename = "cellPhoneCount", default)]
    pub cell_phone: u32,
    #[serde(rename = "prohibitedObjectCount", default)]
    pub prohibited_object: u32,
}

impl CountSnapshot {
    pub fn get(&self, kind: ViolationType) -> u32 {
        match kind {
            ViolationType::NoFace => self.no_face,
            ViolationType::MultipleFace => self.multiple_face,
            ViolationType::CellPhone => self.cell_phone,
            ViolationType::ProhibitedObject => self.prohibited_object,
        }
    }

    pub fn total(&self) -> u32 {
        ViolationType::ALL.iter().map(|kind| self.get(*kind)).sum()
    }

    fn slot(&mut self, kind: ViolationType) -> &mut u32 {
        match kind {
            ViolationType::NoFace => &mut self.no_face,
            ViolationType::MultipleFace => &mut self.multiple_face,
            ViolationType::CellPhone => &mut self.cell_phone,
            ViolationType::ProhibitedObject => &mut self.prohibited_object,
        }
    }
}

/// Receives every snapshot the aggregator emits, synchronously.
pub trait CountObserver {
    fn observe(&mut self, snapshot: &CountSnapshot);
}

/// Sole writer of the violation counters.
#[derive(Debug, Default)]
pub struct CountAggregator {
    counts: CountSnapshot,
}

impl CountAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps `kind` by one and pushes the new snapshot to every observer
    /// before returning it.
    pub fn increment(
        &mut self,
        kind: ViolationType,
        observers: &mut [&mut dyn CountObserver],
    ) -> CountSnapshot {
        let slot = self.counts.slot(kind);
        *slot = slot.saturating_add(1);

        let snapshot = self.counts;
        for observer in observers.iter_mut() {
            observer.observe(&snapshot);
        }
        snapshot
    }

    /// Last emitted snapshot. Consumers decide on this, never on a local copy.
    pub fn snapshot(&self) -> CountSnapshot {
        self.counts
    }

    pub fn reset(&mut self) {
        self.counts = CountSnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Default)]
    struct Recorder(Vec<CountSnapshot>);

    impl CountObserver for Recorder {
        fn observe(&mut self, snapshot: &CountSnapshot) {
            self.0.push(*snapshot);
        }
    }

    #[test]
    fn increment_emits_to_all_observers() {
        let mut aggregator = CountAggregator::new();
        let mut first = Recorder::default();
        let mut second = Recorder::default();

        let snapshot = aggregator.increment(ViolationType::CellPhone, &mut [&mut first, &mut second]);

        assert_eq!(snapshot.cell_phone, 1);
        assert_eq!(snapshot.total(), 1);
        assert_eq!(first.0, vec![snapshot]);
        assert_eq!(second.0, vec![snapshot]);
        assert_eq!(aggregator.snapshot(), snapshot);
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut aggregator = CountAggregator::new();
        aggregator.increment(ViolationType::NoFace, &mut []);
        aggregator.increment(ViolationType::NoFace, &mut []);
        aggregator.reset();
        assert_eq!(aggregator.snapshot(), CountSnapshot::default());
    }

    #[test]
    fn snapshot_serializes_with_count_field_names() {
        let snapshot = CountSnapshot {
            no_face: 1,
            multiple_face: 2,
            cell_phone: 3,
            prohibited_object: 4,
        };
        let json = serde_json::to_value(snapshot).expect("serialize");
        assert_eq!(json["noFaceCount"], 1);
        assert_eq!(json["multipleFaceCount"], 2);
        assert_eq!(json["cellPhoneCount"], 3);
        assert_eq!(json["prohibitedObjectCount"], 4);
    }

    fn any_violation() -> impl Strategy<Value = ViolationType> {
        prop::sample::select(ViolationType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn total_is_sum_and_never_decreases(kinds in proptest::collection::vec(any_violation(), 0..100)) {
            let mut aggregator = CountAggregator::new();
            let mut previous = CountSnapshot::default();
            for kind in kinds {
                let next = aggregator.increment(kind, &mut []);
                let sum = next.no_face + next.multiple_face + next.cell_phone + next.prohibited_object;
                prop_assert_eq!(next.total(), sum);
                prop_assert_eq!(next.total(), previous.total() + 1);
                for kind in ViolationType::ALL {
                    prop_assert!(next.get(kind) >= previous.get(kind));
                }
                previous = next;
            }
        }
    }
}
