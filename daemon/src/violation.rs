use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const PERSON: &str = "person";
const CELL_PHONE: &str = "cell phone";
const PROHIBITED_OBJECTS: [&str; 2] = ["book", "laptop"];

/// Rule violations the monitor counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ViolationType {
    #[serde(rename = "noFace")]
    NoFace,
    #[serde(rename = "multipleFace")]
    MultipleFace,
    #[serde(rename = "cellPhone")]
    CellPhone,
    #[serde(rename = "prohibitedObject")]
    ProhibitedObject,
}

impl ViolationType {
    pub const ALL: [ViolationType; 4] = [
        ViolationType::NoFace,
        ViolationType::MultipleFace,
        ViolationType::CellPhone,
        ViolationType::ProhibitedObject,
    ];

    /// Wire name, also the prefix of the `<name>Count` payload field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::NoFace => "noFace",
            ViolationType::MultipleFace => "multipleFace",
            ViolationType::CellPhone => "cellPhone",
            ViolationType::ProhibitedObject => "prohibitedObject",
        }
    }

    /// Headline shown to the candidate when this violation is recorded.
    pub fn headline(&self) -> &'static str {
        match self {
            ViolationType::NoFace => "Face Not Visible",
            ViolationType::MultipleFace => "Multiple Faces Detected",
            ViolationType::CellPhone => "Cell Phone Detected",
            ViolationType::ProhibitedObject => "Prohibited Object Detected",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labeled object reported by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    #[serde(default)]
    pub confidence: f32,
    /// `[x, y, width, height]` in frame pixels.
    #[serde(default)]
    pub bbox: [f32; 4],
}

impl Detection {
    pub fn new(class: impl Into<String>, confidence: f32) -> Self {
        Self {
            class: class.into(),
            confidence,
            bbox: [0.0; 4],
        }
    }
}

/// Labels detected in one sampled frame. Consumed by the tick that produced it.
#[derive(Debug, Clone)]
pub struct DetectionFrame {
    /// Monotonic capture time, used for debouncing.
    pub captured_at: Instant,
    /// Wall-clock capture time, stamped on evidence.
    pub detected_at: DateTime<Utc>,
    person_count: usize,
    labels: BTreeSet<String>,
}

impl DetectionFrame {
    pub fn new(captured_at: Instant, detected_at: DateTime<Utc>, detections: &[Detection]) -> Self {
        let person_count = detections.iter().filter(|d| d.class == PERSON).count();
        let labels = detections.iter().map(|d| d.class.clone()).collect();
        Self {
            captured_at,
            detected_at,
            person_count,
            labels,
        }
    }

    pub fn person_count(&self) -> usize {
        self.person_count
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

/// Maps a frame to the violations it signals.
///
/// NoFace and MultipleFace both derive from the person count, so at most one
/// of them is present. The result is ordered and free of duplicates.
pub fn classify(frame: &DetectionFrame) -> Vec<ViolationType> {
    let mut signals = Vec::with_capacity(ViolationType::ALL.len());

    match frame.person_count() {
        0 => signals.push(ViolationType::NoFace),
        1 => {}
        _ => signals.push(ViolationType::MultipleFace),
    }

    if frame.contains(CELL_PHONE) {
        signals.push(ViolationType::CellPhone);
    }

    if PROHIBITED_OBJECTS.iter().any(|label| frame.contains(label)) {
        signals.push(ViolationType::ProhibitedObject);
    }

    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(classes: &[&str]) -> DetectionFrame {
        let detections: Vec<Detection> = classes.iter().map(|c| Detection::new(*c, 0.9)).collect();
        DetectionFrame::new(Instant::now(), Utc::now(), &detections)
    }

    #[test]
    fn single_person_is_clean() {
        assert!(classify(&frame(&["person"])).is_empty());
    }

    #[test]
    fn empty_frame_signals_no_face() {
        assert_eq!(classify(&frame(&[])), vec![ViolationType::NoFace]);
    }

    #[test]
    fn two_people_signal_multiple_face_only() {
        let signals = classify(&frame(&["person", "person"]));
        assert_eq!(signals, vec![ViolationType::MultipleFace]);
    }

    #[test]
    fn phone_and_book_fire_together() {
        let signals = classify(&frame(&["person", "cell phone", "book"]));
        assert_eq!(
            signals,
            vec![ViolationType::CellPhone, ViolationType::ProhibitedObject]
        );
    }

    #[test]
    fn book_and_laptop_collapse_to_one_signal() {
        let signals = classify(&frame(&["person", "book", "laptop", "laptop"]));
        assert_eq!(signals, vec![ViolationType::ProhibitedObject]);
    }

    #[test]
    fn unrelated_labels_are_ignored() {
        assert!(classify(&frame(&["person", "cup", "chair"])).is_empty());
    }

    #[test]
    fn violation_type_serializes_as_wire_name() {
        let json = serde_json::to_string(&ViolationType::ProhibitedObject).expect("serialize");
        assert_eq!(json, "\"prohibitedObject\"");
        let parsed: ViolationType = serde_json::from_str("\"noFace\"").expect("parse");
        assert_eq!(parsed, ViolationType::NoFace);
    }
}
