use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use super::Detector;
use crate::evidence::{Camera, Frame};
use crate::violation::Detection;

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;

/// One tick of a recorded detection script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptStep {
    Detections(Vec<Detection>),
    NotReady,
    Error(String),
}

/// Replays a JSON-lines detection script as both camera and detector.
///
/// `grab` advances the script; `detect` answers for the step just grabbed.
pub struct ScriptedFeed {
    steps: Mutex<VecDeque<ScriptStep>>,
    current: Mutex<Option<ScriptStep>>,
}

impl ScriptedFeed {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            current: Mutex::new(None),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read detection script {}", path.display()))?;
        Self::parse(&contents)
    }

    /// Blank lines and `#` comments are skipped.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut steps = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let step: ScriptStep = serde_json::from_str(line)
                .with_context(|| format!("Invalid script step on line {}", index + 1))?;
            steps.push(step);
        }
        if steps.is_empty() {
            return Err(anyhow!("Detection script has no steps"));
        }
        Ok(Self::new(steps))
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn blank_frame() -> Frame {
        Frame {
            rgba: vec![96; (FRAME_WIDTH * FRAME_HEIGHT * 4) as usize],
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
        }
    }
}

impl Camera for ScriptedFeed {
    fn grab(&self) -> Option<Frame> {
        let next = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let ready = matches!(next, Some(ScriptStep::Detections(_)) | Some(ScriptStep::Error(_)));
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = next;
        ready.then(Self::blank_frame)
    }
}

impl Detector for ScriptedFeed {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(ScriptStep::Detections(detections)) => Ok(detections.clone()),
            Some(ScriptStep::Error(message)) => Err(anyhow!("{message}")),
            Some(ScriptStep::NotReady) | None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
# warm-up
"notReady"
{"detections": [{"class": "person", "confidence": 0.92, "bbox": [10, 20, 200, 300]}]}
{"detections": []}
{"error": "inference timed out"}
"#;

    #[test]
    fn parses_all_step_kinds() {
        let feed = ScriptedFeed::parse(SCRIPT).expect("parse");
        assert_eq!(feed.remaining(), 4);
    }

    #[test]
    fn replays_steps_in_order() {
        let feed = ScriptedFeed::parse(SCRIPT).expect("parse");

        assert!(feed.grab().is_none());

        let frame = feed.grab().expect("frame");
        assert!(frame.is_readable());
        let detections = feed.detect(&frame).expect("detect");
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class, "person");
        assert_eq!(detections[0].bbox, [10.0, 20.0, 200.0, 300.0]);

        let frame = feed.grab().expect("frame");
        assert!(feed.detect(&frame).expect("detect").is_empty());

        let frame = feed.grab().expect("frame");
        let err = feed.detect(&frame).unwrap_err();
        assert_eq!(err.to_string(), "inference timed out");

        assert!(feed.is_exhausted());
        assert!(feed.grab().is_none());
    }

    #[test]
    fn reports_bad_line_number() {
        let err = ScriptedFeed::parse("\"notReady\"\n{\"bogus\": 1}\n").err().expect("error");
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn empty_script_is_an_error() {
        assert!(ScriptedFeed::parse("# nothing\n\n").is_err());
    }
}
