use anyhow::Result;

use crate::evidence::Frame;
use crate::violation::Detection;

/// Pluggable object detector. The model behind it is a black box; a failed
/// call only skips the tick.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

mod script;

pub use script::{ScriptStep, ScriptedFeed};
