//! Client-side exam proctoring monitor: classifies sampled webcam frames,
//! debounces and counts violations, uploads evidence and commits the session
//! log to the cheating log API.

pub mod api;
pub mod config;
pub mod counts;
pub mod debounce;
pub mod detector;
pub mod evidence;
pub mod logging;
pub mod monitor;
pub mod session_log;
pub mod submitter;
pub mod tasks;
pub mod termination;
pub mod upload;
pub mod violation;
