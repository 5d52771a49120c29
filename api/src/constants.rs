//! Application constants

/// Prefix every exam route is served under
pub const EXAM_API_PREFIX: &str = "/api/exam";

/// Port used when PORT is unset
pub const DEFAULT_PORT: u16 = 5000;

/// Pool size used when MAX_DB_CONNECTIONS is unset
pub const DEFAULT_MAX_DB_CONNECTIONS: u32 = 5;

/// Largest accepted POST body; screenshots are URLs, not image data
pub const MAX_LOG_BODY_SIZE: usize = 1024 * 1024;
