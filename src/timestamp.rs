//! Filesystem-safe timestamps
//!
//! Timestamps name snapshot directories and are stored as the
//! `last_updated` value of state records, so they must be valid path
//! components on every platform (no `:`).

use chrono::Local;

/// `strftime` format of filesystem-safe timestamps, e.g. `2024-03-01_14-05-09`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Source of "now" for a backup run
pub trait TimestampProvider: Send + Sync + std::fmt::Debug {
    /// Current time formatted as a valid path component
    fn now_filesystem_safe(&self) -> String;
}

/// Local wall-clock time in [`TIMESTAMP_FORMAT`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTimestamp;

impl TimestampProvider for LocalTimestamp {
    fn now_filesystem_safe(&self) -> String {
        Local::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Always returns the same timestamp
#[derive(Debug, Clone)]
pub struct FixedTimestamp(pub String);

impl TimestampProvider for FixedTimestamp {
    fn now_filesystem_safe(&self) -> String {
        self.0.clone()
    }
}
