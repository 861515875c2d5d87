//! Serialized delivery of progress events
//!
//! Worker threads report progress concurrently, but a user-supplied callback
//! cannot be assumed to be thread-safe. [`ProgressSink`] holds a lock for
//! the duration of each callback invocation so events arrive one at a time.

use crate::types::{ProgressCallback, ProgressInfo};
use parking_lot::Mutex;
use std::path::Path;

/// Optional progress callback behind a delivery lock
#[derive(Default)]
pub struct ProgressSink {
    callback: Option<ProgressCallback>,
    delivery: Mutex<()>,
}

impl ProgressSink {
    /// Wrap an optional callback
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            delivery: Mutex::new(()),
        }
    }

    /// Whether events go anywhere
    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    /// Deliver one event
    pub fn emit(&self, stage: &'static str, processed: usize, total: usize, file: &Path) {
        let Some(callback) = &self.callback else {
            return;
        };
        let _delivery = self.delivery.lock();
        callback(ProgressInfo {
            stage,
            processed,
            total,
            file: file.to_path_buf(),
        });
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
