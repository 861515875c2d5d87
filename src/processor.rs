//! Per-file change detection and live-tree maintenance
//!
//! [`BackupFileProcessor`] runs on the worker threads. For each source file it
//! hashes the content, compares the hash with the last recorded state and
//! brings the live backup tree up to date:
//!
//! | prior live record | hash      | action                                          | status      |
//! |-------------------|-----------|-------------------------------------------------|-------------|
//! | none / `Deleted`  | any       | copy into live tree                             | `Added`     |
//! | present           | differs   | archive live copy into snapshot, then overwrite | `Modified`  |
//! | present           | identical | nothing                                         | `Unchanged` |
//!
//! Failures never propagate across threads; they are folded into the shared
//! [`BackupContext`] and the worker moves on to its next file.

use crate::error::{FailureKind, Result, StrataError};
use crate::hasher::FileHasher;
use crate::progress::ProgressSink;
use crate::repository::StateRepository;
use crate::snapshot::SnapshotDirectoryProvider;
use crate::timestamp::TimestampProvider;
use crate::types::{BackupReport, ChangeType, FileRecord, ProgressInfo, RunFailure};
use crate::utils::{self, copy_file_into, make_relative, path_key};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything the workers of one run share
///
/// Owned by the orchestrator for the lifetime of the run; workers hold it
/// through an `Arc` and it is only torn down after every worker has joined.
#[derive(Debug)]
pub struct BackupContext {
    /// Root that relative paths are computed against
    pub source_root: PathBuf,
    /// Live mirror of the source
    pub live_root: PathBuf,
    /// Parent of the per-run snapshot directories
    pub history_root: PathBuf,
    /// Persistent per-file state
    pub repository: StateRepository,
    /// Lazily created snapshot directory of this run
    pub snapshots: SnapshotDirectoryProvider,
    /// Clock used for record timestamps
    pub timestamps: Arc<dyn TimestampProvider>,
    /// Serialized progress delivery
    pub progress: ProgressSink,
    success: AtomicBool,
    processed: AtomicUsize,
    added: AtomicUsize,
    modified: AtomicUsize,
    unchanged: AtomicUsize,
    deleted: AtomicUsize,
    deferred: AtomicUsize,
    failures: Mutex<Vec<RunFailure>>,
}

impl BackupContext {
    /// Assemble the shared state of a run
    pub fn new(
        source_root: PathBuf,
        live_root: PathBuf,
        history_root: PathBuf,
        repository: StateRepository,
        timestamps: Arc<dyn TimestampProvider>,
        progress: ProgressSink,
    ) -> Self {
        let snapshots = SnapshotDirectoryProvider::new(history_root.clone(), Arc::clone(&timestamps));
        Self {
            source_root,
            live_root,
            history_root,
            repository,
            snapshots,
            timestamps,
            progress,
            success: AtomicBool::new(true),
            processed: AtomicUsize::new(0),
            added: AtomicUsize::new(0),
            modified: AtomicUsize::new(0),
            unchanged: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
            deferred: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Whether no failure has been recorded so far
    pub fn is_successful(&self) -> bool {
        self.success.load(Ordering::Acquire)
    }

    /// Record a failure against `path` and mark the run as failed
    pub fn record_failure(&self, path: &Path, error: &StrataError) {
        let message = if error.is_busy() {
            format!("{} (state database locked by another process)", error)
        } else {
            error.to_string()
        };
        self.record(path, error.kind(), message);
    }

    /// Record a failure that did not originate from a [`StrataError`]
    pub fn record(&self, path: &Path, kind: FailureKind, message: String) {
        warn!("{} for {:?}: {}", kind, path, message);
        self.success.store(false, Ordering::Release);
        self.failures.lock().push(RunFailure {
            path: path.to_path_buf(),
            kind,
            message,
        });
    }

    /// Count a path archived and marked deleted, returning the new total
    pub(crate) fn count_deleted(&self) -> usize {
        self.deleted.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Note a vanished path whose deletion is left for a later run
    ///
    /// Does not fail the run.
    pub(crate) fn defer_deletion(&self, key: &str, error: &StrataError) {
        warn!("Leaving {} live, archiving failed: {}", key, error);
        self.deferred.fetch_add(1, Ordering::AcqRel);
    }

    fn count_processed(&self, status: ChangeType) -> usize {
        let counter = match status {
            ChangeType::Added => &self.added,
            ChangeType::Modified => &self.modified,
            ChangeType::Unchanged => &self.unchanged,
            ChangeType::Deleted => &self.deleted,
        };
        counter.fetch_add(1, Ordering::AcqRel);
        self.processed.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Snapshot of the counters and failures as a report
    pub fn report(&self, duration: Duration) -> BackupReport {
        BackupReport {
            success: self.is_successful(),
            files_processed: self.processed.load(Ordering::Acquire),
            files_added: self.added.load(Ordering::Acquire),
            files_modified: self.modified.load(Ordering::Acquire),
            files_unchanged: self.unchanged.load(Ordering::Acquire),
            files_deleted: self.deleted.load(Ordering::Acquire),
            deletions_deferred: self.deferred.load(Ordering::Acquire),
            snapshot_dir: self.snapshots.created().map(Path::to_path_buf),
            failures: self.failures.lock().clone(),
            duration,
        }
    }
}

/// Classifies one source file and updates the live tree and state
#[derive(Debug, Clone)]
pub struct BackupFileProcessor {
    context: Arc<BackupContext>,
    hasher: FileHasher,
}

impl BackupFileProcessor {
    /// Create a processor working against `context`
    pub fn new(context: Arc<BackupContext>) -> Self {
        Self {
            context,
            hasher: FileHasher::new(),
        }
    }

    /// Process `file`, folding any failure into the shared context
    pub fn execute(&self, file: &Path) {
        if let Err(e) = self.process(file) {
            self.context.record_failure(file, &e);
        }
    }

    /// Process `file` and return the status it was recorded with
    ///
    /// # Errors
    ///
    /// - [`StrataError::NotUnderRoot`] if `file` is outside the source root
    /// - [`StrataError::NonUtf8Path`] if the relative path cannot be stored as a key
    /// - [`StrataError::Hash`] if the file cannot be read
    /// - [`StrataError::Persistence`] if the state lookup or update fails
    /// - [`StrataError::Archival`] if a copy into the live or snapshot tree fails;
    ///   the state is left untouched so the next run retries
    pub fn process(&self, file: &Path) -> Result<ChangeType> {
        let ctx = &self.context;

        let relative = make_relative(file, &ctx.source_root)?;
        let key = path_key(&relative)?;
        let live_copy = ctx.live_root.join(&relative);

        let new_hash = self.hasher.compute(file)?;
        let prior = ctx.repository.get(&key)?.filter(FileRecord::is_live);

        let (status, timestamp) = match prior {
            None => {
                copy_file_into(file, &live_copy)?;
                (ChangeType::Added, ctx.timestamps.now_filesystem_safe())
            }
            Some(record) if record.content_hash != new_hash => {
                self.archive_live_copy(&relative, &live_copy)?;
                copy_file_into(file, &live_copy)?;
                (ChangeType::Modified, ctx.timestamps.now_filesystem_safe())
            }
            Some(record) => (ChangeType::Unchanged, record.last_updated),
        };

        ctx.repository.upsert(&key, &new_hash, status, &timestamp)?;
        debug!("{} {}", status, key);

        let processed = ctx.count_processed(status);
        ctx.progress.emit(ProgressInfo::COLLECTING, processed, 0, file);
        Ok(status)
    }

    /// Copy the current live copy into this run's snapshot before it is replaced
    fn archive_live_copy(&self, relative: &Path, live_copy: &Path) -> Result<()> {
        if !live_copy.exists() {
            debug!("No live copy of {:?} to archive", relative);
            return Ok(());
        }
        let snapshot_dir = self.context.snapshots.get_or_create()?;
        copy_file_into(live_copy, &snapshot_dir.join(relative))?;
        Ok(())
    }
}

/// Remove now-empty directories between `path`'s parent and `root`
///
/// `root` itself is never removed.
pub(crate) fn prune_empty_parents(path: &Path, root: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        match utils::remove_dir_if_empty(dir) {
            Ok(true) => current = dir.parent(),
            _ => break,
        }
    }
}
