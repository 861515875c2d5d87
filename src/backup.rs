//! Backup run orchestration
//!
//! A run moves through a fixed sequence of phases:
//!
//! 1. **Prepare** - resolve the source root and create `backup/` and `deleted/`
//! 2. **Initialize** - make sure the state schema exists
//! 3. **Dispatch** - walk the source and feed every file to the worker pool
//! 4. **Drain** - wait until every queued file has been processed
//! 5. **Detect deletions** - only when nothing failed so far
//! 6. **Report** - summarize counters and failures
//!
//! ## Example
//!
//! ```rust,no_run
//! use strata::{BackupConfig, BackupRunner};
//! use std::path::PathBuf;
//!
//! # fn main() -> strata::Result<()> {
//! let config = BackupConfig::with_default_database(
//!     PathBuf::from("/home/user/documents"),
//!     PathBuf::from("/mnt/backup"),
//! );
//!
//! let report = BackupRunner::new(config).workers(4).run()?;
//! println!(
//!     "{} added, {} modified, {} deleted",
//!     report.files_added, report.files_modified, report.files_deleted
//! );
//! # Ok(())
//! # }
//! ```

use crate::deleted::DeletedFileDetector;
use crate::enumerator::FileEnumerator;
use crate::error::{FailureKind, Result, StrataError};
use crate::processor::{BackupContext, BackupFileProcessor};
use crate::progress::ProgressSink;
use crate::queue::{default_worker_count, ThreadedFileQueue};
use crate::repository::StateRepository;
use crate::timestamp::{LocalTimestamp, TimestampProvider};
use crate::types::{BackupConfig, BackupReport};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Suffixes SQLite may append to the database file name for side files
const DATABASE_SIDE_FILE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Runs one incremental backup
///
/// Holds the configuration plus the knobs that are not part of it: worker
/// count and clock.
#[derive(Debug, Clone)]
pub struct BackupRunner {
    config: BackupConfig,
    workers: usize,
    timestamps: Arc<dyn TimestampProvider>,
}

impl BackupRunner {
    /// Create a runner for `config`
    ///
    /// The worker count comes from `config.workers`, falling back to the
    /// number of available CPUs.
    pub fn new(config: BackupConfig) -> Self {
        let workers = config.workers.unwrap_or_else(default_worker_count).max(1);
        Self {
            config,
            workers,
            timestamps: Arc::new(LocalTimestamp),
        }
    }

    /// Set the number of worker threads (at least 1)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Replace the clock used for snapshot names and record timestamps
    pub fn timestamp_provider(mut self, timestamps: Arc<dyn TimestampProvider>) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Configuration this runner was built from
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Execute the run
    ///
    /// Per-file failures do not abort the run. They are collected in the
    /// returned report, whose `success` flag is then `false` and which
    /// causes the deletion pass to be skipped.
    ///
    /// # Errors
    ///
    /// Only failures that prevent the run from starting are returned:
    /// - [`StrataError::Configuration`] if the source does not exist or the
    ///   destination directories cannot be created
    /// - [`StrataError::Schema`] if the state database cannot be initialized
    #[instrument(skip(self), fields(source = ?self.config.source_dir, workers = self.workers))]
    pub fn run(&self) -> Result<BackupReport> {
        let start = Instant::now();
        let config = &self.config;
        info!("Starting backup of {:?} into {:?}", config.source_dir, config.backup_root);
        if config.dry_run {
            warn!("Dry run requested; the run proceeds normally");
        }

        // Prepare
        let source = fs::canonicalize(&config.source_dir).map_err(|e| {
            StrataError::configuration(format!(
                "Source {:?} does not exist: {}",
                config.source_dir, e
            ))
        })?;
        let source_root = if source.is_file() {
            source
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| StrataError::configuration(format!("Source {:?} has no parent", source)))?
        } else {
            source.clone()
        };

        let live_root = config.live_root();
        let history_root = config.history_root();
        for dir in [&live_root, &history_root] {
            fs::create_dir_all(dir).map_err(|e| {
                StrataError::configuration(format!("Cannot create {:?}: {}", dir, e))
            })?;
        }

        // Initialize
        let repository = StateRepository::open(config.database_file.clone());
        repository.initialize_schema()?;

        let context = Arc::new(BackupContext::new(
            source_root,
            live_root,
            history_root,
            repository,
            Arc::clone(&self.timestamps),
            ProgressSink::new(config.on_progress.clone()),
        ));

        // Dispatch
        let processor = BackupFileProcessor::new(Arc::clone(&context));
        let queue = ThreadedFileQueue::with_default_capacity(self.workers, move |file| {
            processor.execute(file)
        });
        let enumerator = self.exclusions().into_iter().fold(
            FileEnumerator::new(source.clone()),
            FileEnumerator::with_excluded,
        );
        let dispatched = enumerator.enumerate(|file| {
            queue.enqueue(file);
        });
        debug!("Dispatched {} file(s) to {} worker(s)", dispatched, self.workers);

        // Drain
        queue.finalize();
        let panicked = queue.panicked();
        drop(queue);
        if panicked > 0 {
            context.record(
                &source,
                FailureKind::Internal,
                format!("{} file(s) aborted by a worker panic", panicked),
            );
        }

        // Detect deletions
        if context.is_successful() {
            if let Err(e) = DeletedFileDetector::new(&context).execute() {
                let path = e.failed_path().unwrap_or_else(|| context.history_root.clone());
                context.record_failure(&path, &e);
            }
        } else {
            warn!("Skipping deletion detection because earlier phases failed");
        }

        // Report
        let report = context.report(start.elapsed());
        if report.success {
            info!(
                "Backup finished in {:?} ({} processed, {} added, {} modified, {} deleted)",
                report.duration,
                report.files_processed,
                report.files_added,
                report.files_modified,
                report.files_deleted
            );
        } else {
            error!(
                "Backup finished with {} failure(s) in {:?}",
                report.failures.len(),
                report.duration
            );
        }
        Ok(report)
    }

    /// Paths the enumerator must skip so the destination is never backed up
    /// into itself
    fn exclusions(&self) -> Vec<PathBuf> {
        let backup_root = fs::canonicalize(&self.config.backup_root)
            .unwrap_or_else(|_| self.config.backup_root.clone());

        let database = self.config.database_file.clone();
        let database = match (database.parent(), database.file_name()) {
            (Some(parent), Some(name)) => fs::canonicalize(parent)
                .map(|parent| parent.join(name))
                .unwrap_or(database.clone()),
            _ => database.clone(),
        };

        let mut excluded = vec![backup_root];
        for suffix in DATABASE_SIDE_FILE_SUFFIXES {
            let mut name = OsString::from(database.as_os_str());
            name.push(suffix);
            excluded.push(PathBuf::from(name));
        }
        excluded.push(database);
        excluded
    }
}

/// Run a backup and report whether it fully succeeded
///
/// Convenience wrapper around [`BackupRunner`] for callers that only need a
/// yes/no answer. Errors that prevent the run from starting are logged and
/// reported as `false`.
pub fn run_backup(config: &BackupConfig) -> bool {
    match BackupRunner::new(config.clone()).run() {
        Ok(report) => report.success,
        Err(e) => {
            error!("Backup could not run: {}", e);
            false
        }
    }
}
