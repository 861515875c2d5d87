//! Core data types used throughout the strata library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Tracked state**: [`ChangeType`], [`FileRecord`], [`FileStatusEntry`] - what the
//!   state repository remembers about each backed-up path
//! - **Configuration**: [`BackupConfig`] - the inputs of one backup run
//! - **Observability**: [`ProgressInfo`], [`ProgressCallback`] - transient progress events
//! - **Results**: [`BackupReport`], [`RunFailure`] - the outcome of a run
//!
//! ## Examples
//!
//! ```rust
//! use strata::types::{BackupConfig, ChangeType};
//! use std::path::PathBuf;
//!
//! let config = BackupConfig::new(
//!     PathBuf::from("./documents"),
//!     PathBuf::from("./backups"),
//!     PathBuf::from("./backups/backup.db"),
//! );
//! assert!(!config.dry_run);
//!
//! assert_eq!(ChangeType::from_str_lossy("Modified"), ChangeType::Modified);
//! ```

use crate::error::{FailureKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of comparing a file against its last recorded state
///
/// Persisted as its name (`"Unchanged"`, `"Added"`, `"Modified"`, `"Deleted"`).
/// Decoding an unrecognized name yields [`ChangeType::Unchanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChangeType {
    /// Content matches the last recorded hash
    #[default]
    Unchanged,
    /// Path had no live record
    Added,
    /// Content hash differs from the last recorded hash
    Modified,
    /// Path no longer exists in the source
    Deleted,
}

impl ChangeType {
    /// All four statuses, in lifecycle order
    pub const ALL: [ChangeType; 4] = [
        ChangeType::Unchanged,
        ChangeType::Added,
        ChangeType::Modified,
        ChangeType::Deleted,
    ];

    /// Encoded form stored in the state repository
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Unchanged => "Unchanged",
            ChangeType::Added => "Added",
            ChangeType::Modified => "Modified",
            ChangeType::Deleted => "Deleted",
        }
    }

    /// Decode a stored status, falling back to `Unchanged` for unknown text
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "Added" => ChangeType::Added,
            "Modified" => ChangeType::Modified,
            "Deleted" => ChangeType::Deleted,
            _ => ChangeType::Unchanged,
        }
    }

    /// Whether the record still describes a file present in the live tree
    pub fn is_live(&self) -> bool {
        *self != ChangeType::Deleted
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one backed-up path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the source root (unique key)
    pub path: String,
    /// Hex-encoded 64-bit content digest at last observation
    pub content_hash: String,
    /// Outcome of the last observation
    pub status: ChangeType,
    /// Filesystem-safe timestamp of the last status change
    pub last_updated: String,
}

impl FileRecord {
    /// Whether this record counts as a prior live version for change detection
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

/// Path and status pair returned by a full listing of the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatusEntry {
    /// Path relative to the source root
    pub path: String,
    /// Current status
    pub status: ChangeType,
}

/// Progress callback type
///
/// Invocations are serialized by the run, so the callback itself does not
/// need to be reentrant.
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Stage of the run (`"collecting"` or `"deleted"`)
    pub stage: &'static str,
    /// Items processed so far in this stage
    pub processed: usize,
    /// Total items to process, 0 when unknown
    pub total: usize,
    /// File the event concerns
    pub file: PathBuf,
}

impl ProgressInfo {
    /// Stage tag emitted once per processed source file
    pub const COLLECTING: &'static str = "collecting";
    /// Stage tag emitted once per path archived as deleted
    pub const DELETED: &'static str = "deleted";

    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        if self.total > 0 {
            Some((self.processed as f32 / self.total as f32) * 100.0)
        } else {
            None
        }
    }
}

/// Configuration of one backup run
///
/// The progress callback is not serialized; everything else can be loaded
/// from a JSON file with [`BackupConfig::from_json_file`].
#[derive(Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// File or directory to back up
    pub source_dir: PathBuf,
    /// Destination holding `backup/`, `deleted/` and usually the database
    pub backup_root: PathBuf,
    /// SQLite database tracking per-file state
    pub database_file: PathBuf,
    /// Accepted for compatibility; currently has no effect on the run
    #[serde(default)]
    pub dry_run: bool,
    /// Emit per-file progress to the console (consumed by the CLI)
    #[serde(default)]
    pub verbose: bool,
    /// Worker thread count; defaults to the number of available CPUs
    #[serde(default)]
    pub workers: Option<usize>,
    /// Optional progress sink
    #[serde(skip)]
    pub on_progress: Option<ProgressCallback>,
}

impl BackupConfig {
    /// Create a configuration with default flags and no progress sink
    pub fn new(source_dir: PathBuf, backup_root: PathBuf, database_file: PathBuf) -> Self {
        Self {
            source_dir,
            backup_root,
            database_file,
            dry_run: false,
            verbose: false,
            workers: None,
            on_progress: None,
        }
    }

    /// Create a configuration whose database lives at `<backup_root>/backup.db`
    pub fn with_default_database(source_dir: PathBuf, backup_root: PathBuf) -> Self {
        let database_file = backup_root.join(DEFAULT_DATABASE_FILE);
        Self::new(source_dir, backup_root, database_file)
    }

    /// Attach a progress sink
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressInfo) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Directory mirroring the current state of the source
    pub fn live_root(&self) -> PathBuf {
        self.backup_root.join(LIVE_DIR_NAME)
    }

    /// Directory holding one timestamped snapshot per run with changes
    pub fn history_root(&self) -> PathBuf {
        self.backup_root.join(HISTORY_DIR_NAME)
    }
}

impl fmt::Debug for BackupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupConfig")
            .field("source_dir", &self.source_dir)
            .field("backup_root", &self.backup_root)
            .field("database_file", &self.database_file)
            .field("dry_run", &self.dry_run)
            .field("verbose", &self.verbose)
            .field("workers", &self.workers)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Name of the live mirror directory under the backup root
pub const LIVE_DIR_NAME: &str = "backup";
/// Name of the snapshot history directory under the backup root
pub const HISTORY_DIR_NAME: &str = "deleted";
/// Default database file name under the backup root
pub const DEFAULT_DATABASE_FILE: &str = "backup.db";

/// One failure recorded during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// File or backup-relative path the failure concerns
    pub path: PathBuf,
    /// Coarse classification
    pub kind: FailureKind,
    /// Human-readable detail
    pub message: String,
}

/// Outcome of a backup run
#[derive(Debug, Clone, Default)]
pub struct BackupReport {
    /// True only if every phase completed without a recorded failure
    pub success: bool,
    /// Source files that went through the per-file processor
    pub files_processed: usize,
    /// Files recorded as Added
    pub files_added: usize,
    /// Files recorded as Modified
    pub files_modified: usize,
    /// Files re-confirmed as Unchanged
    pub files_unchanged: usize,
    /// Tracked paths archived and marked Deleted
    pub files_deleted: usize,
    /// Vanished paths left live because their copy could not be archived;
    /// they are retried on the next run
    pub deletions_deferred: usize,
    /// Snapshot directory created by this run, if any
    pub snapshot_dir: Option<PathBuf>,
    /// Failures in the order they were recorded
    pub failures: Vec<RunFailure>,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl BackupReport {
    /// Whether the run changed anything in the backup
    pub fn has_changes(&self) -> bool {
        self.files_added + self.files_modified + self.files_deleted > 0
    }
}
