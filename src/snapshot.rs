//! Per-run snapshot directories
//!
//! Before a live backup copy is overwritten or removed, the superseded copy
//! is archived under `<history root>/<timestamp>/<relative path>`. All
//! archives of one run share a single timestamped directory, created the
//! first time any worker needs it. A run with no modifications or deletions
//! never creates one.

use crate::error::{Result, StrataError};
use crate::timestamp::TimestampProvider;
use once_cell::sync::OnceCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Upper bound on `_N` suffixes tried when a timestamp directory already exists
const MAX_NAME_SUFFIX: u32 = 1000;

/// Lazily creates exactly one snapshot directory per run
///
/// [`get_or_create`](Self::get_or_create) may be called from any number of
/// threads; the directory is created once and every caller receives the same
/// path. Callers that arrive while creation is in progress wait for it rather
/// than creating a second directory.
pub struct SnapshotDirectoryProvider {
    history_root: PathBuf,
    timestamps: Arc<dyn TimestampProvider>,
    snapshot_dir: OnceCell<PathBuf>,
}

impl SnapshotDirectoryProvider {
    /// Create a provider that places snapshots under `history_root`
    pub fn new(history_root: PathBuf, timestamps: Arc<dyn TimestampProvider>) -> Self {
        Self {
            history_root,
            timestamps,
            snapshot_dir: OnceCell::new(),
        }
    }

    /// Snapshot directory of this run, creating it on first use
    ///
    /// The directory is named after the current timestamp. If that name is
    /// already taken by an earlier run, `_1`, `_2`, … is appended.
    ///
    /// # Errors
    ///
    /// - [`StrataError::Archival`] if the directory cannot be created. The
    ///   provider stays uninitialized so a later call can try again.
    pub fn get_or_create(&self) -> Result<PathBuf> {
        self.snapshot_dir
            .get_or_try_init(|| self.create_snapshot_dir())
            .cloned()
    }

    /// Snapshot directory if one has been created in this run
    pub fn created(&self) -> Option<&Path> {
        self.snapshot_dir.get().map(PathBuf::as_path)
    }

    fn create_snapshot_dir(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.history_root)
            .map_err(|e| StrataError::archival(&self.history_root, e))?;

        let timestamp = self.timestamps.now_filesystem_safe();
        for attempt in 0..=MAX_NAME_SUFFIX {
            let name = if attempt == 0 {
                timestamp.clone()
            } else {
                format!("{}_{}", timestamp, attempt)
            };
            let candidate = self.history_root.join(name);

            match fs::create_dir(&candidate) {
                Ok(()) => {
                    info!("Created snapshot directory {:?}", candidate);
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StrataError::archival(candidate, e)),
            }
        }

        Err(StrataError::archival(
            self.history_root.join(&timestamp),
            io::Error::new(io::ErrorKind::AlreadyExists, "no free snapshot directory name"),
        ))
    }
}

impl std::fmt::Debug for SnapshotDirectoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotDirectoryProvider")
            .field("history_root", &self.history_root)
            .field("snapshot_dir", &self.snapshot_dir.get())
            .finish()
    }
}
