//! Detection of files removed from the source since the last run
//!
//! Runs once, on the orchestrating thread, after every worker has finished.
//! Each tracked path that is not already `Deleted` and no longer exists in
//! the source has its live copy moved into this run's snapshot directory and
//! is then marked `Deleted`.

use crate::error::Result;
use crate::processor::{prune_empty_parents, BackupContext};
use crate::types::{ChangeType, ProgressInfo};
use crate::utils::{copy_file_into, remove_file_if_exists};
use std::path::Path;
use tracing::{debug, info};

/// Archives live copies of vanished source files and marks them deleted
#[derive(Debug)]
pub struct DeletedFileDetector<'a> {
    context: &'a BackupContext,
}

impl<'a> DeletedFileDetector<'a> {
    /// Create a detector for the run described by `context`
    pub fn new(context: &'a BackupContext) -> Self {
        Self { context }
    }

    /// Run the deletion pass and return how many paths were marked deleted
    ///
    /// Archiving a single path is best-effort: if its live copy cannot be
    /// moved into the snapshot, the path is skipped with a warning, stays
    /// live so a later run tries again, and is counted in the report's
    /// `deletions_deferred`.
    ///
    /// # Errors
    ///
    /// The pass stops at the first error that is not specific to one file:
    /// - [`StrataError::Persistence`](crate::StrataError::Persistence) if listing or marking records fails
    /// - [`StrataError::Archival`](crate::StrataError::Archival) if the snapshot directory cannot be created
    pub fn execute(&self) -> Result<usize> {
        let ctx = self.context;
        let entries = ctx.repository.list_all()?;
        let mut marked = 0;

        for entry in entries.iter().filter(|e| e.status != ChangeType::Deleted) {
            let source_path = ctx.source_root.join(&entry.path);
            if source_path.exists() {
                continue;
            }

            let snapshot_dir = ctx.snapshots.get_or_create()?;
            let live_copy = ctx.live_root.join(&entry.path);

            if let Err(e) = archive_and_remove(&live_copy, &snapshot_dir.join(&entry.path)) {
                ctx.defer_deletion(&entry.path, &e);
                continue;
            }
            prune_empty_parents(&live_copy, &ctx.live_root);

            let timestamp = ctx.timestamps.now_filesystem_safe();
            if !ctx.repository.mark_deleted(&entry.path, &timestamp)? {
                debug!("{} vanished from the state during the pass", entry.path);
                continue;
            }
            marked += 1;
            let deleted = ctx.count_deleted();
            debug!("Deleted {}", entry.path);
            ctx.progress
                .emit(ProgressInfo::DELETED, deleted, 0, Path::new(&entry.path));
        }

        if marked > 0 {
            info!("Marked {} file(s) deleted", marked);
        }
        Ok(marked)
    }
}

/// Move `live_copy` to `archived`; a missing live copy is not an error
fn archive_and_remove(live_copy: &Path, archived: &Path) -> Result<()> {
    if !live_copy.exists() {
        debug!("No live copy at {:?}, nothing to archive", live_copy);
        return Ok(());
    }
    copy_file_into(live_copy, archived)?;
    remove_file_if_exists(live_copy)?;
    Ok(())
}
