//! Source file enumeration
//!
//! [`FileEnumerator`] turns a source path into the stream of regular files a
//! backup run has to look at. Traversal is best effort: entries that cannot
//! be read (permission denied, removed mid-walk) are skipped and the walk
//! carries on.
//!
//! ```rust,no_run
//! use strata::enumerator::FileEnumerator;
//! use std::path::PathBuf;
//!
//! let files = FileEnumerator::new(PathBuf::from("./documents")).collect();
//! println!("{} files to back up", files.len());
//! ```

use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Walks a file or directory and yields every regular file beneath it
///
/// Symbolic links are neither followed nor yielded, and special files
/// (sockets, FIFOs, devices) are skipped. Traversal order is unspecified.
#[derive(Debug, Clone)]
pub struct FileEnumerator {
    /// File or directory to enumerate
    root: PathBuf,
    /// Paths (and everything under them) to leave out
    excluded: Vec<PathBuf>,
}

impl FileEnumerator {
    /// Create an enumerator for `root`
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            excluded: Vec::new(),
        }
    }

    /// Leave `path` and everything under it out of the enumeration
    ///
    /// Used to keep the backup destination from being backed up into itself
    /// when it lives inside the source tree.
    pub fn with_excluded(mut self, path: PathBuf) -> Self {
        self.excluded.push(path);
        self
    }

    /// Call `on_file` once for every regular file under the root
    ///
    /// Returns the number of files yielded.
    pub fn enumerate<F>(&self, mut on_file: F) -> usize
    where
        F: FnMut(PathBuf),
    {
        let metadata = match self.root.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Cannot read source root {:?}: {}", self.root, e);
                return 0;
            }
        };

        if metadata.is_file() {
            on_file(self.root.clone());
            return 1;
        }
        if !metadata.is_dir() {
            debug!("Source root {:?} is neither a file nor a directory", self.root);
            return 0;
        }

        let mut count = 0;
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry.path()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if entry.file_type().is_file() {
                count += 1;
                on_file(entry.into_path());
            } else {
                trace!("Skipping non-regular entry {:?}", entry.path());
            }
        }

        count
    }

    /// Collect every regular file under the root
    pub fn collect(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        self.enumerate(|path| files.push(path));
        files
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|excluded| path.starts_with(excluded))
    }
}
