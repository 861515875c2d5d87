//! Utility functions for strata
//!
//! Path manipulation and the small set of file operations the backup and
//! history trees are built from. Every function is safe to call from several
//! worker threads at once as long as they target different paths.

use crate::error::{Result, StrataError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Make a path relative to a base path
///
/// Tries a lexical strip first so that symbolic links in the base are kept
/// as written, and falls back to canonicalising both paths.
///
/// When `path` equals `base` (a single-file source whose root is the file
/// itself) the file name is returned instead of an empty path.
///
/// # Errors
///
/// - [`StrataError::NotUnderRoot`] if `path` is not under `base`
///
/// # Example
///
/// ```rust
/// use strata::utils::make_relative;
/// use std::path::{Path, PathBuf};
///
/// let relative = make_relative(
///     Path::new("/home/user/docs/notes/todo.txt"),
///     Path::new("/home/user/docs"),
/// ).unwrap();
/// assert_eq!(relative, PathBuf::from("notes/todo.txt"));
/// ```
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    let relative = match path.strip_prefix(base) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => {
            let not_under_root = || StrataError::NotUnderRoot {
                path: path.to_path_buf(),
                root: base.to_path_buf(),
            };
            let path_canon = path.canonicalize().map_err(|_| not_under_root())?;
            let base_canon = base.canonicalize().map_err(|_| not_under_root())?;
            path_canon
                .strip_prefix(&base_canon)
                .map(Path::to_path_buf)
                .map_err(|_| not_under_root())?
        }
    };

    if relative.as_os_str().is_empty() {
        return path
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| StrataError::NotUnderRoot {
                path: path.to_path_buf(),
                root: base.to_path_buf(),
            });
    }

    Ok(relative)
}

/// Render a relative path as the key stored in the state repository
///
/// Keys always use `/` separators so a database written on one platform
/// stays meaningful on another. A key must map back to exactly the path it
/// was built from, so names that are not valid UTF-8 are refused.
///
/// # Errors
///
/// - [`StrataError::NonUtf8Path`] if any component is not valid UTF-8
pub fn path_key(relative: &Path) -> Result<String> {
    let components = relative
        .components()
        .map(|c| {
            c.as_os_str().to_str().ok_or_else(|| StrataError::NonUtf8Path {
                path: relative.to_path_buf(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(components.join("/"))
}

/// Copy `from` to `to`, creating missing parent directories and replacing
/// any existing file at `to`
///
/// # Errors
///
/// - [`StrataError::Archival`] naming whichever path the failing step touched
pub fn copy_file_into(from: &Path, to: &Path) -> Result<u64> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| StrataError::archival(parent, e))?;
    }
    let bytes = fs::copy(from, to).map_err(|e| StrataError::archival(to, e))?;
    trace!("Copied {:?} -> {:?} ({} bytes)", from, to, bytes);
    Ok(bytes)
}

/// Remove a file, treating "already gone" as success
///
/// Returns whether a file was actually removed.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            trace!("Removed {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StrataError::archival(path, e)),
    }
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}
