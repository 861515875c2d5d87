//! Content hashing for change detection
//!
//! Files are hashed with XXH64 (seed 0), a fast non-cryptographic digest. The
//! hash is only ever compared against the previous hash of the same path, so
//! collision resistance against an adversary is not a goal.
//!
//! The digest is rendered as 16 lower-case hex characters so that stored
//! hashes always have the same width.

use crate::error::{Result, StrataError};
use std::fs::File;
use std::hash::Hasher as _;
use std::io::Read;
use std::path::Path;
use tracing::trace;
use twox_hash::XxHash64;

/// Read buffer size used while streaming a file through the hasher
pub const HASH_BUFFER_SIZE: usize = 8192;

/// Hash a file's content with XXH64
///
/// The file is opened once, read sequentially in [`HASH_BUFFER_SIZE`] chunks
/// and closed before returning.
///
/// # Errors
///
/// - [`StrataError::Hash`] if the file cannot be opened or read
///
/// # Example
///
/// ```rust,no_run
/// use strata::hasher::hash_file_content;
/// use std::path::Path;
///
/// # fn main() -> strata::Result<()> {
/// let hash = hash_file_content(Path::new("notes.txt"))?;
/// assert_eq!(hash.len(), 16);
/// # Ok(())
/// # }
/// ```
pub fn hash_file_content(path: &Path) -> Result<String> {
    let hash_error = |source| StrataError::Hash {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(hash_error)?;
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(hash_error)?;
        if bytes_read == 0 {
            break;
        }
        hasher.write(&buffer[..bytes_read]);
    }

    let digest = format_digest(hasher.finish());
    trace!("Hashed {:?}: {}", path, digest);
    Ok(digest)
}

/// Hash an in-memory buffer with the same digest as [`hash_file_content`]
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    format_digest(hasher.finish())
}

fn format_digest(value: u64) -> String {
    hex::encode(value.to_be_bytes())
}

/// Stateless content hasher handed to the per-file processor
#[derive(Debug, Clone, Copy, Default)]
pub struct FileHasher;

impl FileHasher {
    /// Create a hasher
    pub fn new() -> Self {
        Self
    }

    /// Compute the digest of the file at `path`
    pub fn compute(&self, path: &Path) -> Result<String> {
        hash_file_content(path)
    }
}
