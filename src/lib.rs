//! # Strata - Incremental content-hashed backups
//!
//! A backup engine that keeps a live mirror of a source tree and preserves
//! every superseded or removed file in timestamped snapshot directories.
//!
//! ## Overview
//!
//! Each run compares every source file against the state recorded by the
//! previous run and:
//! - Copies new files into the live mirror
//! - Archives the previous copy of a changed file before overwriting it
//! - Leaves unchanged files untouched
//! - Moves the live copy of a file that vanished from the source into history
//!
//! Nothing is ever discarded: the live mirror plus the snapshot history hold
//! every version a run has seen.
//!
//! ## Architecture
//!
//! - **Content hashing**: files are compared by XXH64 digest, not by
//!   timestamp or size
//! - **SQLite state**: one row per tracked path, accessed through a
//!   per-thread connection pool in WAL mode
//! - **Bounded work queue**: a directory walk feeds a fixed pool of worker
//!   threads and blocks when they fall behind
//! - **Lazy snapshots**: a run that modifies or deletes nothing creates no
//!   snapshot directory; one that does creates exactly one
//!
//! ## Destination layout
//!
//! ```text
//! <backup root>/
//! ├── backup/                  live mirror of the source
//! ├── deleted/
//! │   └── 2024-03-01_14-05-09/ superseded and removed files of one run
//! └── backup.db                per-file state
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata::{BackupConfig, BackupRunner};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::with_default_database(
//!     PathBuf::from("./documents"),
//!     PathBuf::from("./backups"),
//! )
//! .with_progress(|info| println!("[{}] {} : {:?}", info.stage, info.processed, info.file));
//!
//! let report = BackupRunner::new(config).run()?;
//! if !report.success {
//!     for failure in &report.failures {
//!         eprintln!("{}: {:?} {}", failure.kind, failure.path, failure.message);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! For callers that only need a yes/no answer, [`run_backup`] wraps the
//! runner and returns `bool`.
//!
//! ## Failure model
//!
//! A failure on one file never stops the others. It is recorded in the
//! [`BackupReport`], marks the run unsuccessful and suppresses the deletion
//! pass, so a transient read error can never make a file look deleted.
//! Failed files keep their previous state and are retried by the next run.
//!
//! ## Module Organization
//!
//! - [`backup`]: Run orchestration
//! - [`processor`]: Per-file change detection
//! - [`deleted`]: Detection of files removed from the source
//! - [`repository`]: SQLite state and connection pool
//! - [`snapshot`]: Per-run snapshot directories
//! - [`queue`]: Bounded worker queue
//! - [`enumerator`], [`hasher`], [`timestamp`]: Building blocks
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

// Public API modules
pub mod backup;
pub mod deleted;
pub mod enumerator;
pub mod error;
pub mod hasher;
pub mod processor;
pub mod queue;
pub mod repository;
pub mod snapshot;
pub mod timestamp;
pub mod types;
pub mod utils;

// Internal modules
pub mod progress;

// Re-export main types for convenience
pub use backup::{run_backup, BackupRunner};
pub use error::{FailureKind, Result, StrataError};
pub use hasher::{hash_file_content, FileHasher};
pub use repository::{ConnectionPool, StateRepository};
pub use timestamp::{FixedTimestamp, LocalTimestamp, TimestampProvider};
pub use types::*;
