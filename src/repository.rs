//! Persistent per-file state
//!
//! The [`StateRepository`] maps every backed-up path (relative to the source
//! root) to its last known content hash, [`ChangeType`] and timestamp. It is
//! stored in a SQLite database so that the next run only has to compare
//! hashes instead of re-copying everything.
//!
//! ## Concurrency
//!
//! Worker threads call [`StateRepository::get`] and [`StateRepository::upsert`]
//! concurrently. Instead of putting one lock around every database call, the
//! [`ConnectionPool`] hands each thread its own connection, keyed by
//! [`ThreadId`]. All connections run in WAL mode with a busy timeout of
//! [`SQLITE_BUSY_TIMEOUT`], so SQLite serializes the writes itself and a
//! writer that cannot get the lock within the timeout fails with a
//! [`StrataError::Persistence`] instead of hanging.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS files (
//!     path TEXT PRIMARY KEY,
//!     hash TEXT NOT NULL,
//!     last_updated TEXT NOT NULL,
//!     status TEXT NOT NULL
//! );
//! ```
//!
//! Rows are never deleted; a removed source file is marked `Deleted`.

use crate::error::{Result, StrataError};
use crate::types::{ChangeType, FileRecord, FileStatusEntry};
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, trace};

/// How long a connection waits for a competing writer before failing
pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SQL_CREATE_FILES_TABLE: &str = "CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    hash TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    status TEXT NOT NULL
);";

const SQL_UPSERT: &str = "INSERT INTO files(path, hash, status, last_updated) \
     VALUES(?1, ?2, ?3, ?4) \
     ON CONFLICT(path) DO UPDATE SET \
     hash = excluded.hash, status = excluded.status, last_updated = excluded.last_updated";

const SQL_GET: &str = "SELECT hash, status, last_updated FROM files WHERE path = ?1";

const SQL_LIST_ALL: &str = "SELECT path, status FROM files";

const SQL_MARK_DELETED: &str = "UPDATE files SET status = ?1, last_updated = ?2 WHERE path = ?3";

/// One SQLite connection per thread for a single database file
///
/// Connections are opened lazily the first time a thread asks for one and
/// live until the pool is dropped.
pub struct ConnectionPool {
    database_path: PathBuf,
    connections: DashMap<ThreadId, Arc<Mutex<Connection>>>,
}

impl ConnectionPool {
    /// Create an empty pool for the database at `database_path`
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            database_path,
            connections: DashMap::new(),
        }
    }

    /// Path of the database file
    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Number of connections opened so far
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run `f` with the calling thread's connection, opening it if needed
    pub fn with_connection<T, F>(&self, f: F) -> rusqlite::Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let connection = self.acquire()?;
        let guard = connection.lock();
        f(&guard)
    }

    fn acquire(&self) -> rusqlite::Result<Arc<Mutex<Connection>>> {
        let thread_id = thread::current().id();

        if let Some(existing) = self.connections.get(&thread_id).map(|c| Arc::clone(c.value())) {
            return Ok(existing);
        }

        let connection = Arc::new(Mutex::new(self.open_connection()?));
        self.connections.insert(thread_id, Arc::clone(&connection));
        trace!("Opened SQLite connection for {:?}", thread_id);
        Ok(connection)
    }

    fn open_connection(&self) -> rusqlite::Result<Connection> {
        let connection = Connection::open(&self.database_path)?;
        connection.busy_timeout(SQLITE_BUSY_TIMEOUT)?;
        connection.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(connection)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("database_path", &self.database_path)
            .field("connections", &self.connections.len())
            .finish()
    }
}

/// Persistent mapping from backup-relative path to [`FileRecord`]
///
/// Safe to share between worker threads (`&StateRepository` is `Sync`).
///
/// # Example
///
/// ```rust,no_run
/// use strata::repository::StateRepository;
/// use strata::types::ChangeType;
///
/// # fn main() -> strata::Result<()> {
/// let repository = StateRepository::open("backup.db");
/// repository.initialize_schema()?;
/// repository.upsert("notes/todo.txt", "ef46db3751d8e999", ChangeType::Added, "2024-01-01_00-00-00")?;
///
/// let record = repository.get("notes/todo.txt")?.unwrap();
/// assert_eq!(record.status, ChangeType::Added);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StateRepository {
    pool: ConnectionPool,
}

impl StateRepository {
    /// Create a repository backed by the database at `database_path`
    ///
    /// Nothing is opened until the first operation.
    pub fn open(database_path: impl Into<PathBuf>) -> Self {
        Self {
            pool: ConnectionPool::new(database_path.into()),
        }
    }

    /// Connection pool backing this repository
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Ensure the database file and the `files` table exist
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// - [`StrataError::Schema`] if the database cannot be opened or altered
    pub fn initialize_schema(&self) -> Result<()> {
        self.pool
            .with_connection(|conn| conn.execute_batch(SQL_CREATE_FILES_TABLE))
            .map_err(StrataError::Schema)?;
        debug!("State schema ready at {:?}", self.pool.database_path());
        Ok(())
    }

    /// Insert or fully overwrite the record for `path` in one statement
    pub fn upsert(&self, path: &str, hash: &str, status: ChangeType, timestamp: &str) -> Result<()> {
        self.pool
            .with_connection(|conn| {
                conn.prepare_cached(SQL_UPSERT)?
                    .execute(params![path, hash, status.as_str(), timestamp])
            })
            .map_err(|e| StrataError::persistence(path, e))?;
        trace!("Upserted {} as {}", path, status);
        Ok(())
    }

    /// Last known record for `path`
    ///
    /// Returns `None` if the path was never seen or its row is incomplete.
    /// Callers treat a `Deleted` record as "no live record".
    pub fn get(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = self
            .pool
            .with_connection(|conn| {
                conn.prepare_cached(SQL_GET)?
                    .query_row(params![path], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })
                    .optional()
            })
            .map_err(|e| StrataError::persistence(path, e))?;

        Ok(row.and_then(|(hash, status, last_updated)| {
            if hash.is_empty() || status.is_empty() || last_updated.is_empty() {
                return None;
            }
            Some(FileRecord {
                path: path.to_string(),
                content_hash: hash,
                status: ChangeType::from_str_lossy(&status),
                last_updated,
            })
        }))
    }

    /// Every tracked path with its current status
    ///
    /// Rows with an empty path or status are skipped.
    pub fn list_all(&self) -> Result<Vec<FileStatusEntry>> {
        self.pool
            .with_connection(|conn| {
                let mut statement = conn.prepare_cached(SQL_LIST_ALL)?;
                let rows = statement.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;

                let mut entries = Vec::new();
                for row in rows {
                    let (path, status) = row?;
                    if path.is_empty() || status.is_empty() {
                        continue;
                    }
                    entries.push(FileStatusEntry {
                        path,
                        status: ChangeType::from_str_lossy(&status),
                    });
                }
                Ok(entries)
            })
            .map_err(|e| StrataError::persistence("*", e))
    }

    /// Mark `path` as deleted at `timestamp`, keeping its last hash
    ///
    /// Returns whether a record was updated.
    pub fn mark_deleted(&self, path: &str, timestamp: &str) -> Result<bool> {
        let updated = self
            .pool
            .with_connection(|conn| {
                conn.prepare_cached(SQL_MARK_DELETED)?.execute(params![
                    ChangeType::Deleted.as_str(),
                    timestamp,
                    path
                ])
            })
            .map_err(|e| StrataError::persistence(path, e))?;
        Ok(updated > 0)
    }

    /// Number of tracked paths, deleted ones included
    pub fn record_count(&self) -> Result<usize> {
        self.pool
            .with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get::<_, i64>(0))
            })
            .map(|count| count as usize)
            .map_err(|e| StrataError::persistence("*", e))
    }
}
