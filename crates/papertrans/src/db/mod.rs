//! SQLite handle for the job database.
//!
//! The service owns one connection. Writes happen once per job transition,
//! so a mutex in front of the connection is all the concurrency control
//! needed; WAL lets `sqlite3` inspect the file while the service runs.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod error;
pub mod job_repo;
pub mod migrations;

pub use error::DatabaseError;

/// File name of the job database inside the data directory.
pub const DATABASE_FILE: &str = "papertrans.db";

/// How long a statement waits on a lock held by an outside reader.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the job database at `path` and upgrades its schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            log::warn!(
                "Job database at {} runs in '{}' journal mode instead of WAL",
                path.display(),
                mode
            );
        }
        // The worker treats a committed transition as done before it moves on.
        conn.pragma_update(None, "synchronous", "FULL")?;

        let applied = migrations::upgrade(&mut conn)?;
        log::info!(
            "Job database ready at {} (schema v{}, {} upgrade step(s) applied)",
            path.display(),
            migrations::latest_version(),
            applied
        );

        Ok(Self::wrap(conn))
    }

    /// A private in-memory database with the current schema.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::upgrade(&mut conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Runs read-only statements.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` in an immediate transaction, committed only when `f` succeeds.
    ///
    /// Check-then-write sequences (status transitions, delete-and-return) go
    /// through here so no other writer can interleave.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
