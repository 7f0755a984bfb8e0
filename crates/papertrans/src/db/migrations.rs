//! Versioned schema for the job database.
//!
//! Every step commits together with its `_migrations` row, so an upgrade
//! interrupted halfway leaves the database at the last complete version.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, TransactionBehavior};

use super::error::DatabaseError;

/// `(version, description, sql)`, in ascending version order.
const STEPS: &[(u32, &str, &str)] = &[
    (1, "jobs table", include_str!("sql/001_create_jobs.sql")),
    (
        2,
        "status and recency indexes",
        include_str!("sql/002_index_jobs_status.sql"),
    ),
];

const BOOKKEEPING: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL
);";

/// Highest schema version this build knows how to reach.
pub fn latest_version() -> u32 {
    STEPS.last().map(|(version, _, _)| *version).unwrap_or(0)
}

/// Schema version recorded in the database; 0 for a fresh one.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    conn.execute_batch(BOOKKEEPING)?;
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

/// Applies every step above the recorded version and returns how many ran.
///
/// A database written by a newer build is refused rather than guessed at.
pub fn upgrade(conn: &mut Connection) -> Result<usize, DatabaseError> {
    let current = schema_version(conn)?;
    if current > latest_version() {
        return Err(DatabaseError::Migration {
            version: current,
            reason: format!(
                "database schema is newer than this build supports (v{})",
                latest_version()
            ),
        });
    }

    let mut applied = 0;
    for &(version, description, sql) in STEPS.iter().filter(|(v, _, _)| *v > current) {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(sql)
            .map_err(|e| DatabaseError::Migration {
                version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![
                version,
                description,
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
            ],
        )?;
        tx.commit()?;

        log::info!("Job database schema upgraded to v{} ({})", version, description);
        applied += 1;
    }
    Ok(applied)
}
