//! Job repository: CRUD operations for the `jobs` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
///
/// Timestamps are RFC 3339 strings, `params` is a JSON object and
/// `output_files` a JSON array.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub filename: String,
    pub status: String,
    pub lang_in: String,
    pub lang_out: String,
    pub pages: Option<String>,
    pub params: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    pub output_files: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            status: row.get("status")?,
            lang_in: row.get("lang_in")?,
            lang_out: row.get("lang_out")?,
            pages: row.get("pages")?,
            params: row.get("params")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            error: row.get("error")?,
            output_files: row.get("output_files")?,
        })
    }
}

/// Column values written by a status transition. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct StatusChange {
    pub status: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    pub output_files: Option<String>,
}

/// Result of a guarded status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionRow {
    /// The row existed in an allowed state and was updated.
    Applied,
    /// No row with that id.
    Missing,
    /// The row exists but its current status is not an allowed predecessor.
    Rejected { current: String },
}

/// Inserts a new job row. Returns `false` if a row with the same id exists.
pub fn insert(db: &Database, job: &JobRow) -> Result<bool, DatabaseError> {
    db.write(|tx| {
        let inserted = tx.execute(
            "INSERT INTO jobs (id, filename, status, lang_in, lang_out, pages, params,
             created_at, started_at, completed_at, error, output_files)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO NOTHING",
            params![
                job.id,
                job.filename,
                job.status,
                job.lang_in,
                job.lang_out,
                job.pages,
                job.params,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.error,
                job.output_files,
            ],
        )?;
        Ok(inserted == 1)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.read(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists all jobs, most recent first.
pub fn list_all(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.read(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC, id DESC")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists jobs with the given status, oldest first.
pub fn list_by_status(db: &Database, status: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.read(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![status], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Applies `change` only if the row's current status is one of `allowed_from`.
///
/// The check and the write share one transaction, so two writers cannot both
/// move a job out of the same state.
pub fn transition(
    db: &Database,
    id: &str,
    allowed_from: &[&str],
    change: &StatusChange,
) -> Result<TransitionRow, DatabaseError> {
    db.write(|tx| {
        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM jobs WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Ok(TransitionRow::Missing);
        };
        if !allowed_from.contains(&current.as_str()) {
            return Ok(TransitionRow::Rejected { current });
        }

        tx.execute(
            "UPDATE jobs SET status = ?2,
                started_at = COALESCE(?3, started_at),
                completed_at = COALESCE(?4, completed_at),
                error = COALESCE(?5, error),
                output_files = COALESCE(?6, output_files)
             WHERE id = ?1",
            params![
                id,
                change.status,
                change.started_at,
                change.completed_at,
                change.error,
                change.output_files,
            ],
        )?;
        Ok(TransitionRow::Applied)
    })
}

/// Deletes a job row and returns it as it was at deletion time, or `None`
/// if no row matched.
///
/// Any transition committed before this call is reflected in the returned
/// row; any later one finds the row missing.
pub fn delete(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.write(|tx| {
        let row = tx
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        if row.is_some() {
            tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        }
        Ok(row)
    })
}
