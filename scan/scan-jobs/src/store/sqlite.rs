//! SQLite-backed status store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tracing::{debug, info};

use super::StatusStore;
use crate::error::{JobError, JobResult};
use crate::id::ScanId;
use crate::status::{Completion, MeshStatus, ScanRecord};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS scans (
        scan_id      TEXT PRIMARY KEY NOT NULL,
        image_path   TEXT NOT NULL,
        mesh_file    TEXT,
        mesh_status  TEXT NOT NULL DEFAULT 'pending',
        created_at   TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_scans_created_at ON scans(created_at DESC);
";

const SELECT_COLUMNS: &str = "SELECT scan_id, image_path, mesh_file, mesh_status, created_at FROM scans";

/// Raw column values, converted to a [`ScanRecord`] outside the row callback.
struct RawRow {
    scan_id: String,
    image_path: String,
    mesh_file: Option<String>,
    mesh_status: String,
    created_at: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            scan_id: row.get(0)?,
            image_path: row.get(1)?,
            mesh_file: row.get(2)?,
            mesh_status: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_record(self) -> JobResult<ScanRecord> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| JobError::InconsistentRecord {
                reason: format!("scan {}: bad timestamp {:?}: {e}", self.scan_id, self.created_at),
            })?
            .with_timezone(&Utc);
        let record = ScanRecord {
            scan_id: ScanId::new(self.scan_id)?,
            image_path: PathBuf::from(self.image_path),
            mesh_file: self.mesh_file,
            mesh_status: self.mesh_status.parse()?,
            created_at,
        };
        record.validate()?;
        Ok(record)
    }
}

/// A status store persisted in an SQLite database.
///
/// Timestamps are stored as RFC 3339 UTC strings with microseconds, which
/// sort chronologically as text. Completion is a single conditional
/// `UPDATE`, so status and mesh file change together.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens or creates a database file and initialises the schema.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Database`] if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> JobResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "Scan database opened");
        Ok(store)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Database`] if the schema cannot be created.
    pub fn open_in_memory() -> JobResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> JobResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, or `None` for an in-memory store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of recorded scans.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn scan_count(&self) -> JobResult<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM scans", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| JobError::InconsistentRecord {
            reason: format!("negative scan count {count}"),
        })
    }

    fn lock(&self) -> JobResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| JobError::Poisoned)
    }

    fn fetch(conn: &Connection, scan_id: &ScanId) -> JobResult<Option<ScanRecord>> {
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE scan_id = ?1"),
            params![scan_id.as_str()],
            RawRow::read,
        )
        .optional()?
        .map(RawRow::into_record)
        .transpose()
    }

    /// Explains why a conditional update touched no row.
    fn rejected(
        conn: &Connection,
        scan_id: &ScanId,
        to: MeshStatus,
    ) -> JobError {
        match Self::fetch(conn, scan_id) {
            Ok(Some(record)) => JobError::InvalidTransition {
                id: scan_id.to_string(),
                from: record.mesh_status,
                to,
            },
            Ok(None) => JobError::UnknownScan {
                id: scan_id.to_string(),
            },
            Err(e) => e,
        }
    }
}

impl StatusStore for SqliteStore {
    fn insert(&self, record: ScanRecord) -> JobResult<()> {
        record.validate()?;
        let conn = self.lock()?;
        let created_at = record
            .created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let result = conn.execute(
            "INSERT INTO scans (scan_id, image_path, mesh_file, mesh_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.scan_id.as_str(),
                record.image_path.to_string_lossy().into_owned(),
                record.mesh_file,
                record.mesh_status.as_str(),
                created_at,
            ],
        );
        match result {
            Ok(_) => {
                debug!(scan_id = %record.scan_id, status = %record.mesh_status, "Scan recorded");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(JobError::DuplicateScan {
                    id: record.scan_id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, scan_id: &ScanId) -> JobResult<Option<ScanRecord>> {
        let conn = self.lock()?;
        Self::fetch(&conn, scan_id)
    }

    fn begin_processing(&self, scan_id: &ScanId) -> JobResult<ScanRecord> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE scans SET mesh_status = 'processing'
             WHERE scan_id = ?1 AND mesh_status = 'pending'",
            params![scan_id.as_str()],
        )?;
        if changed == 0 {
            return Err(Self::rejected(&conn, scan_id, MeshStatus::Processing));
        }
        Self::fetch(&conn, scan_id)?.ok_or_else(|| JobError::UnknownScan {
            id: scan_id.to_string(),
        })
    }

    fn complete(&self, scan_id: &ScanId, completion: Completion) -> JobResult<ScanRecord> {
        let conn = self.lock()?;
        let to = completion.status();
        let changed = conn.execute(
            "UPDATE scans SET mesh_status = ?1, mesh_file = ?2
             WHERE scan_id = ?3 AND mesh_status = 'processing'",
            params![to.as_str(), completion.mesh_file(), scan_id.as_str()],
        )?;
        if changed == 0 {
            return Err(Self::rejected(&conn, scan_id, to));
        }
        debug!(scan_id = %scan_id, status = %to, "Scan completed");
        Self::fetch(&conn, scan_id)?.ok_or_else(|| JobError::UnknownScan {
            id: scan_id.to_string(),
        })
    }

    fn list(&self) -> JobResult<Vec<ScanRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, scan_id DESC"
        ))?;
        let rows = stmt.query_map([], RawRow::read)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}
