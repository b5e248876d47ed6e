//! SQLite `faces` table: `(id INTEGER PRIMARY KEY, name TEXT NOT NULL, image BLOB NOT NULL)`.

use rollcall_core::{EnrollmentRecord, EnrollmentSource, SourceError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS faces (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        image BLOB NOT NULL
    )";

#[derive(Error, Debug)]
pub enum FaceStoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("enrollment name must not be empty")]
    EmptyName,
    #[error("enrollment image for {0} is empty")]
    EmptyImage(String),
}

/// Enrollment row metadata (image bytes omitted).
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledFace {
    pub id: i64,
    pub name: String,
    pub image_bytes: usize,
}

/// Enrollment database handle.
pub struct FaceStore {
    conn: Connection,
}

impl FaceStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, FaceStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute(SCHEMA, [])?;
        tracing::debug!(path = %path.display(), "enrollment database opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, FaceStoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn })
    }

    /// Insert an enrollment image. The name is trimmed. Returns the row id.
    pub fn insert(&self, name: &str, image: &[u8]) -> Result<i64, FaceStoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FaceStoreError::EmptyName);
        }
        if image.is_empty() {
            return Err(FaceStoreError::EmptyImage(name.to_string()));
        }
        self.conn.execute(
            "INSERT INTO faces (name, image) VALUES (?1, ?2)",
            params![name, image],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(id, identity = name, bytes = image.len(), "enrollment image inserted");
        Ok(id)
    }

    /// All rows, oldest first.
    pub fn list(&self) -> Result<Vec<EnrolledFace>, FaceStoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, length(image) FROM faces ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(EnrolledFace {
                id: row.get(0)?,
                name: row.get(1)?,
                image_bytes: row.get::<_, i64>(2)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete a row by id. Returns whether a row was removed.
    pub fn remove(&self, id: i64) -> Result<bool, FaceStoreError> {
        let n = self.conn.execute("DELETE FROM faces WHERE id = ?1", params![id])?;
        if n > 0 {
            tracing::info!(id, "enrollment image removed");
        }
        Ok(n > 0)
    }

    pub fn name_of(&self, id: i64) -> Result<Option<String>, FaceStoreError> {
        Ok(self
            .conn
            .query_row("SELECT name FROM faces WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?)
    }

    pub fn count(&self) -> Result<usize, FaceStoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn fetch_records(&self) -> Result<Vec<EnrollmentRecord>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, image FROM faces ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(EnrollmentRecord {
                name: row.get(0)?,
                image: row.get(1)?,
            })
        })?;
        rows.collect()
    }
}

impl EnrollmentSource for FaceStore {
    fn records(&self) -> Result<Vec<EnrollmentRecord>, SourceError> {
        self.fetch_records()
            .map_err(|e| SourceError::Read(format!("faces table: {e}")))
    }
}
