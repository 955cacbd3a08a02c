//! SQLite persistence
//!
//! Opens (creating or migrating as needed) the named store, materializes
//! records from it, and writes batches of pending changes in a single
//! transaction.
//!
//! Creation dates are stored as microseconds since the Unix epoch and are
//! never rewritten once a row exists.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, Transaction};
use tracing::{debug, info};

use super::error::{StorageError, StorageResult};
use super::migration::{MigrationManager, MigrationReport};
use super::schema::{get_schema_version, init_schema, SCHEMA_VERSION};
use crate::models::{Note, NoteId, Notebook, NotebookId, RichText};

/// One record-level write
#[derive(Debug, Clone)]
pub enum RecordWrite {
    UpsertNotebook(Notebook),
    UpsertNote(Note),
    DeleteNote(NoteId),
    DeleteNotebook(NotebookId),
}

/// One query cache write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    Put {
        name: String,
        fingerprint: String,
        ordering: String,
    },
    Delete(String),
    DeleteAll,
}

/// A persisted query cache row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
    pub name: String,
    pub fingerprint: String,
    pub ordering: String,
}

/// Everything one flush writes
#[derive(Debug, Default, Clone)]
pub struct WriteSet {
    pub records: Vec<RecordWrite>,
    pub cache: Vec<CacheWrite>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.cache.is_empty()
    }
}

/// Persistence layer for the store
pub struct SqlitePersistence {
    conn: Connection,
    migration: Option<MigrationReport>,
}

impl SqlitePersistence {
    /// Open or create the store at `path`, migrating older schemas
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
            }
        }

        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened store");
        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let migration = prepare_schema(&mut conn)?;
        Ok(Self { conn, migration })
    }

    /// Migration performed while opening, if any
    pub fn migration(&self) -> Option<&MigrationReport> {
        self.migration.as_ref()
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ==================== Loading ====================

    /// Materialize every notebook
    pub fn load_notebooks(&self) -> StorageResult<Vec<Notebook>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, creation_date FROM notebooks ORDER BY creation_date")?;
        let rows = stmt.query_map([], NotebookRow::from_row)?;

        let mut notebooks = Vec::new();
        for row in rows {
            notebooks.push(row?.hydrate()?);
        }
        Ok(notebooks)
    }

    /// Materialize every note
    pub fn load_notes(&self) -> StorageResult<Vec<Note>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, notebook_id, creation_date, attributed_text FROM notes ORDER BY creation_date",
        )?;
        let rows = stmt.query_map([], NoteRow::from_row)?;

        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?.hydrate()?);
        }
        Ok(notes)
    }

    /// Materialize one notebook
    pub fn load_notebook(&self, id: NotebookId) -> StorageResult<Option<Notebook>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, creation_date FROM notebooks WHERE id = ?")?;
        let mut rows = stmt.query(params![id.to_string()])?;

        match rows.next()? {
            Some(row) => Ok(Some(NotebookRow::from_row(row)?.hydrate()?)),
            None => Ok(None),
        }
    }

    /// Materialize one note
    pub fn load_note(&self, id: NoteId) -> StorageResult<Option<Note>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, notebook_id, creation_date, attributed_text FROM notes WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;

        match rows.next()? {
            Some(row) => Ok(Some(NoteRow::from_row(row)?.hydrate()?)),
            None => Ok(None),
        }
    }

    /// Load every remembered query ordering
    pub fn load_query_cache(&self) -> StorageResult<Vec<CacheRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, fingerprint, ordering FROM query_cache")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CacheRow {
                    name: row.get(0)?,
                    fingerprint: row.get(1)?,
                    ordering: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ==================== Writing ====================

    /// Write a batch of changes atomically
    pub fn write(&mut self, writes: &WriteSet) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        for write in &writes.records {
            apply_record_write(&tx, write)?;
        }
        for write in &writes.cache {
            apply_cache_write(&tx, write)?;
        }

        tx.commit()?;
        debug!(
            records = writes.records.len(),
            cache = writes.cache.len(),
            "Wrote pending changes"
        );
        Ok(())
    }
}

/// Bring the schema up to date; returns the migration performed, if any
fn prepare_schema(conn: &mut Connection) -> StorageResult<Option<MigrationReport>> {
    match get_schema_version(conn)? {
        None => {
            init_schema(conn)?;
            Ok(None)
        }
        Some(version) if version < SCHEMA_VERSION => {
            let report = MigrationManager::default().migrate(conn, version)?;
            info!(
                from = report.from,
                to = report.to,
                rows = report.migrated_rows,
                "Store migrated"
            );
            Ok(Some(report))
        }
        Some(version) if version > SCHEMA_VERSION => Err(StorageError::UnsupportedVersion {
            found: version,
            supported: SCHEMA_VERSION,
        }),
        Some(_) => Ok(None),
    }
}

fn apply_record_write(tx: &Transaction<'_>, write: &RecordWrite) -> StorageResult<()> {
    match write {
        RecordWrite::UpsertNotebook(notebook) => {
            tx.execute(
                "INSERT INTO notebooks (id, name, creation_date) VALUES (?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![
                    notebook.id.to_string(),
                    notebook.name,
                    notebook.creation_date.timestamp_micros(),
                ],
            )?;
        }
        RecordWrite::UpsertNote(note) => {
            tx.execute(
                "INSERT INTO notes (id, notebook_id, creation_date, attributed_text) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    notebook_id = excluded.notebook_id,
                    attributed_text = excluded.attributed_text",
                params![
                    note.id.to_string(),
                    note.notebook_id.to_string(),
                    note.creation_date.timestamp_micros(),
                    serde_json::to_string(&note.attributed_text)?,
                ],
            )?;
        }
        RecordWrite::DeleteNote(id) => {
            tx.execute("DELETE FROM notes WHERE id = ?", params![id.to_string()])?;
        }
        RecordWrite::DeleteNotebook(id) => {
            tx.execute("DELETE FROM notebooks WHERE id = ?", params![id.to_string()])?;
        }
    }
    Ok(())
}

fn apply_cache_write(tx: &Transaction<'_>, write: &CacheWrite) -> StorageResult<()> {
    match write {
        CacheWrite::Put {
            name,
            fingerprint,
            ordering,
        } => {
            tx.execute(
                "INSERT OR REPLACE INTO query_cache (name, fingerprint, ordering) VALUES (?, ?, ?)",
                params![name, fingerprint, ordering],
            )?;
        }
        CacheWrite::Delete(name) => {
            tx.execute("DELETE FROM query_cache WHERE name = ?", params![name])?;
        }
        CacheWrite::DeleteAll => {
            tx.execute("DELETE FROM query_cache", [])?;
        }
    }
    Ok(())
}

// ==================== Row Hydration ====================

struct NotebookRow {
    id: String,
    name: String,
    creation_date: i64,
}

impl NotebookRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            creation_date: row.get(2)?,
        })
    }

    fn hydrate(self) -> StorageResult<Notebook> {
        let id = NotebookId::parse(&self.id).map_err(|e| corrupt("notebooks", &self.id, e))?;
        let creation_date = timestamp("notebooks", &self.id, self.creation_date)?;
        Ok(Notebook::from_storage(id, self.name, creation_date))
    }
}

struct NoteRow {
    id: String,
    notebook_id: String,
    creation_date: i64,
    attributed_text: String,
}

impl NoteRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            notebook_id: row.get(1)?,
            creation_date: row.get(2)?,
            attributed_text: row.get(3)?,
        })
    }

    fn hydrate(self) -> StorageResult<Note> {
        let id = NoteId::parse(&self.id).map_err(|e| corrupt("notes", &self.id, e))?;
        let notebook_id =
            NotebookId::parse(&self.notebook_id).map_err(|e| corrupt("notes", &self.id, e))?;
        let creation_date = timestamp("notes", &self.id, self.creation_date)?;
        let attributed_text: RichText = serde_json::from_str(&self.attributed_text)
            .map_err(|e| corrupt("notes", &self.id, e))?;
        Ok(Note::from_storage(id, notebook_id, creation_date, attributed_text))
    }
}

fn timestamp(table: &'static str, id: &str, micros: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StorageError::CorruptRecord {
        table,
        id: id.to_string(),
        details: format!("invalid timestamp {}", micros),
    })
}

fn corrupt(table: &'static str, id: &str, error: impl std::fmt::Display) -> StorageError {
    StorageError::CorruptRecord {
        table,
        id: id.to_string(),
        details: error.to_string(),
    }
}
