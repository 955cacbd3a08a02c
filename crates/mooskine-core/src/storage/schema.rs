//! SQLite schema for the persisted store
//!
//! The store is versioned. Version 1 kept note content as plain text;
//! version 2 keeps it as rich text (JSON with style spans). Older stores are
//! upgraded by the [`migration`](super::migration) module when opened.

use rusqlite::{Connection, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

const SCHEMA_INFO_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_info (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

const NOTEBOOKS_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS notebooks (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        creation_date INTEGER NOT NULL
    );
"#;

/// Notes as they looked in version 1
pub(crate) const NOTES_V1_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        notebook_id TEXT NOT NULL,
        creation_date INTEGER NOT NULL,
        text TEXT,
        FOREIGN KEY (notebook_id) REFERENCES notebooks(id) ON DELETE CASCADE
    );
"#;

/// Notes from version 2 on: content is a rich-text JSON payload
pub(crate) const NOTES_V2_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        notebook_id TEXT NOT NULL,
        creation_date INTEGER NOT NULL,
        attributed_text TEXT NOT NULL,
        FOREIGN KEY (notebook_id) REFERENCES notebooks(id) ON DELETE CASCADE
    );
"#;

const QUERY_CACHE_SQL: &str = r#"
    -- Orderings remembered by live queries across runs
    CREATE TABLE IF NOT EXISTS query_cache (
        name TEXT PRIMARY KEY,
        fingerprint TEXT NOT NULL,
        ordering TEXT NOT NULL
    );
"#;

const INDEXES_SQL: &str = r#"
    -- Notes of one notebook, in creation order
    CREATE INDEX IF NOT EXISTS idx_notes_notebook_id ON notes(notebook_id);
    CREATE INDEX IF NOT EXISTS idx_notes_creation_date ON notes(creation_date);
    CREATE INDEX IF NOT EXISTS idx_notebooks_creation_date ON notebooks(creation_date);
"#;

/// Initialize the current schema on an empty database
pub fn init_schema(conn: &Connection) -> Result<()> {
    init_schema_at(conn, SCHEMA_VERSION)
}

/// Initialize the schema as it looked at `version`
///
/// Only versions this code knows about are accepted; anything else is
/// treated as the current version.
pub fn init_schema_at(conn: &Connection, version: i32) -> Result<()> {
    conn.execute_batch(SCHEMA_INFO_SQL)?;
    conn.execute_batch(NOTEBOOKS_SQL)?;
    if version == 1 {
        conn.execute_batch(NOTES_V1_SQL)?;
    } else {
        conn.execute_batch(NOTES_V2_SQL)?;
        conn.execute_batch(QUERY_CACHE_SQL)?;
    }
    init_indexes(conn)?;
    set_schema_version(conn, version)
}

/// Create indexes, after a migration has rebuilt a table
pub(crate) fn init_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(INDEXES_SQL)
}

/// Tables added by later versions that carry no data to migrate
pub(crate) fn init_auxiliary_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(QUERY_CACHE_SQL)
}

/// Record the schema version
pub(crate) fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [version.to_string()],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    if !table_exists(conn, "schema_info")? {
        return Ok(None);
    }

    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if the database has no schema yet
pub fn needs_init(conn: &Connection) -> bool {
    !matches!(get_schema_version(conn), Ok(Some(_)))
}

/// Check if a table exists
pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?")?
        .exists([name])
}

/// Column names of a table, in declaration order
pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?) ORDER BY cid")?;
    let columns = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<Result<Vec<String>>>()?;
    Ok(columns)
}
