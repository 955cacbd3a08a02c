//! Schema migrations
//!
//! A migration step upgrades the store by one schema version. Each step is a
//! list of entity mappings; a mapping rebuilds one table, turning every
//! source row into a destination row through an [`EntityMigrationPolicy`].
//!
//! The default policy is a structural copy: every attribute whose name
//! exists in both shapes is carried over unchanged. Custom policies layer
//! derived attributes on top of that copy.
//!
//! Steps run inside a single transaction, in version order, only when the
//! on-disk version is older than [`SCHEMA_VERSION`].

use std::collections::BTreeMap;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Transaction};
use thiserror::Error;
use tracing::{debug, info};

use super::schema::{
    init_auxiliary_tables, init_indexes, set_schema_version, table_columns, NOTES_V2_SQL,
    SCHEMA_VERSION,
};
use crate::models::RichText;

/// Errors raised while migrating
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Mapping '{mapping}': source attribute '{attribute}' has the wrong type")]
    InvalidAttribute {
        mapping: &'static str,
        attribute: String,
    },

    #[error("Mapping '{mapping}': destination has no attribute '{attribute}'")]
    UnknownAttribute {
        mapping: &'static str,
        attribute: String,
    },

    #[error("No migration path from schema version {from} to {to}")]
    NoPath { from: i32, to: i32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Attribute values of one row, keyed by column name
pub type AttributeMap = BTreeMap<String, Value>;

/// A row being built in the destination shape
#[derive(Debug, Clone)]
pub struct DestinationRecord {
    columns: Vec<String>,
    values: AttributeMap,
}

impl DestinationRecord {
    fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            values: AttributeMap::new(),
        }
    }

    /// Set a destination attribute
    pub fn set(
        &mut self,
        mapping: &EntityMapping,
        attribute: &str,
        value: Value,
    ) -> Result<(), MigrationError> {
        if !self.has_attribute(attribute) {
            return Err(MigrationError::UnknownAttribute {
                mapping: mapping.name,
                attribute: attribute.to_string(),
            });
        }
        self.values.insert(attribute.to_string(), value);
        Ok(())
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.columns.iter().any(|c| c == attribute)
    }

    fn into_row(self) -> Vec<Value> {
        let Self {
            columns,
            mut values,
        } = self;
        columns
            .iter()
            .map(|c| values.remove(c).unwrap_or(Value::Null))
            .collect()
    }
}

/// Copy every attribute present in both shapes, unchanged
pub fn structural_copy(source: &AttributeMap, destination: &mut DestinationRecord) {
    for (name, value) in source {
        if destination.has_attribute(name) {
            destination.values.insert(name.clone(), value.clone());
        }
    }
}

/// Turns one source row into its destination row
pub trait EntityMigrationPolicy {
    /// Fill `destination` from `source`
    ///
    /// The default is [`structural_copy`]. Overrides that add derived
    /// attributes should call it first.
    fn create_destination(
        &self,
        source: &AttributeMap,
        destination: &mut DestinationRecord,
        mapping: &EntityMapping,
    ) -> Result<(), MigrationError> {
        let _ = mapping;
        structural_copy(source, destination);
        Ok(())
    }
}

/// Structural copy only
#[derive(Debug, Default)]
pub struct DefaultPolicy;

impl EntityMigrationPolicy for DefaultPolicy {}

/// Derives a note's rich text from its legacy plain text
///
/// A missing (NULL) legacy text becomes empty rich text.
#[derive(Debug, Default)]
pub struct UpdateToRichTextPolicy;

impl EntityMigrationPolicy for UpdateToRichTextPolicy {
    fn create_destination(
        &self,
        source: &AttributeMap,
        destination: &mut DestinationRecord,
        mapping: &EntityMapping,
    ) -> Result<(), MigrationError> {
        structural_copy(source, destination);

        let text = match source.get("text") {
            Some(Value::Text(text)) => text.as_str(),
            None | Some(Value::Null) => "",
            Some(_) => {
                return Err(MigrationError::InvalidAttribute {
                    mapping: mapping.name,
                    attribute: "text".to_string(),
                })
            }
        };
        let payload = serde_json::to_string(&RichText::plain(text))?;
        destination.set(mapping, "attributed_text", Value::Text(payload))
    }
}

/// How one table is rebuilt in a migration step
pub struct EntityMapping {
    /// Name used in logs and errors
    pub name: &'static str,
    /// Table being rebuilt; keeps its name across the step
    pub table: &'static str,
    /// `CREATE TABLE` statement for the destination shape
    pub destination_sql: &'static str,
    pub policy: Box<dyn EntityMigrationPolicy>,
}

/// Upgrade from `from` to `from + 1`
pub struct MigrationStep {
    pub from: i32,
    pub mappings: Vec<EntityMapping>,
}

/// All known steps, oldest first
pub fn migration_steps() -> Vec<MigrationStep> {
    vec![MigrationStep {
        from: 1,
        mappings: vec![EntityMapping {
            name: "NoteToNote",
            table: "notes",
            destination_sql: NOTES_V2_SQL,
            policy: Box::new(UpdateToRichTextPolicy),
        }],
    }]
}

/// Outcome of a migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: i32,
    pub to: i32,
    /// Rows rebuilt, across all mappings
    pub migrated_rows: usize,
}

/// Runs migration steps against a connection
pub struct MigrationManager {
    steps: Vec<MigrationStep>,
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new(migration_steps())
    }
}

impl MigrationManager {
    pub fn new(steps: Vec<MigrationStep>) -> Self {
        Self { steps }
    }

    /// Upgrade the store from version `from` to [`SCHEMA_VERSION`]
    ///
    /// Everything happens in one transaction: either every step applies or
    /// the store is left untouched.
    pub fn migrate(&self, conn: &mut Connection, from: i32) -> Result<MigrationReport, MigrationError> {
        self.migrate_to(conn, from, SCHEMA_VERSION)
    }

    pub(crate) fn migrate_to(
        &self,
        conn: &mut Connection,
        from: i32,
        to: i32,
    ) -> Result<MigrationReport, MigrationError> {
        info!(from, to, "Migrating store schema");

        // Table rebuilds must not trip the cascade on the renamed copy
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        let result = self.run_steps(conn, from, to);
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        result
    }

    fn run_steps(
        &self,
        conn: &mut Connection,
        from: i32,
        to: i32,
    ) -> Result<MigrationReport, MigrationError> {
        let tx = conn.transaction()?;
        let mut version = from;
        let mut migrated_rows = 0;

        while version < to {
            let step = self
                .steps
                .iter()
                .find(|s| s.from == version)
                .ok_or(MigrationError::NoPath { from: version, to })?;

            for mapping in &step.mappings {
                migrated_rows += apply_mapping(&tx, mapping)?;
            }
            version += 1;
            debug!(version, "Applied migration step");
        }

        init_auxiliary_tables(&tx)?;
        init_indexes(&tx)?;
        set_schema_version(&tx, version)?;
        tx.commit()?;

        Ok(MigrationReport {
            from,
            to: version,
            migrated_rows,
        })
    }
}

fn apply_mapping(tx: &Transaction<'_>, mapping: &EntityMapping) -> Result<usize, MigrationError> {
    let legacy = format!("{}_migrating", mapping.table);
    tx.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {};",
        mapping.table, legacy
    ))?;
    tx.execute_batch(mapping.destination_sql)?;

    let source_columns = table_columns(tx, &legacy)?;
    let destination_columns = table_columns(tx, mapping.table)?;

    let sources = {
        let mut stmt = tx.prepare(&format!("SELECT * FROM {}", legacy))?;
        let rows = stmt.query_map([], |row| {
            let mut attributes = AttributeMap::new();
            for (i, name) in source_columns.iter().enumerate() {
                attributes.insert(name.clone(), row.get::<_, Value>(i)?);
            }
            Ok(attributes)
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        mapping.table,
        destination_columns.join(", "),
        vec!["?"; destination_columns.len()].join(", ")
    );
    let mut stmt = tx.prepare(&insert)?;
    for source in &sources {
        let mut destination = DestinationRecord::new(destination_columns.clone());
        mapping
            .policy
            .create_destination(source, &mut destination, mapping)?;
        stmt.execute(params_from_iter(destination.into_row()))?;
    }
    drop(stmt);

    tx.execute_batch(&format!("DROP TABLE {};", legacy))?;
    debug!(mapping = mapping.name, rows = sources.len(), "Rebuilt table");
    Ok(sources.len())
}
