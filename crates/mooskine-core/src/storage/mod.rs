//! Storage layer
//!
//! Handles the SQLite-backed persisted store.
//!
//! ## Architecture
//!
//! - **Object context** (in memory): source of truth for reads, see `context`
//! - **SQLite**: durable copy, written in batches when the store flushes
//!
//! Older stores are upgraded through the `migration` module when opened.

pub mod error;
pub mod migration;
pub mod persistence;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use migration::{
    EntityMapping, EntityMigrationPolicy, MigrationError, MigrationManager, MigrationReport,
    UpdateToRichTextPolicy,
};
pub use persistence::SqlitePersistence;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
