//! Mooskine Core Library
//!
//! This crate provides the data layer of Mooskine, a note-taking app in
//! which notebooks own notes.
//!
//! # Architecture
//!
//! - **Object context**: in-memory source of truth for every read
//! - **SQLite**: durable copy, written on flush, versioned and migrated
//!
//! List screens observe [`LiveQuery`]s, which report fine-grained diffs
//! as the store changes.
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open(Config::load()?);
//!
//! let groceries = store.create_notebook("Groceries");
//! store.create_note_with_text(groceries.id, "Milk")?;
//!
//! let notes = LiveQuery::start(
//!     &store,
//!     FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
//!     Some(CacheKey::notes_in(groceries.id)),
//!     |batch: &ChangeBatch| println!("{:?}", batch.changes()),
//! );
//!
//! store.auto_flush(store.config().auto_flush_interval())?;
//! ```
//!
//! # Modules
//!
//! - `store`: Unified storage interface (main entry point)
//! - `models`: Notebooks, notes and rich text
//! - `query`: Live queries and their change protocol
//! - `storage`: SQLite schema, persistence and migrations
//! - `clock`: Creation timestamp source
//! - `config`: Application configuration
//! - `logging`: Subscriber setup for host shells

pub mod clock;
pub mod config;
mod context;
pub mod logging;
pub mod models;
pub mod query;
pub mod storage;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use context::ObjectChange;
pub use models::{
    Entity, EntityKind, Note, NoteId, Notebook, NotebookId, Record, RecordId, RichText,
    RichTextError, Style, StyleSpan,
};
pub use query::{
    CacheKey, Change, ChangeBatch, ChangeObserver, FetchRequest, LiveQuery, Predicate,
    QueryError, SortOrder,
};
pub use storage::{MigrationReport, StorageError};
pub use store::{LifecycleEvent, Store, StoreError};
