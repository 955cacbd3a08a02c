//! Live queries over the store
//!
//! - `request`: what to fetch and in which order
//! - `change`: the diff protocol observers receive
//! - `live`: the self-updating result set
//! - `cache`: persisted orderings keyed by name

pub mod cache;
pub mod change;
pub mod live;
pub mod request;

pub use cache::{CacheEntry, CacheKey};
pub use change::{BatchEvent, Change, ChangeBatch, ChangeObserver};
pub use live::{LiveQuery, QueryError};
pub use request::{FetchRequest, Predicate, SortOrder};
