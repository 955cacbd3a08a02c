//! What a live query fetches: a filter and a total order

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

use crate::models::{Entity, EntityKind, Note, Notebook, NotebookId};

/// Which records a query matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    All,
    /// Records owned by one notebook
    InNotebook(NotebookId),
}

impl Predicate {
    pub fn matches<T: Entity>(&self, record: &T) -> bool {
        match self {
            Predicate::All => true,
            Predicate::InNotebook(id) => record.notebook_id() == Some(*id),
        }
    }
}

/// Sort order on creation date
///
/// Records created at the same instant are ordered by id, so the order is
/// total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    CreationAscending,
    CreationDescending,
}

impl SortOrder {
    pub fn compare<T: Entity>(&self, a: &T, b: &T) -> Ordering {
        let ascending = (a.creation_date(), a.id()).cmp(&(b.creation_date(), b.id()));
        match self {
            SortOrder::CreationAscending => ascending,
            SortOrder::CreationDescending => ascending.reverse(),
        }
    }
}

/// A filter and order over one record kind
pub struct FetchRequest<T: Entity> {
    pub predicate: Predicate,
    pub order: SortOrder,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Entity> FetchRequest<T> {
    pub fn new(predicate: Predicate, order: SortOrder) -> Self {
        Self {
            predicate,
            order,
            _kind: PhantomData,
        }
    }

    /// Identifies the request; two requests with equal fingerprints fetch
    /// the same records in the same order
    pub fn fingerprint(&self) -> String {
        let kind = match T::KIND {
            EntityKind::Notebook => "notebook",
            EntityKind::Note => "note",
        };
        let predicate = match self.predicate {
            Predicate::All => "all".to_string(),
            Predicate::InNotebook(id) => format!("in:{}", id),
        };
        let order = match self.order {
            SortOrder::CreationAscending => "creation-asc",
            SortOrder::CreationDescending => "creation-desc",
        };
        format!("{}|{}|{}", kind, predicate, order)
    }

    /// Sort records in place by this request's order
    pub fn sort(&self, records: &mut [T]) {
        records.sort_by(|a, b| self.order.compare(a, b));
    }

    /// Index at which `record` belongs in an already sorted slice
    pub fn insertion_point(&self, records: &[T], record: &T) -> usize {
        records.partition_point(|r| self.order.compare(r, record) == Ordering::Less)
    }
}

impl FetchRequest<Notebook> {
    /// Every notebook
    pub fn notebooks(order: SortOrder) -> Self {
        Self::new(Predicate::All, order)
    }
}

impl FetchRequest<Note> {
    /// Notes of one notebook
    pub fn notes_in(notebook: NotebookId, order: SortOrder) -> Self {
        Self::new(Predicate::InNotebook(notebook), order)
    }
}

impl<T: Entity> Clone for FetchRequest<T> {
    fn clone(&self) -> Self {
        Self::new(self.predicate, self.order)
    }
}

impl<T: Entity> fmt::Debug for FetchRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("kind", &T::KIND)
            .field("predicate", &self.predicate)
            .field("order", &self.order)
            .finish()
    }
}
