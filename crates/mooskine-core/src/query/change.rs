//! Change notifications delivered by live queries
//!
//! A [`ChangeBatch`] is one begin/end bracket: observers apply all of its
//! changes as a single transaction. Within a batch, each change's indices
//! refer to the result set as it was just before that change.
//!
//! Results are sectioned by a constant key, so a query has one section
//! while it has results and none while empty. Sections are only ever
//! inserted or deleted; there is no way to express a section update or move.

/// One step of a diff script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    SectionInserted(usize),
    SectionDeleted(usize),
    RowInserted { new_index: usize },
    RowDeleted { old_index: usize },
    RowUpdated { index: usize },
    RowMoved { old_index: usize, new_index: usize },
}

/// Event view of a batch, for observers that think in begin/end callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEvent<'a> {
    Begin,
    Change(&'a Change),
    End,
}

/// Ordered changes produced by one store mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    changes: Vec<Change>,
}

impl ChangeBatch {
    pub(crate) fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// `Begin`, every change in order, then `End`
    pub fn events(&self) -> impl Iterator<Item = BatchEvent<'_>> {
        std::iter::once(BatchEvent::Begin)
            .chain(self.changes.iter().map(BatchEvent::Change))
            .chain(std::iter::once(BatchEvent::End))
    }
}

impl From<Vec<Change>> for ChangeBatch {
    fn from(changes: Vec<Change>) -> Self {
        Self { changes }
    }
}

/// Receives change batches from a live query
///
/// Closures taking `&ChangeBatch` are observers too.
pub trait ChangeObserver {
    fn apply(&mut self, batch: &ChangeBatch);
}

impl<F> ChangeObserver for F
where
    F: FnMut(&ChangeBatch),
{
    fn apply(&mut self, batch: &ChangeBatch) {
        self(batch)
    }
}
