//! In-memory object context
//!
//! The context holds every materialized record and is the source of truth
//! for reads. Mutations apply here first and are remembered as pending until
//! the store writes them to SQLite.
//!
//! Every mutation returns the [`ObjectChange`]s it produced, in the order
//! they happened, so the store can forward them to live queries.

use std::collections::{HashMap, HashSet};

use crate::models::{
    EntityKind, Note, NoteId, Notebook, NotebookId, Record, RecordId, RecordRef, RichText,
};
use crate::query::cache::QueryCache;
use crate::storage::persistence::{RecordWrite, WriteSet};

/// A change to one record
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectChange {
    Inserted(Record),
    Updated(Record),
    Deleted(RecordId),
}

#[derive(Debug, Default)]
pub(crate) struct ObjectContext {
    notebooks: HashMap<NotebookId, Notebook>,
    notes: HashMap<NoteId, Note>,
    dirty: HashSet<RecordId>,
    pub(crate) cache: QueryCache,
}

impl ObjectContext {
    /// Build a context from records materialized from storage
    pub(crate) fn materialized(notebooks: Vec<Notebook>, notes: Vec<Note>, cache: QueryCache) -> Self {
        Self {
            notebooks: notebooks.into_iter().map(|n| (n.id, n)).collect(),
            notes: notes.into_iter().map(|n| (n.id, n)).collect(),
            dirty: HashSet::new(),
            cache,
        }
    }

    // ==================== Reads ====================

    pub(crate) fn notebook(&self, id: NotebookId) -> Option<&Notebook> {
        self.notebooks.get(&id)
    }

    pub(crate) fn note(&self, id: NoteId) -> Option<&Note> {
        self.notes.get(&id)
    }

    pub(crate) fn notebooks(&self) -> impl Iterator<Item = &Notebook> {
        self.notebooks.values()
    }

    pub(crate) fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    /// Every record of one kind, in no particular order
    pub(crate) fn records_of(&self, kind: EntityKind) -> Vec<RecordRef<'_>> {
        match kind {
            EntityKind::Notebook => self.notebooks.values().map(RecordRef::Notebook).collect(),
            EntityKind::Note => self.notes.values().map(RecordRef::Note).collect(),
        }
    }

    pub(crate) fn notebook_count(&self) -> usize {
        self.notebooks.len()
    }

    pub(crate) fn note_count(&self) -> usize {
        self.notes.len()
    }

    pub(crate) fn note_count_in(&self, notebook_id: NotebookId) -> usize {
        self.notes
            .values()
            .filter(|note| note.notebook_id == notebook_id)
            .count()
    }

    // ==================== Mutations ====================

    pub(crate) fn insert_notebook(&mut self, notebook: Notebook) -> ObjectChange {
        self.dirty.insert(RecordId::Notebook(notebook.id));
        self.notebooks.insert(notebook.id, notebook.clone());
        ObjectChange::Inserted(Record::Notebook(notebook))
    }

    pub(crate) fn rename_notebook(&mut self, id: NotebookId, name: String) -> Option<ObjectChange> {
        let notebook = self.notebooks.get_mut(&id)?;
        notebook.name = name;
        let updated = notebook.clone();
        self.dirty.insert(RecordId::Notebook(id));
        Some(ObjectChange::Updated(Record::Notebook(updated)))
    }

    /// Delete a notebook and, first, every note it owns
    ///
    /// Owned notes are deleted oldest first.
    pub(crate) fn delete_notebook(&mut self, id: NotebookId) -> Option<Vec<ObjectChange>> {
        if !self.notebooks.contains_key(&id) {
            return None;
        }

        let mut owned: Vec<&Note> = self.notes.values().filter(|n| n.notebook_id == id).collect();
        owned.sort_by(|a, b| (a.creation_date, a.id).cmp(&(b.creation_date, b.id)));
        let owned: Vec<NoteId> = owned.into_iter().map(|n| n.id).collect();

        let mut changes = Vec::with_capacity(owned.len() + 1);
        for note_id in owned {
            if let Some(change) = self.delete_note(note_id) {
                changes.push(change);
            }
        }

        self.notebooks.remove(&id);
        self.dirty.insert(RecordId::Notebook(id));
        changes.push(ObjectChange::Deleted(RecordId::Notebook(id)));
        Some(changes)
    }

    /// Insert a note; the caller has checked the notebook exists
    pub(crate) fn insert_note(&mut self, note: Note) -> ObjectChange {
        self.dirty.insert(RecordId::Note(note.id));
        self.notes.insert(note.id, note.clone());
        ObjectChange::Inserted(Record::Note(note))
    }

    pub(crate) fn update_note_text(&mut self, id: NoteId, text: RichText) -> Option<ObjectChange> {
        let note = self.notes.get_mut(&id)?;
        note.attributed_text = text;
        let updated = note.clone();
        self.dirty.insert(RecordId::Note(id));
        Some(ObjectChange::Updated(Record::Note(updated)))
    }

    pub(crate) fn delete_note(&mut self, id: NoteId) -> Option<ObjectChange> {
        self.notes.remove(&id)?;
        self.dirty.insert(RecordId::Note(id));
        Some(ObjectChange::Deleted(RecordId::Note(id)))
    }

    // ==================== Pending changes ====================

    /// True if any record differs from what storage holds
    pub(crate) fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// True if a flush has anything to write, records or cache
    pub(crate) fn needs_write(&self) -> bool {
        self.has_changes() || self.cache.has_pending()
    }

    /// Writes that bring storage in line with the context
    ///
    /// Parents are written before children and deleted after them, so the
    /// foreign key holds at every statement.
    pub(crate) fn write_set(&self) -> WriteSet {
        let mut upsert_notebooks = Vec::new();
        let mut upsert_notes = Vec::new();
        let mut delete_notes = Vec::new();
        let mut delete_notebooks = Vec::new();

        for id in &self.dirty {
            match *id {
                RecordId::Notebook(id) => match self.notebooks.get(&id) {
                    Some(notebook) => upsert_notebooks.push(notebook.clone()),
                    None => delete_notebooks.push(id),
                },
                RecordId::Note(id) => match self.notes.get(&id) {
                    Some(note) => upsert_notes.push(note.clone()),
                    None => delete_notes.push(id),
                },
            }
        }

        upsert_notebooks.sort_by_key(|n| (n.creation_date, n.id));
        upsert_notes.sort_by_key(|n| (n.creation_date, n.id));
        delete_notes.sort();
        delete_notebooks.sort();

        let records = upsert_notebooks
            .into_iter()
            .map(RecordWrite::UpsertNotebook)
            .chain(upsert_notes.into_iter().map(RecordWrite::UpsertNote))
            .chain(delete_notes.into_iter().map(RecordWrite::DeleteNote))
            .chain(delete_notebooks.into_iter().map(RecordWrite::DeleteNotebook))
            .collect();

        WriteSet {
            records,
            cache: self.cache.pending().to_vec(),
        }
    }

    /// Forget pending changes after a successful write
    pub(crate) fn mark_saved(&mut self) {
        self.dirty.clear();
        self.cache.mark_saved();
    }
}
