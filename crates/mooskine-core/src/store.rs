//! Unified storage interface
//!
//! The `Store` owns the in-memory object context and keeps SQLite in step
//! with it:
//! - the object context is the source of truth for every read
//! - SQLite is the durable copy, written on `save`/`flush`
//!
//! Every mutation is published to subscribed live queries as one batch of
//! object changes.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open(Config::load()?);
//!
//! let groceries = store.create_notebook("Groceries");
//! let milk = store.create_note_with_text(groceries.id, "Milk")?;
//!
//! store.flush();
//! ```
//!
//! `Store` is a cheap, cloneable handle for a single thread. Clones share
//! the same context and connection.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, StampClock, SystemClock};
use crate::config::Config;
use crate::context::{ObjectChange, ObjectContext};
use crate::models::{Entity, Note, NoteId, Notebook, NotebookId, RichText};
use crate::query::cache::{CacheEntry, CacheKey, QueryCache};
use crate::query::live::ChangeSink;
use crate::query::request::{Predicate, SortOrder};
use crate::storage::{MigrationReport, SqlitePersistence, StorageError};

/// Errors from store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Notebook {0} does not exist")]
    NotebookNotFound(NotebookId),

    #[error("Note {0} does not exist")]
    NoteNotFound(NoteId),

    #[error("Auto-flush interval must be greater than zero, got {0:?}")]
    InvalidAutoFlushInterval(Duration),
}

/// Host application lifecycle transitions that force a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    DidEnterBackground,
    WillTerminate,
}

/// Handle identifying one live query subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionId(u64);

/// Log an unrecoverable error and abort the caller
///
/// Aborting is a panic. Hosts that build with `panic = "abort"` get a
/// process abort; otherwise the panic unwinds the calling thread.
pub(crate) fn fatal(context: &str, err: &dyn std::error::Error) -> ! {
    error!(error = %err, "{}", context);
    panic!("{}: {}", context, err);
}

struct StoreInner {
    context: ObjectContext,
    persistence: SqlitePersistence,
    clock: StampClock,
    config: Config,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
    /// Mutations not yet handed to every subscriber, oldest first
    pending: VecDeque<(u64, Vec<ObjectChange>)>,
    next_mutation: u64,
    publishing: bool,
    auto_flush: Option<JoinHandle<()>>,
    write_count: u64,
}

struct Subscriber {
    id: SubscriptionId,
    sink: Weak<dyn ChangeSink>,
    /// First mutation not already in the subscriber's initial fetch
    from: u64,
}

impl StoreInner {
    fn latest_creation_date(&self) -> Option<DateTime<Utc>> {
        let notebooks = self.context.notebooks().map(|n| n.creation_date);
        let notes = self.context.notes().map(|n| n.creation_date);
        notebooks.chain(notes).max()
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(task) = self.auto_flush.take() {
            task.abort();
        }
    }
}

/// Unified storage interface for Mooskine
#[derive(Clone)]
pub struct Store {
    inner: Rc<RefCell<StoreInner>>,
}

impl Store {
    /// Open the store named by `config`
    ///
    /// Creates the store on first run and migrates older stores. Any
    /// failure here is fatal: it is logged and then raised as a panic,
    /// which aborts the process when the host builds with
    /// `panic = "abort"`. Use [`Store::try_open`] to handle it instead.
    pub fn open(config: Config) -> Self {
        match Self::try_open(config) {
            Ok(store) => store,
            Err(e) => fatal("Failed to open store", &e),
        }
    }

    /// Open the store named by `config`, reporting failures
    pub fn try_open(config: Config) -> Result<Self, StoreError> {
        let persistence = SqlitePersistence::open(&config.store_path())?;
        Self::with_persistence(persistence, config)
    }

    /// Open an empty store that lives only in memory
    pub fn open_in_memory(config: Config) -> Self {
        match Self::try_open_in_memory(config) {
            Ok(store) => store,
            Err(e) => fatal("Failed to open in-memory store", &e),
        }
    }

    pub fn try_open_in_memory(config: Config) -> Result<Self, StoreError> {
        Self::with_persistence(SqlitePersistence::open_in_memory()?, config)
    }

    fn with_persistence(persistence: SqlitePersistence, config: Config) -> Result<Self, StoreError> {
        let notebooks = persistence.load_notebooks()?;
        let notes = persistence.load_notes()?;
        let cache = QueryCache::from_rows(persistence.load_query_cache()?);

        info!(
            notebooks = notebooks.len(),
            notes = notes.len(),
            "Loaded store"
        );

        let mut inner = StoreInner {
            context: ObjectContext::materialized(notebooks, notes, cache),
            persistence,
            clock: StampClock::new(Box::new(SystemClock)),
            config,
            subscribers: Vec::new(),
            next_subscription: 0,
            pending: VecDeque::new(),
            next_mutation: 0,
            publishing: false,
            auto_flush: None,
            write_count: 0,
        };
        if let Some(latest) = inner.latest_creation_date() {
            inner.clock.observe(latest);
        }

        Ok(Self {
            inner: Rc::new(RefCell::new(inner)),
        })
    }

    /// Stamp new records with `clock` instead of the wall clock
    pub fn with_clock(self, clock: impl Clock + 'static) -> Self {
        {
            let mut inner = self.inner.borrow_mut();
            let mut stamps = StampClock::new(Box::new(clock));
            if let Some(latest) = inner.latest_creation_date() {
                stamps.observe(latest);
            }
            inner.clock = stamps;
        }
        self
    }

    pub fn config(&self) -> Config {
        self.inner.borrow().config.clone()
    }

    /// Migration performed while opening, if any
    pub fn migration(&self) -> Option<MigrationReport> {
        self.inner.borrow().persistence.migration().cloned()
    }

    // ==================== Notebook Operations ====================

    /// Create a notebook, stamped with the current time
    pub fn create_notebook(&self, name: impl Into<String>) -> Notebook {
        let (notebook, change) = {
            let mut inner = self.inner.borrow_mut();
            let now = inner.clock.stamp();
            let notebook = Notebook::insert_new(name, now);
            let change = inner.context.insert_notebook(notebook.clone());
            (notebook, change)
        };
        debug!(id = %notebook.id, "Created notebook");
        self.publish(vec![change]);
        notebook
    }

    pub fn rename_notebook(
        &self,
        id: NotebookId,
        name: impl Into<String>,
    ) -> Result<Notebook, StoreError> {
        let change = self
            .inner
            .borrow_mut()
            .context
            .rename_notebook(id, name.into())
            .ok_or(StoreError::NotebookNotFound(id))?;
        let renamed = match &change {
            ObjectChange::Updated(record) => Notebook::from_record(record).cloned(),
            _ => None,
        };
        self.publish(vec![change]);
        renamed.ok_or(StoreError::NotebookNotFound(id))
    }

    /// Delete a notebook together with all of its notes
    ///
    /// Live queries see the notes go first, then the notebook, in one batch.
    /// Its remembered note ordering is dropped too.
    pub fn delete_notebook(&self, id: NotebookId) -> Result<(), StoreError> {
        let changes = {
            let mut inner = self.inner.borrow_mut();
            let changes = inner
                .context
                .delete_notebook(id)
                .ok_or(StoreError::NotebookNotFound(id))?;
            inner.context.cache.remove(&CacheKey::notes_in(id));
            changes
        };
        debug!(id = %id, notes = changes.len() - 1, "Deleted notebook");
        self.publish(changes);
        Ok(())
    }

    pub fn notebook(&self, id: NotebookId) -> Option<Notebook> {
        self.inner.borrow().context.notebook(id).cloned()
    }

    /// All notebooks, oldest first
    pub fn notebooks(&self) -> Vec<Notebook> {
        let mut notebooks: Vec<Notebook> = self.fetch(&Predicate::All);
        notebooks.sort_by(|a, b| SortOrder::CreationAscending.compare(a, b));
        notebooks
    }

    pub fn notebook_count(&self) -> usize {
        self.inner.borrow().context.notebook_count()
    }

    /// Materialize a notebook from storage, ignoring unsaved changes
    pub fn refetch_notebook(&self, id: NotebookId) -> Result<Option<Notebook>, StoreError> {
        Ok(self.inner.borrow().persistence.load_notebook(id)?)
    }

    // ==================== Note Operations ====================

    /// Create a note carrying the configured default text
    pub fn create_note(&self, notebook_id: NotebookId) -> Result<Note, StoreError> {
        let text = self.inner.borrow().config.default_note_text.clone();
        self.create_note_with_text(notebook_id, RichText::plain(text))
    }

    /// Create a note in `notebook_id`, stamped with the current time
    pub fn create_note_with_text(
        &self,
        notebook_id: NotebookId,
        text: impl Into<RichText>,
    ) -> Result<Note, StoreError> {
        let (note, change) = {
            let mut inner = self.inner.borrow_mut();
            if inner.context.notebook(notebook_id).is_none() {
                return Err(StoreError::NotebookNotFound(notebook_id));
            }
            let now = inner.clock.stamp();
            let note = Note::insert_new(notebook_id, text.into(), now);
            let change = inner.context.insert_note(note.clone());
            (note, change)
        };
        debug!(id = %note.id, notebook = %notebook_id, "Created note");
        self.publish(vec![change]);
        Ok(note)
    }

    pub fn update_note_text(
        &self,
        id: NoteId,
        text: impl Into<RichText>,
    ) -> Result<Note, StoreError> {
        let change = self
            .inner
            .borrow_mut()
            .context
            .update_note_text(id, text.into())
            .ok_or(StoreError::NoteNotFound(id))?;
        let updated = match &change {
            ObjectChange::Updated(record) => Note::from_record(record).cloned(),
            _ => None,
        };
        self.publish(vec![change]);
        updated.ok_or(StoreError::NoteNotFound(id))
    }

    pub fn delete_note(&self, id: NoteId) -> Result<(), StoreError> {
        let change = self
            .inner
            .borrow_mut()
            .context
            .delete_note(id)
            .ok_or(StoreError::NoteNotFound(id))?;
        self.publish(vec![change]);
        Ok(())
    }

    pub fn note(&self, id: NoteId) -> Option<Note> {
        self.inner.borrow().context.note(id).cloned()
    }

    /// Notes of one notebook, oldest first
    pub fn notes_in(&self, notebook_id: NotebookId) -> Vec<Note> {
        let mut notes: Vec<Note> = self.fetch(&Predicate::InNotebook(notebook_id));
        notes.sort_by(|a, b| SortOrder::CreationAscending.compare(a, b));
        notes
    }

    pub fn note_count(&self) -> usize {
        self.inner.borrow().context.note_count()
    }

    /// Number of notes in one notebook, 0 for an unknown notebook
    pub fn note_count_in(&self, notebook_id: NotebookId) -> usize {
        self.inner.borrow().context.note_count_in(notebook_id)
    }

    /// Materialize a note from storage, ignoring unsaved changes
    pub fn refetch_note(&self, id: NoteId) -> Result<Option<Note>, StoreError> {
        Ok(self.inner.borrow().persistence.load_note(id)?)
    }

    // ==================== Persistence ====================

    /// True if any record has changed since the last successful save
    pub fn has_changes(&self) -> bool {
        self.inner.borrow().context.has_changes()
    }

    /// Number of writes committed since the store was opened
    pub fn write_count(&self) -> u64 {
        self.inner.borrow().write_count
    }

    /// Write pending changes in one transaction
    ///
    /// Returns `Ok(false)` without touching storage when nothing is pending.
    /// On error the changes stay pending and a later save retries them.
    pub fn save(&self) -> Result<bool, StoreError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.context.needs_write() {
            return Ok(false);
        }

        let writes = inner.context.write_set();
        inner.persistence.write(&writes)?;
        inner.context.mark_saved();
        inner.write_count += 1;

        debug!(
            records = writes.records.len(),
            cache = writes.cache.len(),
            "Flushed store"
        );
        Ok(true)
    }

    /// Save, logging instead of returning any error
    pub fn flush(&self) {
        if let Err(e) = self.save() {
            let transient = matches!(&e, StoreError::Storage(err) if err.is_transient());
            warn!(error = %e, transient, "Flush failed, changes stay pending");
        }
    }

    /// Flush now, then every `interval`, until stopped
    ///
    /// Replaces any earlier schedule. A zero interval is refused and leaves
    /// the current schedule, if any, running.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio `LocalSet`.
    pub fn auto_flush(&self, interval: Duration) -> Result<(), StoreError> {
        if interval.is_zero() {
            return Err(StoreError::InvalidAutoFlushInterval(interval));
        }

        let store = Rc::downgrade(&self.inner);
        let task = tokio::task::spawn_local(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = store.upgrade() else {
                    break;
                };
                Store { inner }.flush();
            }
        });

        if let Some(previous) = self.inner.borrow_mut().auto_flush.replace(task) {
            previous.abort();
        }
        debug!(?interval, "Scheduled auto-flush");
        Ok(())
    }

    pub fn stop_auto_flush(&self) {
        if let Some(task) = self.inner.borrow_mut().auto_flush.take() {
            task.abort();
            debug!("Stopped auto-flush");
        }
    }

    pub fn is_auto_flushing(&self) -> bool {
        self.inner
            .borrow()
            .auto_flush
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Flush on the way into the background or out of the process
    pub fn handle_lifecycle(&self, event: LifecycleEvent) {
        debug!(?event, "Lifecycle flush");
        self.flush();
    }

    /// Stop auto-flushing and write what is pending
    pub fn close(self) {
        self.stop_auto_flush();
        self.flush();
    }

    // ==================== Live queries ====================

    /// Drop a remembered query ordering, or all of them with `None`
    pub fn delete_query_cache(&self, key: Option<&CacheKey>) {
        let mut inner = self.inner.borrow_mut();
        match key {
            Some(key) => inner.context.cache.remove(key),
            None => inner.context.cache.clear(),
        }
    }

    /// Number of live queries currently subscribed
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.sink.strong_count() > 0)
            .count()
    }

    /// Current records of one kind matching `predicate`, unordered
    pub(crate) fn fetch<T: Entity>(&self, predicate: &Predicate) -> Vec<T> {
        let inner = self.inner.borrow();
        inner
            .context
            .records_of(T::KIND)
            .into_iter()
            .filter_map(T::from_ref)
            .filter(|record| predicate.matches(*record))
            .cloned()
            .collect()
    }

    pub(crate) fn cached_ordering(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.borrow().context.cache.get(key).cloned()
    }

    pub(crate) fn store_ordering(&self, key: CacheKey, entry: CacheEntry) {
        self.inner.borrow_mut().context.cache.put(key, entry);
    }

    /// Mutations already applied to the context count as seen by `sink`
    pub(crate) fn subscribe(&self, sink: Weak<dyn ChangeSink>) -> SubscriptionId {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        let from = inner.next_mutation;
        inner.subscribers.push(Subscriber { id, sink, from });
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.inner
            .borrow_mut()
            .subscribers
            .retain(|subscriber| subscriber.id != id);
    }

    /// Hand one mutation's changes to every subscriber
    ///
    /// The store is not borrowed while subscribers run, so observers may
    /// read from or write to it. A mutation made from inside an observer is
    /// queued and delivered once every subscriber has seen the current one.
    fn publish(&self, changes: Vec<ObjectChange>) {
        {
            let mut inner = self.inner.borrow_mut();
            let seq = inner.next_mutation;
            inner.next_mutation += 1;
            inner.pending.push_back((seq, changes));
            if inner.publishing {
                return;
            }
            inner.publishing = true;
        }

        let _publishing = PublishingGuard(&self.inner);
        loop {
            let (changes, sinks) = {
                let mut inner = self.inner.borrow_mut();
                let Some((seq, changes)) = inner.pending.pop_front() else {
                    break;
                };
                inner.subscribers.retain(|s| s.sink.strong_count() > 0);
                let sinks: Vec<Rc<dyn ChangeSink>> = inner
                    .subscribers
                    .iter()
                    .filter(|s| s.from <= seq)
                    .filter_map(|s| s.sink.upgrade())
                    .collect();
                (changes, sinks)
            };
            for sink in sinks {
                sink.process(&changes);
            }
        }
    }
}

/// Clears the publishing state, also when an observer panics
struct PublishingGuard<'a>(&'a RefCell<StoreInner>);

impl Drop for PublishingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.0.try_borrow_mut() {
            inner.publishing = false;
            inner.pending.clear();
        }
    }
}
