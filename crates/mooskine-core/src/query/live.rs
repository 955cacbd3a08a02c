//! Live queries
//!
//! A [`LiveQuery`] holds the ordered results of a [`FetchRequest`] and keeps
//! them current as the store changes. Every store mutation that touches the
//! result set reaches the observer as one [`ChangeBatch`].
//!
//! ## Usage
//!
//! ```ignore
//! let request = FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending);
//! let query = LiveQuery::start(&store, request, Some(CacheKey::notes_in(groceries.id)),
//!     |batch: &ChangeBatch| table.apply(batch));
//!
//! let first = query.object(0);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::context::ObjectChange;
use crate::models::{Entity, EntityKind, NotebookId};
use crate::query::cache::{CacheEntry, CacheKey};
use crate::query::change::{Change, ChangeBatch, ChangeObserver};
use crate::query::request::{FetchRequest, Predicate};
use crate::store::{fatal, Store, SubscriptionId};

/// Errors starting a live query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Notebook {0} does not exist")]
    UnknownNotebook(NotebookId),

    #[error("{kind:?} records cannot be filtered by notebook")]
    InvalidPredicate { kind: EntityKind },

    #[error("Query cache '{key}' was stored for a different request")]
    CacheConflict { key: CacheKey },
}

/// Receives the store's change stream
///
/// Calls never nest: the store holds back mutations made by observers until
/// the current one has reached every sink.
pub(crate) trait ChangeSink {
    fn process(&self, changes: &[ObjectChange]);
}

struct QueryState<T: Entity> {
    request: FetchRequest<T>,
    objects: Vec<T>,
    /// Taken out while it runs, so it may read the query
    observer: Option<Box<dyn ChangeObserver>>,
}

impl<T: Entity> QueryState<T> {
    fn position(&self, id: T::Id) -> Option<usize> {
        self.objects.iter().position(|o| o.id() == id)
    }

    /// Fold object changes into the result set, recording the diff
    fn apply(&mut self, changes: &[ObjectChange]) -> ChangeBatch {
        let mut batch = ChangeBatch::default();
        for change in changes {
            match change {
                ObjectChange::Inserted(record) => {
                    if let Some(record) = T::from_record(record) {
                        if self.request.predicate.matches(record) {
                            self.insert(record.clone(), &mut batch);
                        }
                    }
                }
                ObjectChange::Updated(record) => {
                    if let Some(record) = T::from_record(record) {
                        let matches = self.request.predicate.matches(record);
                        match (self.position(record.id()), matches) {
                            (Some(index), true) => self.update(index, record.clone(), &mut batch),
                            (Some(index), false) => self.remove(index, &mut batch),
                            (None, true) => self.insert(record.clone(), &mut batch),
                            (None, false) => {}
                        }
                    }
                }
                ObjectChange::Deleted(id) => {
                    if let Some(index) = T::from_record_id(*id).and_then(|id| self.position(id)) {
                        self.remove(index, &mut batch);
                    }
                }
            }
        }
        batch
    }

    fn insert(&mut self, record: T, batch: &mut ChangeBatch) {
        if self.objects.is_empty() {
            batch.push(Change::SectionInserted(0));
        }
        let new_index = self.request.insertion_point(&self.objects, &record);
        self.objects.insert(new_index, record);
        batch.push(Change::RowInserted { new_index });
    }

    fn remove(&mut self, old_index: usize, batch: &mut ChangeBatch) {
        self.objects.remove(old_index);
        batch.push(Change::RowDeleted { old_index });
        if self.objects.is_empty() {
            batch.push(Change::SectionDeleted(0));
        }
    }

    fn update(&mut self, old_index: usize, record: T, batch: &mut ChangeBatch) {
        self.objects.remove(old_index);
        let new_index = self.request.insertion_point(&self.objects, &record);
        self.objects.insert(new_index, record);
        if new_index == old_index {
            batch.push(Change::RowUpdated { index: old_index });
        } else {
            batch.push(Change::RowMoved {
                old_index,
                new_index,
            });
        }
    }
}

impl<T: Entity> ChangeSink for RefCell<QueryState<T>> {
    fn process(&self, changes: &[ObjectChange]) {
        let (batch, mut observer) = {
            let mut state = self.borrow_mut();
            let batch = state.apply(changes);
            if batch.is_empty() {
                return;
            }
            match state.observer.take() {
                Some(observer) => (batch, observer),
                None => return,
            }
        };
        observer.apply(&batch);
        self.borrow_mut().observer = Some(observer);
    }
}

/// Ordered, self-updating results of a fetch request
pub struct LiveQuery<T: Entity> {
    state: Rc<RefCell<QueryState<T>>>,
    store: Store,
    subscription: Option<SubscriptionId>,
    cache_key: Option<CacheKey>,
}

impl<T: Entity> LiveQuery<T> {
    /// Fetch, order and subscribe
    ///
    /// Fetch failures are fatal: logged, then raised as a panic that aborts
    /// the process under `panic = "abort"`. See [`LiveQuery::try_start`]
    /// for the fallible form.
    pub fn start<O>(
        store: &Store,
        request: FetchRequest<T>,
        cache_key: Option<CacheKey>,
        observer: O,
    ) -> Self
    where
        O: ChangeObserver + 'static,
    {
        match Self::try_start(store, request, cache_key, observer) {
            Ok(query) => query,
            Err(e) => fatal("Live query fetch failed", &e),
        }
    }

    pub fn try_start<O>(
        store: &Store,
        request: FetchRequest<T>,
        cache_key: Option<CacheKey>,
        observer: O,
    ) -> Result<Self, QueryError>
    where
        O: ChangeObserver + 'static,
    {
        if let Predicate::InNotebook(notebook) = request.predicate {
            if T::KIND == EntityKind::Notebook {
                return Err(QueryError::InvalidPredicate { kind: T::KIND });
            }
            if store.notebook(notebook).is_none() {
                return Err(QueryError::UnknownNotebook(notebook));
            }
        }

        let mut objects = store.fetch::<T>(&request.predicate);
        let cached = match &cache_key {
            Some(key) => store.cached_ordering(key),
            None => None,
        };

        match (&cache_key, cached) {
            (Some(key), Some(entry)) => {
                if entry.fingerprint != request.fingerprint() {
                    return Err(QueryError::CacheConflict { key: key.clone() });
                }
                match reorder(objects, &entry.ordering) {
                    Ok(ordered) => {
                        debug!(key = %key, count = ordered.len(), "Reusing cached ordering");
                        objects = ordered;
                    }
                    Err(mut fresh) => {
                        debug!(key = %key, "Cached ordering is stale, sorting");
                        request.sort(&mut fresh);
                        objects = fresh;
                    }
                }
            }
            _ => request.sort(&mut objects),
        }

        let state = Rc::new(RefCell::new(QueryState {
            request,
            objects,
            observer: Some(Box::new(observer)),
        }));
        let sink: Rc<dyn ChangeSink> = state.clone();
        let subscription = store.subscribe(Rc::downgrade(&sink));

        Ok(Self {
            state,
            store: store.clone(),
            subscription: Some(subscription),
            cache_key,
        })
    }

    /// 1 while there are results, 0 when empty
    pub fn section_count(&self) -> usize {
        usize::from(!self.state.borrow().objects.is_empty())
    }

    pub fn object_count(&self, section: usize) -> usize {
        match section {
            0 => self.state.borrow().objects.len(),
            _ => 0,
        }
    }

    pub fn object(&self, index: usize) -> Option<T> {
        self.state.borrow().objects.get(index).cloned()
    }

    pub fn objects(&self) -> Vec<T> {
        self.state.borrow().objects.clone()
    }

    pub fn index_of(&self, id: T::Id) -> Option<usize> {
        self.state.borrow().position(id)
    }

    pub fn request(&self) -> FetchRequest<T> {
        self.state.borrow().request.clone()
    }

    pub fn cache_key(&self) -> Option<&CacheKey> {
        self.cache_key.as_ref()
    }

    /// Unsubscribe and remember the ordering under the cache key
    pub fn stop(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        self.store.unsubscribe(subscription);

        if let Some(key) = self.cache_key.clone() {
            let state = self.state.borrow();
            let entry = CacheEntry {
                fingerprint: state.request.fingerprint(),
                ordering: state.objects.iter().map(|o| o.id().to_string()).collect(),
            };
            self.store.store_ordering(key, entry);
        }
    }
}

impl<T: Entity> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Arrange `objects` in the cached order
///
/// Gives the objects back untouched when the cached ids are not exactly the
/// current ones.
fn reorder<T: Entity>(objects: Vec<T>, ordering: &[String]) -> Result<Vec<T>, Vec<T>> {
    if objects.len() != ordering.len() {
        return Err(objects);
    }

    let mut by_id: HashMap<String, T> = objects
        .into_iter()
        .map(|o| (o.id().to_string(), o))
        .collect();

    let mut ordered = Vec::with_capacity(ordering.len());
    for id in ordering {
        match by_id.remove(id) {
            Some(object) => ordered.push(object),
            None => {
                ordered.extend(by_id.into_values());
                return Err(ordered);
            }
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{Note, Notebook, Record, RichText};
    use crate::query::request::SortOrder;
    use chrono::{Duration, Utc};

    type Batches = Rc<RefCell<Vec<ChangeBatch>>>;

    fn recorder() -> (Batches, impl FnMut(&ChangeBatch) + 'static) {
        let batches: Batches = Rc::new(RefCell::new(Vec::new()));
        let sink = batches.clone();
        (batches, move |batch: &ChangeBatch| {
            sink.borrow_mut().push(batch.clone())
        })
    }

    fn store() -> Store {
        Store::open_in_memory(Config::default())
    }

    fn texts(query: &LiveQuery<Note>) -> Vec<String> {
        query.objects().iter().map(|n| n.text().to_string()).collect()
    }

    #[test]
    fn test_initial_fetch_matches_filter_in_order() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let work = store.create_notebook("Work");
        store.create_note_with_text(groceries.id, "Milk").unwrap();
        store.create_note_with_text(work.id, "Memo").unwrap();
        store.create_note_with_text(groceries.id, "Eggs").unwrap();

        let (_, observer) = recorder();
        let query = LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
            None,
            observer,
        );

        assert_eq!(query.section_count(), 1);
        assert_eq!(query.object_count(0), 2);
        assert_eq!(query.object_count(1), 0);
        assert_eq!(texts(&query), vec!["Milk", "Eggs"]);
        assert!(query.objects().iter().all(|n| n.notebook_id == groceries.id));
    }

    #[test]
    fn test_groceries_delete_emits_one_batch() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let milk = store.create_note_with_text(groceries.id, "Milk").unwrap();
        store.create_note_with_text(groceries.id, "Eggs").unwrap();

        let (batches, observer) = recorder();
        let query = LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
            None,
            observer,
        );

        store.delete_note(milk.id).unwrap();

        assert_eq!(
            *batches.borrow(),
            vec![ChangeBatch::from(vec![Change::RowDeleted { old_index: 0 }])]
        );
        assert_eq!(texts(&query), vec!["Eggs"]);
    }

    #[test]
    fn test_first_insert_adds_section() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let (batches, observer) = recorder();
        let query = LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
            None,
            observer,
        );
        assert_eq!(query.section_count(), 0);

        store.create_note(groceries.id).unwrap();

        assert_eq!(
            *batches.borrow(),
            vec![ChangeBatch::from(vec![
                Change::SectionInserted(0),
                Change::RowInserted { new_index: 0 },
            ])]
        );
        assert_eq!(query.section_count(), 1);
        assert_eq!(texts(&query), vec!["New note"]);
    }

    #[test]
    fn test_last_delete_removes_section() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let milk = store.create_note_with_text(groceries.id, "Milk").unwrap();
        let (batches, observer) = recorder();
        let query = LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
            None,
            observer,
        );

        store.delete_note(milk.id).unwrap();

        assert_eq!(
            batches.borrow()[0].changes(),
            &[Change::RowDeleted { old_index: 0 }, Change::SectionDeleted(0)]
        );
        assert_eq!(query.section_count(), 0);
    }

    #[test]
    fn test_update_reports_row_updated() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        store.create_note_with_text(groceries.id, "Milk").unwrap();
        let eggs = store.create_note_with_text(groceries.id, "Eggs").unwrap();
        let (batches, observer) = recorder();
        let query = LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
            None,
            observer,
        );

        store
            .update_note_text(eggs.id, RichText::plain("Free-range eggs"))
            .unwrap();

        assert_eq!(
            batches.borrow()[0].changes(),
            &[Change::RowUpdated { index: 1 }]
        );
        assert_eq!(texts(&query), vec!["Milk", "Free-range eggs"]);
    }

    #[test]
    fn test_descending_order_inserts_at_top() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        store.create_note_with_text(groceries.id, "Milk").unwrap();
        let (batches, observer) = recorder();
        let query = LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationDescending),
            None,
            observer,
        );

        store.create_note_with_text(groceries.id, "Eggs").unwrap();

        assert_eq!(
            batches.borrow()[0].changes(),
            &[Change::RowInserted { new_index: 0 }]
        );
        assert_eq!(texts(&query), vec!["Eggs", "Milk"]);
    }

    #[test]
    fn test_unrelated_changes_are_not_delivered() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let work = store.create_notebook("Work");
        let (batches, observer) = recorder();
        let _query = LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
            None,
            observer,
        );

        store.create_note_with_text(work.id, "Memo").unwrap();
        store.rename_notebook(groceries.id, "Shopping").unwrap();

        assert!(batches.borrow().is_empty());
    }

    #[test]
    fn test_notebook_cascade_is_one_batch() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        store.create_note_with_text(groceries.id, "Milk").unwrap();
        store.create_note_with_text(groceries.id, "Eggs").unwrap();

        let (note_batches, note_observer) = recorder();
        let _notes = LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
            None,
            note_observer,
        );
        let (notebook_batches, notebook_observer) = recorder();
        let notebooks = LiveQuery::start(
            &store,
            FetchRequest::<Notebook>::notebooks(SortOrder::CreationAscending),
            None,
            notebook_observer,
        );

        store.delete_notebook(groceries.id).unwrap();

        assert_eq!(
            *note_batches.borrow(),
            vec![ChangeBatch::from(vec![
                Change::RowDeleted { old_index: 0 },
                Change::RowDeleted { old_index: 0 },
                Change::SectionDeleted(0),
            ])]
        );
        assert_eq!(
            *notebook_batches.borrow(),
            vec![ChangeBatch::from(vec![
                Change::RowDeleted { old_index: 0 },
                Change::SectionDeleted(0),
            ])]
        );
        assert_eq!(notebooks.object_count(0), 0);
    }

    #[test]
    fn test_unknown_notebook_is_rejected() {
        let store = store();
        let missing = NotebookId::new();
        let (_, observer) = recorder();
        let result = LiveQuery::try_start(
            &store,
            FetchRequest::notes_in(missing, SortOrder::CreationAscending),
            None,
            observer,
        );
        assert_eq!(result.err(), Some(QueryError::UnknownNotebook(missing)));
    }

    #[test]
    #[should_panic(expected = "Live query fetch failed")]
    fn test_start_on_unknown_notebook_is_fatal() {
        let store = store();
        let (_, observer) = recorder();
        LiveQuery::start(
            &store,
            FetchRequest::notes_in(NotebookId::new(), SortOrder::CreationAscending),
            None,
            observer,
        );
    }

    #[test]
    fn test_notebook_query_cannot_filter_by_notebook() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let (_, observer) = recorder();
        let result = LiveQuery::<Notebook>::try_start(
            &store,
            FetchRequest::new(Predicate::InNotebook(groceries.id), SortOrder::CreationAscending),
            None,
            observer,
        );
        assert_eq!(
            result.err(),
            Some(QueryError::InvalidPredicate {
                kind: EntityKind::Notebook
            })
        );
    }

    #[test]
    fn test_stop_unsubscribes() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let (batches, observer) = recorder();
        let query = LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
            None,
            observer,
        );
        assert_eq!(store.subscriber_count(), 1);

        query.stop();
        store.create_note(groceries.id).unwrap();

        assert_eq!(store.subscriber_count(), 0);
        assert!(batches.borrow().is_empty());
    }

    #[test]
    fn test_restart_with_cache_key_reproduces_order() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        for text in ["Milk", "Eggs", "Bread"] {
            store.create_note_with_text(groceries.id, text).unwrap();
        }
        let key = CacheKey::notes_in(groceries.id);
        let request = FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending);

        let (_, observer) = recorder();
        let query = LiveQuery::start(&store, request.clone(), Some(key.clone()), observer);
        let first = query.objects();
        query.stop();

        let (_, observer) = recorder();
        let query = LiveQuery::start(&store, request, Some(key), observer);
        assert_eq!(query.objects(), first);
    }

    #[test]
    fn test_stale_cache_recomputes() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        store.create_note_with_text(groceries.id, "Milk").unwrap();
        let key = CacheKey::notes_in(groceries.id);
        let request = FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending);

        let (_, observer) = recorder();
        LiveQuery::start(&store, request.clone(), Some(key.clone()), observer).stop();

        store.create_note_with_text(groceries.id, "Eggs").unwrap();

        let (_, observer) = recorder();
        let query = LiveQuery::start(&store, request, Some(key), observer);
        assert_eq!(texts(&query), vec!["Milk", "Eggs"]);
    }

    #[test]
    fn test_cache_key_reused_for_other_request_conflicts() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let key = CacheKey::named("list");

        let (_, observer) = recorder();
        LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
            Some(key.clone()),
            observer,
        )
        .stop();

        let descending = FetchRequest::notes_in(groceries.id, SortOrder::CreationDescending);
        let (_, observer) = recorder();
        let result =
            LiveQuery::try_start(&store, descending.clone(), Some(key.clone()), observer);
        assert_eq!(
            result.err(),
            Some(QueryError::CacheConflict { key: key.clone() })
        );

        store.delete_query_cache(Some(&key));
        let (_, observer) = recorder();
        assert!(LiveQuery::try_start(&store, descending, Some(key), observer).is_ok());
    }

    #[test]
    fn test_observer_may_mutate_store() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let batches: Batches = Rc::new(RefCell::new(Vec::new()));

        let seen = batches.clone();
        let writer = store.clone();
        let notebook = groceries.id;
        let query = LiveQuery::start(
            &store,
            FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending),
            None,
            move |batch: &ChangeBatch| {
                seen.borrow_mut().push(batch.clone());
                if seen.borrow().len() == 1 {
                    writer.create_note_with_text(notebook, "Follow-up").unwrap();
                }
            },
        );

        store.create_note_with_text(groceries.id, "Milk").unwrap();

        assert_eq!(batches.borrow().len(), 2);
        assert_eq!(
            batches.borrow()[1].changes(),
            &[Change::RowInserted { new_index: 1 }]
        );
        assert_eq!(texts(&query), vec!["Milk", "Follow-up"]);
    }

    #[test]
    fn test_delete_from_observer_reaches_other_queries_after_insert() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let request = FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending);

        let writer = store.clone();
        let notebook = groceries.id;
        let _remover = LiveQuery::start(&store, request.clone(), None, move |batch: &ChangeBatch| {
            let inserted = batch
                .changes()
                .iter()
                .any(|c| matches!(c, Change::RowInserted { .. }));
            if inserted {
                for note in writer.notes_in(notebook) {
                    writer.delete_note(note.id).unwrap();
                }
            }
        });
        let (batches, observer) = recorder();
        let watcher = LiveQuery::start(&store, request, None, observer);

        store.create_note_with_text(groceries.id, "Milk").unwrap();

        assert_eq!(store.note_count(), 0);
        assert_eq!(watcher.object_count(0), 0);
        assert_eq!(
            *batches.borrow(),
            vec![
                ChangeBatch::from(vec![
                    Change::SectionInserted(0),
                    Change::RowInserted { new_index: 0 },
                ]),
                ChangeBatch::from(vec![
                    Change::RowDeleted { old_index: 0 },
                    Change::SectionDeleted(0),
                ]),
            ]
        );
    }

    #[test]
    fn test_update_from_observer_reaches_other_queries_after_insert() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let request = FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending);

        let writer = store.clone();
        let notebook = groceries.id;
        let edited = Rc::new(RefCell::new(false));
        let _editor = LiveQuery::start(&store, request.clone(), None, move |_: &ChangeBatch| {
            if edited.replace(true) {
                return;
            }
            let note = writer.notes_in(notebook).remove(0);
            writer.update_note_text(note.id, "Oat milk").unwrap();
        });
        let (batches, observer) = recorder();
        let watcher = LiveQuery::start(&store, request, None, observer);

        store.create_note_with_text(groceries.id, "Milk").unwrap();

        assert_eq!(texts(&watcher), vec!["Oat milk"]);
        assert_eq!(batches.borrow().len(), 2);
        assert_eq!(
            batches.borrow()[1].changes(),
            &[Change::RowUpdated { index: 0 }]
        );
    }

    #[test]
    fn test_query_started_by_observer_skips_mutations_it_fetched() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let request = FetchRequest::notes_in(groceries.id, SortOrder::CreationAscending);

        let late: Rc<RefCell<Option<LiveQuery<Note>>>> = Rc::new(RefCell::new(None));
        let (late_batches, late_observer) = recorder();
        let late_observer = Rc::new(RefCell::new(Some(late_observer)));

        let slot = late.clone();
        let writer = store.clone();
        let notebook = groceries.id;
        let late_request = request.clone();
        let _first = LiveQuery::start(&store, request, None, move |_: &ChangeBatch| {
            let Some(observer) = late_observer.borrow_mut().take() else {
                return;
            };
            writer.create_note_with_text(notebook, "Follow-up").unwrap();
            let query = LiveQuery::start(&writer, late_request.clone(), None, observer);
            *slot.borrow_mut() = Some(query);
        });

        store.create_note_with_text(groceries.id, "Milk").unwrap();

        let late = late.borrow();
        let late = late.as_ref().unwrap();
        assert_eq!(texts(late), vec!["Milk", "Follow-up"]);
        assert!(late_batches.borrow().is_empty());

        store.create_note_with_text(groceries.id, "Eggs").unwrap();
        assert_eq!(
            *late_batches.borrow(),
            vec![ChangeBatch::from(vec![Change::RowInserted { new_index: 2 }])]
        );
    }

    fn state_for(notebook: NotebookId, objects: Vec<Note>) -> QueryState<Note> {
        QueryState {
            request: FetchRequest::notes_in(notebook, SortOrder::CreationAscending),
            objects,
            observer: None,
        }
    }

    #[test]
    fn test_update_that_changes_position_is_a_move() {
        let notebook = NotebookId::new();
        let start = Utc::now();
        let notes: Vec<Note> = ["Milk", "Eggs", "Bread"]
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                Note::insert_new(notebook, RichText::plain(text), start + Duration::seconds(i as i64))
            })
            .collect();
        let mut state = state_for(notebook, notes.clone());

        let mut milk = notes[0].clone();
        milk.creation_date = start + Duration::seconds(10);
        let batch = state.apply(&[ObjectChange::Updated(Record::Note(milk))]);

        assert_eq!(
            batch.changes(),
            &[Change::RowMoved {
                old_index: 0,
                new_index: 2
            }]
        );
        let order: Vec<&str> = state.objects.iter().map(|n| n.text()).collect();
        assert_eq!(order, vec!["Eggs", "Bread", "Milk"]);
    }

    #[test]
    fn test_update_leaving_the_filter_is_a_delete() {
        let notebook = NotebookId::new();
        let milk = Note::insert_new(notebook, RichText::plain("Milk"), Utc::now());
        let mut state = state_for(notebook, vec![milk.clone()]);

        let mut moved = milk;
        moved.notebook_id = NotebookId::new();
        let batch = state.apply(&[ObjectChange::Updated(Record::Note(moved))]);

        assert_eq!(
            batch.changes(),
            &[Change::RowDeleted { old_index: 0 }, Change::SectionDeleted(0)]
        );
        assert!(state.objects.is_empty());
    }

    #[test]
    fn test_update_entering_the_filter_is_an_insert() {
        let notebook = NotebookId::new();
        let mut state = state_for(notebook, Vec::new());

        let mut memo = Note::insert_new(NotebookId::new(), RichText::plain("Memo"), Utc::now());
        memo.notebook_id = notebook;
        let batch = state.apply(&[ObjectChange::Updated(Record::Note(memo.clone()))]);

        assert_eq!(
            batch.changes(),
            &[
                Change::SectionInserted(0),
                Change::RowInserted { new_index: 0 },
            ]
        );
        assert_eq!(state.objects, vec![memo]);
    }

    #[test]
    fn test_reorder() {
        let store = store();
        let groceries = store.create_notebook("Groceries");
        let a = store.create_note_with_text(groceries.id, "a").unwrap();
        let b = store.create_note_with_text(groceries.id, "b").unwrap();

        let ordering = vec![b.id.to_string(), a.id.to_string()];
        let ordered = reorder(vec![a.clone(), b.clone()], &ordering).unwrap();
        assert_eq!(ordered, vec![b.clone(), a.clone()]);

        let stale = vec![b.id.to_string(), NotebookId::new().to_string()];
        assert_eq!(reorder(vec![a, b], &stale).unwrap_err().len(), 2);
    }
}
