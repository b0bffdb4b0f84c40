//! The entity store.
//!
//! A [`Store`] owns the insertion-ordered entity sequence, the primary index,
//! and every declared [`SecondaryIndex`]. Each mutation updates all three
//! before emitting a change event, so subscribers always observe a
//! consistent store.
//!
//! Mutations are staged on a scratch copy of the record and only committed
//! once they are known to be valid. A failed single-item call leaves the
//! store exactly as it was.

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::config::StoreConfig;
use crate::error::{ExecutionError, StoreResult, SubscriberError, ValidationError};
use crate::index::SecondaryIndex;
use crate::notify::{
    ChangeEvent, ErrorReporter, Failure, NotificationChannel, Subscription, TracingReporter,
};
use crate::record::{EntityRef, Patch, Record};
use crate::value::Value;
use crate::view::LiveView;

fn primary_key_of<R: Record>(field: &str, record: &R) -> Result<Value, ValidationError> {
    match record.field(field) {
        Some(key) if !key.is_null() => Ok(key),
        _ => Err(ValidationError::MissingKey {
            field: field.to_string(),
        }),
    }
}

struct StoreState<R> {
    /// Primary index and order sequence in one: key -> entity, insertion ordered.
    entities: IndexMap<Value, EntityRef<R>>,
    indexes: IndexMap<String, SecondaryIndex<R>>,
    destroyed: bool,
}

impl<R: Record> StoreState<R> {
    fn insert(&mut self, pk_field: &str, record: R) -> StoreResult<EntityRef<R>> {
        let pk = primary_key_of(pk_field, &record)?;
        if self.entities.contains_key(&pk) {
            return Err(ExecutionError::DuplicateKey { key: pk }.into());
        }

        let keys: Vec<Value> = self.indexes.values().map(|idx| idx.key_of(&record)).collect();
        let entity = EntityRef::new(record);
        for (idx, key) in self.indexes.values_mut().zip(keys) {
            idx.insert(pk.clone(), key, entity.clone());
        }
        self.entities.insert(pk, entity.clone());
        Ok(entity)
    }

    /// Replace the contents of `entity` with `staged`, moving it between
    /// index buckets for every field whose value changed.
    fn commit(&mut self, pk_field: &str, pk: &Value, entity: &EntityRef<R>, staged: R) -> StoreResult<()> {
        if staged.field(pk_field).as_ref() != Some(pk) {
            return Err(ValidationError::invalid(format!(
                "primary key '{pk_field}' of entity {pk} cannot be changed or removed"
            ))
            .into());
        }

        let mut slot = entity.try_borrow_mut().ok_or_else(|| {
            ValidationError::invalid(format!("entity {pk} is borrowed and cannot be mutated"))
        })?;

        for idx in self.indexes.values_mut() {
            let old = idx.key_of(&slot);
            let new = idx.key_of(&staged);
            idx.relocate(pk, &old, new, entity);
        }
        *slot = staged;
        Ok(())
    }

    fn remove(&mut self, pk: &Value) -> Option<EntityRef<R>> {
        let entity = self.entities.shift_remove(pk)?;
        entity.retire();
        {
            let record = entity.borrow();
            for idx in self.indexes.values_mut() {
                let key = idx.key_of(&record);
                idx.remove(pk, &key);
            }
        }
        Some(entity)
    }

    fn clear(&mut self) -> Vec<EntityRef<R>> {
        for idx in self.indexes.values_mut() {
            idx.clear();
        }
        self.entities
            .drain(..)
            .map(|(_, entity)| {
                entity.retire();
                entity
            })
            .collect()
    }

    fn install_index(&mut self, mut index: SecondaryIndex<R>) -> bool {
        if self.indexes.contains_key(index.name()) {
            return false;
        }
        for (pk, entity) in &self.entities {
            let key = index.key_of(&entity.borrow());
            index.insert(pk.clone(), key, entity.clone());
        }
        self.indexes.insert(index.name().to_string(), index);
        true
    }

    fn index(&self, field: &str) -> StoreResult<&SecondaryIndex<R>> {
        self.indexes.get(field).ok_or_else(|| {
            ExecutionError::UnknownIndex {
                field: field.to_string(),
            }
            .into()
        })
    }
}

struct StoreInner<R> {
    primary_key: String,
    state: RefCell<StoreState<R>>,
    channel: NotificationChannel<R>,
    reporter: Rc<dyn ErrorReporter>,
}

/// In-memory entity store with unique-key lookup, secondary indexes, change
/// notifications, and live views.
///
/// `Store` is a cheap handle: clones share the same underlying store, which
/// lets subscriber callbacks hold a handle and mutate the store re-entrantly.
/// The store is single-threaded and fully synchronous; every mutating call
/// has updated all indexes and delivered its notification by the time it
/// returns (unless a batch scope is open).
///
/// # Examples
///
/// ```
/// use livestore::{Document, Store, StoreConfig, Value};
///
/// let store = Store::<Document>::new(StoreConfig::new("id").with_index("age"))?;
/// store.add(Document::new().with("id", 1).with("age", 25))?;
/// store.add(Document::new().with("id", 2).with("age", 30))?;
/// store.add(Document::new().with("id", 3).with("age", 25))?;
///
/// assert_eq!(store.get_by_index("age", 25)?.len(), 2);
/// assert_eq!(store.get_by_id(2).unwrap().field("age"), Some(Value::Int(30)));
/// # Ok::<(), livestore::StoreError>(())
/// ```
pub struct Store<R: Record + 'static> {
    inner: Rc<StoreInner<R>>,
}

impl<R: Record + 'static> Store<R> {
    /// Create an empty store that reports isolated failures through `tracing`.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        Self::with_reporter(config, Rc::new(TracingReporter))
    }

    /// Create an empty store with a custom failure reporter.
    pub fn with_reporter(config: StoreConfig, reporter: Rc<dyn ErrorReporter>) -> StoreResult<Self> {
        let fields = config.validate()?;

        let mut indexes = IndexMap::with_capacity(fields.len());
        for field in fields {
            indexes.insert(field.clone(), SecondaryIndex::for_field(field));
        }

        Ok(Self {
            inner: Rc::new(StoreInner {
                primary_key: config.primary_key,
                state: RefCell::new(StoreState {
                    entities: IndexMap::new(),
                    indexes,
                    destroyed: false,
                }),
                channel: NotificationChannel::new(Rc::clone(&reporter)),
                reporter,
            }),
        })
    }

    /// Create a store and bulk-load `initial` with [`Store::add_many`]
    /// semantics: rejected items are reported and skipped.
    pub fn with_data(config: StoreConfig, initial: impl IntoIterator<Item = R>) -> StoreResult<Self> {
        Self::with_reporter_and_data(config, Rc::new(TracingReporter), initial)
    }

    /// [`Store::with_data`] with a custom failure reporter, which also
    /// receives the items rejected from `initial`.
    pub fn with_reporter_and_data(
        config: StoreConfig,
        reporter: Rc<dyn ErrorReporter>,
        initial: impl IntoIterator<Item = R>,
    ) -> StoreResult<Self> {
        let store = Self::with_reporter(config, reporter)?;
        store.add_many(initial)?;
        Ok(store)
    }

    fn live_state(&self) -> StoreResult<RefMut<'_, StoreState<R>>> {
        let state = self.inner.state.borrow_mut();
        if state.destroyed {
            return Err(ExecutionError::Destroyed.into());
        }
        Ok(state)
    }

    fn ensure_live(&self) -> StoreResult<()> {
        if self.is_destroyed() {
            return Err(ExecutionError::Destroyed.into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Insert a new entity.
    ///
    /// Fails with `MissingKey` if the primary key is absent and with
    /// `DuplicateKey` if it is already taken. Emits `Add`.
    pub fn add(&self, record: R) -> StoreResult<EntityRef<R>> {
        let entity = self.live_state()?.insert(&self.inner.primary_key, record)?;
        self.inner.channel.emit(ChangeEvent::Add {
            items: vec![entity.clone()],
        });
        Ok(entity)
    }

    /// Insert `record`, or merge it into the existing entity with the same key.
    ///
    /// Merging happens in place, so every handle to the entity observes the
    /// new contents. Emits `Add` for a new key and `Update` otherwise.
    pub fn upsert(&self, record: R) -> StoreResult<EntityRef<R>> {
        let pk_field = self.inner.primary_key.as_str();
        let event = {
            let mut state = self.live_state()?;
            let pk = primary_key_of(pk_field, &record)?;
            let existing = state.entities.get(&pk).cloned();
            match existing {
                None => ChangeEvent::Add {
                    items: vec![state.insert(pk_field, record)?],
                },
                Some(existing) => {
                    let mut staged = existing.snapshot();
                    staged.merge_from(record);
                    state.commit(pk_field, &pk, &existing, staged)?;
                    ChangeEvent::Update {
                        items: vec![existing],
                    }
                }
            }
        };

        let entity = event.items()[0].clone();
        self.inner.channel.emit(event);
        Ok(entity)
    }

    /// Apply `patch` to the entity with primary key `key`.
    ///
    /// Returns `Ok(None)` if no such entity exists. A patch that would change
    /// the primary key, or that the record type rejects, fails with
    /// `InvalidArgument` and leaves the entity untouched. Emits `Update`.
    pub fn update(&self, key: impl Into<Value>, patch: &Patch) -> StoreResult<Option<EntityRef<R>>> {
        let key = key.into();
        let entity = {
            let mut state = self.live_state()?;
            let Some(existing) = state.entities.get(&key).cloned() else {
                return Ok(None);
            };
            let mut staged = existing.snapshot();
            patch.apply_to(&mut staged)?;
            state.commit(&self.inner.primary_key, &key, &existing, staged)?;
            existing
        };

        self.inner.channel.emit(ChangeEvent::Update {
            items: vec![entity.clone()],
        });
        Ok(Some(entity))
    }

    /// Remove the entity with primary key `key`. Returns `Ok(None)` if absent.
    /// Emits `Remove`.
    pub fn remove_by_id(&self, key: impl Into<Value>) -> StoreResult<Option<EntityRef<R>>> {
        let key = key.into();
        let Some(entity) = self.live_state()?.remove(&key) else {
            return Ok(None);
        };

        self.inner.channel.emit(ChangeEvent::Remove {
            items: vec![entity.clone()],
        });
        Ok(Some(entity))
    }

    /// Remove every entity. Emits `Clear` with the removed entities, but only
    /// if there was at least one. Returns how many were removed.
    pub fn clear(&self) -> StoreResult<usize> {
        let items = self.live_state()?.clear();
        let removed = items.len();
        if removed > 0 {
            self.inner.channel.emit(ChangeEvent::Clear { items });
        }
        Ok(removed)
    }

    /// Best-effort bulk insert.
    ///
    /// Each record goes through [`Store::add`]. Rejected records are handed
    /// to the store's reporter and skipped; the rest are still inserted.
    /// Returns how many were added.
    pub fn add_many(&self, records: impl IntoIterator<Item = R>) -> StoreResult<usize> {
        self.ensure_live()?;

        let mut added = 0;
        for (position, record) in records.into_iter().enumerate() {
            match self.add(record) {
                Ok(_) => added += 1,
                Err(error) => self.inner.reporter.report(Failure::BulkItem {
                    position,
                    error: &error,
                }),
            }
        }
        Ok(added)
    }

    /// Declare a secondary index on `field`, building it with one scan of the
    /// store. Returns `false` if the index already existed.
    pub fn add_index(&self, field: impl Into<String>) -> StoreResult<bool> {
        let field = field.into();
        if field.trim().is_empty() {
            return Err(ValidationError::invalid("index field name cannot be empty").into());
        }
        self.install_index(SecondaryIndex::for_field(field))
    }

    /// Declare a secondary index named `name` over a computed value.
    ///
    /// Records for which `accessor` returns `None` are indexed under
    /// `Value::Null`. Returns `false` if the name is already taken.
    ///
    /// The accessor runs while the store is mutably borrowed, so it must
    /// only look at the record it is given. Calling back into the store
    /// from it panics.
    pub fn add_index_with<F>(&self, name: impl Into<String>, accessor: F) -> StoreResult<bool>
    where
        F: Fn(&R) -> Option<Value> + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::invalid("index name cannot be empty").into());
        }
        self.install_index(SecondaryIndex::with_accessor(name, Rc::new(accessor)))
    }

    fn install_index(&self, index: SecondaryIndex<R>) -> StoreResult<bool> {
        let mut state = self.live_state()?;
        let name = index.name().to_string();
        let created = state.install_index(index);
        if created {
            tracing::debug!(target: "livestore::store", index = %name, entities = state.entities.len(), "built secondary index");
        }
        Ok(created)
    }

    /// Wipe all data, detach every subscriber, and reject further mutation.
    /// Idempotent.
    pub fn destroy(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            let dropped = state.clear();
            tracing::debug!(target: "livestore::store", entities = dropped.len(), "store destroyed");
        }
        self.inner.channel.close();
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Register a change callback. Keep the returned handle alive for as
    /// long as events should be delivered.
    pub fn subscribe<F>(&self, callback: F) -> StoreResult<Subscription>
    where
        F: Fn(&ChangeEvent<R>) -> Result<(), SubscriberError> + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.channel.subscribe(callback)?)
    }

    /// Run `f` with change events coalesced into one `Batch` event.
    ///
    /// Batches nest; only the outermost scope flushes. Mutations made by `f`
    /// are never rolled back: if `f` returns an error or unwinds, whatever
    /// it already changed stays changed and is still notified.
    pub fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        self.inner.channel.batch(f)
    }

    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.inner.channel.is_batching()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.channel.subscriber_count()
    }

    // ------------------------------------------------------------------
    // Live views
    // ------------------------------------------------------------------

    /// Create a live view of the entities matching `predicate`.
    pub fn view<P>(&self, predicate: P) -> StoreResult<LiveView<R>>
    where
        P: Fn(&R) -> bool + 'static,
    {
        self.ensure_live()?;
        LiveView::attach(
            &self.inner.channel,
            &self.inner.primary_key,
            Rc::new(predicate),
            self.to_vec(),
        )
    }

    /// Create a live view of the entities whose `field` equals `value`.
    ///
    /// A record lacking `field` compares as `Value::Null`, the same way
    /// secondary indexes bucket it.
    pub fn where_eq(&self, field: impl Into<String>, value: impl Into<Value>) -> StoreResult<LiveView<R>> {
        let field = field.into();
        let value = value.into();
        self.view(move |record: &R| record.field(&field).unwrap_or(Value::Null) == value)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.inner.primary_key
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.borrow().destroyed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().entities.is_empty()
    }

    #[must_use]
    pub fn has(&self, key: impl Into<Value>) -> bool {
        self.inner.state.borrow().entities.contains_key(&key.into())
    }

    #[must_use]
    pub fn get_by_id(&self, key: impl Into<Value>) -> Option<EntityRef<R>> {
        self.inner.state.borrow().entities.get(&key.into()).cloned()
    }

    /// Entities whose indexed `field` equals `value`, in no particular order.
    pub fn get_by_index(&self, field: &str, value: impl Into<Value>) -> StoreResult<Vec<EntityRef<R>>> {
        let state = self.inner.state.borrow();
        Ok(state.index(field)?.get(&value.into()))
    }

    /// Number of entities whose indexed `field` equals `value`.
    pub fn count_by_index(&self, field: &str, value: impl Into<Value>) -> StoreResult<usize> {
        let state = self.inner.state.borrow();
        Ok(state.index(field)?.count(&value.into()))
    }

    /// Distinct values currently present for an indexed `field`.
    pub fn unique_values(&self, field: &str) -> StoreResult<Vec<Value>> {
        let state = self.inner.state.borrow();
        Ok(state.index(field)?.keys().cloned().collect())
    }

    #[must_use]
    pub fn has_index(&self, field: &str) -> bool {
        self.inner.state.borrow().indexes.contains_key(field)
    }

    /// Declared index names, in declaration order.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.inner.state.borrow().indexes.keys().cloned().collect()
    }

    /// The entity at position `index` of the insertion order.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<EntityRef<R>> {
        self.inner
            .state
            .borrow()
            .entities
            .get_index(index)
            .map(|(_, entity)| entity.clone())
    }

    /// Primary keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.inner.state.borrow().entities.keys().cloned().collect()
    }

    /// All entities in insertion order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<EntityRef<R>> {
        self.inner.state.borrow().entities.values().cloned().collect()
    }

    /// Iterate a snapshot of the entities in insertion order.
    ///
    /// The snapshot is taken up front, so the store may be mutated while
    /// iterating.
    pub fn iter(&self) -> std::vec::IntoIter<EntityRef<R>> {
        self.to_vec().into_iter()
    }
}

impl<R: Record + Serialize + 'static> Store<R> {
    /// The store's external JSON form: the entities as a flat array in
    /// insertion order. Indexes are not included.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl<R: Record + 'static> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: Record + Serialize + 'static> Serialize for Store<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let state = self.inner.state.borrow();
        serializer.collect_seq(state.entities.values())
    }
}

impl<R: Record + 'static> fmt::Debug for Store<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Store")
            .field("primary_key", &self.inner.primary_key)
            .field("len", &state.entities.len())
            .field("indexes", &state.indexes.keys().collect::<Vec<_>>())
            .field("destroyed", &state.destroyed)
            .field("channel", &self.inner.channel)
            .finish()
    }
}

impl<'a, R: Record + 'static> IntoIterator for &'a Store<R> {
    type Item = EntityRef<R>;
    type IntoIter = std::vec::IntoIter<EntityRef<R>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
