//! Live views.
//!
//! A [`LiveView`] is the subsequence of a store whose entities satisfy a
//! predicate. It is seeded with one scan of the store and from then on only
//! consumes change events: each affected entity is re-tested individually,
//! never by rescanning the store. `Batch` events are replayed sub-event by
//! sub-event in emission order.
//!
//! Outside of event delivery the members are exactly the matching entities,
//! ordered by when they entered the view.
//!
//! A subscriber registered ahead of the view may remove an entity while
//! handling its `Add` or `Update`, so the view sees the removal first.
//! Entities the store has already retired are therefore never admitted.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::error::StoreResult;
use crate::notify::{ChangeEvent, NotificationChannel, Subscription};
use crate::record::{EntityRef, Record};
use crate::value::Value;

/// Membership test for a live view.
pub type Predicate<R> = Rc<dyn Fn(&R) -> bool>;

struct ViewState<R> {
    primary_key: String,
    predicate: Predicate<R>,
    members: IndexMap<Value, EntityRef<R>>,
    disposed: bool,
}

impl<R: Record> ViewState<R> {
    fn matches(&self, entity: &EntityRef<R>) -> bool {
        (self.predicate)(&entity.borrow())
    }

    fn key_of(&self, entity: &EntityRef<R>) -> Option<Value> {
        entity.field(&self.primary_key)
    }

    fn is_member(&self, key: &Value, entity: &EntityRef<R>) -> bool {
        self.members.get(key).is_some_and(|m| m.ptr_eq(entity))
    }

    fn apply(&mut self, event: &ChangeEvent<R>) {
        match event {
            ChangeEvent::Add { items } => {
                for entity in items {
                    let Some(key) = self.key_of(entity) else { continue };
                    if entity.is_live() && !self.members.contains_key(&key) && self.matches(entity) {
                        self.members.insert(key, entity.clone());
                    }
                }
            }
            ChangeEvent::Update { items } => {
                for entity in items {
                    let Some(key) = self.key_of(entity) else { continue };
                    let matches = entity.is_live() && self.matches(entity);
                    match (matches, self.is_member(&key, entity)) {
                        (true, false) => {
                            if !self.members.contains_key(&key) {
                                self.members.insert(key, entity.clone());
                            }
                        }
                        (false, true) => {
                            self.members.shift_remove(&key);
                        }
                        _ => {}
                    }
                }
            }
            ChangeEvent::Remove { items } => {
                for entity in items {
                    let Some(key) = self.key_of(entity) else { continue };
                    if self.is_member(&key, entity) {
                        self.members.shift_remove(&key);
                    }
                }
            }
            ChangeEvent::Clear { .. } => self.members.clear(),
            ChangeEvent::Batch { events } => {
                for sub in events {
                    self.apply(sub);
                }
            }
        }
    }
}

/// An incrementally maintained, predicate-filtered subsequence of a store.
///
/// The view holds handles to the store's entities, not copies, so field
/// changes made through the store are immediately visible through it.
/// Dropping the view detaches it from the store.
pub struct LiveView<R: Record + 'static> {
    state: Rc<RefCell<ViewState<R>>>,
    subscription: Subscription,
}

impl<R: Record + 'static> LiveView<R> {
    pub(crate) fn attach(
        channel: &NotificationChannel<R>,
        primary_key: &str,
        predicate: Predicate<R>,
        seed: Vec<EntityRef<R>>,
    ) -> StoreResult<Self> {
        let mut members = IndexMap::new();
        for entity in seed {
            if predicate(&entity.borrow()) {
                if let Some(key) = entity.field(primary_key) {
                    members.insert(key, entity.clone());
                }
            }
        }

        let state = Rc::new(RefCell::new(ViewState {
            primary_key: primary_key.to_string(),
            predicate,
            members,
            disposed: false,
        }));

        let weak = Rc::downgrade(&state);
        let subscription = channel.subscribe(move |event: &ChangeEvent<R>| {
            let Some(view) = weak.upgrade() else {
                return Ok(());
            };
            let mut view = view
                .try_borrow_mut()
                .map_err(|_| "live view is borrowed during event delivery")?;
            view.apply(event);
            Ok(())
        })?;

        Ok(Self {
            state,
            subscription,
        })
    }

    /// Stop tracking the store. The current members stay readable.
    /// Calling this more than once is a no-op.
    pub fn dispose(&self) {
        self.subscription.unsubscribe();
        self.state.borrow_mut().disposed = true;
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().members.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: impl Into<Value>) -> bool {
        self.state.borrow().members.contains_key(&key.into())
    }

    /// The member at position `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<EntityRef<R>> {
        self.state
            .borrow()
            .members
            .get_index(index)
            .map(|(_, entity)| entity.clone())
    }

    /// Primary keys of the members, in view order.
    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.state.borrow().members.keys().cloned().collect()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<EntityRef<R>> {
        self.state.borrow().members.values().cloned().collect()
    }

    /// Iterate a snapshot of the members.
    pub fn iter(&self) -> std::vec::IntoIter<EntityRef<R>> {
        self.to_vec().into_iter()
    }
}

impl<R: Record + Serialize + 'static> Serialize for LiveView<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let state = self.state.borrow();
        serializer.collect_seq(state.members.values())
    }
}

impl<R: Record + 'static> fmt::Debug for LiveView<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LiveView")
            .field("len", &state.members.len())
            .field("disposed", &state.disposed)
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}
