//! Records held by the store.
//!
//! A store is generic over any [`Record`]: a structured type that exposes
//! its fields by name. The store never reflects over records; it only asks
//! for the primary key and for declared index fields through
//! [`Record::field`].

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::ValidationError;
use crate::value::Value;

/// A structured record addressable by field name.
///
/// Records are `Clone` because mutations are staged on a scratch copy and
/// only committed once they are known to be valid.
pub trait Record: Clone {
    /// Read a field. `None` means the field is absent.
    fn field(&self, name: &str) -> Option<Value>;

    /// Assign a single field, as part of applying a [`Patch`].
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), ValidationError>;

    /// Merge an upsert payload into this record.
    ///
    /// The default replaces every field, which is the right behavior for
    /// fixed-shape structs. Map-like records merge key by key.
    fn merge_from(&mut self, other: Self) {
        *self = other;
    }
}

struct Slot<R> {
    record: RefCell<R>,
    live: Cell<bool>,
}

/// Shared handle to an entity owned by a store.
///
/// Cloning the handle does not clone the entity. Mutations applied through
/// the store are visible through every handle, which is how live views
/// observe updates without holding copies.
pub struct EntityRef<R>(Rc<Slot<R>>);

impl<R> EntityRef<R> {
    pub(crate) fn new(record: R) -> Self {
        Self(Rc::new(Slot {
            record: RefCell::new(record),
            live: Cell::new(true),
        }))
    }

    /// Borrow the current contents of the entity.
    ///
    /// # Panics
    ///
    /// Panics if the entity is being mutated by the store at the same time,
    /// which can only happen if the borrow is held across a store call.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, R> {
        self.0.record.borrow()
    }

    /// Returns false once the store removed the entity, by `remove_by_id`,
    /// `clear`, or `destroy`. A removed entity never becomes live again.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.0.live.get()
    }

    pub(crate) fn retire(&self) {
        self.0.live.set(false);
    }

    /// Returns true if both handles point at the same entity.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn try_borrow_mut(&self) -> Option<RefMut<'_, R>> {
        self.0.record.try_borrow_mut().ok()
    }
}

impl<R: Record> EntityRef<R> {
    /// Read a field of the entity.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        self.0.record.borrow().field(name)
    }

    /// Clone the current contents out of the store.
    #[must_use]
    pub fn snapshot(&self) -> R {
        self.0.record.borrow().clone()
    }
}

impl<R> Clone for EntityRef<R> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<R: fmt::Debug> fmt::Debug for EntityRef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.record.try_borrow() {
            Ok(record) => f.debug_tuple("EntityRef").field(&*record).finish(),
            Err(_) => f.write_str("EntityRef(<mutating>)"),
        }
    }
}

impl<R: Serialize> Serialize for EntityRef<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.record.borrow().serialize(serializer)
    }
}

/// An ordered set of field assignments applied by `update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch {
    fields: Vec<(String, Value)>,
}

impl Patch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an assignment. A later assignment to the same field wins.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Apply every assignment to `record`, stopping at the first rejection.
    pub fn apply_to<R: Record>(&self, record: &mut R) -> Result<(), ValidationError> {
        for (field, value) in &self.fields {
            if field.trim().is_empty() {
                return Err(ValidationError::invalid("patch field name cannot be empty"));
            }
            record.set_field(field, value.clone())?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Patch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// A schemaless record backed by a sorted field map.
///
/// # Examples
///
/// ```
/// use livestore::{Document, Record, Value};
///
/// let doc = Document::new().with("id", 1).with("age", 25);
/// assert_eq!(doc.field("age"), Some(Value::Int(25)));
/// assert_eq!(doc.field("name"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Record for Document {
    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), ValidationError> {
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    fn merge_from(&mut self, other: Self) {
        self.fields.extend(other.fields);
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
