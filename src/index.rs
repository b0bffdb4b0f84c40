//! Secondary indexes.
//!
//! Each declared field gets a [`SecondaryIndex`] that maps a field value to
//! the bucket of entities currently holding that value. Buckets are keyed by
//! primary key inside, so membership tests and removals are O(1).
//!
//! Invariant: every entity in the store sits in exactly the bucket keyed by
//! its current field value, and no bucket is ever left empty.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::record::{EntityRef, Record};
use crate::value::Value;

/// Extracts the indexed value from a record.
pub type FieldAccessor<R> = Rc<dyn Fn(&R) -> Option<Value>>;

type Bucket<R> = IndexMap<Value, EntityRef<R>>;

/// Field value -> set of entities holding that value.
pub struct SecondaryIndex<R> {
    name: String,
    accessor: FieldAccessor<R>,
    buckets: HashMap<Value, Bucket<R>>,
}

impl<R: Record + 'static> SecondaryIndex<R> {
    /// Index over a named field of the record.
    pub fn for_field(name: impl Into<String>) -> Self {
        let name = name.into();
        let field = name.clone();
        Self::with_accessor(name, Rc::new(move |record: &R| record.field(&field)))
    }
}

impl<R> SecondaryIndex<R> {
    /// Index over a value computed by `accessor`.
    pub fn with_accessor(name: impl Into<String>, accessor: FieldAccessor<R>) -> Self {
        Self {
            name: name.into(),
            accessor,
            buckets: HashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bucket key for `record`. Absent fields index as `Null`.
    pub fn key_of(&self, record: &R) -> Value {
        (self.accessor)(record).unwrap_or(Value::Null)
    }

    /// Insert an entity into the bucket for `key`, creating it if absent.
    pub fn insert(&mut self, pk: Value, key: Value, entity: EntityRef<R>) {
        self.buckets.entry(key).or_default().insert(pk, entity);
    }

    /// Remove an entity from the bucket for `key`, pruning the bucket if it
    /// becomes empty.
    pub fn remove(&mut self, pk: &Value, key: &Value) -> bool {
        let Some(bucket) = self.buckets.get_mut(key) else {
            return false;
        };
        let removed = bucket.swap_remove(pk).is_some();
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        removed
    }

    /// Move an entity from the `old` bucket to the `new` one. No-op when the
    /// value did not change.
    pub fn relocate(&mut self, pk: &Value, old: &Value, new: Value, entity: &EntityRef<R>) {
        if *old == new {
            return;
        }
        self.remove(pk, old);
        self.insert(pk.clone(), new, entity.clone());
    }

    /// Entities whose indexed value equals `key`, in no particular order.
    #[must_use]
    pub fn get(&self, key: &Value) -> Vec<EntityRef<R>> {
        self.buckets
            .get(key)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self, key: &Value) -> usize {
        self.buckets.get(key).map_or(0, IndexMap::len)
    }

    /// Distinct values currently held by at least one entity.
    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.buckets.keys()
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

impl<R> fmt::Debug for SecondaryIndex<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecondaryIndex")
            .field("name", &self.name)
            .field("buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Document;

    fn entity(id: i64, age: i64) -> (Value, EntityRef<Document>) {
        (
            Value::Int(id),
            EntityRef::new(Document::new().with("id", id).with("age", age)),
        )
    }

    #[test]
    fn insert_and_get_by_value() {
        let mut idx = SecondaryIndex::<Document>::for_field("age");
        for (id, age) in [(1, 25), (2, 30), (3, 25)] {
            let (pk, e) = entity(id, age);
            let key = idx.key_of(&e.borrow());
            idx.insert(pk, key, e);
        }
        assert_eq!(idx.get(&Value::Int(25)).len(), 2);
        assert_eq!(idx.count(&Value::Int(30)), 1);
        assert!(idx.get(&Value::Int(99)).is_empty());
    }

    #[test]
    fn remove_prunes_empty_bucket() {
        let mut idx = SecondaryIndex::<Document>::for_field("age");
        let (pk, e) = entity(1, 25);
        idx.insert(pk.clone(), Value::Int(25), e);
        assert_eq!(idx.bucket_count(), 1);

        assert!(idx.remove(&pk, &Value::Int(25)));
        assert_eq!(idx.bucket_count(), 0);
        assert!(!idx.remove(&pk, &Value::Int(25)));
    }

    #[test]
    fn relocate_moves_between_buckets() {
        let mut idx = SecondaryIndex::<Document>::for_field("age");
        let (pk, e) = entity(1, 25);
        idx.insert(pk.clone(), Value::Int(25), e.clone());

        idx.relocate(&pk, &Value::Int(25), Value::Int(40), &e);
        assert_eq!(idx.count(&Value::Int(25)), 0);
        assert_eq!(idx.count(&Value::Int(40)), 1);
        assert_eq!(idx.keys().collect::<Vec<_>>(), vec![&Value::Int(40)]);

        idx.relocate(&pk, &Value::Int(40), Value::Int(40), &e);
        assert_eq!(idx.count(&Value::Int(40)), 1);
    }

    #[test]
    fn missing_field_indexes_as_null() {
        let idx = SecondaryIndex::<Document>::for_field("city");
        let doc = Document::new().with("id", 1);
        assert_eq!(idx.key_of(&doc), Value::Null);
    }

    #[test]
    fn computed_accessor() {
        let idx = SecondaryIndex::<Document>::with_accessor(
            "adult",
            Rc::new(|d: &Document| {
                d.get("age")
                    .and_then(Value::as_int)
                    .map(|age| Value::Bool(age >= 18))
            }),
        );
        assert_eq!(
            idx.key_of(&Document::new().with("age", 30)),
            Value::Bool(true)
        );
    }
}
