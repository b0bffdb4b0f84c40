//! # livestore - in-memory entity store with live views
//!
//! livestore keeps a collection of records addressable by a unique primary
//! key and by any number of declared secondary fields, and lets callers
//! hold *live views*: filtered subsets that stay in sync with the store by
//! consuming its change events instead of rescanning it.
//!
//! ## Core Concepts
//!
//! - **Record**: any structured type exposing its fields by name
//! - **Store**: insertion-ordered entities, a primary index, and secondary indexes
//! - **ChangeEvent**: `Add`/`Update`/`Remove`/`Clear`, or a `Batch` of them
//! - **LiveView**: a predicate-defined subsequence maintained incrementally
//!
//! ## Usage
//!
//! ```rust
//! use livestore::{Document, Patch, Store, StoreConfig};
//!
//! let store = Store::<Document>::new(StoreConfig::new("id").with_index("age"))?;
//! store.add(Document::new().with("id", 1).with("age", 25))?;
//!
//! let view = store.where_eq("age", 25)?;
//! store.add(Document::new().with("id", 2).with("age", 25))?;
//! assert_eq!(view.len(), 2);
//!
//! store.update(1, &Patch::new().set("age", 40))?;
//! assert_eq!(view.len(), 1);
//! assert_eq!(store.get_by_index("age", 40)?.len(), 1);
//! # Ok::<(), livestore::StoreError>(())
//! ```
//!
//! The store is single-threaded and synchronous. Handles are `Rc`-based and
//! deliberately not `Send`.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod error;
pub mod index;
pub mod notify;
pub mod record;
pub mod store;
pub mod value;
pub mod view;

pub use config::StoreConfig;
pub use error::{ExecutionError, StoreError, StoreResult, SubscriberError, ValidationError};
pub use index::{FieldAccessor, SecondaryIndex};
pub use notify::{
    ChangeEvent, ErrorReporter, EventKind, Failure, Subscription, SubscriptionId, TracingReporter,
};
pub use record::{Document, EntityRef, Patch, Record};
pub use store::Store;
pub use value::Value;
pub use view::{LiveView, Predicate};
