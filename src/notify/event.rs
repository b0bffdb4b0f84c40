//! Change events delivered to subscribers.

use std::fmt;

use serde::Serialize;

use crate::record::EntityRef;

/// Discriminant of a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Add,
    Update,
    Remove,
    Clear,
    Batch,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Update => write!(f, "update"),
            Self::Remove => write!(f, "remove"),
            Self::Clear => write!(f, "clear"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

/// A mutation observed on a store.
///
/// `Batch` is only produced when the outermost batch scope closes and wraps
/// the queued events in emission order. Batches never nest.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum ChangeEvent<R> {
    Add { items: Vec<EntityRef<R>> },
    Update { items: Vec<EntityRef<R>> },
    Remove { items: Vec<EntityRef<R>> },
    /// Carries the entities the store held before clearing.
    Clear { items: Vec<EntityRef<R>> },
    Batch { events: Vec<ChangeEvent<R>> },
}

impl<R> ChangeEvent<R> {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Add { .. } => EventKind::Add,
            Self::Update { .. } => EventKind::Update,
            Self::Remove { .. } => EventKind::Remove,
            Self::Clear { .. } => EventKind::Clear,
            Self::Batch { .. } => EventKind::Batch,
        }
    }

    /// Entities carried by a non-batch event. Empty for `Batch`.
    #[must_use]
    pub fn items(&self) -> &[EntityRef<R>] {
        match self {
            Self::Add { items }
            | Self::Update { items }
            | Self::Remove { items }
            | Self::Clear { items } => items,
            Self::Batch { .. } => &[],
        }
    }

    /// Sub-events of a `Batch`. Empty for every other kind.
    #[must_use]
    pub fn events(&self) -> &[ChangeEvent<R>] {
        match self {
            Self::Batch { events } => events,
            _ => &[],
        }
    }

    #[must_use]
    pub const fn is_batch(&self) -> bool {
        matches!(self, Self::Batch { .. })
    }
}
