//! Change notification subsystem.
//!
//! Every store mutation emits a [`ChangeEvent`] through a
//! [`NotificationChannel`]. Delivery is synchronous and in-process; there is
//! no worker thread and no queue other than the batch queue.

/// Subscriber registry, delivery, and batch scopes.
pub mod channel;
/// Change event definitions.
pub mod event;
/// Reporting of isolated failures.
pub mod reporter;

pub use channel::{Callback, NotificationChannel, Subscription, SubscriptionId};
pub use event::{ChangeEvent, EventKind};
pub use reporter::{ErrorReporter, Failure, TracingReporter};
