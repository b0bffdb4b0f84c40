//! Synchronous notification channel with nesting batch scopes.
//!
//! While idle (batch depth 0) every emitted event is delivered immediately to
//! all subscribers in registration order. While batching, events are queued;
//! when the outermost scope closes the queue is flushed as a single
//! [`ChangeEvent::Batch`]. A scope closes on every exit path, including
//! unwinding, and queued events are flushed without rollback.
//!
//! Delivery iterates a snapshot of the subscriber list, so callbacks may
//! subscribe, unsubscribe, emit, or open nested batches.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{ExecutionError, SubscriberError};

use super::event::ChangeEvent;
use super::reporter::{ErrorReporter, Failure};

/// Identifier of a registered subscriber, unique per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Subscriber callback.
pub type Callback<R> = Rc<dyn Fn(&ChangeEvent<R>) -> Result<(), SubscriberError>>;

trait Detach {
    fn detach(&self, id: SubscriptionId);
}

struct ChannelState<R> {
    subscribers: RefCell<IndexMap<SubscriptionId, Callback<R>>>,
    next_id: Cell<u64>,
    depth: Cell<usize>,
    queue: RefCell<Vec<ChangeEvent<R>>>,
    closed: Cell<bool>,
    reporter: Rc<dyn ErrorReporter>,
}

impl<R> Detach for ChannelState<R> {
    fn detach(&self, id: SubscriptionId) {
        self.subscribers.borrow_mut().shift_remove(&id);
    }
}

/// Fan-out of change events to subscribers.
pub struct NotificationChannel<R> {
    state: Rc<ChannelState<R>>,
}

impl<R: 'static> NotificationChannel<R> {
    pub fn new(reporter: Rc<dyn ErrorReporter>) -> Self {
        Self {
            state: Rc::new(ChannelState {
                subscribers: RefCell::new(IndexMap::new()),
                next_id: Cell::new(0),
                depth: Cell::new(0),
                queue: RefCell::new(Vec::new()),
                closed: Cell::new(false),
                reporter,
            }),
        }
    }

    /// Register a callback. Fails once the channel is closed.
    pub fn subscribe<F>(&self, callback: F) -> Result<Subscription, ExecutionError>
    where
        F: Fn(&ChangeEvent<R>) -> Result<(), SubscriberError> + 'static,
    {
        if self.state.closed.get() {
            return Err(ExecutionError::Destroyed);
        }

        let id = SubscriptionId(self.state.next_id.get());
        self.state.next_id.set(id.0 + 1);
        let callback: Callback<R> = Rc::new(callback);
        self.state.subscribers.borrow_mut().insert(id, callback);

        let weak: Weak<ChannelState<R>> = Rc::downgrade(&self.state);
        let channel: Weak<dyn Detach> = weak;
        Ok(Subscription {
            id,
            channel,
            active: Cell::new(true),
        })
    }
}

impl<R> NotificationChannel<R> {
    /// Deliver `event` now, or queue it while a batch scope is open.
    pub fn emit(&self, event: ChangeEvent<R>) {
        if self.state.closed.get() {
            return;
        }
        if self.state.depth.get() > 0 {
            self.state.queue.borrow_mut().push(event);
            return;
        }
        self.deliver(&event);
    }

    /// Run `f` inside a batch scope.
    ///
    /// Scopes nest; only the outermost one flushes. The scope is released
    /// even if `f` unwinds, and whatever was queued up to that point is
    /// still delivered.
    pub fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        let _scope = BatchScope::enter(self);
        f()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.state.depth.get()
    }

    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.state.depth.get() > 0
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.borrow().len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.get()
    }

    /// Drop every subscriber and queued event. Nothing is delivered afterwards.
    pub fn close(&self) {
        self.state.closed.set(true);
        self.state.queue.borrow_mut().clear();
        let subscribers = std::mem::take(&mut *self.state.subscribers.borrow_mut());
        drop(subscribers);
    }

    fn flush(&self) {
        let events = std::mem::take(&mut *self.state.queue.borrow_mut());
        if events.is_empty() || self.state.closed.get() {
            return;
        }
        tracing::debug!(target: "livestore::notify", events = events.len(), "flushing batch");
        self.deliver(&ChangeEvent::Batch { events });
    }

    fn deliver(&self, event: &ChangeEvent<R>) {
        let snapshot: Vec<(SubscriptionId, Callback<R>)> = self
            .state
            .subscribers
            .borrow()
            .iter()
            .map(|(id, cb)| (*id, Rc::clone(cb)))
            .collect();

        for (id, callback) in snapshot {
            if self.state.closed.get() {
                return;
            }
            // Skip subscribers detached by an earlier callback in this round.
            if !self.state.subscribers.borrow().contains_key(&id) {
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => self.state.reporter.report(Failure::Subscriber {
                    subscription: id,
                    error: error.as_ref(),
                }),
                Err(payload) => self.state.reporter.report(Failure::SubscriberPanic {
                    subscription: id,
                    message: panic_message(payload.as_ref()),
                }),
            }
        }
    }
}

impl<R> fmt::Debug for NotificationChannel<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("subscribers", &self.subscriber_count())
            .field("depth", &self.depth())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

struct BatchScope<'a, R> {
    channel: &'a NotificationChannel<R>,
}

impl<'a, R> BatchScope<'a, R> {
    fn enter(channel: &'a NotificationChannel<R>) -> Self {
        let depth = &channel.state.depth;
        depth.set(depth.get() + 1);
        Self { channel }
    }
}

impl<R> Drop for BatchScope<'_, R> {
    fn drop(&mut self) {
        let depth = &self.channel.state.depth;
        let remaining = depth.get().saturating_sub(1);
        depth.set(remaining);
        if remaining == 0 {
            self.channel.flush();
        }
    }
}

/// Detachable handle returned by `subscribe`.
///
/// Dropping the handle detaches the callback, so keep it alive for as long
/// as events should be received.
#[must_use = "dropping a Subscription detaches the callback"]
pub struct Subscription {
    id: SubscriptionId,
    channel: Weak<dyn Detach>,
    active: Cell<bool>,
}

impl Subscription {
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns false once `unsubscribe` ran or the channel went away.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get() && self.channel.strong_count() > 0
    }

    /// Detach the callback. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(channel) = self.channel.upgrade() {
            channel.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::notify::event::EventKind;
    use crate::record::{Document, EntityRef};

    #[derive(Default)]
    struct Recording {
        failures: RefCell<Vec<String>>,
    }

    impl ErrorReporter for Recording {
        fn report(&self, failure: Failure<'_>) {
            let line = match failure {
                Failure::Subscriber { error, .. } => format!("error: {error}"),
                Failure::SubscriberPanic { message, .. } => format!("panic: {message}"),
                Failure::BulkItem { position, .. } => format!("bulk: {position}"),
            };
            self.failures.borrow_mut().push(line);
        }
    }

    fn add_event(id: i64) -> ChangeEvent<Document> {
        ChangeEvent::Add {
            items: vec![EntityRef::new(Document::new().with("id", id))],
        }
    }

    fn recorder(
        channel: &NotificationChannel<Document>,
    ) -> (Rc<RefCell<Vec<EventKind>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let sub = channel
            .subscribe(move |e: &ChangeEvent<Document>| {
                sink.borrow_mut().push(e.kind());
                Ok(())
            })
            .unwrap();
        (seen, sub)
    }

    #[test]
    fn idle_emit_delivers_immediately() {
        let channel = NotificationChannel::new(Rc::new(Recording::default()));
        let (seen, _sub) = recorder(&channel);
        channel.emit(add_event(1));
        assert_eq!(*seen.borrow(), vec![EventKind::Add]);
    }

    #[test]
    fn nested_batches_flush_once_in_order() {
        let channel = NotificationChannel::new(Rc::new(Recording::default()));
        let batches = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&batches);
        let _sub = channel
            .subscribe(move |e: &ChangeEvent<Document>| {
                let kinds: Vec<EventKind> = e.events().iter().map(ChangeEvent::kind).collect();
                sink.borrow_mut().push((e.kind(), kinds));
                Ok(())
            })
            .unwrap();

        channel.batch(|| {
            channel.emit(add_event(1));
            channel.batch(|| {
                assert_eq!(channel.depth(), 2);
                channel.emit(ChangeEvent::Update { items: Vec::new() });
            });
            assert!(batches.borrow().is_empty());
            channel.emit(ChangeEvent::Remove { items: Vec::new() });
        });

        assert_eq!(channel.depth(), 0);
        assert_eq!(
            *batches.borrow(),
            vec![(
                EventKind::Batch,
                vec![EventKind::Add, EventKind::Update, EventKind::Remove]
            )]
        );
    }

    #[test]
    fn empty_batch_emits_nothing() {
        let channel = NotificationChannel::new(Rc::new(Recording::default()));
        let (seen, _sub) = recorder(&channel);
        let out = channel.batch(|| 7);
        assert_eq!(out, 7);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn batch_scope_released_and_flushed_on_unwind() {
        let channel = NotificationChannel::new(Rc::new(Recording::default()));
        let (seen, _sub) = recorder(&channel);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            channel.batch(|| {
                channel.emit(add_event(1));
                panic!("boom");
            })
        }));

        assert!(result.is_err());
        assert_eq!(channel.depth(), 0);
        assert_eq!(*seen.borrow(), vec![EventKind::Batch]);
    }

    #[test]
    fn failing_subscribers_are_isolated() {
        let reporter = Rc::new(Recording::default());
        let channel = NotificationChannel::new(Rc::clone(&reporter) as Rc<dyn ErrorReporter>);

        let _bad = channel
            .subscribe(|_: &ChangeEvent<Document>| Err("nope".into()))
            .unwrap();
        let _panicky = channel
            .subscribe(|_: &ChangeEvent<Document>| panic!("kaboom"))
            .unwrap();
        let (seen, _good) = recorder(&channel);

        channel.emit(add_event(1));

        assert_eq!(*seen.borrow(), vec![EventKind::Add]);
        assert_eq!(
            *reporter.failures.borrow(),
            vec!["error: nope".to_string(), "panic: kaboom".to_string()]
        );
    }

    #[test]
    fn unsubscribe_is_idempotent_and_drop_detaches() {
        let channel = NotificationChannel::new(Rc::new(Recording::default()));
        let (seen, sub) = recorder(&channel);
        assert!(sub.is_active());

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        channel.emit(add_event(1));
        assert!(seen.borrow().is_empty());

        let (_, other) = recorder(&channel);
        assert_eq!(channel.subscriber_count(), 1);
        drop(other);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_detached_mid_delivery_is_skipped() {
        let channel = NotificationChannel::new(Rc::new(Recording::default()));
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let slot = Rc::clone(&victim);
        let _killer = channel
            .subscribe(move |_: &ChangeEvent<Document>| {
                if let Some(sub) = slot.borrow_mut().take() {
                    sub.unsubscribe();
                }
                Ok(())
            })
            .unwrap();
        let (seen, sub) = recorder(&channel);
        *victim.borrow_mut() = Some(sub);

        channel.emit(add_event(1));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn closed_channel_rejects_subscribers() {
        let channel = NotificationChannel::new(Rc::new(Recording::default()));
        let (seen, _sub) = recorder(&channel);
        channel.close();
        channel.emit(add_event(1));
        assert!(seen.borrow().is_empty());
        assert!(matches!(
            channel.subscribe(|_: &ChangeEvent<Document>| Ok(())),
            Err(ExecutionError::Destroyed)
        ));
    }
}
