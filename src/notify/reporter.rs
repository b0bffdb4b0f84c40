//! Failure reporting for isolated errors.
//!
//! Subscriber failures and rejected bulk-load items never reach the caller
//! that triggered them. They are handed to an [`ErrorReporter`] instead.

use std::error::Error;

use crate::error::StoreError;

use super::channel::SubscriptionId;

/// A failure that was isolated from the caller.
#[derive(Debug)]
pub enum Failure<'a> {
    /// A subscriber returned an error.
    Subscriber {
        subscription: SubscriptionId,
        error: &'a dyn Error,
    },
    /// A subscriber panicked.
    SubscriberPanic {
        subscription: SubscriptionId,
        message: &'a str,
    },
    /// An item passed to `add_many` was rejected.
    BulkItem {
        position: usize,
        error: &'a StoreError,
    },
}

/// Sink for isolated failures.
pub trait ErrorReporter {
    fn report(&self, failure: Failure<'_>);
}

/// Default reporter: emits a `tracing` warning per failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, failure: Failure<'_>) {
        match failure {
            Failure::Subscriber {
                subscription,
                error,
            } => {
                tracing::warn!(target: "livestore::notify", %subscription, error = %error, "subscriber failed");
            }
            Failure::SubscriberPanic {
                subscription,
                message,
            } => {
                tracing::warn!(target: "livestore::notify", %subscription, panic = message, "subscriber panicked");
            }
            Failure::BulkItem { position, error } => {
                tracing::warn!(target: "livestore::store", position, error = %error, "bulk add rejected item");
            }
        }
    }
}
