//! Live fan-out of ingested samples to consumers (chart, recorder, ...).
//!
//! `publish` snapshots the subscriber list before iterating, so callbacks may
//! subscribe or unsubscribe (themselves or others) while being invoked.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::warn;

use gaitwatch_protocol::Sample;

/// Error a subscriber may return; logged and counted, never propagated.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

type Callback = Arc<dyn Fn(&Sample) -> Result<(), SubscriberError> + Send + Sync>;

/// Outcome of one [`SubscriptionHub::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    subscribers: Vec<(u64, Callback)>,
    failures: u64,
}

/// Ordered set of sample callbacks. Cloning shares the same set.
#[derive(Clone, Default)]
pub struct SubscriptionHub {
    inner: Arc<Mutex<HubInner>>,
}

/// Handle returned by [`SubscriptionHub::subscribe`].
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe).
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    hub: Weak<Mutex<HubInner>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback. Callbacks run in registration order.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Sample) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        Subscription {
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `sample` to every subscriber registered when the call began.
    ///
    /// A failing or panicking callback is logged and skipped; it never stops
    /// delivery to the rest and is not retried.
    pub fn publish(&self, sample: &Sample) -> PublishReport {
        let snapshot: Vec<(u64, Callback)> = self.lock().subscribers.clone();

        let mut report = PublishReport::default();
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(sample))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        subscriber = id,
                        device = %sample.device_id,
                        error = %e,
                        "subscriber failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(subscriber = id, device = %sample.device_id, "subscriber panicked");
                }
            }
        }

        if report.failed > 0 {
            self.lock().failures += report.failed as u64;
        }
        report
    }

    pub fn len(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().subscribers.is_empty()
    }

    /// Total callback failures since creation.
    pub fn failures(&self) -> u64 {
        self.lock().failures
    }
}

impl std::fmt::Debug for SubscriptionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHub")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl Subscription {
    /// Remove the callback. Returns `false` if it was already removed or the
    /// hub no longer exists. Safe to call from inside a callback.
    pub fn unsubscribe(&self) -> bool {
        let Some(inner) = self.hub.upgrade() else {
            return false;
        };
        let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(id, _)| *id != self.id);
        inner.subscribers.len() != before
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}
