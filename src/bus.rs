use crate::realtime::types::{EventKind, EventPayload};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type EventCallback = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Removal token returned from [`EventBus::subscribe`]. Callers keep the
/// handle instead of the original closure reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    kind: EventKind,
    id: u64,
}

struct Subscriber {
    id: u64,
    callback: EventCallback,
}

/// In-process publish/subscribe registry keyed by event kind.
///
/// Transport callbacks publish from tokio worker threads while consumers
/// register from wherever they live, so the subscriber lists sit behind a
/// mutex. Callbacks run outside the lock and may re-enter the bus.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.subscribers.lock();
        registry.entry(kind).or_default().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });
        SubscriptionHandle { kind, id }
    }

    /// Removes the subscription behind `handle`. A stale or already-removed
    /// handle is a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut registry = self.subscribers.lock();
        if let Some(entries) = registry.get_mut(&handle.kind) {
            entries.retain(|subscriber| subscriber.id != handle.id);
            if entries.is_empty() {
                registry.remove(&handle.kind);
            }
        }
    }

    /// Invokes every currently registered callback for `kind`, synchronously
    /// and in registration order. A panicking callback is logged and does not
    /// stop delivery to the rest. With no subscribers the payload is dropped.
    pub fn publish(&self, kind: EventKind, payload: &EventPayload) {
        let callbacks: Vec<EventCallback> = {
            let registry = self.subscribers.lock();
            match registry.get(&kind) {
                Some(entries) => entries
                    .iter()
                    .map(|subscriber| Arc::clone(&subscriber.callback))
                    .collect(),
                None => return,
            }
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                tracing::error!(kind = kind.as_str(), "event subscriber panicked, skipping it");
            }
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .lock()
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
