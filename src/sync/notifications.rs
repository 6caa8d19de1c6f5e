use crate::bus::{EventBus, SubscriptionHandle};
use crate::client::RealtimeClient;
use crate::realtime::types::{EventKind, EventPayload, NotificationItem};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationFeedState {
    pub items: Vec<NotificationItem>,
    pub unread_count: usize,
}

/// Notification synchronizer: prepends pushed notifications to a local
/// feed and tracks the unread counter. Mark-read, delete, and clear here
/// mutate the local feed only; their server-side counterparts live in the
/// dashboard's request/response layer.
pub struct NotificationSync {
    state: Arc<Mutex<NotificationFeedState>>,
    bus: Arc<EventBus>,
    subscription: SubscriptionHandle,
}

impl NotificationSync {
    pub fn attach(client: &RealtimeClient) -> Self {
        let state = Arc::new(Mutex::new(NotificationFeedState::default()));
        let bus = client.bus_handle();

        let callback_state = Arc::clone(&state);
        let subscription = bus.subscribe(EventKind::Notification, move |payload| {
            if let EventPayload::Notification(event) = payload {
                prepend_notification(&mut callback_state.lock(), event.notification.clone());
            }
        });

        Self {
            state,
            bus,
            subscription,
        }
    }

    pub fn feed(&self) -> NotificationFeedState {
        self.state.lock().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().unread_count
    }

    pub fn mark_read(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(position) = state.items.iter().position(|item| item.id == id) else {
            return false;
        };
        if !state.items[position].read {
            state.items[position].read = true;
            state.unread_count = state.unread_count.saturating_sub(1);
        }
        true
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(position) = state.items.iter().position(|item| item.id == id) else {
            return false;
        };
        let removed = state.items.remove(position);
        if !removed.read {
            state.unread_count = state.unread_count.saturating_sub(1);
        }
        true
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.unread_count = 0;
    }

    pub fn detach(self) {
        self.bus.unsubscribe(self.subscription);
    }
}

/// Duplicate ids are dropped: a reconnect overlap may replay an item, and
/// the feed treats deliveries as idempotent.
fn prepend_notification(state: &mut NotificationFeedState, item: NotificationItem) {
    if state.items.iter().any(|existing| existing.id == item.id) {
        return;
    }
    if !item.read {
        state.unread_count += 1;
    }
    state.items.insert(0, item);
}
