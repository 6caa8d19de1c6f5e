use crate::realtime::types::{ClientStatusSnapshot, ConnectionState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct SessionHandle {
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) join_handle: JoinHandle<()>,
}

/// State shared between the client surface, the session loop, and the
/// polling engine. Queries stay synchronous; the session and polling tasks
/// write from tokio worker threads.
#[derive(Default)]
pub(crate) struct SharedClientState {
    connection: AtomicU8,
    polling: AtomicBool,
    reconnect_attempts: AtomicU32,
    events_dispatched: AtomicU64,
    has_last_event_ms: AtomicBool,
    last_event_ms: AtomicI64,
    session_id: Mutex<Option<String>>,
    reason: Mutex<Option<String>>,
}

impl SharedClientState {
    pub(crate) fn connection(&self) -> ConnectionState {
        ConnectionState::from_code(self.connection.load(Ordering::Relaxed))
    }

    pub(crate) fn set_connection(&self, state: ConnectionState) {
        self.connection.store(state.code(), Ordering::Relaxed);
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Relaxed)
    }

    pub(crate) fn set_polling(&self, polling: bool) {
        self.polling.store(polling, Ordering::Relaxed);
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub(crate) fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self, at_ms: i64) {
        let _ = self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        self.last_event_ms.store(at_ms, Ordering::Relaxed);
        self.has_last_event_ms.store(true, Ordering::Relaxed);
    }

    pub(crate) fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub(crate) fn set_reason(&self, reason: Option<String>) {
        *self.reason.lock() = reason;
    }

    /// Called right before a session task is spawned for `session_id`.
    pub(crate) fn begin_session(&self, session_id: &str) {
        *self.session_id.lock() = Some(session_id.to_string());
        self.set_connection(ConnectionState::Connecting);
        self.set_polling(false);
        self.set_reconnect_attempts(0);
        self.set_reason(None);
    }

    /// Called after `disconnect` has torn the session task down.
    pub(crate) fn clear_session(&self) {
        *self.session_id.lock() = None;
        self.set_connection(ConnectionState::Disconnected);
        self.set_polling(false);
        self.set_reconnect_attempts(0);
        self.set_reason(Some("disconnected".to_string()));
    }

    pub(crate) fn snapshot(&self) -> ClientStatusSnapshot {
        ClientStatusSnapshot {
            state: self.connection(),
            polling: self.is_polling(),
            session_id: self.session_id(),
            reconnect_attempts: self.reconnect_attempts(),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            last_event_ms: if self.has_last_event_ms.load(Ordering::Relaxed) {
                Some(self.last_event_ms.load(Ordering::Relaxed))
            } else {
                None
            },
            reason: self.reason.lock().clone(),
        }
    }
}
