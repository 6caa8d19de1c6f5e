use crate::bus::{EventBus, SubscriptionHandle};
use crate::error::ClientError;
use crate::realtime::session::{run_session, SessionContext};
use crate::realtime::transport::{
    Connector, HttpSnapshotSource, SnapshotSource, TokenSource, WsConnector,
};
use crate::realtime::types::{
    validate_session_id, ClientConfig, ClientStatusSnapshot, ConnectionState, EventKind,
    EventPayload,
};
use crate::state::{SessionHandle, SharedClientState};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One realtime session object, constructed per login and dropped on
/// logout. Owns the push-channel lifecycle, the reconnection policy, and
/// the polling fallback; decoded events fan out over the embedded bus.
pub struct RealtimeClient {
    config: ClientConfig,
    bus: Arc<EventBus>,
    shared: Arc<SharedClientState>,
    connector: Arc<dyn Connector>,
    snapshots: Arc<dyn SnapshotSource>,
    session: Mutex<Option<SessionHandle>>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenSource>) -> Self {
        let connector = Arc::new(WsConnector::new(config.push_base_url.clone()));
        let snapshots = Arc::new(HttpSnapshotSource::new(config.api_base_url.clone(), tokens));
        Self::with_transports(config, connector, snapshots)
    }

    /// Same client over caller-supplied transports. Used by tests and by
    /// embedders that tunnel the push channel through something other than
    /// a plain websocket.
    pub fn with_transports(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Self {
        Self {
            config,
            bus: Arc::new(EventBus::new()),
            shared: Arc::new(SharedClientState::default()),
            connector,
            snapshots,
            session: Mutex::new(None),
        }
    }

    /// Opens (or re-opens) the session. A no-op when already connected for
    /// the same session id; otherwise any previous session task is torn
    /// down first so its timers cannot outlive it.
    pub async fn connect(&self, session_id: &str) -> Result<(), ClientError> {
        let session_id = validate_session_id(session_id)?;

        let mut session_slot = self.session.lock().await;
        if self.shared.connection() == ConnectionState::Connected
            && self.shared.session_id().as_deref() == Some(session_id.as_str())
        {
            return Ok(());
        }

        if let Some(handle) = session_slot.take() {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
        }

        self.shared.begin_session(&session_id);

        let cancellation_token = CancellationToken::new();
        let task_token = cancellation_token.clone();
        let context = SessionContext {
            session_id,
            config: self.config.clone(),
            bus: Arc::clone(&self.bus),
            shared: Arc::clone(&self.shared),
            connector: Arc::clone(&self.connector),
            snapshots: Arc::clone(&self.snapshots),
        };
        let join_handle = tokio::spawn(async move {
            run_session(context, task_token).await;
        });

        *session_slot = Some(SessionHandle {
            cancellation_token,
            join_handle,
        });
        Ok(())
    }

    /// Tears the session down: transport, reconnect timer, and polling
    /// timer all go with the cancellation token. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let existing = { self.session.lock().await.take() };
        if let Some(handle) = existing {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
        }
        self.shared.clear_session();
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, callback)
    }

    pub fn off(&self, handle: SubscriptionHandle) {
        self.bus.unsubscribe(handle);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connection() == ConnectionState::Connected
    }

    pub fn is_polling(&self) -> bool {
        self.shared.is_polling()
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.shared.session_id()
    }

    pub fn status(&self) -> ClientStatusSnapshot {
        self.shared.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn bus_handle(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub(crate) fn snapshot_source(&self) -> Arc<dyn SnapshotSource> {
        Arc::clone(&self.snapshots)
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        // Cannot await the task here; cancelling is enough to stop its timers.
        if let Some(handle) = self.session.get_mut().take() {
            handle.cancellation_token.cancel();
        }
    }
}
