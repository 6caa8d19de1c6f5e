use crate::bus::EventBus;
use crate::realtime::polling::{start_polling, PollingContext, PollingHandle};
use crate::realtime::transport::{Connector, PushFrame, SnapshotSource};
use crate::realtime::types::{
    now_unix_ms, parse_push_frame, ClientConfig, ConnectionState, DecodedFrame,
};
use crate::state::SharedClientState;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct SessionContext {
    pub(crate) session_id: String,
    pub(crate) config: ClientConfig,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) shared: Arc<SharedClientState>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) snapshots: Arc<dyn SnapshotSource>,
}

/// Linear backoff: reconnect attempt `k` (1-indexed) waits `k * base`.
pub(crate) fn reconnect_delay(attempt: u32, base_delay_ms: u64) -> Duration {
    Duration::from_millis(u64::from(attempt).saturating_mul(base_delay_ms))
}

/// One session's lifetime: open the push channel, feed the bus, reconnect
/// with linear backoff on loss, and keep the polling fallback running over
/// every gap. After the attempt budget is spent the session parks on
/// polling until the owner disconnects or reconnects externally.
pub(crate) async fn run_session(context: SessionContext, cancel: CancellationToken) {
    let mut attempt: u32 = 0;
    let mut polling: Option<PollingHandle> = None;

    while !cancel.is_cancelled() {
        if attempt == 0 {
            context.shared.set_connection(ConnectionState::Connecting);
            context
                .shared
                .set_reason(Some("opening push channel".to_string()));
            tracing::info!(session_id = %context.session_id, "opening push channel");
        } else {
            context.shared.set_connection(ConnectionState::Reconnecting);
            context
                .shared
                .set_reason(Some(format!("reconnect attempt {attempt}")));
            tracing::info!(session_id = %context.session_id, attempt, "reconnecting push channel");
        }

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = context.connector.connect(&context.session_id) => result,
        };

        match connected {
            Ok(mut channel) => {
                attempt = 0;
                context.shared.set_reconnect_attempts(0);
                stop_polling(&mut polling, &context.shared).await;
                context.shared.set_connection(ConnectionState::Connected);
                context
                    .shared
                    .set_reason(Some("push channel connected".to_string()));
                tracing::info!(session_id = %context.session_id, "push channel connected");

                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => break,
                        next_frame = channel.next() => next_frame,
                    };

                    // A drained stream is an implicit close.
                    let Some(frame_result) = frame else { break };

                    match frame_result {
                        Ok(PushFrame::Closed) => {
                            tracing::info!(session_id = %context.session_id, "push channel closed by server");
                            break;
                        }
                        Ok(PushFrame::Text(text)) => dispatch_payload(text.into_bytes(), &context),
                        Ok(PushFrame::Binary(bytes)) => dispatch_payload(bytes, &context),
                        Err(error) => {
                            tracing::warn!(session_id = %context.session_id, %error, "push channel frame error");
                            break;
                        }
                    }
                }

                if cancel.is_cancelled() {
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(session_id = %context.session_id, %error, "push channel connect failed");
            }
        }

        // Closed or failed to open: polling covers the gap while backoff runs.
        attempt = attempt.saturating_add(1);
        context.shared.set_reconnect_attempts(attempt);
        context.shared.set_connection(ConnectionState::Reconnecting);
        ensure_polling(&mut polling, &context, &cancel);

        if attempt >= context.config.max_reconnect_attempts {
            context.shared.set_connection(ConnectionState::Polling);
            context.shared.set_reason(Some(
                "reconnect attempts exhausted, polling until next connect".to_string(),
            ));
            tracing::warn!(
                session_id = %context.session_id,
                attempt,
                "reconnect attempts exhausted, staying on polling"
            );
            // Parked: only disconnect() or a fresh external connect() ends this.
            cancel.cancelled().await;
            break;
        }

        let delay = reconnect_delay(attempt, context.config.reconnect_base_delay_ms);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    stop_polling(&mut polling, &context.shared).await;
    context.shared.set_connection(ConnectionState::Disconnected);
}

fn dispatch_payload(bytes: Vec<u8>, context: &SessionContext) {
    match parse_push_frame(&bytes) {
        Ok(DecodedFrame::Event(payload)) => {
            context.shared.record_event(now_unix_ms());
            context.bus.publish(payload.kind(), &payload);
        }
        Ok(DecodedFrame::Unknown(kind)) => {
            tracing::warn!(session_id = %context.session_id, kind, "unrecognized push event type, dropping");
        }
        Err(error) => {
            tracing::warn!(session_id = %context.session_id, %error, "failed to decode push frame, dropping");
        }
    }
}

fn ensure_polling(
    polling: &mut Option<PollingHandle>,
    context: &SessionContext,
    cancel: &CancellationToken,
) {
    if polling.is_some() {
        return;
    }

    tracing::info!(session_id = %context.session_id, "starting polling fallback");
    let handle = start_polling(
        PollingContext {
            session_id: context.session_id.clone(),
            bus: Arc::clone(&context.bus),
            shared: Arc::clone(&context.shared),
            snapshots: Arc::clone(&context.snapshots),
            poll_interval: Duration::from_millis(context.config.poll_interval_ms),
            coalesce_window_ms: context.config.coalesce_window_ms,
        },
        cancel,
    );
    context.shared.set_polling(true);
    *polling = Some(handle);
}

async fn stop_polling(polling: &mut Option<PollingHandle>, shared: &SharedClientState) {
    if let Some(handle) = polling.take() {
        shared.set_polling(false);
        handle.stop().await;
    }
}
