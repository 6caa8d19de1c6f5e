use crate::bus::EventBus;
use crate::realtime::transport::SnapshotSource;
use crate::realtime::types::{now_unix_ms, EventKind, EventPayload, WalletSnapshot, WalletUpdateEvent};
use crate::state::SharedClientState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Minimum spacing between synthetic emissions, keyed off the snapshot's
/// effective timestamp. This is an inter-emit gap, not a change diff.
#[derive(Debug, Default, Clone, Copy)]
pub struct StalenessGuard {
    last_applied_ms: Option<i64>,
}

impl StalenessGuard {
    /// Advances the guard and returns `true` when the snapshot is far enough
    /// past the last applied update to be worth emitting.
    pub fn try_apply(&mut self, as_of_ms: i64, window_ms: u64) -> bool {
        match self.last_applied_ms {
            Some(last) if as_of_ms.saturating_sub(last) < window_ms as i64 => false,
            _ => {
                self.last_applied_ms = Some(as_of_ms);
                true
            }
        }
    }
}

pub(crate) struct PollingContext {
    pub(crate) session_id: String,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) shared: Arc<SharedClientState>,
    pub(crate) snapshots: Arc<dyn SnapshotSource>,
    pub(crate) poll_interval: Duration,
    pub(crate) coalesce_window_ms: u64,
}

pub(crate) struct PollingHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl PollingHandle {
    pub(crate) async fn stop(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

/// Spawns the steady-rate fallback. The first fetch happens immediately so
/// consumers keep receiving updates as soon as the push channel drops.
pub(crate) fn start_polling(context: PollingContext, parent: &CancellationToken) -> PollingHandle {
    let token = parent.child_token();
    let task_token = token.clone();
    let join = tokio::spawn(async move {
        run_polling(context, task_token).await;
    });
    PollingHandle { token, join }
}

async fn run_polling(context: PollingContext, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(context.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut guard = StalenessGuard::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let fetched = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = context.snapshots.fetch_wallet_snapshot(&context.session_id) => result,
                };

                match fetched {
                    Ok(snapshot) => {
                        if guard.try_apply(snapshot.as_of_ms, context.coalesce_window_ms) {
                            let event = wallet_event_from_snapshot(&context.session_id, snapshot);
                            context.shared.record_event(now_unix_ms());
                            context.bus.publish(
                                EventKind::WalletUpdate,
                                &EventPayload::Wallet(event),
                            );
                        } else {
                            tracing::debug!(
                                session_id = %context.session_id,
                                "snapshot inside coalescing window, skipping emission"
                            );
                        }
                    }
                    Err(error) => {
                        // Steady-rate fallback: failures never back the timer off.
                        tracing::warn!(
                            session_id = %context.session_id,
                            %error,
                            "wallet snapshot fetch failed, keeping poll timer"
                        );
                    }
                }
            }
        }
    }
}

pub(crate) fn wallet_event_from_snapshot(
    session_id: &str,
    snapshot: WalletSnapshot,
) -> WalletUpdateEvent {
    WalletUpdateEvent {
        user_id: session_id.to_string(),
        balance: snapshot.balance,
        recent_transactions: snapshot.recent_transactions,
        as_of_ms: Some(snapshot.as_of_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::transport::testing::{snapshot, ScriptedSnapshots};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn staleness_guard_applies_first_snapshot() {
        let mut guard = StalenessGuard::default();
        assert!(guard.try_apply(0, 1_000));
    }

    #[test]
    fn staleness_guard_suppresses_inside_window() {
        let mut guard = StalenessGuard::default();
        assert!(guard.try_apply(10_000, 1_000));
        assert!(!guard.try_apply(10_500, 1_000));
        assert!(!guard.try_apply(10_999, 1_000));
    }

    #[test]
    fn staleness_guard_applies_past_window() {
        let mut guard = StalenessGuard::default();
        assert!(guard.try_apply(10_000, 1_000));
        assert!(guard.try_apply(11_000, 1_000));
    }

    fn polling_context(
        snapshots: Arc<ScriptedSnapshots>,
        bus: Arc<EventBus>,
        poll_interval_ms: u64,
    ) -> PollingContext {
        PollingContext {
            session_id: "user-7".to_string(),
            bus,
            shared: Arc::new(SharedClientState::default()),
            snapshots,
            poll_interval: Duration::from_millis(poll_interval_ms),
            coalesce_window_ms: 1_000,
        }
    }

    fn count_wallet_publishes(bus: &EventBus) -> Arc<AtomicU32> {
        let published = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&published);
        let _ = bus.subscribe(EventKind::WalletUpdate, move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });
        published
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_snapshots_inside_window() {
        let bus = Arc::new(EventBus::new());
        let published = count_wallet_publishes(&bus);
        // Second snapshot sits 500ms after the first: inside the window.
        let snapshots = ScriptedSnapshots::new(vec![
            Some(snapshot(10.0, 0)),
            Some(snapshot(11.0, 500)),
            Some(snapshot(12.0, 2_000)),
        ]);

        let cancel = CancellationToken::new();
        let handle = start_polling(
            polling_context(Arc::clone(&snapshots), Arc::clone(&bus), 100),
            &cancel,
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(snapshots.calls(), 3);
        assert_eq!(published.load(Ordering::SeqCst), 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_through_fetch_failures() {
        let bus = Arc::new(EventBus::new());
        let published = count_wallet_publishes(&bus);
        let snapshots = ScriptedSnapshots::new(vec![None, None, Some(snapshot(42.0, 5_000))]);

        let cancel = CancellationToken::new();
        let handle = start_polling(
            polling_context(Arc::clone(&snapshots), Arc::clone(&bus), 100),
            &cancel,
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(snapshots.calls(), 3);
        assert_eq!(published.load(Ordering::SeqCst), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_timer() {
        let bus = Arc::new(EventBus::new());
        let snapshots = ScriptedSnapshots::failing();

        let cancel = CancellationToken::new();
        let handle = start_polling(
            polling_context(Arc::clone(&snapshots), Arc::clone(&bus), 100),
            &cancel,
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop().await;
        let calls_after_stop = snapshots.calls();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(snapshots.calls(), calls_after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn synthesized_event_carries_session_user() {
        let bus = Arc::new(EventBus::new());
        let seen_user = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen_user);
        let _ = bus.subscribe(EventKind::WalletUpdate, move |payload| {
            if let EventPayload::Wallet(update) = payload {
                *sink.lock() = Some(update.user_id.clone());
            }
        });
        let snapshots = ScriptedSnapshots::new(vec![Some(snapshot(10.0, 0))]);

        let cancel = CancellationToken::new();
        let handle = start_polling(
            polling_context(Arc::clone(&snapshots), Arc::clone(&bus), 100),
            &cancel,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen_user.lock().as_deref(), Some("user-7"));

        handle.stop().await;
    }
}
