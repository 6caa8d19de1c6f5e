use crate::bus::{EventBus, SubscriptionHandle};
use crate::client::RealtimeClient;
use crate::error::ClientError;
use crate::realtime::transport::SnapshotSource;
use crate::realtime::types::{EventKind, EventPayload, TransactionRecord, WalletUpdateEvent};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletState {
    pub balance: f64,
    pub recent_transactions: Vec<TransactionRecord>,
    pub last_update_ms: Option<i64>,
}

/// Wallet-balance synchronizer: one subscriber on `wallet_update` that
/// merges matching events into its own state store. It does not own the
/// client's lifecycle; the dashboard calls `connect`/`disconnect` around
/// its auth flow and attaches this alongside.
pub struct WalletSync {
    user_id: String,
    state: Arc<Mutex<WalletState>>,
    bus: Arc<EventBus>,
    snapshots: Arc<dyn SnapshotSource>,
    subscription: SubscriptionHandle,
    transactions_cap: usize,
}

impl WalletSync {
    pub fn attach(client: &RealtimeClient, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let state = Arc::new(Mutex::new(WalletState::default()));
        let bus = client.bus_handle();
        let transactions_cap = client.config().recent_transactions_cap;

        let callback_state = Arc::clone(&state);
        let callback_user = user_id.clone();
        let subscription = bus.subscribe(EventKind::WalletUpdate, move |payload| {
            if let EventPayload::Wallet(update) = payload {
                // Updates for other users on a shared channel are not ours.
                if update.user_id == callback_user {
                    apply_wallet_update(&mut callback_state.lock(), update, transactions_cap);
                }
            }
        });

        Self {
            user_id,
            state,
            bus,
            snapshots: client.snapshot_source(),
            subscription,
            transactions_cap,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> WalletState {
        self.state.lock().clone()
    }

    /// One-off reconciliation over the request/response channel, bypassing
    /// the event path entirely.
    pub async fn refresh(&self) -> Result<WalletState, ClientError> {
        let snapshot = self.snapshots.fetch_wallet_snapshot(&self.user_id).await?;
        let update = WalletUpdateEvent {
            user_id: self.user_id.clone(),
            balance: snapshot.balance,
            recent_transactions: snapshot.recent_transactions,
            as_of_ms: Some(snapshot.as_of_ms),
        };

        let mut state = self.state.lock();
        apply_wallet_update(&mut state, &update, self.transactions_cap);
        Ok(state.clone())
    }

    pub fn detach(self) {
        self.bus.unsubscribe(self.subscription);
    }
}

/// Last-write-wins on the balance; transactions merge by id, newest first,
/// capped. Events may arrive out of order across a transport switch.
fn apply_wallet_update(state: &mut WalletState, update: &WalletUpdateEvent, cap: usize) {
    state.balance = update.balance;
    state.last_update_ms = update.as_of_ms;

    let mut merged: Vec<TransactionRecord> = Vec::new();
    for record in update
        .recent_transactions
        .iter()
        .chain(state.recent_transactions.iter())
    {
        if !merged.iter().any(|existing| existing.id == record.id) {
            merged.push(record.clone());
        }
    }
    merged.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
    merged.truncate(cap);
    state.recent_transactions = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::transport::testing::{
        snapshot, ScriptedConnector, ScriptedSnapshots,
    };
    use crate::realtime::types::ClientArgs;

    fn test_client(snapshots: Arc<ScriptedSnapshots>) -> RealtimeClient {
        let config = ClientArgs {
            push_base_url: Some("wss://push.example.net/realtime".to_string()),
            api_base_url: Some("https://api.example.net".to_string()),
            recent_transactions_cap: Some(3),
            ..ClientArgs::default()
        }
        .normalize()
        .expect("test config should be valid");
        RealtimeClient::with_transports(config, ScriptedConnector::new(Vec::new()), snapshots)
    }

    fn record(id: &str, created_at_ms: i64) -> TransactionRecord {
        TransactionRecord {
            id: id.to_string(),
            amount: 1.0,
            description: "test".to_string(),
            created_at_ms,
        }
    }

    fn wallet_update(user_id: &str, balance: f64, records: Vec<TransactionRecord>) -> EventPayload {
        EventPayload::Wallet(WalletUpdateEvent {
            user_id: user_id.to_string(),
            balance,
            recent_transactions: records,
            as_of_ms: Some(1_000),
        })
    }

    #[tokio::test]
    async fn merges_matching_user_updates() {
        let client = test_client(ScriptedSnapshots::failing());
        let sync = WalletSync::attach(&client, "user-7");

        client.bus_handle().publish(
            EventKind::WalletUpdate,
            &wallet_update("user-7", 50.0, vec![record("tx-1", 10)]),
        );

        let state = sync.state();
        assert_eq!(state.balance, 50.0);
        assert_eq!(state.recent_transactions.len(), 1);
        assert_eq!(state.last_update_ms, Some(1_000));
    }

    #[tokio::test]
    async fn ignores_updates_for_other_users() {
        let client = test_client(ScriptedSnapshots::failing());
        let sync = WalletSync::attach(&client, "user-7");

        client.bus_handle().publish(
            EventKind::WalletUpdate,
            &wallet_update("user-9", 99.0, Vec::new()),
        );

        assert_eq!(sync.state(), WalletState::default());
    }

    #[tokio::test]
    async fn caps_and_dedups_merged_transactions() {
        let client = test_client(ScriptedSnapshots::failing());
        let sync = WalletSync::attach(&client, "user-7");
        let bus = client.bus_handle();

        bus.publish(
            EventKind::WalletUpdate,
            &wallet_update(
                "user-7",
                10.0,
                vec![record("tx-1", 10), record("tx-2", 20)],
            ),
        );
        bus.publish(
            EventKind::WalletUpdate,
            &wallet_update(
                "user-7",
                20.0,
                vec![record("tx-2", 20), record("tx-3", 30), record("tx-4", 40)],
            ),
        );

        let state = sync.state();
        assert_eq!(state.balance, 20.0);
        let ids: Vec<&str> = state
            .recent_transactions
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["tx-4", "tx-3", "tx-2"]);
    }

    #[tokio::test]
    async fn refresh_bypasses_the_event_path() {
        let snapshots = ScriptedSnapshots::new(vec![Some(snapshot(123.0, 9_000))]);
        let client = test_client(snapshots);
        let sync = WalletSync::attach(&client, "user-7");

        let state = sync.refresh().await.expect("scripted refresh should work");
        assert_eq!(state.balance, 123.0);
        assert_eq!(state.last_update_ms, Some(9_000));
    }

    #[tokio::test]
    async fn detach_stops_applying_updates() {
        let client = test_client(ScriptedSnapshots::failing());
        let bus = client.bus_handle();
        let sync = WalletSync::attach(&client, "user-7");
        let state = Arc::clone(&sync.state);
        sync.detach();

        bus.publish(
            EventKind::WalletUpdate,
            &wallet_update("user-7", 50.0, Vec::new()),
        );

        assert_eq!(*state.lock(), WalletState::default());
    }
}
