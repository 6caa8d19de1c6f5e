use crate::error::ClientError;
use crate::realtime::{
    NOTIFICATION_EVENT, ORDER_UPDATE_EVENT, TRANSACTION_UPDATE_EVENT, WALLET_UPDATE_EVENT,
};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_COALESCE_WINDOW_MS: u64 = 1_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RECENT_TRANSACTIONS_CAP: usize = 50;
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
pub const MAX_POLL_INTERVAL_MS: u64 = 300_000;
pub const MIN_RECONNECT_BASE_DELAY_MS: u64 = 100;
pub const MAX_RECONNECT_BASE_DELAY_MS: u64 = 60_000;
pub const MAX_RECONNECT_ATTEMPTS_LIMIT: u32 = 50;
pub const MAX_RECENT_TRANSACTIONS_CAP: usize = 500;
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Connection lifecycle of one session.
///
/// `Polling` means the reconnect budget is exhausted and the polling
/// fallback carries the session alone. While reconnect attempts remain
/// the state stays `Reconnecting` even though polling may already be
/// running; the polling flag is tracked separately on purpose so the
/// fallback can cover the backoff window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Polling,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Polling => "polling",
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
            Self::Polling => 4,
        }
    }

    pub(crate) fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            4 => Self::Polling,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Notification,
    WalletUpdate,
    OrderUpdate,
    TransactionUpdate,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notification => NOTIFICATION_EVENT,
            Self::WalletUpdate => WALLET_UPDATE_EVENT,
            Self::OrderUpdate => ORDER_UPDATE_EVENT,
            Self::TransactionUpdate => TRANSACTION_UPDATE_EVENT,
        }
    }

    pub fn parse_str(value: &str) -> Option<Self> {
        match value {
            NOTIFICATION_EVENT => Some(Self::Notification),
            WALLET_UPDATE_EVENT => Some(Self::WalletUpdate),
            ORDER_UPDATE_EVENT => Some(Self::OrderUpdate),
            TRANSACTION_UPDATE_EVENT => Some(Self::TransactionUpdate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub amount: f64,
    pub description: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalletUpdateEvent {
    pub user_id: String,
    pub balance: f64,
    #[serde(default)]
    pub recent_transactions: Vec<TransactionRecord>,
    #[serde(default)]
    pub as_of_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created_at_ms: i64,
    #[serde(default)]
    pub read: bool,
}

/// The push channel nests the notification body one level down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub notification: NotificationItem,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdateEvent {
    pub order_id: String,
    pub user_id: String,
    pub status: String,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdateEvent {
    pub transaction_id: String,
    pub user_id: String,
    pub amount: f64,
    pub status: String,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Notification(NotificationEvent),
    Wallet(WalletUpdateEvent),
    Order(OrderUpdateEvent),
    Transaction(TransactionUpdateEvent),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Notification(_) => EventKind::Notification,
            Self::Wallet(_) => EventKind::WalletUpdate,
            Self::Order(_) => EventKind::OrderUpdate,
            Self::Transaction(_) => EventKind::TransactionUpdate,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushEnvelopeProbe {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Event(EventPayload),
    Unknown(String),
}

/// Decodes one push frame. The `type` discriminant is probed first so an
/// unrecognized kind can be reported by name instead of failing the whole
/// parse. simd-json parses in place, so each pass gets its own scratch copy.
pub fn parse_push_frame(payload: &[u8]) -> Result<DecodedFrame, ClientError> {
    let mut probe_buffer = payload.to_vec();
    let probe: PushEnvelopeProbe = simd_json::serde::from_slice(&mut probe_buffer)?;

    let Some(kind) = EventKind::parse_str(&probe.kind) else {
        return Ok(DecodedFrame::Unknown(probe.kind));
    };

    let mut buffer = payload.to_vec();
    let decoded = match kind {
        EventKind::Notification => {
            EventPayload::Notification(simd_json::serde::from_slice(&mut buffer)?)
        }
        EventKind::WalletUpdate => EventPayload::Wallet(simd_json::serde::from_slice(&mut buffer)?),
        EventKind::OrderUpdate => EventPayload::Order(simd_json::serde::from_slice(&mut buffer)?),
        EventKind::TransactionUpdate => {
            EventPayload::Transaction(simd_json::serde::from_slice(&mut buffer)?)
        }
    };
    Ok(DecodedFrame::Event(decoded))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshotWire {
    pub success: bool,
    #[serde(default)]
    pub wallet: Option<WalletBodyWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBodyWire {
    pub balance: f64,
    #[serde(default)]
    pub recent_transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalletSnapshot {
    pub balance: f64,
    pub recent_transactions: Vec<TransactionRecord>,
    /// Stamped at receipt; the staleness guard compares this value.
    pub as_of_ms: i64,
}

impl WalletSnapshotWire {
    pub fn into_snapshot(self, as_of_ms: i64) -> Result<WalletSnapshot, ClientError> {
        if !self.success {
            return Err(ClientError::SnapshotRejected(
                "server reported success=false".to_string(),
            ));
        }
        let wallet = self.wallet.ok_or_else(|| {
            ClientError::SnapshotRejected("snapshot payload missing wallet body".to_string())
        })?;
        if !wallet.balance.is_finite() {
            return Err(ClientError::InvalidArgument(
                "wallet balance must be finite".to_string(),
            ));
        }
        Ok(WalletSnapshot {
            balance: wallet.balance,
            recent_transactions: wallet.recent_transactions,
            as_of_ms,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientArgs {
    pub push_base_url: Option<String>,
    pub api_base_url: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub coalesce_window_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_base_delay_ms: Option<u64>,
    pub recent_transactions_cap: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub push_base_url: String,
    pub api_base_url: String,
    pub poll_interval_ms: u64,
    pub coalesce_window_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub recent_transactions_cap: usize,
}

impl ClientArgs {
    pub fn normalize(self) -> Result<ClientConfig, ClientError> {
        let push_base_url = self
            .push_base_url
            .unwrap_or_default()
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !push_base_url.starts_with("ws://") && !push_base_url.starts_with("wss://") {
            return Err(ClientError::InvalidArgument(
                "pushBaseUrl must be a ws:// or wss:// URL".to_string(),
            ));
        }

        let api_base_url = self
            .api_base_url
            .unwrap_or_default()
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            return Err(ClientError::InvalidArgument(
                "apiBaseUrl must be an http:// or https:// URL".to_string(),
            ));
        }

        let poll_interval_ms = self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&poll_interval_ms) {
            return Err(ClientError::InvalidArgument(format!(
                "pollIntervalMs must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS}"
            )));
        }

        let coalesce_window_ms = self.coalesce_window_ms.unwrap_or(DEFAULT_COALESCE_WINDOW_MS);
        if coalesce_window_ms > poll_interval_ms {
            return Err(ClientError::InvalidArgument(
                "coalesceWindowMs must not exceed pollIntervalMs".to_string(),
            ));
        }

        let max_reconnect_attempts = self
            .max_reconnect_attempts
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);
        if !(1..=MAX_RECONNECT_ATTEMPTS_LIMIT).contains(&max_reconnect_attempts) {
            return Err(ClientError::InvalidArgument(format!(
                "maxReconnectAttempts must be between 1 and {MAX_RECONNECT_ATTEMPTS_LIMIT}"
            )));
        }

        let reconnect_base_delay_ms = self
            .reconnect_base_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_BASE_DELAY_MS);
        if !(MIN_RECONNECT_BASE_DELAY_MS..=MAX_RECONNECT_BASE_DELAY_MS)
            .contains(&reconnect_base_delay_ms)
        {
            return Err(ClientError::InvalidArgument(format!(
                "reconnectBaseDelayMs must be between {MIN_RECONNECT_BASE_DELAY_MS} and {MAX_RECONNECT_BASE_DELAY_MS}"
            )));
        }

        let recent_transactions_cap = self
            .recent_transactions_cap
            .unwrap_or(DEFAULT_RECENT_TRANSACTIONS_CAP);
        if !(1..=MAX_RECENT_TRANSACTIONS_CAP).contains(&recent_transactions_cap) {
            return Err(ClientError::InvalidArgument(format!(
                "recentTransactionsCap must be between 1 and {MAX_RECENT_TRANSACTIONS_CAP}"
            )));
        }

        Ok(ClientConfig {
            push_base_url,
            api_base_url,
            poll_interval_ms,
            coalesce_window_ms,
            max_reconnect_attempts,
            reconnect_base_delay_ms,
            recent_transactions_cap,
        })
    }
}

pub(crate) fn validate_session_id(session_id: &str) -> Result<String, ClientError> {
    let session_id = session_id.trim();
    if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        return Err(ClientError::InvalidArgument(format!(
            "session id must be 1..={MAX_SESSION_ID_LEN} characters"
        )));
    }
    if !session_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(ClientError::InvalidArgument(
            "session id must be alphanumeric ASCII with '-' or '_'".to_string(),
        ));
    }
    Ok(session_id.to_string())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatusSnapshot {
    pub state: ConnectionState,
    pub polling: bool,
    pub session_id: Option<String>,
    pub reconnect_attempts: u32,
    pub events_dispatched: u64,
    pub last_event_ms: Option<i64>,
    pub reason: Option<String>,
}

pub(crate) fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
