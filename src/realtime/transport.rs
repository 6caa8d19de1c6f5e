use crate::error::ClientError;
use crate::realtime::types::{now_unix_ms, WalletSnapshot, WalletSnapshotWire};
use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use reqwest::Client;
use std::pin::Pin;
use std::sync::Arc;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

const PUSH_MAX_MESSAGE_SIZE: usize = 1 << 20;
const PUSH_MAX_FRAME_SIZE: usize = 1 << 20;

/// One inbound unit from the push channel, after websocket control frames
/// have been stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum PushFrame {
    Text(String),
    Binary(Vec<u8>),
    Closed,
}

pub type PushChannel = Pin<Box<dyn Stream<Item = Result<PushFrame, ClientError>> + Send>>;

/// Opens the push channel for a session. The production implementation is
/// [`WsConnector`]; tests script their own.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, session_id: &str) -> Result<PushChannel, ClientError>;
}

/// Supplies the bearer token for the fallback fetch. Reading it out of
/// cookie or local storage stays in the embedding application.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn none() -> Self {
        Self { token: None }
    }
}

impl TokenSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Fetches the wallet snapshot the polling engine synthesizes events from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_wallet_snapshot(&self, session_id: &str)
        -> Result<WalletSnapshot, ClientError>;
}

pub(crate) fn push_endpoint(base_url: &str, session_id: &str) -> String {
    format!("{}?sessionId={session_id}", base_url.trim_end_matches('/'))
}

pub(crate) fn wallet_snapshot_endpoint(base_url: &str) -> String {
    format!("{}/wallet/snapshot", base_url.trim_end_matches('/'))
}

pub struct WsConnector {
    push_base_url: String,
}

impl WsConnector {
    pub fn new(push_base_url: impl Into<String>) -> Self {
        Self {
            push_base_url: push_base_url.into(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, session_id: &str) -> Result<PushChannel, ClientError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(PUSH_MAX_MESSAGE_SIZE),
            max_frame_size: Some(PUSH_MAX_FRAME_SIZE),
            ..Default::default()
        };

        let endpoint = push_endpoint(&self.push_base_url, session_id);
        let (stream, _) = connect_async_with_config(endpoint, Some(ws_config), true).await?;

        Ok(Box::pin(stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(PushFrame::Text(text))),
                Ok(Message::Binary(bytes)) => Some(Ok(PushFrame::Binary(bytes))),
                Ok(Message::Close(_)) => Some(Ok(PushFrame::Closed)),
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => None,
                Err(error) => Some(Err(ClientError::from(error))),
            }
        })))
    }
}

pub struct HttpSnapshotSource {
    client: Client,
    api_base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpSnapshotSource {
    pub fn new(api_base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client: Client::new(),
            api_base_url: api_base_url.into(),
            tokens,
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_wallet_snapshot(
        &self,
        session_id: &str,
    ) -> Result<WalletSnapshot, ClientError> {
        let endpoint = wallet_snapshot_endpoint(&self.api_base_url);
        let mut request = self
            .client
            .get(endpoint)
            .query(&[("sessionId", session_id)]);
        if let Some(token) = self.tokens.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let payload = response.json::<WalletSnapshotWire>().await?;
        payload.into_snapshot(now_unix_ms())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::realtime::types::TransactionRecord;
    use futures_util::stream;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    pub(crate) enum ScriptedOutcome {
        /// `connect` fails outright.
        Refused,
        /// `connect` succeeds; the frames arrive, then the channel stays open.
        Feed(Vec<PushFrame>),
        /// `connect` succeeds; the frames arrive, then the server closes.
        FeedThenClose(Vec<PushFrame>),
    }

    /// Connector whose outcomes are scripted per attempt. Once the script is
    /// exhausted every further attempt is refused.
    pub(crate) struct ScriptedConnector {
        outcomes: Mutex<VecDeque<ScriptedOutcome>>,
        pub(crate) connect_instants: Mutex<Vec<Instant>>,
        connect_calls: AtomicU32,
    }

    impl ScriptedConnector {
        pub(crate) fn new(outcomes: Vec<ScriptedOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                connect_instants: Mutex::new(Vec::new()),
                connect_calls: AtomicU32::new(0),
            })
        }

        pub(crate) fn calls(&self) -> u32 {
            self.connect_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _session_id: &str) -> Result<PushChannel, ClientError> {
            let _ = self.connect_calls.fetch_add(1, Ordering::SeqCst);
            self.connect_instants.lock().push(Instant::now());

            match self.outcomes.lock().pop_front() {
                None | Some(ScriptedOutcome::Refused) => Err(ClientError::InvalidArgument(
                    "scripted connection refusal".to_string(),
                )),
                Some(ScriptedOutcome::Feed(frames)) => Ok(Box::pin(
                    stream::iter(frames.into_iter().map(Ok)).chain(stream::pending()),
                )),
                Some(ScriptedOutcome::FeedThenClose(frames)) => {
                    Ok(Box::pin(stream::iter(frames.into_iter().map(Ok))))
                }
            }
        }
    }

    /// Snapshot source returning a scripted sequence; an exhausted script
    /// fails every further fetch.
    pub(crate) struct ScriptedSnapshots {
        snapshots: Mutex<VecDeque<Option<WalletSnapshot>>>,
        fetch_calls: AtomicU32,
    }

    impl ScriptedSnapshots {
        pub(crate) fn new(snapshots: Vec<Option<WalletSnapshot>>) -> Arc<Self> {
            Arc::new(Self {
                snapshots: Mutex::new(snapshots.into()),
                fetch_calls: AtomicU32::new(0),
            })
        }

        pub(crate) fn failing() -> Arc<Self> {
            Self::new(Vec::new())
        }

        pub(crate) fn calls(&self) -> u32 {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSnapshots {
        async fn fetch_wallet_snapshot(
            &self,
            _session_id: &str,
        ) -> Result<WalletSnapshot, ClientError> {
            let _ = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            match self.snapshots.lock().pop_front() {
                Some(Some(snapshot)) => Ok(snapshot),
                _ => Err(ClientError::SnapshotRejected(
                    "scripted fetch failure".to_string(),
                )),
            }
        }
    }

    pub(crate) fn snapshot(balance: f64, as_of_ms: i64) -> WalletSnapshot {
        WalletSnapshot {
            balance,
            recent_transactions: vec![TransactionRecord {
                id: format!("tx-{as_of_ms}"),
                amount: balance,
                description: "scripted".to_string(),
                created_at_ms: as_of_ms,
            }],
            as_of_ms,
        }
    }
}
