//! Realtime update delivery client for the admin dashboard.
//!
//! A long-lived push channel keeps wallet balances and notification feeds
//! current; when the channel is unreliable the client degrades to periodic
//! polling and synthesizes the same events, so consumers subscribed on the
//! event bus never know which transport is active.

pub mod bus;
pub mod client;
pub mod error;
pub mod realtime;
mod state;
pub mod sync;

pub use bus::{EventBus, SubscriptionHandle};
pub use client::RealtimeClient;
pub use error::ClientError;
pub use realtime::transport::{
    Connector, HttpSnapshotSource, PushChannel, PushFrame, SnapshotSource, StaticToken,
    TokenSource, WsConnector,
};
pub use realtime::types::{
    ClientArgs, ClientConfig, ClientStatusSnapshot, ConnectionState, EventKind, EventPayload,
    NotificationEvent, NotificationItem, OrderUpdateEvent, TransactionRecord,
    TransactionUpdateEvent, WalletSnapshot, WalletUpdateEvent,
};
pub use sync::notifications::{NotificationFeedState, NotificationSync};
pub use sync::wallet::{WalletState, WalletSync};
