pub mod polling;
pub(crate) mod session;
pub mod transport;
pub mod types;

pub const NOTIFICATION_EVENT: &str = "notification";
pub const WALLET_UPDATE_EVENT: &str = "wallet_update";
pub const ORDER_UPDATE_EVENT: &str = "order_update";
pub const TRANSACTION_UPDATE_EVENT: &str = "transaction_update";
