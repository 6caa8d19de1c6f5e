pub mod notifications;
pub mod wallet;
