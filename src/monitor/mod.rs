//! Live on-chain monitoring of watched contracts.

pub mod classify;
pub mod live;
pub mod notify;
pub mod types;
pub mod watchlist;

pub use live::{LiveMonitor, MonitorHandle};
pub use types::{AlertConfig, ConnectionState, MonitorUpdate, EVENT_CAPACITY};
pub use watchlist::Watchlist;
