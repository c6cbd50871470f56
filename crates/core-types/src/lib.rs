// In crates/core-types/src/lib.rs

pub mod error;
pub mod ledger;
pub mod metrics;
pub mod order;
pub mod position;
pub mod types;

// Re-export the most important types for easy access from other crates.
pub use error::{Error, Result};
pub use ledger::{AccountSnapshot, Decision, Trade, TradeAction};
pub use metrics::AccountMetrics;
pub use order::{Order, OrderStatus, OrderType};
pub use position::{pnl_percent, Position, PositionKey};
pub use types::{Kline, MarginType, Side, Symbol};
