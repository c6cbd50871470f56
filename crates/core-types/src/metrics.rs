// In crates/core-types/src/metrics.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Derived account health figures. Percentages are plain numbers (12.5 == 12.5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AccountMetrics {
    /// Wallet balance plus unrealized pnl.
    pub total_balance: Decimal,
    pub available: Decimal,
    pub unrealized_pnl: Decimal,
    pub initial_balance: Decimal,
    /// Highest total balance ever observed, snapshots included.
    pub peak_balance: Decimal,
    pub return_percent: f64,
    pub drawdown_from_peak: f64,
    pub drawdown_from_initial: f64,
    pub sharpe_ratio: f64,
}
