// In crates/core-types/src/position.rs

use crate::{Side, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Positions are unique per (symbol, side); hedge mode allows one of each.
pub type PositionKey = (Symbol, Side);

/// A locally persisted mirror of an open exchange position.
///
/// Market fields (`quantity` through `unrealized_pnl`) are overwritten on every
/// sync. `entry_reason`, `exit_plan`, `order_id` and `opened_at` are set when
/// the position is opened through the reconciler and are never touched by sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub liquidation_price: Decimal,
    pub leverage: u32,
    pub margin: Decimal,
    pub unrealized_pnl: Decimal,
    /// Highest pnl percent seen while the position has been open. Never decreases.
    pub peak_pnl_percent: f64,
    pub entry_reason: String,
    pub exit_plan: String,
    /// Exchange id of the order that opened the position, when known.
    pub order_id: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        (self.symbol.clone(), self.side)
    }

    /// Unrealized pnl as a percentage of the margin committed.
    pub fn pnl_percent(&self) -> f64 {
        pnl_percent(self.unrealized_pnl, self.margin)
    }

    pub fn holding_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.opened_at).num_seconds().max(0) as f64 / 3600.0
    }

    pub fn holding_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_minutes().max(0)
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.current_price
    }
}

/// Return on margin in percent. Zero margin yields zero rather than infinity.
pub fn pnl_percent(unrealized_pnl: Decimal, margin: Decimal) -> f64 {
    if margin <= Decimal::ZERO {
        return 0.0;
    }
    (unrealized_pnl / margin * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(0.0)
}
