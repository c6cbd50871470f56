// In crates/core-types/src/ledger.rs

use crate::{Error, Result, Side, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl TradeAction {
    pub fn open(side: Side) -> Self {
        match side {
            Side::Long => TradeAction::OpenLong,
            Side::Short => TradeAction::OpenShort,
        }
    }

    pub fn close(side: Side) -> Self {
        match side {
            Side::Long => TradeAction::CloseLong,
            Side::Short => TradeAction::CloseShort,
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, TradeAction::CloseLong | TradeAction::CloseShort)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::OpenLong => "open_long",
            TradeAction::OpenShort => "open_short",
            TradeAction::CloseLong => "close_long",
            TradeAction::CloseShort => "close_short",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open_long" => Ok(TradeAction::OpenLong),
            "open_short" => Ok(TradeAction::OpenShort),
            "close_long" => Ok(TradeAction::CloseLong),
            "close_short" => Ok(TradeAction::CloseShort),
            _ => Err(Error::InvalidTradeAction(s.to_string())),
        }
    }
}

/// An immutable ledger row written for every open and close execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Assigned by the store; ignored on insert.
    pub id: i64,
    pub symbol: Symbol,
    pub side: Side,
    pub action: TradeAction,
    pub price: Decimal,
    pub quantity: Decimal,
    pub leverage: Option<u32>,
    /// Only set for closes.
    pub realized_pnl: Option<Decimal>,
    pub fee: Decimal,
    pub order_id: Option<String>,
    pub reason: String,
    pub executed_at: DateTime<Utc>,
}

/// Audit row for one trading cycle's decision step. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    pub iteration: u64,
    pub system_instruction: String,
    pub context: String,
    pub output: String,
    /// Proposals and their outcomes, serialized.
    pub actions: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Account balances persisted at the end of each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: i64,
    pub iteration: u64,
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub position_count: u32,
    pub recorded_at: DateTime<Utc>,
}
