// In crates/core-types/src/order.rs

use crate::{Error, Result, Side, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The protective leg a conditional order represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    StopLoss,
    TakeProfit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::StopLoss => "stop_loss",
            OrderType::TakeProfit => "take_profit",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop_loss" => Ok(OrderType::StopLoss),
            "take_profit" => Ok(OrderType::TakeProfit),
            _ => Err(Error::InvalidOrderType(s.to_string())),
        }
    }
}

/// Lifecycle of a conditional order.
///
/// `Active` is the only non-terminal state. Every other state is final: an
/// order never re-activates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    Triggered,
    Canceled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::Triggered => "triggered",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active)
    }

    /// Only `Active -> {Triggered, Canceled, Failed}` is legal.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(self, OrderStatus::Active) && next.is_terminal()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(OrderStatus::Active),
            "triggered" => Ok(OrderStatus::Triggered),
            "canceled" => Ok(OrderStatus::Canceled),
            "failed" => Ok(OrderStatus::Failed),
            _ => Err(Error::InvalidOrderStatus(s.to_string())),
        }
    }
}

/// A conditional (stop-loss / take-profit) order resting on the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub symbol: Symbol,
    /// Side of the position this order protects.
    pub side: Side,
    pub position_id: i64,
    pub order_type: OrderType,
    pub trigger_price: Decimal,
    pub quantity: Decimal,
    pub exchange_id: String,
    pub status: OrderStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// The numeric exchange order id, or `None` when the stored id is empty or malformed.
    pub fn exchange_order_id(&self) -> Option<i64> {
        self.exchange_id
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
    }
}
