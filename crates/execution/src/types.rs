// In crates/execution/src/types.rs

use chrono::{DateTime, Utc};
use core_types::{OrderType, Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The direction of an order on the book, as opposed to the position it affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// The order side that grows a position of `side`.
    pub fn opening(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// The order side that shrinks a position of `side`.
    pub fn closing(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

/// The exchange's wire name for a hedge-mode position side.
pub fn position_side_str(side: Side) -> &'static str {
    match side {
        Side::Long => "LONG",
        Side::Short => "SHORT",
    }
}

/// The exchange's conditional order type for a protective leg.
pub fn conditional_type_str(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::StopLoss => "STOP_MARKET",
        OrderType::TakeProfit => "TAKE_PROFIT_MARKET",
    }
}

/// A non-flat position as reported by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePosition {
    pub symbol: Symbol,
    pub side: Side,
    /// Always positive; the sign lives in `side`.
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub liquidation_price: Decimal,
    pub leverage: u32,
    pub margin: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Futures account balances in quote currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountInfo {
    /// Wallet balance plus unrealized pnl.
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone)]
pub struct MarketOrderRequest {
    pub symbol: Symbol,
    pub side: OrderSide,
    /// The hedge-mode position this order acts on.
    pub position_side: Side,
    pub quantity: Decimal,
    /// Never grow the position. Implied in hedge mode when `side` closes `position_side`.
    pub reduce_only: bool,
}

/// A STOP_MARKET or TAKE_PROFIT_MARKET leg protecting an open position.
#[derive(Debug, Clone)]
pub struct ConditionalOrderRequest {
    pub symbol: Symbol,
    pub position_side: Side,
    pub order_type: OrderType,
    pub trigger_price: Decimal,
    pub quantity: Decimal,
}

/// The exchange's acknowledgement of a new order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: i64,
    pub symbol: Symbol,
    /// Raw exchange status, e.g. "NEW" or "FILLED".
    pub status: String,
    /// Zero until something executes.
    pub avg_price: Decimal,
    pub executed_qty: Decimal,
}

/// One execution belonging to an order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: i64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub realized_pnl: Decimal,
    pub time: DateTime<Utc>,
}

/// Trading rules needed to size an order.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInfo {
    pub symbol: Symbol,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
    pub quantity_precision: u32,
    pub price_precision: u32,
}
