// In crates/engine/src/decision.rs

//! The seam between the engine and whatever proposes trades.
//!
//! A [`DecisionProvider`] sees a serialized snapshot of the market, the account,
//! open positions and recent activity, and answers with proposals. Every proposal
//! is checked and executed independently; the typed outcome of each is handed back
//! through [`DecisionProvider::report`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{AccountMetrics, Kline, Order, Side, Symbol, Trade};
use risk::ConditionType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Market data for one traded symbol.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    /// Close of the latest kline.
    pub price: Decimal,
    pub funding_rate: Decimal,
    pub klines: Vec<Kline>,
}

/// A position as the decision step sees it.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
    pub pnl_percent: f64,
    pub peak_pnl_percent: f64,
    pub holding_minutes: i64,
    pub entry_reason: String,
    pub exit_plan: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionContext {
    pub iteration: u64,
    pub timestamp: DateTime<Utc>,
    pub markets: Vec<MarketSnapshot>,
    pub account: AccountMetrics,
    pub positions: Vec<PositionView>,
    pub recent_trades: Vec<Trade>,
    pub recent_orders: Vec<Order>,
}

#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub system_instruction: String,
    pub context: DecisionContext,
}

impl DecisionRequest {
    /// The context as pretty JSON, the form stored in the audit row.
    pub fn context_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.context)
    }
}

/// One proposed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Proposal {
    #[serde(rename = "open_position")]
    Open {
        symbol: Symbol,
        side: Side,
        leverage: u32,
        quantity: Decimal,
        reason: String,
        exit_plan: String,
        /// Trigger price of a protective stop, placed right after the fill.
        #[serde(default)]
        stop_loss: Option<Decimal>,
        #[serde(default)]
        take_profit: Option<Decimal>,
    },
    #[serde(rename = "close_position")]
    Close {
        symbol: Symbol,
        /// Needed only when both hedge-mode sides of the symbol are open.
        #[serde(default)]
        side: Option<Side>,
        reason: String,
    },
}

impl Proposal {
    pub fn symbol(&self) -> &Symbol {
        match self {
            Proposal::Open { symbol, .. } | Proposal::Close { symbol, .. } => symbol,
        }
    }
}

/// What the decision step answered.
#[derive(Debug, Clone, Default)]
pub struct DecisionOutput {
    pub raw_text: String,
    pub proposals: Vec<Proposal>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A policy violation. Returned to the decision step, never raised as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    #[error("{explanation}")]
    ValidationRejected { explanation: String },

    #[error("leverage {leverage} is outside the allowed range {min}..={max}")]
    LeverageOutOfRange { leverage: u32, min: u32, max: u32 },

    #[error("order value {notional} is below the minimum of {min_notional}")]
    BelowMinNotional { notional: Decimal, min_notional: Decimal },

    #[error("quantity {quantity} rounds below the minimum lot of {min_qty}")]
    QuantityBelowMinimum { quantity: Decimal, min_qty: Decimal },

    #[error("a {side} position for {symbol} is already open")]
    PositionAlreadyOpen { symbol: Symbol, side: Side },

    #[error("no open position for {symbol}")]
    PositionNotFound { symbol: Symbol },

    #[error("both sides of {symbol} are open; the close must name a side")]
    AmbiguousSide { symbol: Symbol },

    #[error("{symbol} is not a traded symbol")]
    SymbolNotTraded { symbol: Symbol },
}

/// `Err` carries a policy rejection; transport and storage failures travel in the outer `Result`.
pub type Checked<T> = std::result::Result<T, Rejection>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Executed {
        order_id: Option<String>,
        /// The exit condition a close was accepted under.
        matched: Option<ConditionType>,
    },
    Rejected { rejection: Rejection },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub proposal: Proposal,
    pub outcome: Outcome,
}

impl ActionOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self.outcome, Outcome::Executed { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.outcome, Outcome::Rejected { .. })
    }
}

#[async_trait]
pub trait DecisionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn decide(&self, request: &DecisionRequest) -> anyhow::Result<DecisionOutput>;

    /// Receives the outcome of every proposal from the last `decide` call.
    async fn report(&self, _outcomes: &[ActionOutcome]) {}
}

/// Proposes nothing. Lets the risk rules and reconciliation run on their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct HoldProvider;

#[async_trait]
impl DecisionProvider for HoldProvider {
    fn name(&self) -> &'static str {
        "HoldProvider"
    }

    async fn decide(&self, _request: &DecisionRequest) -> anyhow::Result<DecisionOutput> {
        Ok(DecisionOutput {
            raw_text: "hold".into(),
            ..Default::default()
        })
    }
}
