// In crates/execution/src/lib.rs

use async_trait::async_trait;
use core_types::{Kline, MarginType, Side, Symbol};
use rust_decimal::Decimal;

pub mod backoff;
pub mod error;
pub mod live;
pub mod quantity;
pub mod simulated;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use live::LiveExchange;
pub use simulated::SimulatedExchange;
pub use types::{
    AccountInfo, ConditionalOrderRequest, ExchangePosition, Fill, MarketOrderRequest, OrderAck,
    OrderSide, SymbolInfo,
};

/// The capability surface the trading core needs from an exchange.
///
/// Implemented by the live Binance adapter and by an in-memory simulation with
/// the same semantics, so everything above this trait can run without risking
/// funds. Positions are in hedge mode: one long and one short per symbol.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// The name of the gateway (e.g., "LiveExchange", "SimulatedExchange").
    fn name(&self) -> &'static str;

    /// Every non-flat position.
    async fn get_positions(&self) -> Result<Vec<ExchangePosition>>;

    async fn get_account_info(&self) -> Result<AccountInfo>;

    async fn get_klines(&self, symbol: &Symbol, interval: &str, limit: u16) -> Result<Vec<Kline>>;

    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<Decimal>;

    async fn set_leverage(&self, symbol: &Symbol, leverage: u32) -> Result<()>;

    /// Succeeds when the symbol already uses `margin_type`.
    async fn set_margin_type(&self, symbol: &Symbol, margin_type: MarginType) -> Result<()>;

    /// Places a market order. Never retried by implementations.
    async fn create_market_order(&self, request: &MarketOrderRequest) -> Result<OrderAck>;

    async fn open_long(&self, symbol: &Symbol, quantity: Decimal) -> Result<OrderAck> {
        self.open(symbol, Side::Long, quantity).await
    }

    async fn open_short(&self, symbol: &Symbol, quantity: Decimal) -> Result<OrderAck> {
        self.open(symbol, Side::Short, quantity).await
    }

    /// Reduce-only sell against the long side.
    async fn close_long(&self, symbol: &Symbol, quantity: Decimal) -> Result<OrderAck> {
        self.close(symbol, Side::Long, quantity).await
    }

    /// Reduce-only buy against the short side.
    async fn close_short(&self, symbol: &Symbol, quantity: Decimal) -> Result<OrderAck> {
        self.close(symbol, Side::Short, quantity).await
    }

    async fn open(&self, symbol: &Symbol, side: Side, quantity: Decimal) -> Result<OrderAck> {
        self.create_market_order(&MarketOrderRequest {
            symbol: symbol.clone(),
            side: OrderSide::opening(side),
            position_side: side,
            quantity,
            reduce_only: false,
        })
        .await
    }

    async fn close(&self, symbol: &Symbol, side: Side, quantity: Decimal) -> Result<OrderAck> {
        self.create_market_order(&MarketOrderRequest {
            symbol: symbol.clone(),
            side: OrderSide::closing(side),
            position_side: side,
            quantity,
            reduce_only: true,
        })
        .await
    }

    /// Places a protective leg that rests until the mark price crosses its trigger.
    async fn create_conditional_order(&self, request: &ConditionalOrderRequest) -> Result<OrderAck>;

    async fn cancel_order(&self, symbol: &Symbol, order_id: i64) -> Result<()>;

    /// The raw exchange status string (NEW, PARTIALLY_FILLED, FILLED, CANCELED, ...).
    async fn get_order_status(&self, symbol: &Symbol, order_id: i64) -> Result<String>;

    /// Every fill of one order, oldest first.
    async fn get_trade_history(&self, symbol: &Symbol, order_id: i64) -> Result<Vec<Fill>>;

    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolInfo>;

    /// Floors `quantity` to the symbol's lot size, rejecting results under the minimum.
    async fn format_quantity(&self, symbol: &Symbol, quantity: Decimal) -> Result<Decimal> {
        let info = self.get_symbol_info(symbol).await?;
        quantity::format_quantity(&info, quantity)
    }
}
