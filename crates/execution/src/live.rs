// In crates/execution/src/live.rs

use crate::backoff::{retry, ExponentialBackoff};
use crate::types::{
    conditional_type_str, position_side_str, AccountInfo, ConditionalOrderRequest,
    ExchangePosition, Fill, MarketOrderRequest, OrderAck, OrderSide, SymbolInfo,
};
use crate::{Error, ExchangeGateway, Result};
use api_client::{ApiClient, NewOrderResponse, PositionRisk, SymbolSpec};
use async_trait::async_trait;
use chrono::DateTime;
use core_types::{Kline, MarginType, Side, Symbol};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Status reads get this many attempts before the error surfaces.
const READ_ATTEMPTS: u32 = 3;

/// A gateway that places real orders on Binance USDⓈ-M futures.
///
/// Read endpoints that are safe to repeat retry on transient failures.
/// Order placement never does, since a timed-out request may still have filled.
#[derive(Debug)]
pub struct LiveExchange {
    /// The API client for communicating with Binance.
    api_client: ApiClient,
    /// Exchange trading rules, loaded once on first use.
    symbol_info: RwLock<HashMap<Symbol, SymbolInfo>>,
}

impl LiveExchange {
    pub fn new(api_client: ApiClient) -> Self {
        Self {
            api_client,
            symbol_info: RwLock::new(HashMap::new()),
        }
    }

    async fn load_symbol_info(&self) -> Result<()> {
        let info = self.api_client.get_exchange_info().await?;
        let mut cache = self.symbol_info.write().await;
        for spec in &info.symbols {
            let parsed = symbol_info_from_spec(spec);
            cache.insert(parsed.symbol.clone(), parsed);
        }
        tracing::info!(symbols = cache.len(), "Loaded exchange trading rules.");
        Ok(())
    }
}

fn symbol_info_from_spec(spec: &SymbolSpec) -> SymbolInfo {
    SymbolInfo {
        symbol: Symbol::new(spec.symbol.as_str()),
        step_size: spec.filter_value("LOT_SIZE", "stepSize").unwrap_or_default(),
        tick_size: spec.filter_value("PRICE_FILTER", "tickSize").unwrap_or_default(),
        min_qty: spec.filter_value("LOT_SIZE", "minQty").unwrap_or_default(),
        min_notional: spec.filter_value("MIN_NOTIONAL", "notional").unwrap_or_default(),
        quantity_precision: spec.quantity_precision,
        price_precision: spec.price_precision,
    }
}

/// Converts one position-risk row. Flat rows yield `None`.
fn exchange_position(row: &PositionRisk) -> Option<ExchangePosition> {
    if row.position_amt.is_zero() {
        return None;
    }
    let side = match row.position_side.as_str() {
        "LONG" => Side::Long,
        "SHORT" => Side::Short,
        // One-way mode reports BOTH; the sign of the amount carries the side.
        _ if row.position_amt.is_sign_negative() => Side::Short,
        _ => Side::Long,
    };
    let quantity = row.position_amt.abs();
    let leverage = row.leverage.parse::<u32>().unwrap_or(1).max(1);
    // Cross-margin rows report no isolated margin; fall back to the initial margin.
    let margin = if row.isolated_margin > Decimal::ZERO {
        row.isolated_margin
    } else {
        quantity * row.mark_price / Decimal::from(leverage)
    };

    Some(ExchangePosition {
        symbol: Symbol::new(row.symbol.as_str()),
        side,
        quantity,
        entry_price: row.entry_price,
        mark_price: row.mark_price,
        liquidation_price: row.liquidation_price,
        leverage,
        margin,
        unrealized_pnl: row.un_realized_profit,
    })
}

fn order_ack(response: NewOrderResponse) -> OrderAck {
    OrderAck {
        order_id: response.order_id,
        symbol: Symbol::new(response.symbol),
        status: response.status,
        avg_price: response.avg_price,
        executed_qty: response.executed_qty,
    }
}

#[async_trait]
impl ExchangeGateway for LiveExchange {
    fn name(&self) -> &'static str {
        "LiveExchange"
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>> {
        let client = &self.api_client;
        let rows = retry("get_positions", ExponentialBackoff::default(), READ_ATTEMPTS, move || async move {
            client.get_position_risk().await.map_err(Error::from)
        })
        .await?;
        Ok(rows.iter().filter_map(exchange_position).collect())
    }

    async fn get_account_info(&self) -> Result<AccountInfo> {
        let account = self.api_client.get_account_balance().await?;
        Ok(AccountInfo {
            total_balance: account.total_margin_balance,
            available_balance: account.available_balance,
            unrealized_pnl: account.total_unrealized_profit,
        })
    }

    async fn get_klines(&self, symbol: &Symbol, interval: &str, limit: u16) -> Result<Vec<Kline>> {
        Ok(self
            .api_client
            .get_historical_klines(symbol, interval, None, Some(limit))
            .await?)
    }

    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<Decimal> {
        Ok(self.api_client.get_premium_index(symbol).await?.last_funding_rate)
    }

    async fn set_leverage(&self, symbol: &Symbol, leverage: u32) -> Result<()> {
        self.api_client.set_leverage(symbol, leverage).await?;
        tracing::info!(symbol = %symbol, leverage, "Leverage set.");
        Ok(())
    }

    async fn set_margin_type(&self, symbol: &Symbol, margin_type: MarginType) -> Result<()> {
        Ok(self.api_client.set_margin_type(symbol, margin_type).await?)
    }

    async fn create_market_order(&self, request: &MarketOrderRequest) -> Result<OrderAck> {
        // Hedge mode rejects an explicit reduceOnly flag; an order against the opposite
        // position side is reduce-only already.
        if request.reduce_only && request.side != OrderSide::closing(request.position_side) {
            return Err(Error::ExecutionFailed {
                reason: format!(
                    "{} order cannot reduce a {} position",
                    request.side.as_str(),
                    request.position_side
                ),
            });
        }

        tracing::info!(
            symbol = %request.symbol,
            side = request.side.as_str(),
            position_side = %request.position_side,
            quantity = %request.quantity,
            "Placing market order."
        );
        let response = self
            .api_client
            .place_market_order(
                &request.symbol,
                request.side.as_str(),
                position_side_str(request.position_side),
                request.quantity,
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, symbol = %request.symbol, "Failed to place market order.");
                Error::from(e)
            })?;
        tracing::info!(?response, "Market order accepted.");
        Ok(order_ack(response))
    }

    async fn create_conditional_order(&self, request: &ConditionalOrderRequest) -> Result<OrderAck> {
        let info = self.get_symbol_info(&request.symbol).await?;
        let trigger = crate::quantity::round_to_tick(request.trigger_price, info.tick_size);
        let response = self
            .api_client
            .place_conditional_order(
                &request.symbol,
                OrderSide::closing(request.position_side).as_str(),
                position_side_str(request.position_side),
                conditional_type_str(request.order_type),
                trigger,
                request.quantity,
            )
            .await?;
        tracing::info!(
            symbol = %request.symbol,
            order_id = response.order_id,
            order_type = request.order_type.as_str(),
            trigger = %trigger,
            "Conditional order placed."
        );
        Ok(order_ack(response))
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: i64) -> Result<()> {
        Ok(self.api_client.cancel_order(symbol, order_id).await?)
    }

    async fn get_order_status(&self, symbol: &Symbol, order_id: i64) -> Result<String> {
        let client = &self.api_client;
        let order = retry("get_order_status", ExponentialBackoff::default(), READ_ATTEMPTS, move || async move {
            client.get_order(symbol, order_id).await.map_err(Error::from)
        })
        .await?;
        Ok(order.status)
    }

    async fn get_trade_history(&self, symbol: &Symbol, order_id: i64) -> Result<Vec<Fill>> {
        let client = &self.api_client;
        let trades = retry("get_trade_history", ExponentialBackoff::default(), READ_ATTEMPTS, move || async move {
            client.get_user_trades(symbol, order_id).await.map_err(Error::from)
        })
        .await?;

        let mut fills = trades
            .into_iter()
            .map(|t| {
                let time = DateTime::from_timestamp_millis(t.time)
                    .ok_or_else(|| Error::InvalidResponse(format!("fill time {} out of range", t.time)))?;
                Ok(Fill {
                    order_id: t.order_id,
                    price: t.price,
                    quantity: t.qty,
                    commission: t.commission,
                    realized_pnl: t.realized_pnl,
                    time,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        fills.sort_by_key(|f| f.time);
        Ok(fills)
    }

    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolInfo> {
        if let Some(info) = self.symbol_info.read().await.get(symbol) {
            return Ok(info.clone());
        }
        self.load_symbol_info().await?;
        self.symbol_info
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::UnknownSymbol(symbol.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(amount: Decimal, position_side: &str, isolated_margin: Decimal) -> PositionRisk {
        PositionRisk {
            symbol: "BTCUSDT".into(),
            position_amt: amount,
            entry_price: dec!(100000),
            mark_price: dec!(101000),
            un_realized_profit: dec!(10),
            liquidation_price: dec!(91000),
            leverage: "10".into(),
            isolated_margin,
            position_side: position_side.into(),
        }
    }

    #[test]
    fn flat_rows_are_dropped() {
        assert!(exchange_position(&row(Decimal::ZERO, "LONG", dec!(0))).is_none());
    }

    #[test]
    fn hedge_rows_keep_their_side_and_isolated_margin() {
        let p = exchange_position(&row(dec!(-0.01), "SHORT", dec!(101.5))).unwrap();
        assert_eq!(p.side, Side::Short);
        assert_eq!(p.quantity, dec!(0.01));
        assert_eq!(p.margin, dec!(101.5));
        assert_eq!(p.leverage, 10);
    }

    #[test]
    fn cross_margin_falls_back_to_initial_margin() {
        let p = exchange_position(&row(dec!(0.01), "BOTH", Decimal::ZERO)).unwrap();
        assert_eq!(p.side, Side::Long);
        assert_eq!(p.margin, dec!(101));
    }
}
