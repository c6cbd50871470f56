// In crates/execution/src/simulated.rs

use crate::types::{
    AccountInfo, ConditionalOrderRequest, ExchangePosition, Fill, MarketOrderRequest, OrderAck,
    OrderSide, SymbolInfo,
};
use crate::{Error, ExchangeGateway, Result};
use app_config::types::SimulationSettings;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use core_types::{Kline, MarginType, OrderType, Side, Symbol};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct SimPosition {
    quantity: Decimal,
    entry_price: Decimal,
    leverage: u32,
}

#[derive(Debug, Clone)]
struct SimOrder {
    symbol: Symbol,
    position_side: Side,
    /// `None` for market orders.
    order_type: Option<OrderType>,
    trigger_price: Decimal,
    quantity: Decimal,
    status: String,
}

#[derive(Debug)]
struct SimState {
    wallet_balance: Decimal,
    marks: HashMap<Symbol, Decimal>,
    leverage: HashMap<Symbol, u32>,
    positions: HashMap<(Symbol, Side), SimPosition>,
    orders: HashMap<i64, SimOrder>,
    fills: HashMap<i64, Vec<Fill>>,
    next_order_id: i64,
    offline: bool,
}

/// An in-memory exchange with the live gateway's semantics.
///
/// Market orders fill instantly and completely at the current mark price and pay
/// the taker fee. Conditional orders rest as NEW until a test fills them with
/// [`SimulatedExchange::fill_conditional_order`]. Order ids increase monotonically.
#[derive(Debug)]
pub struct SimulatedExchange {
    taker_fee_rate: Decimal,
    step_size: Decimal,
    tick_size: Decimal,
    min_qty: Decimal,
    min_notional: Decimal,
    state: Mutex<SimState>,
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

impl SimulatedExchange {
    pub fn new(settings: &SimulationSettings) -> Self {
        let marks = settings
            .mark_prices
            .iter()
            .map(|(symbol, price)| (Symbol::new(symbol.as_str()), decimal(*price)))
            .collect();

        Self {
            taker_fee_rate: decimal(settings.taker_fee_rate),
            step_size: decimal(settings.step_size),
            tick_size: decimal(settings.tick_size),
            min_qty: decimal(settings.min_qty),
            min_notional: decimal(settings.min_notional),
            state: Mutex::new(SimState {
                wallet_balance: decimal(settings.initial_balance),
                marks,
                leverage: HashMap::new(),
                positions: HashMap::new(),
                orders: HashMap::new(),
                fills: HashMap::new(),
                next_order_id: 1,
                offline: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock cannot leave the maps half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn online(&self) -> Result<MutexGuard<'_, SimState>> {
        let state = self.state();
        if state.offline {
            return Err(Error::ExecutionFailed {
                reason: "simulated exchange is unreachable".into(),
            });
        }
        Ok(state)
    }

    // --- Test and paper-trading controls ---

    pub fn set_mark_price(&self, symbol: &Symbol, price: Decimal) {
        self.state().marks.insert(symbol.clone(), price);
    }

    /// Makes every gateway call fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Forces the raw status string reported for an order.
    pub fn set_order_status(&self, order_id: i64, status: &str) -> Result<()> {
        let mut state = self.state();
        let order = state.orders.get_mut(&order_id).ok_or(Error::UnknownOrder(order_id))?;
        order.status = status.to_string();
        Ok(())
    }

    /// Executes a resting conditional order at its trigger price, as if the mark had crossed it.
    pub fn fill_conditional_order(&self, order_id: i64) -> Result<()> {
        let mut state = self.state();
        let order = state.orders.get(&order_id).cloned().ok_or(Error::UnknownOrder(order_id))?;
        if order.order_type.is_none() || order.status != "NEW" {
            return Err(Error::ExecutionFailed {
                reason: format!("order {} is not a resting conditional order", order_id),
            });
        }
        self.reduce(&mut state, order_id, &order.symbol, order.position_side, order.quantity, order.trigger_price)?;
        if let Some(o) = state.orders.get_mut(&order_id) {
            o.status = "FILLED".into();
        }
        Ok(())
    }

    /// Removes a position as a liquidation would, forfeiting its margin.
    pub fn liquidate(&self, symbol: &Symbol, side: Side) -> Result<()> {
        let mut state = self.state();
        let position = state
            .positions
            .remove(&(symbol.clone(), side))
            .ok_or_else(|| Error::NoPosition { symbol: symbol.clone(), side })?;
        let margin = position.quantity * position.entry_price / Decimal::from(position.leverage);
        state.wallet_balance -= margin;
        tracing::warn!(symbol = %symbol, side = %side, margin = %margin, "Simulated liquidation.");
        Ok(())
    }

    /// Forgets the fills of an order, as when the exchange's history is unavailable.
    pub fn drop_trade_history(&self, order_id: i64) {
        self.state().fills.remove(&order_id);
    }

    pub fn wallet_balance(&self) -> Decimal {
        self.state().wallet_balance
    }

    // --- Matching ---

    fn next_id(state: &mut SimState) -> i64 {
        let id = state.next_order_id;
        state.next_order_id += 1;
        id
    }

    fn mark(state: &SimState, symbol: &Symbol) -> Result<Decimal> {
        state
            .marks
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::UnknownSymbol(symbol.clone()))
    }

    fn increase(&self, state: &mut SimState, order_id: i64, symbol: &Symbol, side: Side, quantity: Decimal, price: Decimal) {
        let fee = quantity * price * self.taker_fee_rate;
        let leverage = state.leverage.get(symbol).copied().unwrap_or(1);
        let position = state
            .positions
            .entry((symbol.clone(), side))
            .or_insert(SimPosition {
                quantity: Decimal::ZERO,
                entry_price: price,
                leverage,
            });
        let total = position.quantity + quantity;
        position.entry_price = (position.entry_price * position.quantity + price * quantity) / total;
        position.quantity = total;
        position.leverage = leverage;
        state.wallet_balance -= fee;
        state.fills.entry(order_id).or_default().push(Fill {
            order_id,
            price,
            quantity,
            commission: fee,
            realized_pnl: Decimal::ZERO,
            time: Utc::now(),
        });
    }

    /// Closes up to `quantity` of a position at `price`. Returns the executed quantity.
    fn reduce(&self, state: &mut SimState, order_id: i64, symbol: &Symbol, side: Side, quantity: Decimal, price: Decimal) -> Result<Decimal> {
        let key = (symbol.clone(), side);
        let position = state
            .positions
            .get_mut(&key)
            .ok_or_else(|| Error::NoPosition { symbol: symbol.clone(), side })?;

        let executed = quantity.min(position.quantity);
        let realized = (price - position.entry_price) * executed * side.sign();
        let fee = executed * price * self.taker_fee_rate;
        position.quantity -= executed;
        if position.quantity.is_zero() {
            state.positions.remove(&key);
        }

        state.wallet_balance += realized - fee;
        state.fills.entry(order_id).or_default().push(Fill {
            order_id,
            price,
            quantity: executed,
            commission: fee,
            realized_pnl: realized,
            time: Utc::now(),
        });
        Ok(executed)
    }
}

/// Parses an interval like "3m", "1h" or "1d".
fn interval_duration(interval: &str) -> Duration {
    let (count, unit) = interval.split_at(interval.len().saturating_sub(1));
    let count: i64 = count.parse().unwrap_or(1);
    match unit {
        "h" => Duration::hours(count),
        "d" => Duration::days(count),
        "w" => Duration::weeks(count),
        _ => Duration::minutes(count),
    }
}

#[async_trait]
impl ExchangeGateway for SimulatedExchange {
    fn name(&self) -> &'static str {
        "SimulatedExchange"
    }

    async fn get_positions(&self) -> Result<Vec<ExchangePosition>> {
        let state = self.online()?;
        let mut positions: Vec<_> = state
            .positions
            .iter()
            .map(|((symbol, side), p)| {
                let mark = state.marks.get(symbol).copied().unwrap_or(p.entry_price);
                let leverage = Decimal::from(p.leverage);
                ExchangePosition {
                    symbol: symbol.clone(),
                    side: *side,
                    quantity: p.quantity,
                    entry_price: p.entry_price,
                    mark_price: mark,
                    liquidation_price: p.entry_price * (Decimal::ONE - side.sign() / leverage),
                    leverage: p.leverage,
                    margin: p.quantity * p.entry_price / leverage,
                    unrealized_pnl: (mark - p.entry_price) * p.quantity * side.sign(),
                }
            })
            .collect();
        positions.sort_by(|a, b| (&a.symbol, a.side.as_str()).cmp(&(&b.symbol, b.side.as_str())));
        Ok(positions)
    }

    async fn get_account_info(&self) -> Result<AccountInfo> {
        let state = self.online()?;
        let (unrealized, margin) = state.positions.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(pnl, margin), ((symbol, side), p)| {
                let mark = state.marks.get(symbol).copied().unwrap_or(p.entry_price);
                (
                    pnl + (mark - p.entry_price) * p.quantity * side.sign(),
                    margin + p.quantity * p.entry_price / Decimal::from(p.leverage),
                )
            },
        );
        Ok(AccountInfo {
            total_balance: state.wallet_balance + unrealized,
            available_balance: (state.wallet_balance + unrealized - margin).max(Decimal::ZERO),
            unrealized_pnl: unrealized,
        })
    }

    async fn get_klines(&self, symbol: &Symbol, interval: &str, limit: u16) -> Result<Vec<Kline>> {
        let state = self.online()?;
        let mark = Self::mark(&state, symbol)?;
        let step = interval_duration(interval);
        let now = Utc::now();
        // Flat candles at the mark; enough for anything that only reads the last close.
        Ok((0..i32::from(limit))
            .rev()
            .map(|back| {
                let open = now - step * (back + 1);
                Kline {
                    open_time: open.timestamp_millis(),
                    open: mark,
                    high: mark,
                    low: mark,
                    close: mark,
                    volume: Decimal::ZERO,
                    close_time: (open + step).timestamp_millis() - 1,
                }
            })
            .collect())
    }

    async fn get_funding_rate(&self, symbol: &Symbol) -> Result<Decimal> {
        let state = self.online()?;
        Self::mark(&state, symbol)?;
        Ok(Decimal::ZERO)
    }

    async fn set_leverage(&self, symbol: &Symbol, leverage: u32) -> Result<()> {
        let mut state = self.online()?;
        state.leverage.insert(symbol.clone(), leverage.max(1));
        Ok(())
    }

    async fn set_margin_type(&self, symbol: &Symbol, _margin_type: MarginType) -> Result<()> {
        let state = self.online()?;
        Self::mark(&state, symbol)?;
        Ok(())
    }

    async fn create_market_order(&self, request: &MarketOrderRequest) -> Result<OrderAck> {
        let mut state = self.online()?;
        let price = Self::mark(&state, &request.symbol)?;
        if request.quantity <= Decimal::ZERO {
            return Err(Error::ExecutionFailed {
                reason: format!("invalid quantity {}", request.quantity),
            });
        }

        let closing = request.side == OrderSide::closing(request.position_side);
        if request.reduce_only && !closing {
            return Err(Error::ExecutionFailed {
                reason: format!(
                    "{} order cannot reduce a {} position",
                    request.side.as_str(),
                    request.position_side
                ),
            });
        }

        let order_id = Self::next_id(&mut state);
        let executed = if closing {
            self.reduce(&mut state, order_id, &request.symbol, request.position_side, request.quantity, price)?
        } else {
            self.increase(&mut state, order_id, &request.symbol, request.position_side, request.quantity, price);
            request.quantity
        };
        state.orders.insert(
            order_id,
            SimOrder {
                symbol: request.symbol.clone(),
                position_side: request.position_side,
                order_type: None,
                trigger_price: Decimal::ZERO,
                quantity: executed,
                status: "FILLED".into(),
            },
        );

        tracing::debug!(order_id, symbol = %request.symbol, price = %price, quantity = %executed, "Simulated market fill.");
        Ok(OrderAck {
            order_id,
            symbol: request.symbol.clone(),
            status: "FILLED".into(),
            avg_price: price,
            executed_qty: executed,
        })
    }

    async fn create_conditional_order(&self, request: &ConditionalOrderRequest) -> Result<OrderAck> {
        let mut state = self.online()?;
        Self::mark(&state, &request.symbol)?;
        if request.trigger_price <= Decimal::ZERO {
            return Err(Error::ExecutionFailed {
                reason: format!("invalid trigger price {}", request.trigger_price),
            });
        }
        let order_id = Self::next_id(&mut state);
        state.orders.insert(
            order_id,
            SimOrder {
                symbol: request.symbol.clone(),
                position_side: request.position_side,
                order_type: Some(request.order_type),
                trigger_price: crate::quantity::round_to_tick(request.trigger_price, self.tick_size),
                quantity: request.quantity,
                status: "NEW".into(),
            },
        );
        Ok(OrderAck {
            order_id,
            symbol: request.symbol.clone(),
            status: "NEW".into(),
            avg_price: Decimal::ZERO,
            executed_qty: Decimal::ZERO,
        })
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: i64) -> Result<()> {
        let mut state = self.online()?;
        let order = state.orders.get_mut(&order_id).ok_or(Error::UnknownOrder(order_id))?;
        if order.status != "NEW" && order.status != "PARTIALLY_FILLED" {
            return Err(Error::ExecutionFailed {
                reason: format!("order {} is already {}", order_id, order.status),
            });
        }
        order.status = "CANCELED".into();
        Ok(())
    }

    async fn get_order_status(&self, _symbol: &Symbol, order_id: i64) -> Result<String> {
        let state = self.online()?;
        state
            .orders
            .get(&order_id)
            .map(|o| o.status.clone())
            .ok_or(Error::UnknownOrder(order_id))
    }

    async fn get_trade_history(&self, _symbol: &Symbol, order_id: i64) -> Result<Vec<Fill>> {
        let state = self.online()?;
        Ok(state.fills.get(&order_id).cloned().unwrap_or_default())
    }

    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolInfo> {
        let state = self.online()?;
        Self::mark(&state, symbol)?;
        Ok(SymbolInfo {
            symbol: symbol.clone(),
            step_size: self.step_size,
            tick_size: self.tick_size,
            min_qty: self.min_qty,
            min_notional: self.min_notional,
            quantity_precision: self.step_size.normalize().scale(),
            price_precision: self.tick_size.normalize().scale(),
        })
    }
}

impl Default for SimulatedExchange {
    fn default() -> Self {
        Self::new(&SimulationSettings::default())
    }
}
