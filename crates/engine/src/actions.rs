// In crates/engine/src/actions.rs

//! The money-moving half of the reconciler: every open and close goes through here
//! so the trade ledger and the positions table change together.

use crate::decision::{Checked, Rejection};
use crate::fills::aggregate_fills;
use crate::reconciler::{load_positions, Reconciler};
use crate::Result;
use chrono::Utc;
use core_types::{Order, OrderStatus, OrderType, Position, Side, Symbol, Trade, TradeAction};
use database::{orders, positions, trades};
use execution::ConditionalOrderRequest;
use rust_decimal::Decimal;

/// A validated-shape request to open a position.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub leverage: u32,
    pub quantity: Decimal,
    /// Latest market price, used for the notional check before the order is sent.
    pub reference_price: Decimal,
    pub reason: String,
    pub exit_plan: String,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

/// Result of a best-effort sweep over all positions.
#[derive(Debug, Default)]
pub struct CloseSweep {
    pub closed: Vec<Trade>,
    pub failed: usize,
}

impl Reconciler {
    /// Opens a position after the leverage, duplicate and notional checks.
    ///
    /// Protective orders are placed after the position is recorded; failing to
    /// place one is logged and does not undo the open.
    pub async fn open_position(&self, request: &OpenRequest) -> Result<Checked<Position>> {
        let _guard = self.guard.lock().await;
        let limits = &self.limits;

        if request.leverage < limits.min_leverage || request.leverage > limits.max_leverage {
            return Ok(Err(Rejection::LeverageOutOfRange {
                leverage: request.leverage,
                min: limits.min_leverage,
                max: limits.max_leverage,
            }));
        }

        let existing = {
            let mut conn = self.db.acquire().await?;
            positions::find(&mut conn, &request.symbol, request.side).await?
        };
        if existing.is_some() {
            return Ok(Err(Rejection::PositionAlreadyOpen {
                symbol: request.symbol.clone(),
                side: request.side,
            }));
        }

        let info = self.exchange.get_symbol_info(&request.symbol).await?;
        let quantity = match execution::quantity::format_quantity(&info, request.quantity) {
            Ok(quantity) => quantity,
            Err(execution::Error::QuantityTooSmall { quantity, min_qty, .. }) => {
                return Ok(Err(Rejection::QuantityBelowMinimum { quantity, min_qty }));
            }
            Err(e) => return Err(e.into()),
        };
        let min_notional = limits.min_notional.max(info.min_notional);
        let notional = quantity * request.reference_price;
        if notional < min_notional {
            return Ok(Err(Rejection::BelowMinNotional { notional, min_notional }));
        }

        self.exchange.set_margin_type(&request.symbol, limits.margin_type).await?;
        self.exchange.set_leverage(&request.symbol, request.leverage).await?;
        let ack = self.exchange.open(&request.symbol, request.side, quantity).await?;

        let fills = match self.exchange.get_trade_history(&request.symbol, ack.order_id).await {
            Ok(fills) => fills,
            Err(e) => {
                tracing::warn!(order_id = ack.order_id, error = %e, "Could not read opening fills; using the order acknowledgement.");
                Vec::new()
            }
        };
        let fill = aggregate_fills(&fills);
        let price = fill
            .as_ref()
            .map(|f| f.avg_price)
            .or_else(|| (ack.avg_price > Decimal::ZERO).then_some(ack.avg_price))
            .unwrap_or(request.reference_price);
        let filled_qty = fill
            .as_ref()
            .map(|f| f.quantity)
            .or_else(|| (ack.executed_qty > Decimal::ZERO).then_some(ack.executed_qty))
            .unwrap_or(quantity);
        let fee = fill.as_ref().map(|f| f.commission).unwrap_or_default();
        let now = Utc::now();
        let order_id = ack.order_id.to_string();

        let mut position = Position {
            id: 0,
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: filled_qty,
            entry_price: price,
            current_price: price,
            liquidation_price: Decimal::ZERO,
            leverage: request.leverage,
            margin: filled_qty * price / Decimal::from(request.leverage),
            unrealized_pnl: Decimal::ZERO,
            peak_pnl_percent: 0.0,
            entry_reason: request.reason.clone(),
            exit_plan: request.exit_plan.clone(),
            order_id: Some(order_id.clone()),
            opened_at: now,
        };

        let mut tx = self.db.begin().await?;
        trades::insert(
            &mut *tx,
            &Trade {
                id: 0,
                symbol: request.symbol.clone(),
                side: request.side,
                action: TradeAction::open(request.side),
                price,
                quantity: filled_qty,
                leverage: Some(request.leverage),
                realized_pnl: None,
                fee,
                order_id: Some(order_id),
                reason: request.reason.clone(),
                executed_at: now,
            },
        )
        .await?;
        position.id = positions::upsert_opened(&mut *tx, &position).await?;
        tx.commit().await.map_err(database::Error::from)?;

        tracing::info!(
            symbol = %position.symbol,
            side = %position.side,
            quantity = %position.quantity,
            price = %position.entry_price,
            leverage = position.leverage,
            "Position opened."
        );

        for (order_type, trigger) in [
            (OrderType::StopLoss, request.stop_loss),
            (OrderType::TakeProfit, request.take_profit),
        ] {
            if let Some(trigger) = trigger {
                self.place_protective_order(&position, order_type, trigger).await;
            }
        }

        Ok(Ok(position))
    }

    async fn place_protective_order(&self, position: &Position, order_type: OrderType, trigger: Decimal) {
        // A stop above a long's entry (or a target below it) would fire immediately.
        let below_entry = trigger < position.entry_price;
        let sensible = match (order_type, position.side) {
            (OrderType::StopLoss, Side::Long) | (OrderType::TakeProfit, Side::Short) => below_entry,
            (OrderType::StopLoss, Side::Short) | (OrderType::TakeProfit, Side::Long) => !below_entry,
        };
        if !sensible || trigger <= Decimal::ZERO {
            tracing::warn!(
                symbol = %position.symbol,
                side = %position.side,
                order_type = %order_type,
                trigger = %trigger,
                entry = %position.entry_price,
                "Protective trigger is on the wrong side of the entry; not placed."
            );
            return;
        }

        let request = ConditionalOrderRequest {
            symbol: position.symbol.clone(),
            position_side: position.side,
            order_type,
            trigger_price: trigger,
            quantity: position.quantity,
        };
        let ack = match self.exchange.create_conditional_order(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!(symbol = %position.symbol, order_type = %order_type, error = %e, "Failed to place protective order.");
                return;
            }
        };

        let order = Order {
            id: 0,
            symbol: position.symbol.clone(),
            side: position.side,
            position_id: position.id,
            order_type,
            trigger_price: trigger,
            quantity: position.quantity,
            exchange_id: ack.order_id.to_string(),
            status: OrderStatus::Active,
            reason: format!("{} for {}", order_type, position.entry_reason),
            created_at: Utc::now(),
            triggered_at: None,
            canceled_at: None,
        };
        let recorded = async {
            let mut conn = self.db.acquire().await?;
            orders::insert(&mut conn, &order).await
        }
        .await;
        if let Err(e) = recorded {
            tracing::error!(symbol = %position.symbol, exchange_id = ack.order_id, error = %e, "Protective order placed but not recorded.");
        }
    }

    /// Closes a position in full with a reduce-only market order.
    pub async fn close_position(&self, position: &Position, reason: &str) -> Result<Trade> {
        let _guard = self.guard.lock().await;
        self.close_locked(position, reason).await
    }

    /// Closes every local position, continuing past failures.
    pub async fn close_all_positions(&self, reason: &str) -> Result<CloseSweep> {
        let _guard = self.guard.lock().await;
        let mut sweep = CloseSweep::default();
        for position in load_positions(&self.db).await? {
            match self.close_locked(&position, reason).await {
                Ok(trade) => sweep.closed.push(trade),
                Err(e) => {
                    sweep.failed += 1;
                    tracing::error!(symbol = %position.symbol, side = %position.side, error = %e, "Failed to close position.");
                }
            }
        }
        Ok(sweep)
    }

    async fn close_locked(&self, position: &Position, reason: &str) -> Result<Trade> {
        let ack = self.exchange.close(&position.symbol, position.side, position.quantity).await?;

        let fills = match self.exchange.get_trade_history(&position.symbol, ack.order_id).await {
            Ok(fills) => fills,
            Err(e) => {
                tracing::warn!(order_id = ack.order_id, error = %e, "Could not read closing fills; estimating from the acknowledgement.");
                Vec::new()
            }
        };
        let now = Utc::now();
        let trade = match aggregate_fills(&fills) {
            Some(fill) => Trade {
                id: 0,
                symbol: position.symbol.clone(),
                side: position.side,
                action: TradeAction::close(position.side),
                price: fill.avg_price,
                quantity: fill.quantity,
                leverage: Some(position.leverage),
                realized_pnl: Some(fill.realized_pnl),
                fee: fill.commission,
                order_id: Some(ack.order_id.to_string()),
                reason: reason.to_string(),
                executed_at: fill.completed_at,
            },
            None => {
                let price = if ack.avg_price > Decimal::ZERO { ack.avg_price } else { position.current_price };
                let quantity = if ack.executed_qty > Decimal::ZERO { ack.executed_qty } else { position.quantity };
                Trade {
                    id: 0,
                    symbol: position.symbol.clone(),
                    side: position.side,
                    action: TradeAction::close(position.side),
                    price,
                    quantity,
                    leverage: Some(position.leverage),
                    realized_pnl: Some((price - position.entry_price) * quantity * position.side.sign()),
                    fee: Decimal::ZERO,
                    order_id: Some(ack.order_id.to_string()),
                    reason: reason.to_string(),
                    executed_at: now,
                }
            }
        };

        let mut tx = self.db.begin().await?;
        positions::delete(&mut *tx, position.id).await?;
        let canceled = orders::cancel_active_for_position(&mut *tx, position.id, now).await?;
        let trade_id = trades::insert(&mut *tx, &trade).await?;
        tx.commit().await.map_err(database::Error::from)?;

        tracing::info!(
            symbol = %position.symbol,
            side = %position.side,
            price = %trade.price,
            realized_pnl = ?trade.realized_pnl,
            reason,
            "Position closed."
        );
        self.cancel_on_exchange(&canceled).await;

        Ok(Trade { id: trade_id, ..trade })
    }
}
