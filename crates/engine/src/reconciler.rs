// In crates/engine/src/reconciler.rs

use crate::fills::{aggregate_fills, map_exchange_status, ExchangeStatus};
use crate::Result;
use chrono::Utc;
use core_types::{
    pnl_percent, MarginType, Order, OrderStatus, Position, PositionKey, Trade, TradeAction,
};
use database::{orders, positions, trades, Db};
use execution::{ExchangeGateway, ExchangePosition};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{interval, MissedTickBehavior};

/// Limits applied to every open before it reaches the exchange.
#[derive(Debug, Clone)]
pub struct OpenLimits {
    pub min_leverage: u32,
    pub max_leverage: u32,
    /// Quote-currency floor; the exchange's own minimum applies when it is higher.
    pub min_notional: Decimal,
    pub margin_type: MarginType,
}

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub positions_updated: usize,
    pub positions_inserted: usize,
    pub positions_removed: usize,
    /// Rows that failed to reconcile and were skipped.
    pub position_errors: usize,
    pub orders_triggered: usize,
    pub orders_canceled: usize,
    pub orders_failed: usize,
    /// Orders skipped this pass: malformed id, unreachable status, unknown status.
    pub orders_skipped: usize,
}

/// Keeps the local positions and orders a faithful mirror of the exchange.
///
/// Every money-moving path (open, close, sync) runs under one lock, so the
/// background poller, the scheduled cycle and manual commands never interleave
/// their writes.
pub struct Reconciler {
    pub(crate) db: Db,
    pub(crate) exchange: Arc<dyn ExchangeGateway>,
    pub(crate) limits: OpenLimits,
    pub(crate) guard: Mutex<()>,
}

impl Reconciler {
    pub fn new(db: Db, exchange: Arc<dyn ExchangeGateway>, limits: OpenLimits) -> Self {
        Self {
            db,
            exchange,
            limits,
            guard: Mutex::new(()),
        }
    }

    pub fn exchange(&self) -> &Arc<dyn ExchangeGateway> {
        &self.exchange
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn limits(&self) -> &OpenLimits {
        &self.limits
    }

    /// Reconciles positions, then order statuses. Waits for any sync already in flight.
    pub async fn sync(&self) -> Result<SyncReport> {
        let _guard = self.guard.lock().await;
        self.sync_locked().await
    }

    /// Like [`sync`](Self::sync) but returns `Ok(None)` instead of waiting when a
    /// sync or execution is already in flight.
    pub async fn try_sync(&self) -> Result<Option<SyncReport>> {
        let Ok(_guard) = self.guard.try_lock() else {
            tracing::debug!("Reconciliation already in flight; skipping.");
            return Ok(None);
        };
        self.sync_locked().await.map(Some)
    }

    pub(crate) async fn sync_locked(&self) -> Result<SyncReport> {
        let mut report = self.sync_positions().await?;
        self.sync_order_status(&mut report).await?;
        self.cancel_orphaned_orders(&mut report).await?;

        if report != SyncReport::default() {
            tracing::debug!(?report, "Reconciliation pass finished.");
        }
        Ok(report)
    }

    /// Mirrors exchange positions into the positions table in one transaction.
    ///
    /// The exchange is read before anything is written, so an unreachable exchange
    /// leaves the table untouched. A row that fails to reconcile is logged and skipped.
    async fn sync_positions(&self) -> Result<SyncReport> {
        let live = self.exchange.get_positions().await?;
        let now = Utc::now();
        let mut report = SyncReport::default();

        let mut tx = self.db.begin().await?;
        let mut local: HashMap<PositionKey, Position> = positions::list(&mut *tx)
            .await?
            .into_iter()
            .map(|p| (p.key(), p))
            .collect();

        for remote in &live {
            let key = (remote.symbol.clone(), remote.side);
            let result = match local.remove(&key) {
                Some(existing) => {
                    let updated = apply_exchange_state(&existing, remote);
                    if updated == existing {
                        Ok(())
                    } else {
                        report.positions_updated += 1;
                        positions::update_market(&mut *tx, &updated).await
                    }
                }
                None => {
                    report.positions_inserted += 1;
                    tracing::info!(symbol = %remote.symbol, side = %remote.side, "New exchange position mirrored locally.");
                    positions::insert(&mut *tx, &position_from_exchange(remote, now)).await.map(|_| ())
                }
            };
            if let Err(e) = result {
                report.position_errors += 1;
                tracing::error!(symbol = %remote.symbol, side = %remote.side, error = %e, "Failed to reconcile position; skipping.");
            }
        }

        // Whatever is left closed on the exchange without passing through here.
        for stale in local.into_values() {
            match positions::delete(&mut *tx, stale.id).await {
                Ok(_) => {
                    report.positions_removed += 1;
                    tracing::info!(symbol = %stale.symbol, side = %stale.side, "Position closed on the exchange; removed locally.");
                }
                Err(e) => {
                    report.position_errors += 1;
                    tracing::error!(symbol = %stale.symbol, side = %stale.side, error = %e, "Failed to remove closed position; skipping.");
                }
            }
        }

        tx.commit().await.map_err(database::Error::from)?;
        Ok(report)
    }

    /// Polls every Active order and moves it along its state machine.
    pub(crate) async fn sync_order_status(&self, report: &mut SyncReport) -> Result<()> {
        let active = {
            let mut conn = self.db.acquire().await?;
            orders::list_active(&mut conn).await?
        };

        for order in active {
            let Some(exchange_id) = order.exchange_order_id() else {
                report.orders_skipped += 1;
                tracing::warn!(order_id = order.id, exchange_id = %order.exchange_id, "Order has no usable exchange id; skipping.");
                continue;
            };

            let status = match self.exchange.get_order_status(&order.symbol, exchange_id).await {
                Ok(status) => status,
                Err(e) => {
                    report.orders_skipped += 1;
                    tracing::warn!(order_id = order.id, exchange_id, error = %e, "Failed to query order status; skipping.");
                    continue;
                }
            };

            let result = match map_exchange_status(&status) {
                ExchangeStatus::Working => Ok(()),
                ExchangeStatus::Filled => self.record_fill(&order, exchange_id, report).await,
                ExchangeStatus::Canceled => self.finish(&order, OrderStatus::Canceled, report).await,
                ExchangeStatus::Failed => self.finish(&order, OrderStatus::Failed, report).await,
                ExchangeStatus::Unrecognized(raw) => {
                    report.orders_skipped += 1;
                    tracing::warn!(order_id = order.id, exchange_id, status = %raw, "Unrecognized exchange order status; leaving order unchanged.");
                    Ok(())
                }
            };
            if let Err(e) = result {
                report.orders_skipped += 1;
                tracing::error!(order_id = order.id, exchange_id, error = %e, "Failed to record order status; skipping.");
            }
        }
        Ok(())
    }

    async fn finish(&self, order: &Order, next: OrderStatus, report: &mut SyncReport) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        if orders::transition(&mut conn, order.id, next, Utc::now()).await? {
            match next {
                OrderStatus::Canceled => report.orders_canceled += 1,
                _ => report.orders_failed += 1,
            }
            tracing::info!(order_id = order.id, symbol = %order.symbol, status = %next, "Order closed on the exchange.");
        }
        Ok(())
    }

    /// Marks a filled order Triggered, books its fills as one Trade and cancels its siblings.
    async fn record_fill(&self, order: &Order, exchange_id: i64, report: &mut SyncReport) -> Result<()> {
        let fills = match self.exchange.get_trade_history(&order.symbol, exchange_id).await {
            Ok(fills) => fills,
            Err(e) => {
                tracing::warn!(order_id = order.id, exchange_id, error = %e, "Trade history unavailable; the fill will not be booked.");
                Vec::new()
            }
        };
        let aggregate = aggregate_fills(&fills);
        let now = Utc::now();

        let mut tx = self.db.begin().await?;
        let triggered_at = aggregate.as_ref().map(|a| a.completed_at).unwrap_or(now);
        if !orders::transition(&mut *tx, order.id, OrderStatus::Triggered, triggered_at).await? {
            // Already terminal; nothing to book.
            return Ok(());
        }

        match &aggregate {
            Some(fill) => {
                trades::insert(
                    &mut *tx,
                    &Trade {
                        id: 0,
                        symbol: order.symbol.clone(),
                        side: order.side,
                        action: TradeAction::close(order.side),
                        price: fill.avg_price,
                        quantity: fill.quantity,
                        leverage: None,
                        realized_pnl: Some(fill.realized_pnl),
                        fee: fill.commission,
                        order_id: Some(order.exchange_id.clone()),
                        reason: format!("{} triggered at {}", order.order_type, order.trigger_price),
                        executed_at: fill.completed_at,
                    },
                )
                .await?;
            }
            None => tracing::warn!(order_id = order.id, exchange_id, "Filled order has no fills on record; trade not booked."),
        }

        let siblings = orders::cancel_active_for_position(&mut *tx, order.position_id, now).await?;
        tx.commit().await.map_err(database::Error::from)?;

        report.orders_triggered += 1;
        report.orders_canceled += siblings.len();
        tracing::info!(
            order_id = order.id,
            symbol = %order.symbol,
            order_type = %order.order_type,
            price = ?aggregate.as_ref().map(|a| a.avg_price),
            canceled_siblings = siblings.len(),
            "Conditional order filled."
        );

        self.cancel_on_exchange(&siblings).await;
        Ok(())
    }

    /// Cancels Active orders whose position row is gone, locally and then on the exchange.
    async fn cancel_orphaned_orders(&self, report: &mut SyncReport) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let mut canceled = Vec::new();
        for order in orders::list_orphaned(&mut *tx).await? {
            if orders::transition(&mut *tx, order.id, OrderStatus::Canceled, now).await? {
                canceled.push(order);
            }
        }
        tx.commit().await.map_err(database::Error::from)?;

        if !canceled.is_empty() {
            report.orders_canceled += canceled.len();
            tracing::info!(count = canceled.len(), "Canceled orders of positions that no longer exist.");
            self.cancel_on_exchange(&canceled).await;
        }
        Ok(())
    }

    /// Best effort. The local state is already final, so failures are only logged.
    pub(crate) async fn cancel_on_exchange(&self, orders: &[Order]) {
        for order in orders {
            let Some(exchange_id) = order.exchange_order_id() else {
                continue;
            };
            if let Err(e) = self.exchange.cancel_order(&order.symbol, exchange_id).await {
                tracing::debug!(order_id = order.id, exchange_id, error = %e, "Exchange-side cancel failed; order already canceled locally.");
            }
        }
    }

    /// Replaces the exit plan of an open position.
    pub async fn update_exit_plan(&self, position: &Position, exit_plan: &str) -> Result<bool> {
        let _guard = self.guard.lock().await;
        let mut conn = self.db.acquire().await?;
        Ok(positions::update_exit_plan(&mut conn, position.id, exit_plan).await?)
    }

    /// Persists a raised peak observed by the risk rules.
    pub async fn record_peak(&self, position: &Position, peak_pnl_percent: f64) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        Ok(positions::raise_peak(&mut conn, position.id, peak_pnl_percent).await?)
    }

    /// Runs [`try_sync`](Self::try_sync) every `period` until `stop` fires.
    pub async fn run_poller(self: Arc<Self>, period: Duration, mut stop: oneshot::Receiver<()>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(period_secs = period.as_secs(), "Position poller started.");
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.try_sync().await {
                        tracing::warn!(error = %e, "Background reconciliation failed.");
                    }
                }
            }
        }
        tracing::info!("Position poller stopped.");
    }
}

/// The local row with the exchange-reported fields overwritten and the peak ratcheted.
fn apply_exchange_state(existing: &Position, remote: &ExchangePosition) -> Position {
    let pnl = pnl_percent(remote.unrealized_pnl, remote.margin);
    Position {
        quantity: remote.quantity,
        entry_price: remote.entry_price,
        current_price: remote.mark_price,
        liquidation_price: remote.liquidation_price,
        leverage: remote.leverage,
        margin: remote.margin,
        unrealized_pnl: remote.unrealized_pnl,
        peak_pnl_percent: existing.peak_pnl_percent.max(pnl),
        ..existing.clone()
    }
}

fn position_from_exchange(remote: &ExchangePosition, now: chrono::DateTime<Utc>) -> Position {
    let pnl = pnl_percent(remote.unrealized_pnl, remote.margin);
    Position {
        id: 0,
        symbol: remote.symbol.clone(),
        side: remote.side,
        quantity: remote.quantity,
        entry_price: remote.entry_price,
        current_price: remote.mark_price,
        liquidation_price: remote.liquidation_price,
        leverage: remote.leverage,
        margin: remote.margin,
        unrealized_pnl: remote.unrealized_pnl,
        peak_pnl_percent: pnl.max(0.0),
        entry_reason: String::new(),
        exit_plan: String::new(),
        order_id: None,
        opened_at: now,
    }
}

/// Lists the local positions on a pooled connection.
pub(crate) async fn load_positions(db: &Db) -> Result<Vec<Position>> {
    let mut conn = db.acquire().await?;
    Ok(positions::list(&mut conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Side, Symbol};
    use rust_decimal_macros::dec;

    fn remote(pnl: Decimal) -> ExchangePosition {
        ExchangePosition {
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Long,
            quantity: dec!(0.01),
            entry_price: dec!(100000),
            mark_price: dec!(101000),
            liquidation_price: dec!(90000),
            leverage: 10,
            margin: dec!(100),
            unrealized_pnl: pnl,
        }
    }

    async fn reconciler() -> Reconciler {
        let db = Db::connect_url("sqlite::memory:").await.unwrap();
        let exchange = Arc::new(execution::SimulatedExchange::new(&app_config::SimulationSettings::default()));
        let limits = OpenLimits {
            min_leverage: 1,
            max_leverage: 20,
            min_notional: dec!(5),
            margin_type: MarginType::Crossed,
        };
        Reconciler::new(db, exchange, limits)
    }

    #[tokio::test]
    async fn try_sync_skips_while_a_pass_is_in_flight() {
        let r = reconciler().await;
        let held = r.guard.lock().await;
        assert_eq!(r.try_sync().await.unwrap(), None);
        drop(held);
        assert_eq!(r.try_sync().await.unwrap(), Some(SyncReport::default()));
    }

    #[tokio::test]
    async fn sync_waits_for_the_pass_in_flight() {
        let r = reconciler().await;
        let held = r.guard.lock().await;
        let waiting = r.sync();
        tokio::pin!(waiting);
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut waiting).await.is_err());
        drop(held);
        assert_eq!(waiting.await.unwrap(), SyncReport::default());
    }

    #[test]
    fn new_rows_seed_peak_only_from_profit() {
        assert_eq!(position_from_exchange(&remote(dec!(7)), Utc::now()).peak_pnl_percent, 7.0);
        assert_eq!(position_from_exchange(&remote(dec!(-3)), Utc::now()).peak_pnl_percent, 0.0);
    }

    #[test]
    fn exchange_state_keeps_metadata_and_never_lowers_peak() {
        let mut existing = position_from_exchange(&remote(dec!(12)), Utc::now());
        existing.id = 4;
        existing.exit_plan = "止损 $95,000".into();
        existing.order_id = Some("31".into());

        let updated = apply_exchange_state(&existing, &remote(dec!(5)));
        assert_eq!(updated.id, 4);
        assert_eq!(updated.exit_plan, "止损 $95,000");
        assert_eq!(updated.order_id.as_deref(), Some("31"));
        assert_eq!(updated.opened_at, existing.opened_at);
        assert_eq!(updated.unrealized_pnl, dec!(5));
        assert_eq!(updated.peak_pnl_percent, 12.0);

        let higher = apply_exchange_state(&updated, &remote(dec!(20)));
        assert_eq!(higher.peak_pnl_percent, 20.0);
    }
}
