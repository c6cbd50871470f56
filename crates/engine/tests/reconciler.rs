// In crates/engine/tests/reconciler.rs

mod common;

use common::{btc, eth, harness, open_request, positions};
use core_types::{OrderStatus, OrderType, Side, TradeAction};
use database::{orders, trades};
use engine::{Rejection, SyncReport};
use execution::ExchangeGateway;
use rust_decimal_macros::dec;

#[tokio::test]
async fn sync_is_idempotent() {
    let h = harness().await;
    h.reconciler.open_position(&open_request(btc(), Side::Long, dec!(0.01), 5)).await.unwrap().unwrap();
    h.exchange.set_mark_price(&btc(), dec!(101000));

    let first = h.reconciler.sync().await.unwrap();
    assert_eq!(first.positions_updated, 1);
    let after_first = positions(&h.db).await;

    let second = h.reconciler.sync().await.unwrap();
    assert_eq!(second, SyncReport::default());
    assert_eq!(positions(&h.db).await, after_first);
}

#[tokio::test]
async fn sync_keeps_entry_metadata() {
    let h = harness().await;
    h.reconciler.open_position(&open_request(btc(), Side::Long, dec!(0.01), 5)).await.unwrap().unwrap();
    h.exchange.set_mark_price(&btc(), dec!(102000));
    h.reconciler.sync().await.unwrap();

    let stored = positions(&h.db).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].current_price, dec!(102000));
    assert_eq!(stored[0].unrealized_pnl, dec!(20));
    assert_eq!(stored[0].entry_reason, "breakout above range");
    assert_eq!(stored[0].exit_plan, "stop loss 95000, take profit 110000");
}

#[tokio::test]
async fn peak_pnl_only_ratchets_up() {
    let h = harness().await;
    h.reconciler.open_position(&open_request(btc(), Side::Long, dec!(0.01), 5)).await.unwrap().unwrap();

    h.exchange.set_mark_price(&btc(), dec!(104000));
    h.reconciler.sync().await.unwrap();
    assert_eq!(positions(&h.db).await[0].peak_pnl_percent, 20.0);

    h.exchange.set_mark_price(&btc(), dec!(101000));
    h.reconciler.sync().await.unwrap();
    let stored = &positions(&h.db).await[0];
    assert_eq!(stored.pnl_percent(), 5.0);
    assert_eq!(stored.peak_pnl_percent, 20.0);
}

#[tokio::test]
async fn positions_opened_elsewhere_are_mirrored_and_closed_ones_removed() {
    let h = harness().await;
    h.reconciler.open_position(&open_request(btc(), Side::Long, dec!(0.01), 5)).await.unwrap().unwrap();
    // Opened directly on the exchange, bypassing the engine.
    h.exchange.open(&eth(), Side::Short, dec!(1)).await.unwrap();
    h.exchange.liquidate(&btc(), Side::Long).unwrap();

    let report = h.reconciler.sync().await.unwrap();
    assert_eq!(report.positions_inserted, 1);
    assert_eq!(report.positions_removed, 1);

    let stored = positions(&h.db).await;
    assert_eq!(stored.len(), 1);
    assert_eq!((stored[0].symbol.clone(), stored[0].side), (eth(), Side::Short));
    assert!(stored[0].exit_plan.is_empty());
}

#[tokio::test]
async fn unreachable_exchange_leaves_local_state_untouched() {
    let h = harness().await;
    h.reconciler.open_position(&open_request(btc(), Side::Long, dec!(0.01), 5)).await.unwrap().unwrap();
    let before = positions(&h.db).await;

    h.exchange.set_offline(true);
    h.exchange.set_mark_price(&btc(), dec!(90000));
    assert!(h.reconciler.sync().await.is_err());
    assert_eq!(positions(&h.db).await, before);
}

#[tokio::test]
async fn filled_stop_cancels_its_take_profit_sibling() {
    let h = harness().await;
    let mut request = open_request(btc(), Side::Long, dec!(0.01), 5);
    request.stop_loss = Some(dec!(95000));
    request.take_profit = Some(dec!(110000));
    let position = h.reconciler.open_position(&request).await.unwrap().unwrap();

    let legs = {
        let mut conn = h.db.acquire().await.unwrap();
        orders::list_for_position(&mut conn, position.id).await.unwrap()
    };
    assert_eq!(legs.len(), 2);
    let stop = legs.iter().find(|o| o.order_type == OrderType::StopLoss).unwrap().clone();
    let target = legs.iter().find(|o| o.order_type == OrderType::TakeProfit).unwrap().clone();

    h.exchange.fill_conditional_order(stop.exchange_order_id().unwrap()).unwrap();
    let report = h.reconciler.sync().await.unwrap();
    assert_eq!(report.positions_removed, 1);
    assert_eq!(report.orders_triggered, 1);
    assert_eq!(report.orders_canceled, 1);

    let mut conn = h.db.acquire().await.unwrap();
    let stop = orders::find(&mut conn, stop.id).await.unwrap().unwrap();
    let target = orders::find(&mut conn, target.id).await.unwrap().unwrap();
    assert_eq!(stop.status, OrderStatus::Triggered);
    assert!(stop.triggered_at.is_some());
    assert_eq!(target.status, OrderStatus::Canceled);
    assert!(target.canceled_at.is_some());

    let booked = trades::recent(&mut conn, 10).await.unwrap();
    let close = booked.iter().find(|t| t.action == TradeAction::CloseLong).unwrap();
    assert_eq!(close.price, dec!(95000));
    assert_eq!(close.realized_pnl, Some(dec!(-50)));
    assert_eq!(close.order_id.as_deref(), Some(stop.exchange_id.as_str()));
}

#[tokio::test]
async fn terminal_orders_never_change_again() {
    let h = harness().await;
    let mut request = open_request(btc(), Side::Long, dec!(0.01), 5);
    request.stop_loss = Some(dec!(95000));
    let position = h.reconciler.open_position(&request).await.unwrap().unwrap();
    let stop = {
        let mut conn = h.db.acquire().await.unwrap();
        orders::list_for_position(&mut conn, position.id).await.unwrap().remove(0)
    };
    let exchange_id = stop.exchange_order_id().unwrap();

    h.exchange.fill_conditional_order(exchange_id).unwrap();
    h.reconciler.sync().await.unwrap();

    h.exchange.set_order_status(exchange_id, "CANCELED").unwrap();
    let report = h.reconciler.sync().await.unwrap();
    assert_eq!(report.orders_canceled, 0);

    let mut conn = h.db.acquire().await.unwrap();
    assert_eq!(orders::find(&mut conn, stop.id).await.unwrap().unwrap().status, OrderStatus::Triggered);
}

#[tokio::test]
async fn unknown_exchange_status_is_left_alone() {
    let h = harness().await;
    let mut request = open_request(btc(), Side::Long, dec!(0.01), 5);
    request.take_profit = Some(dec!(110000));
    let position = h.reconciler.open_position(&request).await.unwrap().unwrap();
    let target = {
        let mut conn = h.db.acquire().await.unwrap();
        orders::list_for_position(&mut conn, position.id).await.unwrap().remove(0)
    };

    h.exchange.set_order_status(target.exchange_order_id().unwrap(), "PENDING_REVIEW").unwrap();
    let report = h.reconciler.sync().await.unwrap();
    assert_eq!(report.orders_skipped, 1);

    let mut conn = h.db.acquire().await.unwrap();
    assert_eq!(orders::find(&mut conn, target.id).await.unwrap().unwrap().status, OrderStatus::Active);
}

#[tokio::test]
async fn fill_without_trade_history_is_triggered_but_not_booked() {
    let h = harness().await;
    let mut request = open_request(btc(), Side::Long, dec!(0.01), 5);
    request.stop_loss = Some(dec!(95000));
    let position = h.reconciler.open_position(&request).await.unwrap().unwrap();
    let stop = {
        let mut conn = h.db.acquire().await.unwrap();
        orders::list_for_position(&mut conn, position.id).await.unwrap().remove(0)
    };
    let exchange_id = stop.exchange_order_id().unwrap();

    h.exchange.fill_conditional_order(exchange_id).unwrap();
    h.exchange.drop_trade_history(exchange_id);
    h.reconciler.sync().await.unwrap();

    let mut conn = h.db.acquire().await.unwrap();
    assert_eq!(orders::find(&mut conn, stop.id).await.unwrap().unwrap().status, OrderStatus::Triggered);
    let booked = trades::recent(&mut conn, 10).await.unwrap();
    assert!(booked.iter().all(|t| t.order_id.as_deref() != Some(stop.exchange_id.as_str())));
}

#[tokio::test]
async fn orders_of_a_liquidated_position_are_canceled() {
    let h = harness().await;
    let mut request = open_request(btc(), Side::Long, dec!(0.01), 5);
    request.take_profit = Some(dec!(110000));
    let position = h.reconciler.open_position(&request).await.unwrap().unwrap();

    h.exchange.liquidate(&btc(), Side::Long).unwrap();
    let report = h.reconciler.sync().await.unwrap();
    assert_eq!(report.orders_canceled, 1);

    let mut conn = h.db.acquire().await.unwrap();
    assert!(orders::list_active_for_position(&mut conn, position.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn opens_outside_policy_are_rejected() {
    let h = harness().await;

    let too_much_leverage = h.reconciler.open_position(&open_request(btc(), Side::Long, dec!(0.01), 50)).await.unwrap();
    assert_eq!(too_much_leverage, Err(Rejection::LeverageOutOfRange { leverage: 50, min: 1, max: 20 }));

    let dust = h.reconciler.open_position(&open_request(btc(), Side::Long, dec!(0.0004), 5)).await.unwrap();
    assert!(matches!(dust, Err(Rejection::QuantityBelowMinimum { .. })));

    let tiny = h.reconciler.open_position(&open_request(eth(), Side::Long, dec!(0.001), 5)).await.unwrap();
    assert!(matches!(tiny, Err(Rejection::BelowMinNotional { .. })));

    h.reconciler.open_position(&open_request(btc(), Side::Long, dec!(0.01), 5)).await.unwrap().unwrap();
    let duplicate = h.reconciler.open_position(&open_request(btc(), Side::Long, dec!(0.01), 5)).await.unwrap();
    assert_eq!(duplicate, Err(Rejection::PositionAlreadyOpen { symbol: btc(), side: Side::Long }));

    assert_eq!(positions(&h.db).await.len(), 1);
}

#[tokio::test]
async fn close_books_the_trade_and_cancels_protective_orders() {
    let h = harness().await;
    let mut request = open_request(btc(), Side::Short, dec!(0.02), 10);
    request.stop_loss = Some(dec!(104000));
    let position = h.reconciler.open_position(&request).await.unwrap().unwrap();
    h.exchange.set_mark_price(&btc(), dec!(98000));

    let trade = h.reconciler.close_position(&position, "take profit hit").await.unwrap();
    assert_eq!(trade.action, TradeAction::CloseShort);
    assert_eq!(trade.realized_pnl, Some(dec!(40)));
    assert!(positions(&h.db).await.is_empty());

    let mut conn = h.db.acquire().await.unwrap();
    let legs = orders::list_for_position(&mut conn, position.id).await.unwrap();
    assert!(legs.iter().all(|o| o.status == OrderStatus::Canceled));
}

#[tokio::test]
async fn concurrent_syncs_mirror_a_position_once() {
    let h = harness().await;
    h.exchange.open_long(&btc(), dec!(0.01)).await.unwrap();

    let (first, second) = tokio::join!(h.reconciler.sync(), h.reconciler.sync());
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.positions_inserted + second.positions_inserted, 1);
    assert_eq!(positions(&h.db).await.len(), 1);
}

#[tokio::test]
async fn malformed_exchange_ids_do_not_block_the_batch() {
    let h = harness().await;
    let mut request = open_request(btc(), Side::Long, dec!(0.01), 5);
    request.take_profit = Some(dec!(110000));
    let position = h.reconciler.open_position(&request).await.unwrap().unwrap();

    let mut conn = h.db.acquire().await.unwrap();
    let target = orders::list_for_position(&mut conn, position.id).await.unwrap().remove(0);
    let mut broken = target.clone();
    broken.exchange_id = String::new();
    let broken_id = orders::insert(&mut conn, &broken).await.unwrap();
    drop(conn);

    h.exchange.set_order_status(target.exchange_order_id().unwrap(), "CANCELED").unwrap();
    let report = h.reconciler.sync().await.unwrap();
    assert_eq!(report.orders_skipped, 1);
    assert_eq!(report.orders_canceled, 1);

    let mut conn = h.db.acquire().await.unwrap();
    assert_eq!(orders::find(&mut conn, target.id).await.unwrap().unwrap().status, OrderStatus::Canceled);
    assert_eq!(orders::find(&mut conn, broken_id).await.unwrap().unwrap().status, OrderStatus::Active);
}
