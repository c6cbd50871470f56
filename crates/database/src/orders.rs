// In crates/database/src/orders.rs

use crate::row::{decimal, parsed};
use crate::Result;
use chrono::{DateTime, Utc};
use core_types::{Order, OrderStatus, Symbol};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

const COLUMNS: &str = "id, symbol, side, position_id, order_type, trigger_price, quantity, exchange_id, \
     status, reason, created_at, triggered_at, canceled_at";

fn from_row(row: &SqliteRow) -> Result<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        symbol: Symbol(row.try_get("symbol")?),
        side: parsed(row, "side")?,
        position_id: row.try_get("position_id")?,
        order_type: parsed(row, "order_type")?,
        trigger_price: decimal(row, "trigger_price")?,
        quantity: decimal(row, "quantity")?,
        exchange_id: row.try_get("exchange_id")?,
        status: parsed(row, "status")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
        triggered_at: row.try_get("triggered_at")?,
        canceled_at: row.try_get("canceled_at")?,
    })
}

/// Inserts an order row as given and returns its id.
pub async fn insert(conn: &mut SqliteConnection, order: &Order) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO orders (symbol, side, position_id, order_type, trigger_price, quantity,
                            exchange_id, status, reason, created_at, triggered_at, canceled_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(order.symbol.as_str())
    .bind(order.side.as_str())
    .bind(order.position_id)
    .bind(order.order_type.as_str())
    .bind(order.trigger_price.to_string())
    .bind(order.quantity.to_string())
    .bind(&order.exchange_id)
    .bind(order.status.as_str())
    .bind(&order.reason)
    .bind(order.created_at)
    .bind(order.triggered_at)
    .bind(order.canceled_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<Order>> {
    let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = ?", COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn list_active(conn: &mut SqliteConnection) -> Result<Vec<Order>> {
    let rows = sqlx::query(&format!("SELECT {} FROM orders WHERE status = 'active' ORDER BY id", COLUMNS))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(from_row).collect()
}

pub async fn list_active_for_position(conn: &mut SqliteConnection, position_id: i64) -> Result<Vec<Order>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM orders WHERE status = 'active' AND position_id = ? ORDER BY id",
        COLUMNS
    ))
    .bind(position_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn list_for_position(conn: &mut SqliteConnection, position_id: i64) -> Result<Vec<Order>> {
    let rows = sqlx::query(&format!("SELECT {} FROM orders WHERE position_id = ? ORDER BY id", COLUMNS))
        .bind(position_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(from_row).collect()
}

/// Newest first.
pub async fn recent(conn: &mut SqliteConnection, limit: u32) -> Result<Vec<Order>> {
    let rows = sqlx::query(&format!("SELECT {} FROM orders ORDER BY id DESC LIMIT ?", COLUMNS))
        .bind(i64::from(limit))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(from_row).collect()
}

/// Moves an Active order into a terminal state and stamps the matching timestamp.
///
/// Returns false, writing nothing, when the order has already left Active or the
/// target is not a legal transition.
pub async fn transition(
    conn: &mut SqliteConnection,
    id: i64,
    next: OrderStatus,
    at: DateTime<Utc>,
) -> Result<bool> {
    if !OrderStatus::Active.can_transition_to(next) {
        return Ok(false);
    }
    let query = match next {
        OrderStatus::Triggered => {
            sqlx::query("UPDATE orders SET status = ?, triggered_at = ? WHERE id = ? AND status = 'active'")
                .bind(next.as_str())
                .bind(at)
        }
        OrderStatus::Canceled => {
            sqlx::query("UPDATE orders SET status = ?, canceled_at = ? WHERE id = ? AND status = 'active'")
                .bind(next.as_str())
                .bind(at)
        }
        _ => sqlx::query("UPDATE orders SET status = ? WHERE id = ? AND status = 'active'").bind(next.as_str()),
    };
    let result = query.bind(id).execute(&mut *conn).await?;
    Ok(result.rows_affected() == 1)
}

/// Cancels, locally, every Active order of a position and returns the ones that changed.
pub async fn cancel_active_for_position(
    conn: &mut SqliteConnection,
    position_id: i64,
    at: DateTime<Utc>,
) -> Result<Vec<Order>> {
    let mut canceled = Vec::new();
    for order in list_active_for_position(conn, position_id).await? {
        if transition(conn, order.id, OrderStatus::Canceled, at).await? {
            canceled.push(order);
        }
    }
    Ok(canceled)
}

/// Active orders whose position row is gone.
pub async fn list_orphaned(conn: &mut SqliteConnection) -> Result<Vec<Order>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM orders WHERE status = 'active' \
         AND position_id NOT IN (SELECT id FROM positions) ORDER BY id",
        COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;
    use core_types::{OrderType, Side};
    use rust_decimal_macros::dec;

    fn order(position_id: i64, order_type: OrderType) -> Order {
        Order {
            id: 0,
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Long,
            position_id,
            order_type,
            trigger_price: dec!(95000),
            quantity: dec!(0.01),
            exchange_id: "77".into(),
            status: OrderStatus::Active,
            reason: "protective stop".into(),
            created_at: Utc::now(),
            triggered_at: None,
            canceled_at: None,
        }
    }

    #[tokio::test]
    async fn terminal_orders_never_move_again() {
        let db = memory_db().await;
        let mut conn = db.acquire().await.unwrap();
        let id = insert(&mut conn, &order(1, OrderType::StopLoss)).await.unwrap();

        assert!(transition(&mut conn, id, OrderStatus::Triggered, Utc::now()).await.unwrap());
        assert!(!transition(&mut conn, id, OrderStatus::Canceled, Utc::now()).await.unwrap());
        assert!(!transition(&mut conn, id, OrderStatus::Active, Utc::now()).await.unwrap());

        let stored = find(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Triggered);
        assert!(stored.triggered_at.is_some());
        assert!(stored.canceled_at.is_none());
    }

    #[tokio::test]
    async fn cascade_cancel_touches_only_active_orders_of_the_position() {
        let db = memory_db().await;
        let mut conn = db.acquire().await.unwrap();
        let sl = insert(&mut conn, &order(1, OrderType::StopLoss)).await.unwrap();
        let tp = insert(&mut conn, &order(1, OrderType::TakeProfit)).await.unwrap();
        let other = insert(&mut conn, &order(2, OrderType::StopLoss)).await.unwrap();
        transition(&mut conn, sl, OrderStatus::Failed, Utc::now()).await.unwrap();

        let canceled = cancel_active_for_position(&mut conn, 1, Utc::now()).await.unwrap();
        assert_eq!(canceled.iter().map(|o| o.id).collect::<Vec<_>>(), vec![tp]);
        assert_eq!(find(&mut conn, sl).await.unwrap().unwrap().status, OrderStatus::Failed);
        assert_eq!(find(&mut conn, other).await.unwrap().unwrap().status, OrderStatus::Active);
        assert_eq!(list_orphaned(&mut conn).await.unwrap().len(), 1);
    }
}
