// In crates/database/src/trades.rs

use crate::row::{decimal, opt_decimal, parsed};
use crate::Result;
use core_types::{Symbol, Trade};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

fn from_row(row: &SqliteRow) -> Result<Trade> {
    let leverage: Option<i64> = row.try_get("leverage")?;
    Ok(Trade {
        id: row.try_get("id")?,
        symbol: Symbol(row.try_get("symbol")?),
        side: parsed(row, "side")?,
        action: parsed(row, "action")?,
        price: decimal(row, "price")?,
        quantity: decimal(row, "quantity")?,
        leverage: leverage.and_then(|l| u32::try_from(l).ok()),
        realized_pnl: opt_decimal(row, "realized_pnl")?,
        fee: decimal(row, "fee")?,
        order_id: row.try_get("order_id")?,
        reason: row.try_get("reason")?,
        executed_at: row.try_get("executed_at")?,
    })
}

/// Appends a ledger row. Trades are never updated.
pub async fn insert(conn: &mut SqliteConnection, trade: &Trade) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO trades (symbol, side, action, price, quantity, leverage, realized_pnl, fee,
                            order_id, reason, executed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(trade.symbol.as_str())
    .bind(trade.side.as_str())
    .bind(trade.action.as_str())
    .bind(trade.price.to_string())
    .bind(trade.quantity.to_string())
    .bind(trade.leverage.map(i64::from))
    .bind(trade.realized_pnl.map(|p| p.to_string()))
    .bind(trade.fee.to_string())
    .bind(&trade.order_id)
    .bind(&trade.reason)
    .bind(trade.executed_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Newest first.
pub async fn recent(conn: &mut SqliteConnection, limit: u32) -> Result<Vec<Trade>> {
    let rows = sqlx::query(
        "SELECT id, symbol, side, action, price, quantity, leverage, realized_pnl, fee, order_id, \
         reason, executed_at FROM trades ORDER BY id DESC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;
    use chrono::Utc;
    use core_types::{Side, TradeAction};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn close_trades_keep_pnl_and_fee() {
        let db = memory_db().await;
        let mut conn = db.acquire().await.unwrap();
        let trade = Trade {
            id: 0,
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Short,
            action: TradeAction::CloseShort,
            price: dec!(94000.5),
            quantity: dec!(0.02),
            leverage: None,
            realized_pnl: Some(dec!(-12.34)),
            fee: dec!(0.75),
            order_id: Some("88".into()),
            reason: "stop_loss triggered".into(),
            executed_at: Utc::now(),
        };
        let id = insert(&mut conn, &trade).await.unwrap();

        let stored = recent(&mut conn, 5).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].action, TradeAction::CloseShort);
        assert_eq!(stored[0].realized_pnl, Some(dec!(-12.34)));
        assert_eq!(stored[0].price, dec!(94000.5));
        assert_eq!(stored[0].leverage, None);
    }
}
