// In crates/database/src/positions.rs

use crate::row::{decimal, parsed, unsigned};
use crate::Result;
use core_types::{Position, Side, Symbol};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

const COLUMNS: &str = "id, symbol, side, quantity, entry_price, current_price, liquidation_price, \
     leverage, margin, unrealized_pnl, peak_pnl_percent, entry_reason, exit_plan, order_id, opened_at";

fn from_row(row: &SqliteRow) -> Result<Position> {
    Ok(Position {
        id: row.try_get("id")?,
        symbol: Symbol(row.try_get("symbol")?),
        side: parsed(row, "side")?,
        quantity: decimal(row, "quantity")?,
        entry_price: decimal(row, "entry_price")?,
        current_price: decimal(row, "current_price")?,
        liquidation_price: decimal(row, "liquidation_price")?,
        leverage: unsigned(row, "leverage")?,
        margin: decimal(row, "margin")?,
        unrealized_pnl: decimal(row, "unrealized_pnl")?,
        peak_pnl_percent: row.try_get("peak_pnl_percent")?,
        entry_reason: row.try_get("entry_reason")?,
        exit_plan: row.try_get("exit_plan")?,
        order_id: row.try_get("order_id")?,
        opened_at: row.try_get("opened_at")?,
    })
}

pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<Position>> {
    let rows = sqlx::query(&format!("SELECT {} FROM positions ORDER BY id", COLUMNS))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(from_row).collect()
}

pub async fn find(conn: &mut SqliteConnection, symbol: &Symbol, side: Side) -> Result<Option<Position>> {
    let row = sqlx::query(&format!("SELECT {} FROM positions WHERE symbol = ? AND side = ?", COLUMNS))
        .bind(symbol.as_str())
        .bind(side.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// Both hedge-mode sides of a symbol, long first.
pub async fn find_by_symbol(conn: &mut SqliteConnection, symbol: &Symbol) -> Result<Vec<Position>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM positions WHERE symbol = ? ORDER BY side",
        COLUMNS
    ))
    .bind(symbol.as_str())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(from_row).collect()
}

/// Inserts a new row and returns its id. `position.id` is ignored.
pub async fn insert(conn: &mut SqliteConnection, position: &Position) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO positions (symbol, side, quantity, entry_price, current_price, liquidation_price,
                               leverage, margin, unrealized_pnl, peak_pnl_percent, entry_reason,
                               exit_plan, order_id, opened_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(position.symbol.as_str())
    .bind(position.side.as_str())
    .bind(position.quantity.to_string())
    .bind(position.entry_price.to_string())
    .bind(position.current_price.to_string())
    .bind(position.liquidation_price.to_string())
    .bind(i64::from(position.leverage))
    .bind(position.margin.to_string())
    .bind(position.unrealized_pnl.to_string())
    .bind(position.peak_pnl_percent)
    .bind(&position.entry_reason)
    .bind(&position.exit_plan)
    .bind(&position.order_id)
    .bind(position.opened_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Overwrites the exchange-reported fields of row `position.id`.
///
/// Entry reason, exit plan, opening order id and open time are left alone. The
/// peak only ever moves up.
pub async fn update_market(conn: &mut SqliteConnection, position: &Position) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE positions
           SET quantity = ?, entry_price = ?, current_price = ?, liquidation_price = ?,
               leverage = ?, margin = ?, unrealized_pnl = ?,
               peak_pnl_percent = MAX(peak_pnl_percent, ?)
         WHERE id = ?
        "#,
    )
    .bind(position.quantity.to_string())
    .bind(position.entry_price.to_string())
    .bind(position.current_price.to_string())
    .bind(position.liquidation_price.to_string())
    .bind(i64::from(position.leverage))
    .bind(position.margin.to_string())
    .bind(position.unrealized_pnl.to_string())
    .bind(position.peak_pnl_percent)
    .bind(position.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Ratchets the stored peak up to `peak_pnl_percent`. Lower values are ignored.
pub async fn raise_peak(conn: &mut SqliteConnection, id: i64, peak_pnl_percent: f64) -> Result<()> {
    sqlx::query("UPDATE positions SET peak_pnl_percent = MAX(peak_pnl_percent, ?) WHERE id = ?")
        .bind(peak_pnl_percent)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Returns false when the position no longer exists.
pub async fn update_exit_plan(conn: &mut SqliteConnection, id: i64, exit_plan: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE positions SET exit_plan = ? WHERE id = ?")
        .bind(exit_plan)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Records a position opened through the engine and returns its id.
///
/// If a sync already mirrored the fill, the existing row keeps its id and open
/// time and gains the entry reason, exit plan and opening order id.
pub async fn upsert_opened(conn: &mut SqliteConnection, position: &Position) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO positions (symbol, side, quantity, entry_price, current_price, liquidation_price,
                               leverage, margin, unrealized_pnl, peak_pnl_percent, entry_reason,
                               exit_plan, order_id, opened_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (symbol, side) DO UPDATE SET
            quantity = excluded.quantity,
            entry_price = excluded.entry_price,
            current_price = excluded.current_price,
            liquidation_price = excluded.liquidation_price,
            leverage = excluded.leverage,
            margin = excluded.margin,
            unrealized_pnl = excluded.unrealized_pnl,
            peak_pnl_percent = MAX(positions.peak_pnl_percent, excluded.peak_pnl_percent),
            entry_reason = excluded.entry_reason,
            exit_plan = excluded.exit_plan,
            order_id = excluded.order_id
        RETURNING id
        "#,
    )
    .bind(position.symbol.as_str())
    .bind(position.side.as_str())
    .bind(position.quantity.to_string())
    .bind(position.entry_price.to_string())
    .bind(position.current_price.to_string())
    .bind(position.liquidation_price.to_string())
    .bind(i64::from(position.leverage))
    .bind(position.margin.to_string())
    .bind(position.unrealized_pnl.to_string())
    .bind(position.peak_pnl_percent)
    .bind(&position.entry_reason)
    .bind(&position.exit_plan)
    .bind(&position.order_id)
    .bind(position.opened_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Returns false when there was nothing to delete.
pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM positions WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_db, position};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn market_update_preserves_metadata_and_ratchets_peak() {
        let db = memory_db().await;
        let mut conn = db.acquire().await.unwrap();
        let mut p = position("BTCUSDT", Side::Long);
        p.peak_pnl_percent = 12.0;
        p.id = insert(&mut conn, &p).await.unwrap();

        let mut update = p.clone();
        update.current_price = dec!(101000);
        update.unrealized_pnl = dec!(10);
        update.peak_pnl_percent = 10.0;
        update.entry_reason = "ignored".into();
        update_market(&mut conn, &update).await.unwrap();

        let stored = find(&mut conn, &p.symbol, Side::Long).await.unwrap().unwrap();
        assert_eq!(stored.current_price, dec!(101000));
        assert_eq!(stored.peak_pnl_percent, 12.0);
        assert_eq!(stored.entry_reason, "breakout");
        assert_eq!(stored.opened_at, p.opened_at);

        raise_peak(&mut conn, p.id, 15.0).await.unwrap();
        raise_peak(&mut conn, p.id, 3.0).await.unwrap();
        let stored = find(&mut conn, &p.symbol, Side::Long).await.unwrap().unwrap();
        assert_eq!(stored.peak_pnl_percent, 15.0);
    }

    #[tokio::test]
    async fn hedge_sides_are_distinct_rows() {
        let db = memory_db().await;
        let mut conn = db.acquire().await.unwrap();
        insert(&mut conn, &position("ETHUSDT", Side::Long)).await.unwrap();
        insert(&mut conn, &position("ETHUSDT", Side::Short)).await.unwrap();
        assert!(insert(&mut conn, &position("ETHUSDT", Side::Short)).await.is_err());

        let both = find_by_symbol(&mut conn, &Symbol::new("ETHUSDT")).await.unwrap();
        assert_eq!(both.len(), 2);
    }

    #[tokio::test]
    async fn upsert_keeps_id_and_open_time_of_synced_row() {
        let db = memory_db().await;
        let mut conn = db.acquire().await.unwrap();
        let mut synced = position("BTCUSDT", Side::Short);
        synced.entry_reason = String::new();
        synced.exit_plan = String::new();
        let id = insert(&mut conn, &synced).await.unwrap();

        let mut opened = position("BTCUSDT", Side::Short);
        opened.opened_at = chrono::Utc::now();
        opened.exit_plan = "止损 $95,000".into();
        assert_eq!(upsert_opened(&mut conn, &opened).await.unwrap(), id);

        let stored = find(&mut conn, &opened.symbol, Side::Short).await.unwrap().unwrap();
        assert_eq!(stored.exit_plan, "止损 $95,000");
        assert_eq!(stored.opened_at, synced.opened_at);

        assert!(delete(&mut conn, id).await.unwrap());
        assert!(!delete(&mut conn, id).await.unwrap());
    }
}
