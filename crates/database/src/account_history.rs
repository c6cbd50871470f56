// In crates/database/src/account_history.rs

use crate::row::{decimal, unsigned};
use crate::Result;
use core_types::AccountSnapshot;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

const SELECT: &str = "SELECT id, iteration, total_balance, available_balance, unrealized_pnl, \
     position_count, recorded_at FROM account_history";

fn from_row(row: &SqliteRow) -> Result<AccountSnapshot> {
    Ok(AccountSnapshot {
        id: row.try_get("id")?,
        iteration: unsigned(row, "iteration")?,
        total_balance: decimal(row, "total_balance")?,
        available_balance: decimal(row, "available_balance")?,
        unrealized_pnl: decimal(row, "unrealized_pnl")?,
        position_count: unsigned(row, "position_count")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

pub async fn insert(conn: &mut SqliteConnection, snapshot: &AccountSnapshot) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO account_history (iteration, total_balance, available_balance, unrealized_pnl,
                                     position_count, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(i64::try_from(snapshot.iteration).unwrap_or(i64::MAX))
    .bind(snapshot.total_balance.to_string())
    .bind(snapshot.available_balance.to_string())
    .bind(snapshot.unrealized_pnl.to_string())
    .bind(i64::from(snapshot.position_count))
    .bind(snapshot.recorded_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Oldest first, the order the metrics calculation expects.
pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<AccountSnapshot>> {
    let rows = sqlx::query(&format!("{} ORDER BY id", SELECT))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(from_row).collect()
}

pub async fn latest(conn: &mut SqliteConnection) -> Result<Option<AccountSnapshot>> {
    let row = sqlx::query(&format!("{} ORDER BY id DESC LIMIT 1", SELECT))
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(from_row).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn history_is_listed_oldest_first() {
        let db = memory_db().await;
        let mut conn = db.acquire().await.unwrap();
        for (iteration, balance) in [(1, dec!(1000)), (2, dec!(1100.5))] {
            insert(
                &mut conn,
                &AccountSnapshot {
                    id: 0,
                    iteration,
                    total_balance: balance,
                    available_balance: balance,
                    unrealized_pnl: dec!(0),
                    position_count: 0,
                    recorded_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        }

        let history = list(&mut conn).await.unwrap();
        assert_eq!(history.iter().map(|s| s.iteration).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(latest(&mut conn).await.unwrap().unwrap().total_balance, dec!(1100.5));
    }
}
