// In crates/database/src/lib.rs

use app_config::types::DatabaseSettings;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

pub mod account_history;
pub mod decisions;
pub mod error;
pub mod orders;
pub mod positions;
mod row;
pub mod trades;

// Re-export the most important types for easy access.
pub use error::{Error, Result};
pub use sqlx::SqliteConnection;

/// A wrapper around the `sqlx` connection pool.
///
/// Repository functions take `&mut SqliteConnection`, so callers decide whether a
/// write runs alone on a pooled connection or as part of a transaction.
#[derive(Debug, Clone)]
pub struct Db(SqlitePool);

/// Opens the SQLite database and runs migrations.
///
/// # Arguments
///
/// * `settings`: The database configuration settings.
///
/// # Returns
///
/// A `Result` containing the `Db` wrapper on success, or an `Error` on failure.
pub async fn connect(settings: &DatabaseSettings) -> Result<Db> {
    Db::connect_url(&settings.url).await
}

impl Db {
    pub async fn connect_url(url: &str) -> Result<Db> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Each connection to `:memory:` is its own database, so keep exactly one alive.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        // Run database migrations. This ensures the database schema is up-to-date.
        sqlx::migrate!("../../migrations").run(&pool).await?;
        tracing::info!(url, "Database ready.");

        Ok(Db(pool))
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.0.acquire().await?)
    }

    /// Starts a transaction. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.0.begin().await?)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.0
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Db;
    use chrono::{TimeZone, Utc};
    use core_types::{Position, Side, Symbol};
    use rust_decimal_macros::dec;

    pub async fn memory_db() -> Db {
        Db::connect_url("sqlite::memory:").await.unwrap()
    }

    pub fn position(symbol: &str, side: Side) -> Position {
        Position {
            id: 0,
            symbol: Symbol::new(symbol),
            side,
            quantity: dec!(0.01),
            entry_price: dec!(100000),
            current_price: dec!(100000),
            liquidation_price: dec!(90000),
            leverage: 10,
            margin: dec!(100),
            unrealized_pnl: dec!(0),
            peak_pnl_percent: 0.0,
            entry_reason: "breakout".into(),
            exit_plan: "stop loss 95000".into(),
            order_id: Some("11".into()),
            opened_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }
}
