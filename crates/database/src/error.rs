// In crates/database/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    OperationFailed(#[from] sqlx::Error),
    #[error("Database migration failed: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    /// A stored value no longer parses into its domain type.
    #[error("Corrupt value in column `{column}`: {reason}")]
    Corrupt { column: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
