// In crates/risk/src/error.rs

use thiserror::Error;

/// Configuration problems caught before the rule engine is built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid risk parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid {table} tier: {reason}")]
    InvalidTier { table: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
