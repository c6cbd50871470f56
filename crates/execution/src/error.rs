// In crates/execution/src/error.rs

use core_types::Symbol;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("API client error: {0}")]
    ApiClientError(#[from] api_client::Error),

    #[error("Symbol {0} is not listed on the exchange")]
    UnknownSymbol(Symbol),

    #[error("Order {0} does not exist")]
    UnknownOrder(i64),

    #[error("No open {side} position for {symbol}")]
    NoPosition { symbol: Symbol, side: core_types::Side },

    #[error("Quantity {quantity} for {symbol} rounds below the minimum of {min_qty}")]
    QuantityTooSmall {
        symbol: Symbol,
        quantity: Decimal,
        min_qty: Decimal,
    },

    #[error("Unexpected exchange response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Only transport-level and rate-limit failures are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ApiClientError(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
