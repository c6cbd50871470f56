// In crates/core-types/src/error.rs

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Unknown position side: {0}")]
    InvalidSide(String),

    #[error("Unknown margin type: {0}")]
    InvalidMarginType(String),

    #[error("Unknown order type: {0}")]
    InvalidOrderType(String),

    #[error("Unknown order status: {0}")]
    InvalidOrderStatus(String),

    #[error("Unknown trade action: {0}")]
    InvalidTradeAction(String),
}

pub type Result<T> = std::result::Result<T, Error>;
