// In crates/app-config/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to load configuration")]
    LoadError(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid risk configuration: {0}")]
    Risk(#[from] risk::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
