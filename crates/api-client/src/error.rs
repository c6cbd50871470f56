// In crates/api-client/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to build the API client: {0}")]
    ClientBuildError(String),
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(#[from] serde_json::Error),
    #[error("API error: code {code}, msg: {msg}")]
    ApiError { code: i64, msg: String },
}

impl Error {
    /// Transport failures and exchange-side overload are worth retrying for idempotent reads.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RequestFailed(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            // -1001 disconnected, -1003 too many requests, -1007 timeout waiting for backend.
            Error::ApiError { code, .. } => matches!(code, -1001 | -1003 | -1007),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
