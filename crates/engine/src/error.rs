// In crates/engine/src/error.rs

use risk::AccountBreach;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("The trading engine is already running")]
    AlreadyRunning,

    #[error("The trading engine is not running")]
    NotRunning,

    #[error("The trading engine is stopping")]
    Stopping,

    /// Fatal: every position has been closed and the scheduler stops.
    #[error("Account breach: {0}")]
    AccountBreach(AccountBreach),

    /// A cycle step failed and the rest of the cycle could not proceed without it.
    #[error("Cycle step `{step}` failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Database error: {0}")]
    Database(#[from] database::Error),

    #[error("Exchange error: {0}")]
    Exchange(#[from] execution::Error),

    #[error("Decision step failed: {0}")]
    Decision(#[source] anyhow::Error),
}

impl Error {
    /// Wraps an error with the name of the cycle step it aborted.
    pub fn at_step(step: &'static str) -> impl FnOnce(Error) -> Error {
        move |source| Error::Step {
            step,
            source: Box::new(source),
        }
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            Error::AccountBreach(_) => true,
            Error::Step { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
