use thiserror::Error;

use crate::bybit::ExchangeError;
use crate::db::StoreError;

/// Top-level error for one poll cycle. Most variants are survivable and the
/// loop retries on the next tick; an invariant violation halts the daemon.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("storage: {0}")]
    Storage(StoreError),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl BotError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Invariant(_))
    }
}

impl From<StoreError> for BotError {
    fn from(e: StoreError) -> Self {
        match e {
            // A second open row means local state no longer matches the
            // single-position model; stopping is safer than trading on it.
            StoreError::Conflict(n) => {
                BotError::Invariant(format!("expected at most one open order, found {n}"))
            }
            other => BotError::Storage(other),
        }
    }
}
