use thiserror::Error;

/// Error taxonomy for the backtest core. Only `NotFound` and
/// `InvalidState` are surfaced to callers as request-level failures;
/// data problems are recovered inside the simulation and task-level
/// timeouts/cancellations end up as terminal statuses instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}
