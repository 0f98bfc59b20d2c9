//! Library error type.

use thiserror::Error;

pub type SimtestResult<T> = Result<T, SimtestError>;

#[derive(Debug, Error)]
pub enum SimtestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("trajectory error: {0}")]
    Trajectory(String),

    #[error("baseline error: {0}")]
    Baseline(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("report error: {0}")]
    Report(String),
}
