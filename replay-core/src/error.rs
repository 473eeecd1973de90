use std::time::Duration;

use crate::client::ClientError;
use crate::compare::FailureDetail;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unhandled connection type `{0}`")]
    UnknownConnectionType(String),

    #[error("unknown comparison target `{0}`")]
    UnknownComparisonTarget(String),

    #[error("target error: {0}")]
    Client(#[from] ClientError),

    #[error("worker `{name}` failed: {message}")]
    Worker { name: String, message: String },

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{what} did not converge within {}", humantime::format_duration(*.waited))]
    ConvergenceTimeout {
        what: &'static str,
        waited: Duration,
    },

    #[error("comparison failed with {} problem(s)", .0.len())]
    ComparisonFailed(Vec<FailureDetail>),
}
