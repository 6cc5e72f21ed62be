//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during node selection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no worker node available")]
    NoAvailableNode,

    #[error("unknown scheduling algorithm: {0}")]
    UnknownAlgorithm(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
