//! Runtime error types.

use thiserror::Error;

/// Errors raised by the container pool cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("user code of '{function}' is {size} bytes, limit is {limit}")]
    CodeSizeExceeded { function: String, size: u64, limit: u64 },

    #[error("container pool exhausted for '{0}'")]
    PoolExhausted(String),

    #[error("failed to provision a container for '{function}': {message}")]
    ProvisionFailure { function: String, message: String },

    #[error("failed to prepare images: {}", .0.join("; "))]
    PrepareFailed(Vec<String>),
}

/// Errors raised while running one invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("function '{function}' failed: {message}")]
    RunnerFailure { function: String, message: String },
}
