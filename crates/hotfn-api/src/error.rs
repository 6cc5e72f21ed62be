//! Request errors and their HTTP mapping.

use std::collections::HashMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use hotfn_core::{FailResponse, OptionsError};
use hotfn_runtime::{PoolError, RunError};
use hotfn_scheduler::SchedulerError;

use crate::client::ClientError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("param '{0}' is not given")]
    MissingParameter(&'static str),

    #[error("invalid value for '{field}': {value}")]
    InvalidParameter { field: String, value: String },

    #[error("404 Not found on given path")]
    NotFound,

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("error on selecting node from scheduler: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("worker node {node_id}: {source}")]
    Upstream { node_id: u32, source: ClientError },

    #[error("worker node {node_id} failed: {message}")]
    WorkerFailure { node_id: u32, message: String },

    #[error("invocation task failed: {0}")]
    Task(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParameter(_) | ApiError::InvalidParameter { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OptionsError> for ApiError {
    fn from(e: OptionsError) -> Self {
        match e {
            OptionsError::InvalidValue { field, value } => ApiError::InvalidParameter {
                field: field.to_string(),
                value,
            },
            OptionsError::ZeroLimit(field) => ApiError::InvalidParameter {
                field: field.to_string(),
                value: "must be at least 1".to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, Json(FailResponse::new(self.to_string()))).into_response()
    }
}

// ── Query parameters ───────────────────────────────────────────

/// A parameter that must be present and non-empty.
pub(crate) fn required<'a>(
    params: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingParameter(name))
}

/// An optional `true`/`false` parameter.
pub(crate) fn optional_bool(
    params: &HashMap<String, String>,
    name: &'static str,
) -> Result<Option<bool>, ApiError> {
    match params.get(name).map(String::as_str) {
        None => Ok(None),
        Some("true") => Ok(Some(true)),
        Some("false") => Ok(Some(false)),
        Some(other) => Err(ApiError::InvalidParameter {
            field: name.to_string(),
            value: other.to_string(),
        }),
    }
}
