//! Worker dispatch — HTTP front of one worker node.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::routing::any;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, info};

use hotfn_core::{
    CachingOptions, CachingOptionsUpdate, ExecSuccessResponse, MessageResponse, epoch_millis,
};
use hotfn_runtime::{FunctionRunner, PoolStats};

use crate::error::{ApiError, optional_bool, required};

/// Shared state for worker handlers.
#[derive(Clone)]
pub struct WorkerState {
    pub runner: FunctionRunner,
}

/// Body of `/configure`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureResponse {
    pub message: String,
    pub images_reset: bool,
    pub options: CachingOptions,
}

/// Build the worker router.
pub fn build_worker_router(runner: FunctionRunner) -> Router {
    Router::new()
        .route("/execute", any(execute))
        .route("/clear", any(clear))
        .route("/prepare", any(prepare))
        .route("/configure", any(configure))
        .route("/status", any(status))
        .fallback(not_found)
        .with_state(WorkerState { runner })
}

/// /execute?name=<function>
async fn execute(
    State(state): State<WorkerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ExecSuccessResponse>, ApiError> {
    let name = required(&params, "name")?.to_string();
    let started = epoch_millis();

    // Detached so a disconnecting caller does not cancel the invocation
    // while it holds a container.
    let runner = state.runner.clone();
    let function = name.clone();
    let result = tokio::spawn(async move { runner.run_function(&function).await })
        .await
        .map_err(|e| ApiError::Task(e.to_string()))??;

    let execution_time = epoch_millis() - started;
    info!(
        function = %name,
        cold_start = result.meta.cold_start,
        execution_time,
        "function finished"
    );
    Ok(Json(result.into_response(execution_time)))
}

/// /clear?reset_images=<bool>
async fn clear(
    State(state): State<WorkerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let reset_images = optional_bool(&params, "reset_images")?.unwrap_or(false);
    let runner = state.runner.clone();
    let destroyed = tokio::spawn(async move { runner.reset(reset_images).await })
        .await
        .map_err(|e| ApiError::Task(e.to_string()))?;
    debug!(destroyed, reset_images, "worker cleared");
    Ok(Json(MessageResponse::new(format!(
        "done; reset_images={reset_images}"
    ))))
}

/// /prepare
async fn prepare(State(state): State<WorkerState>) -> Result<Json<MessageResponse>, ApiError> {
    // Detached like /execute.
    let runner = state.runner.clone();
    let prepared = tokio::spawn(async move { runner.prepare_images().await })
        .await
        .map_err(|e| ApiError::Task(e.to_string()))??;
    Ok(Json(MessageResponse::new(format!(
        "done; prepared {} function(s)",
        prepared.len()
    ))))
}

/// /configure?user_code_size_limit=&container_pool_limit=&container_pool_num=&using_rest_mode=&rest_container_life_time=
async fn configure(
    State(state): State<WorkerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ConfigureResponse>, ApiError> {
    let update = CachingOptionsUpdate::from_query(&params)?;
    let outcome = state.runner.configure(&update).await?;
    let message = if outcome.changed {
        "configure changed"
    } else {
        "nothing changed"
    };
    Ok(Json(ConfigureResponse {
        message: message.to_string(),
        images_reset: outcome.images_reset,
        options: outcome.options,
    }))
}

/// /status
async fn status(State(state): State<WorkerState>) -> Json<PoolStats> {
    Json(state.runner.stats())
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}
