//! Load balancer dispatch — select a worker, forward, report.
//!
//! `/execute` checks out an [`InFlightGuard`] before forwarding; the guard
//! moves into the forwarding task and returns the credit when that task
//! ends, whichever way it ends. `/clear` and `/prepare` fan out to every
//! node and join all results.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::routing::any;
use axum::{Json, Router};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use hotfn_core::{
    BalancerConfig, BroadcastResponse, ExecSuccessResponse, ExecutionMeta, FailResponse,
    FunctionOutput, LoadBalancingInfo, MessageResponse, NodeReport, WorkerNode,
};
use hotfn_scheduler::{InFlightGuard, NodeStatus, Scheduler, SchedulerResult, strategy_from_name};

use crate::client::{self, UpstreamResponse};
use crate::error::{ApiError, optional_bool, required};

/// How long a fake-mode invocation takes.
pub const FAKE_EXECUTION_TIME: Duration = Duration::from_secs(4);
const FAKE_INTERNAL_EXECUTION_MS: i64 = 1000;

/// Shared state for balancer handlers.
#[derive(Clone)]
pub struct BalancerState {
    pub scheduler: Arc<Scheduler>,
    /// Deadline for forwarded calls and broadcasts.
    pub forward_timeout: Option<Duration>,
    pub fake_mode: bool,
}

impl BalancerState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            forward_timeout: None,
            fake_mode: false,
        }
    }

    pub fn from_config(config: &BalancerConfig) -> SchedulerResult<Self> {
        let strategy = strategy_from_name(&config.algorithm)?;
        Ok(Self {
            scheduler: Arc::new(Scheduler::new(config.nodes.clone(), strategy)),
            forward_timeout: config.forward_timeout_secs.map(Duration::from_secs),
            fake_mode: config.fake_mode,
        })
    }
}

/// Body of `/nodes`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodesResponse {
    pub algorithm: String,
    pub nodes: Vec<NodeStatus>,
}

/// Build the load balancer router.
pub fn build_balancer_router(state: BalancerState) -> Router {
    Router::new()
        .route("/execute", any(execute))
        .route("/clear", any(clear))
        .route("/prepare", any(prepare))
        .route("/nodes", any(nodes))
        .fallback(not_found)
        .with_state(state)
}

// ── Execute ────────────────────────────────────────────────────

/// /execute?name=<function>
async fn execute(
    State(state): State<BalancerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ExecSuccessResponse>, ApiError> {
    let name = required(&params, "name")?.to_string();
    let guard = state.scheduler.select_guarded(&name)?;

    let response = tokio::spawn(forward(state, guard, name))
        .await
        .map_err(|e| ApiError::Task(e.to_string()))??;
    Ok(Json(response))
}

async fn forward(
    state: BalancerState,
    guard: InFlightGuard,
    name: String,
) -> Result<ExecSuccessResponse, ApiError> {
    let selection = guard.selection().clone();
    let node = &selection.node;

    let mut response = if state.fake_mode {
        fake_execution().await
    } else {
        let url = node.endpoint(&format!("/execute?name={}", urlencoding::encode(&name)));
        let upstream = client::get(&url, state.forward_timeout)
            .await
            .map_err(|source| ApiError::Upstream {
                node_id: node.id,
                source,
            })?;
        decode_execution(node, &upstream)?
    };

    response.load_balancing_info = Some(LoadBalancingInfo {
        node_id: node.id,
        node_url: node.url.clone(),
        algorithm_name: selection.algorithm.to_string(),
        algorithm_selection_latency: selection.latency_ms(),
    });
    info!(
        function = %name,
        node_id = node.id,
        cold_start = response.meta.cold_start,
        execution_time = response.execution_time,
        "invocation forwarded"
    );
    Ok(response)
}

fn decode_execution(node: &WorkerNode, upstream: &UpstreamResponse) -> Result<ExecSuccessResponse, ApiError> {
    let upstream_err = |source| ApiError::Upstream {
        node_id: node.id,
        source,
    };
    if upstream.status.is_success() {
        return upstream.json().map_err(upstream_err);
    }
    let fail: FailResponse = upstream.json().map_err(upstream_err)?;
    Err(ApiError::WorkerFailure {
        node_id: node.id,
        message: fail.message,
    })
}

async fn fake_execution() -> ExecSuccessResponse {
    tokio::time::sleep(FAKE_EXECUTION_TIME).await;
    ExecSuccessResponse {
        result: FunctionOutput::default(),
        execution_time: FAKE_EXECUTION_TIME.as_millis() as i64,
        internal_execution_time: FAKE_INTERNAL_EXECUTION_MS,
        meta: ExecutionMeta::default(),
        load_balancing_info: None,
    }
}

// ── Broadcast ──────────────────────────────────────────────────

/// GET `path_and_query` on every node concurrently and join all results.
///
/// A failing node never stops the others; reports come back in fleet order.
pub async fn broadcast(
    nodes: &[WorkerNode],
    path_and_query: &str,
    timeout: Option<Duration>,
) -> BroadcastResponse {
    let reports = join_all(nodes.iter().map(|node| async move {
        let url = node.endpoint(path_and_query);
        let (ok, message) = match client::get(&url, timeout).await {
            Ok(upstream) => (upstream.status.is_success(), summarize(&upstream)),
            Err(e) => (false, e.to_string()),
        };
        if !ok {
            warn!(node_id = node.id, %url, %message, "broadcast failed on node");
        }
        NodeReport {
            node_id: node.id,
            node_url: node.url.clone(),
            ok,
            message,
        }
    }))
    .await;

    BroadcastResponse { nodes: reports }
}

/// The message of a worker's JSON reply, or the raw body.
fn summarize(upstream: &UpstreamResponse) -> String {
    if let Ok(msg) = upstream.json::<MessageResponse>() {
        return msg.message;
    }
    if let Ok(fail) = upstream.json::<FailResponse>() {
        return fail.message;
    }
    upstream.text()
}

/// /clear[?reset_images=<bool>]
async fn clear(
    State(state): State<BalancerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let path = match optional_bool(&params, "reset_images")? {
        Some(reset) => format!("/clear?reset_images={reset}"),
        None => "/clear".to_string(),
    };
    let result = broadcast(state.scheduler.nodes(), &path, state.forward_timeout).await;
    info!(
        nodes = result.nodes.len(),
        failed = result.failed().count(),
        "clear broadcast"
    );
    Ok(Json(result))
}

/// /prepare
async fn prepare(State(state): State<BalancerState>) -> Json<BroadcastResponse> {
    let result = broadcast(state.scheduler.nodes(), "/prepare", state.forward_timeout).await;
    info!(
        nodes = result.nodes.len(),
        failed = result.failed().count(),
        "prepare broadcast"
    );
    Json(result)
}

/// /nodes
async fn nodes(State(state): State<BalancerState>) -> Json<NodesResponse> {
    debug!("node snapshot requested");
    Json(NodesResponse {
        algorithm: state.scheduler.algorithm().to_string(),
        nodes: state.scheduler.snapshot(),
    })
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}
