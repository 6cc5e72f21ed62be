//! Shared types used across hotfn crates.
//!
//! The response structs are the JSON wire format spoken by both tiers:
//! a worker's `/execute` body is parsed by the load balancer, extended
//! with [`LoadBalancingInfo`] and passed on to the caller.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A worker endpoint in the static fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: u32,
    pub url: String,
}

impl WorkerNode {
    pub fn new(id: u32, url: impl Into<String>) -> Self {
        Self { id, url: url.into() }
    }

    /// Full URL for a path (and query) on this node.
    pub fn endpoint(&self, path_and_query: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path_and_query)
    }
}

/// A function a worker is configured to serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    /// Container image; derived from the name when absent.
    #[serde(default)]
    pub image: Option<String>,
    /// Command executed inside the container for each invocation.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Size of the user code in bytes, checked against the code size limit.
    #[serde(default)]
    pub code_size: u64,
}

impl FunctionSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: None,
            command: None,
            code_size: 0,
        }
    }

    pub fn with_code_size(mut self, code_size: u64) -> Self {
        self.code_size = code_size;
        self
    }

    /// Image name used when building and starting containers.
    pub fn image_name(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| format!("hotfn-{}", self.name))
    }
}

/// Output captured from one function execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionOutput {
    pub exit_code: i32,
    pub data: String,
}

/// Per-invocation cache metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMeta {
    /// No warm-idle container was available; one was provisioned.
    pub cold_start: bool,
    /// The function's image had to be built for this call.
    pub image_built: bool,
    pub image_name: String,
    pub container_name: String,
}

/// Which node served a call and how long the selection took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancingInfo {
    pub node_id: u32,
    pub node_url: String,
    pub algorithm_name: String,
    /// Milliseconds spent inside the scheduler.
    pub algorithm_selection_latency: f64,
}

/// Successful `/execute` response.
///
/// `execution_time` is the worker-side wall clock for the whole request,
/// `internal_execution_time` the time spent inside the container (both ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecSuccessResponse {
    pub result: FunctionOutput,
    pub execution_time: i64,
    pub internal_execution_time: i64,
    pub meta: ExecutionMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancing_info: Option<LoadBalancingInfo>,
}

/// Failure body shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailResponse {
    pub error: bool,
    pub message: String,
}

impl FailResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
        }
    }
}

/// Plain acknowledgement body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of an administrative call on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub node_id: u32,
    pub node_url: String,
    pub ok: bool,
    pub message: String,
}

/// Joined result of a broadcast, in fleet order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub nodes: Vec<NodeReport>,
}

impl BroadcastResponse {
    pub fn all_ok(&self) -> bool {
        self.nodes.iter().all(|n| n.ok)
    }

    pub fn failed(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| !n.ok)
    }
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trims_trailing_slash() {
        let node = WorkerNode::new(1, "http://10.0.0.1:8222/");
        assert_eq!(
            node.endpoint("/execute?name=hello"),
            "http://10.0.0.1:8222/execute?name=hello"
        );
    }

    #[test]
    fn image_name_defaults_from_function_name() {
        let spec = FunctionSpec::named("resize");
        assert_eq!(spec.image_name(), "hotfn-resize");

        let spec = FunctionSpec {
            image: Some("registry/resize:1".to_string()),
            ..FunctionSpec::named("resize")
        };
        assert_eq!(spec.image_name(), "registry/resize:1");
    }

    #[test]
    fn success_response_uses_camel_case() {
        let resp = ExecSuccessResponse {
            result: FunctionOutput {
                exit_code: 0,
                data: "ok".to_string(),
            },
            execution_time: 12,
            internal_execution_time: 10,
            meta: ExecutionMeta {
                cold_start: true,
                ..ExecutionMeta::default()
            },
            load_balancing_info: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["internalExecutionTime"], 10);
        assert_eq!(json["meta"]["coldStart"], true);
        assert!(json.get("loadBalancingInfo").is_none());
    }

    #[test]
    fn worker_response_parses_without_balancing_info() {
        let body = r#"{
            "result": {"exitCode": 0, "data": "hi"},
            "executionTime": 5,
            "internalExecutionTime": 3,
            "meta": {"coldStart": false, "imageBuilt": false, "imageName": "hotfn-a", "containerName": "c1"}
        }"#;
        let resp: ExecSuccessResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.result.data, "hi");
        assert!(resp.load_balancing_info.is_none());
    }

    #[test]
    fn fail_response_shape() {
        let json = serde_json::to_value(FailResponse::new("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"error": true, "message": "boom"}));
    }

    #[test]
    fn broadcast_reports_failures() {
        let resp = BroadcastResponse {
            nodes: vec![
                NodeReport {
                    node_id: 0,
                    node_url: "http://a".to_string(),
                    ok: true,
                    message: "done".to_string(),
                },
                NodeReport {
                    node_id: 1,
                    node_url: "http://b".to_string(),
                    ok: false,
                    message: "connection refused".to_string(),
                },
            ],
        };
        assert!(!resp.all_ok());
        assert_eq!(resp.failed().count(), 1);
    }
}
