//! Worker and load balancer configuration files (TOML).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::options::CachingOptions;
use crate::types::{FunctionSpec, WorkerNode};

/// `worker.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub caching: CachingOptions,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub functions: Vec<FunctionSpec>,
    /// How long an invocation waits for a pool slot before failing.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Period of the idle-container sweep while rest mode is on.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

/// Which container primitive the worker drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DriverConfig {
    /// In-process containers with fixed delays.
    Simulated {
        #[serde(default = "default_cold_start_ms")]
        cold_start_ms: u64,
        #[serde(default = "default_exec_ms")]
        exec_ms: u64,
    },
    /// Containers managed through the docker CLI.
    Docker {
        #[serde(default = "default_docker_binary")]
        binary: String,
        /// Directory holding one build context per function name.
        functions_dir: PathBuf,
    },
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig::Simulated {
            cold_start_ms: default_cold_start_ms(),
            exec_ms: default_exec_ms(),
        }
    }
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

fn default_cold_start_ms() -> u64 {
    500
}

fn default_exec_ms() -> u64 {
    50
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            caching: CachingOptions::default(),
            driver: DriverConfig::default(),
            functions: Vec::new(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: WorkerConfig = toml::from_str(content)?;
        config.caching.validate()?;

        let mut seen = HashSet::new();
        for function in &config.functions {
            if !seen.insert(function.name.as_str()) {
                bail!("function '{}' is listed twice", function.name);
            }
        }
        Ok(config)
    }
}

/// `balancer.toml` — the static worker fleet and scheduling algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub nodes: Vec<WorkerNode>,
    /// Deadline for forwarded calls. Absent means wait for the worker.
    #[serde(default)]
    pub forward_timeout_secs: Option<u64>,
    /// Answer `/execute` locally after a fixed delay instead of forwarding.
    #[serde(default)]
    pub fake_mode: bool,
}

fn default_algorithm() -> String {
    "least-in-flight".to_string()
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            nodes: Vec::new(),
            forward_timeout_secs: None,
            fake_mode: false,
        }
    }
}

impl BalancerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: BalancerConfig = toml::from_str(content)?;

        let mut seen = HashSet::new();
        for node in &config.nodes {
            if !seen.insert(node.id) {
                bail!("node id {} is listed twice", node.id);
            }
            if !node.url.starts_with("http://") {
                bail!("node {} url must start with http:// (got '{}')", node.id, node.url);
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_defaults_from_empty_file() {
        let config = WorkerConfig::from_toml_str("").unwrap();
        assert_eq!(config.caching, CachingOptions::default());
        assert_eq!(config.driver, DriverConfig::default());
        assert_eq!(config.acquire_timeout_ms, 30_000);
        assert!(config.functions.is_empty());
    }

    #[test]
    fn worker_config_parses_functions_and_driver() {
        let toml_str = r#"
acquire_timeout_ms = 5000

[caching]
container_pool_limit = 1
using_rest_mode = true

[driver]
kind = "docker"
functions_dir = "/srv/functions"

[[functions]]
name = "resize"
code_size = 2048

[[functions]]
name = "thumb"
image = "thumb:latest"
command = ["python3", "main.py"]
"#;
        let config = WorkerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.caching.container_pool_limit, 1);
        assert!(config.caching.using_rest_mode);
        // Unset caching fields keep their defaults.
        assert_eq!(config.caching.container_pool_num, 16);
        assert_eq!(config.functions.len(), 2);
        assert_eq!(config.functions[1].image_name(), "thumb:latest");
        assert!(matches!(config.driver, DriverConfig::Docker { ref binary, .. } if binary == "docker"));
    }

    #[test]
    fn worker_config_rejects_duplicate_functions() {
        let toml_str = r#"
[[functions]]
name = "a"

[[functions]]
name = "a"
"#;
        assert!(WorkerConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn worker_config_rejects_zero_pool_limit() {
        let toml_str = r#"
[caching]
container_pool_limit = 0
"#;
        assert!(WorkerConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn balancer_config_parses_fleet() {
        let toml_str = r#"
algorithm = "round-robin"
forward_timeout_secs = 30

[[nodes]]
id = 0
url = "http://10.0.0.1:8222"

[[nodes]]
id = 1
url = "http://10.0.0.2:8222"
"#;
        let config = BalancerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.algorithm, "round-robin");
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.forward_timeout_secs, Some(30));
        assert!(!config.fake_mode);
    }

    #[test]
    fn balancer_config_rejects_duplicate_ids() {
        let toml_str = r#"
[[nodes]]
id = 3
url = "http://a:1"

[[nodes]]
id = 3
url = "http://b:1"
"#;
        assert!(BalancerConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("balancer.toml");
        std::fs::write(&path, "[[nodes]]\nid = 7\nurl = \"http://127.0.0.1:9000\"\n").unwrap();

        let config = BalancerConfig::from_file(&path).unwrap();
        assert_eq!(config.nodes, vec![WorkerNode::new(7, "http://127.0.0.1:9000")]);
        assert_eq!(config.algorithm, "least-in-flight");
    }

    #[test]
    fn shipped_configs_parse() {
        let worker = WorkerConfig::from_toml_str(include_str!("../../../config/worker.toml")).unwrap();
        assert_eq!(worker.functions.len(), 3);
        let balancer =
            BalancerConfig::from_toml_str(include_str!("../../../config/balancer.toml")).unwrap();
        assert_eq!(balancer.nodes.len(), 2);
    }
}
