//! hotfn-runtime — the worker side of hotfn.
//!
//! Provides the pieces a worker needs to serve invocations from warm
//! containers:
//!
//! - **Container drivers**: the opaque build/start/run/stop primitive,
//!   with a simulated driver and a docker CLI driver
//! - **Container pool cache**: per-function pools of warm containers with
//!   per-function and per-worker bounds
//! - **Idle sweeper**: reclaims idle containers past their lifetime while
//!   rest mode is on
//! - **Function runner**: acquire, execute, release, report
//!
//! # Architecture
//!
//! ```text
//! FunctionRunner
//!   └── ContainerPoolCache (cheap clone, shared with the sweeper)
//!       ├── Arc<dyn ContainerDriver>
//!       ├── function catalog (name → FunctionSpec)
//!       └── Mutex<PoolState>
//!           ├── CachingOptions
//!           └── image table: name → Image { image handle, idle, busy }
//! ```

pub mod docker;
pub mod driver;
pub mod error;
pub mod pool;
pub mod runner;
pub mod simulated;
pub mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use hotfn_core::{DriverConfig, WorkerConfig};

pub use docker::DockerDriver;
pub use driver::{ContainerDriver, ContainerHandle, ExecFailure, ImageHandle};
pub use error::{PoolError, RunError};
pub use pool::{ConfigureOutcome, ContainerPoolCache, ImageStats, Lease, PoolConfig, PoolStats};
pub use runner::{FunctionRunner, InvocationResult};
pub use simulated::{SimulatedDriver, SimulatedFailure};
pub use sweeper::run_sweeper;

/// Build the driver selected by a worker config.
pub fn driver_from_config(config: &DriverConfig) -> Arc<dyn ContainerDriver> {
    match config {
        DriverConfig::Simulated {
            cold_start_ms,
            exec_ms,
        } => Arc::new(SimulatedDriver::with_delays(
            Duration::from_millis(*cold_start_ms),
            Duration::from_millis(*exec_ms),
        )),
        DriverConfig::Docker {
            binary,
            functions_dir,
        } => Arc::new(DockerDriver::new(binary.clone(), functions_dir.clone())),
    }
}

/// Assemble a function runner from a worker config.
pub fn runner_from_config(config: &WorkerConfig) -> FunctionRunner {
    let driver = driver_from_config(&config.driver);
    let pool = ContainerPoolCache::new(driver, PoolConfig::from_worker_config(config));
    FunctionRunner::new(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_driver_is_the_default() {
        let driver = driver_from_config(&DriverConfig::default());
        assert_eq!(driver.name(), "simulated");
    }

    #[test]
    fn docker_driver_from_config() {
        let driver = driver_from_config(&DriverConfig::Docker {
            binary: "docker".to_string(),
            functions_dir: "/srv/functions".into(),
        });
        assert_eq!(driver.name(), "docker");
    }

    #[test]
    fn runner_uses_configured_options() {
        let mut config = WorkerConfig::default();
        config.caching.container_pool_limit = 2;
        let runner = runner_from_config(&config);
        assert_eq!(runner.pool().options().container_pool_limit, 2);
    }
}
