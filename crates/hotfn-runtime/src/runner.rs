//! Function runner — one invocation from acquire to release.

use tracing::{debug, warn};

use hotfn_core::{
    epoch_millis, CachingOptionsUpdate, ExecSuccessResponse, ExecutionMeta, FunctionOutput,
    OptionsError,
};

use crate::error::{PoolError, RunError};
use crate::pool::{ConfigureOutcome, ContainerPoolCache, PoolStats};

/// Outcome of one successful invocation.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub output: FunctionOutput,
    pub meta: ExecutionMeta,
    /// Unix milliseconds when the container was handed to the function.
    pub start_time_ms: i64,
    /// Unix milliseconds when the function returned.
    pub end_time_ms: i64,
}

impl InvocationResult {
    pub fn internal_execution_time(&self) -> i64 {
        self.end_time_ms - self.start_time_ms
    }

    /// Worker response body; `execution_time` is measured by the caller.
    pub fn into_response(self, execution_time: i64) -> ExecSuccessResponse {
        ExecSuccessResponse {
            internal_execution_time: self.internal_execution_time(),
            result: self.output,
            execution_time,
            meta: self.meta,
            load_balancing_info: None,
        }
    }
}

/// Runs functions in containers checked out from the pool.
#[derive(Clone)]
pub struct FunctionRunner {
    pool: ContainerPoolCache,
}

impl FunctionRunner {
    pub fn new(pool: ContainerPoolCache) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ContainerPoolCache {
        &self.pool
    }

    /// Execute `name` once.
    ///
    /// The container goes back to the pool unless the driver reports it
    /// unusable.
    pub async fn run_function(&self, name: &str) -> Result<InvocationResult, RunError> {
        let lease = self.pool.acquire(name).await?;
        let meta = lease.meta();

        let start_time_ms = epoch_millis();
        let outcome = self
            .pool
            .driver()
            .run(lease.function(), lease.container())
            .await;
        let end_time_ms = epoch_millis();

        match outcome {
            Ok(output) => {
                self.pool.release(lease, true).await;
                debug!(
                    function = name,
                    container = %meta.container_name,
                    cold_start = meta.cold_start,
                    elapsed_ms = end_time_ms - start_time_ms,
                    "function executed"
                );
                Ok(InvocationResult {
                    output,
                    meta,
                    start_time_ms,
                    end_time_ms,
                })
            }
            Err(failure) => {
                warn!(
                    function = name,
                    container = %meta.container_name,
                    usable = failure.container_usable,
                    error = %failure.message,
                    "function execution failed"
                );
                self.pool.release(lease, failure.container_usable).await;
                Err(RunError::RunnerFailure {
                    function: name.to_string(),
                    message: failure.message,
                })
            }
        }
    }

    pub async fn reset(&self, drop_image_table: bool) -> usize {
        self.pool.reset(drop_image_table).await
    }

    pub async fn prepare_images(&self) -> Result<Vec<String>, PoolError> {
        self.pool.prepare_images().await
    }

    pub async fn configure(&self, update: &CachingOptionsUpdate) -> Result<ConfigureOutcome, OptionsError> {
        self.pool.configure(update).await
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hotfn_core::{CachingOptions, FunctionSpec};

    use super::*;
    use crate::pool::PoolConfig;
    use crate::simulated::{SimulatedDriver, SimulatedFailure};

    fn runner(driver: &Arc<SimulatedDriver>) -> FunctionRunner {
        let pool = ContainerPoolCache::new(
            driver.clone(),
            PoolConfig {
                options: CachingOptions::default(),
                functions: vec![FunctionSpec::named("echo"), FunctionSpec::named("resize")],
                ..PoolConfig::default()
            },
        );
        FunctionRunner::new(pool)
    }

    #[tokio::test]
    async fn first_call_is_cold_second_is_warm() {
        let driver = Arc::new(SimulatedDriver::new());
        let runner = runner(&driver);

        let first = runner.run_function("echo").await.unwrap();
        assert!(first.meta.cold_start);
        assert!(first.meta.image_built);
        assert_eq!(first.meta.image_name, "hotfn-echo");
        assert_eq!(first.output.exit_code, 0);
        assert!(first.output.data.contains("echo executed"));

        let second = runner.run_function("echo").await.unwrap();
        assert!(!second.meta.cold_start);
        assert!(!second.meta.image_built);
        assert_eq!(second.meta.container_name, first.meta.container_name);
        assert!(second.end_time_ms >= second.start_time_ms);
    }

    #[tokio::test]
    async fn unknown_function_surfaces_pool_error() {
        let driver = Arc::new(SimulatedDriver::new());
        let err = runner(&driver).run_function("missing").await.unwrap_err();
        assert_eq!(err, RunError::Pool(PoolError::UnknownFunction("missing".to_string())));
    }

    #[tokio::test]
    async fn usable_failure_keeps_container_warm() {
        let driver = Arc::new(SimulatedDriver::new());
        let runner = runner(&driver);
        driver.fail("echo", SimulatedFailure::Exec { container_usable: true });

        let err = runner.run_function("echo").await.unwrap_err();
        assert!(matches!(err, RunError::RunnerFailure { ref function, .. } if function == "echo"));
        assert_eq!(runner.pool().resident("echo"), 1);

        driver.clear_failure("echo");
        assert!(!runner.run_function("echo").await.unwrap().meta.cold_start);
    }

    #[tokio::test]
    async fn unusable_failure_destroys_container() {
        let driver = Arc::new(SimulatedDriver::new());
        let runner = runner(&driver);
        driver.fail("echo", SimulatedFailure::Exec { container_usable: false });

        assert!(runner.run_function("echo").await.is_err());
        assert_eq!(runner.pool().resident("echo"), 0);
        assert_eq!(driver.live_containers(), 0);
    }

    #[tokio::test]
    async fn response_carries_timings() {
        let driver = Arc::new(SimulatedDriver::new());
        let result = runner(&driver).run_function("resize").await.unwrap();
        let internal = result.internal_execution_time();
        let response = result.into_response(internal + 3);
        assert_eq!(response.internal_execution_time, internal);
        assert_eq!(response.execution_time, internal + 3);
        assert!(response.load_balancing_info.is_none());
    }
}
