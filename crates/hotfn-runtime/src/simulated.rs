//! Simulated driver — in-process containers with fixed delays.
//!
//! Used by tests and by workers configured with `kind = "simulated"`.
//! Counts builds, starts and stops so callers can observe exactly what the
//! pool did.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tracing::debug;

use hotfn_core::{FunctionOutput, FunctionSpec};

use crate::driver::{ContainerDriver, ContainerHandle, ExecFailure, ImageHandle};

/// Failure to inject for a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    /// `build_image` and `start` fail.
    Provision,
    /// `run` fails.
    Exec { container_usable: bool },
}

pub struct SimulatedDriver {
    build_delay: Duration,
    start_delay: Duration,
    exec_delay: Duration,
    next_id: AtomicU64,
    live: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, SimulatedFailure>>,
    builds: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl SimulatedDriver {
    /// A driver without delays.
    pub fn new() -> Self {
        Self::with_delays(Duration::ZERO, Duration::ZERO)
    }

    /// `cold_start` is charged to both image builds and container starts.
    pub fn with_delays(cold_start: Duration, exec: Duration) -> Self {
        Self {
            build_delay: cold_start,
            start_delay: cold_start,
            exec_delay: exec,
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn fail(&self, function: &str, failure: SimulatedFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(function.to_string(), failure);
    }

    pub fn clear_failure(&self, function: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(function);
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Containers started and not yet stopped.
    pub fn live_containers(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn failure_for(&self, function: &str) -> Option<SimulatedFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(function)
            .copied()
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerDriver for SimulatedDriver {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn build_image(&self, function: &FunctionSpec) -> anyhow::Result<ImageHandle> {
        tokio::time::sleep(self.build_delay).await;
        if self.failure_for(&function.name) == Some(SimulatedFailure::Provision) {
            bail!("simulated build failure");
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(ImageHandle {
            name: function.image_name(),
        })
    }

    async fn start(&self, function: &FunctionSpec, image: &ImageHandle) -> anyhow::Result<ContainerHandle> {
        tokio::time::sleep(self.start_delay).await;
        if self.failure_for(&function.name) == Some(SimulatedFailure::Provision) {
            bail!("simulated start failure");
        }
        let id = format!("{}-{}", image.name, self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        self.starts.fetch_add(1, Ordering::SeqCst);
        debug!(container = %id, "simulated container started");
        Ok(ContainerHandle {
            id,
            function: function.name.clone(),
        })
    }

    async fn run(
        &self,
        function: &FunctionSpec,
        container: &ContainerHandle,
    ) -> Result<FunctionOutput, ExecFailure> {
        tokio::time::sleep(self.exec_delay).await;
        if let Some(SimulatedFailure::Exec { container_usable }) = self.failure_for(&function.name) {
            return Err(ExecFailure {
                message: "simulated execution failure".to_string(),
                container_usable,
            });
        }
        Ok(FunctionOutput {
            exit_code: 0,
            data: format!("{} executed in {}", function.name, container.id),
        })
    }

    async fn stop(&self, container: &ContainerHandle) -> anyhow::Result<()> {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&container.id);
        if !removed {
            bail!("container {} is not running", container.id);
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
