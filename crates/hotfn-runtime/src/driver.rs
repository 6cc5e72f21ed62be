//! Container driver — the primitive that builds, starts, runs and stops
//! function containers.
//!
//! The pool never looks inside a container. It only needs to know whether
//! a failed execution left the container fit for reuse, which the driver
//! reports through [`ExecFailure::container_usable`].

use async_trait::async_trait;
use thiserror::Error;

use hotfn_core::{FunctionOutput, FunctionSpec};

/// A built image a container can be started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub name: String,
}

/// A running container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub id: String,
    pub function: String,
}

/// An execution that did not produce output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecFailure {
    pub message: String,
    /// `false` if the container must be destroyed instead of reused.
    pub container_usable: bool,
}

impl ExecFailure {
    pub fn usable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            container_usable: true,
        }
    }

    pub fn unusable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            container_usable: false,
        }
    }
}

#[async_trait]
pub trait ContainerDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build (or pull) the image for a function.
    async fn build_image(&self, function: &FunctionSpec) -> anyhow::Result<ImageHandle>;

    /// Start a container from a built image. The container is idle until `run`.
    async fn start(&self, function: &FunctionSpec, image: &ImageHandle) -> anyhow::Result<ContainerHandle>;

    /// Execute the function body once inside the container.
    async fn run(
        &self,
        function: &FunctionSpec,
        container: &ContainerHandle,
    ) -> Result<FunctionOutput, ExecFailure>;

    /// Destroy a container.
    async fn stop(&self, container: &ContainerHandle) -> anyhow::Result<()>;
}
