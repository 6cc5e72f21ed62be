//! Docker driver — function containers managed through the docker CLI.
//!
//! Each function has a build context at `<functions_dir>/<name>`. A
//! container is started once with a long-lived `sleep` entrypoint and each
//! invocation is a `docker exec` of the function's command inside it.

use std::path::PathBuf;
use std::process::Output;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use hotfn_core::{FunctionOutput, FunctionSpec};

use crate::driver::{ContainerDriver, ContainerHandle, ExecFailure, ImageHandle};

/// Command run by `docker exec` when a function does not set one.
const DEFAULT_COMMAND: &[&str] = &["/bin/sh", "/function/run.sh"];

/// `docker exec` exits with 125-127 when the command never ran in the container.
const EXIT_DOCKER_ERRORS: std::ops::RangeInclusive<i32> = 125..=127;

pub struct DockerDriver {
    binary: String,
    functions_dir: PathBuf,
    next_id: AtomicU64,
}

impl DockerDriver {
    pub fn new(binary: impl Into<String>, functions_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            functions_dir: functions_dir.into(),
            next_id: AtomicU64::new(1),
        }
    }

    fn build_args(&self, function: &FunctionSpec) -> Vec<String> {
        vec![
            "build".to_string(),
            "--quiet".to_string(),
            "-t".to_string(),
            function.image_name(),
            self.functions_dir
                .join(&function.name)
                .to_string_lossy()
                .into_owned(),
        ]
    }

    fn run_args(&self, container_name: &str, image: &ImageHandle) -> Vec<String> {
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            "--entrypoint".to_string(),
            "sleep".to_string(),
            image.name.clone(),
            "infinity".to_string(),
        ]
    }

    fn exec_args(&self, function: &FunctionSpec, container: &ContainerHandle) -> Vec<String> {
        let mut args = vec!["exec".to_string(), container.id.clone()];
        match &function.command {
            Some(cmd) if !cmd.is_empty() => args.extend(cmd.iter().cloned()),
            _ => args.extend(DEFAULT_COMMAND.iter().map(|s| s.to_string())),
        }
        args
    }

    async fn docker(&self, args: &[String]) -> anyhow::Result<Output> {
        debug!(binary = %self.binary, ?args, "invoking docker");
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.binary))
    }

    async fn docker_ok(&self, args: &[String]) -> anyhow::Result<String> {
        let output = self.docker(args).await?;
        if !output.status.success() {
            bail!(
                "{} {} exited with {}: {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn build_image(&self, function: &FunctionSpec) -> anyhow::Result<ImageHandle> {
        self.docker_ok(&self.build_args(function))
            .await
            .with_context(|| format!("building image for {}", function.name))?;
        let image = ImageHandle {
            name: function.image_name(),
        };
        info!(function = %function.name, image = %image.name, "image built");
        Ok(image)
    }

    async fn start(&self, function: &FunctionSpec, image: &ImageHandle) -> anyhow::Result<ContainerHandle> {
        let name = format!(
            "hotfn-{}-{}-{}",
            function.name,
            std::process::id(),
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );
        self.docker_ok(&self.run_args(&name, image))
            .await
            .with_context(|| format!("starting container for {}", function.name))?;
        Ok(ContainerHandle {
            id: name,
            function: function.name.clone(),
        })
    }

    async fn run(
        &self,
        function: &FunctionSpec,
        container: &ContainerHandle,
    ) -> Result<FunctionOutput, ExecFailure> {
        let output = self
            .docker(&self.exec_args(function, container))
            .await
            .map_err(|e| ExecFailure::unusable(format!("{e:#}")))?;

        let exit_code = output.status.code().unwrap_or(-1);
        if EXIT_DOCKER_ERRORS.contains(&exit_code) {
            return Err(ExecFailure::unusable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        if exit_code != 0 {
            return Err(ExecFailure::usable(format!(
                "exited with {exit_code}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(FunctionOutput {
            exit_code,
            data: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    async fn stop(&self, container: &ContainerHandle) -> anyhow::Result<()> {
        let args = vec!["rm".to_string(), "-f".to_string(), container.id.clone()];
        self.docker_ok(&args).await?;
        debug!(container = %container.id, "container removed");
        Ok(())
    }
}
