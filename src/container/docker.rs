//! Docker-backed [`ContainerRuntime`] using bollard

use super::runtime::{ContainerError, ContainerRuntime, ContainerSpec, ExecOutput, RuntimeState};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::service::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::time::Duration;
use tracing::{debug, trace};

/// Keeps the container alive so commands can be exec'd into it
const KEEPALIVE: [&str; 3] = ["tail", "-f", "/dev/null"];

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::DaemonUnavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Fails with [`ContainerError::DaemonUnavailable`] if the daemon does not answer
    pub async fn ping(&self) -> Result<(), ContainerError> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| ContainerError::DaemonUnavailable(e.to_string()))?;
        debug!(
            api_version = version.api_version.as_deref().unwrap_or("unknown"),
            "Connected to container runtime"
        );
        Ok(())
    }
}

fn map_error(err: BollardError, subject: &str) -> ContainerError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => ContainerError::NotFound(subject.to_string()),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } if message.contains("is not running") => ContainerError::NotRunning(subject.to_string()),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => ContainerError::Runtime(format!("{} ({}): {}", subject, status_code, message)),
        other => ContainerError::DaemonUnavailable(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: Some(KEEPALIVE.iter().map(|s| s.to_string()).collect()),
            working_dir: Some(spec.working_dir.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                binds: Some(spec.mounts.iter().map(|m| m.to_bind()).collect()),
                nano_cpus: spec.nano_cpus,
                memory: spec.memory_bytes,
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| match map_error(e, &spec.image) {
                ContainerError::NotFound(image) => ContainerError::ImageNotFound(image),
                other => other,
            })?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self.remove(&created.id, true).await;
            return Err(map_error(e, &spec.name));
        }

        debug!(container = %created.id, name = %spec.name, "Container started");
        Ok(created.id)
    }

    async fn exec(
        &self,
        id: &str,
        command: &str,
        working_dir: &str,
    ) -> Result<ExecOutput, ContainerError> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(working_dir.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_error(e, id))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_error(e, id))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk.map_err(|e| map_error(e, id))? {
                        LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                        LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                        LogOutput::Console { message } => stdout.extend_from_slice(&message),
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_error(e, id))?;
        let exit_code = inspect.exit_code.unwrap_or(-1);
        trace!(container = %id, exit_code, "Exec finished");

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn state(&self, id: &str) -> Result<RuntimeState, ContainerError> {
        match self.docker.inspect_container(id, None).await {
            Ok(inspect) => {
                if inspect.state.and_then(|s| s.running) == Some(true) {
                    Ok(RuntimeState::Running)
                } else {
                    Ok(RuntimeState::Exited)
                }
            }
            Err(e) => match map_error(e, id) {
                ContainerError::NotFound(_) => Ok(RuntimeState::NotFound),
                other => Err(other),
            },
        }
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<(), ContainerError> {
        let result = self
            .docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: grace.as_secs() as i64,
                }),
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error(e, id)),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), ContainerError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_error(e, id))
    }
}
