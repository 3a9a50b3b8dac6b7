use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    /// Missing or invalid input; reported, never a crash
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("container runtime unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container {0} is not running")]
    NotRunning(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContainerError::NotFound(_))
    }
}

/// A host path bound into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }

    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    /// Docker `binds` syntax: `host:container:ro|rw`
    pub fn to_bind(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host.display(),
            self.container,
            if self.read_only { "ro" } else { "rw" }
        )
    }
}

/// Everything a runtime needs to start one detached container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub working_dir: String,
    pub mounts: Vec<BindMount>,
    /// CPU quota in billionths of a core; `None` leaves it unlimited
    pub nano_cpus: Option<i64>,
    pub memory_bytes: Option<i64>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Live state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Running,
    Exited,
    NotFound,
}

/// The container engine seam
///
/// Implementations map "no such container" to [`ContainerError::NotFound`];
/// callers rely on that to make cleanup idempotent.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates and starts a detached container, returning its runtime id
    async fn start(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

    /// Runs `sh -c <command>` inside a running container and waits for it
    async fn exec(
        &self,
        id: &str,
        command: &str,
        working_dir: &str,
    ) -> Result<ExecOutput, ContainerError>;

    async fn state(&self, id: &str) -> Result<RuntimeState, ContainerError>;

    async fn stop(&self, id: &str, grace: Duration) -> Result<(), ContainerError>;

    async fn remove(&self, id: &str, force: bool) -> Result<(), ContainerError>;
}
