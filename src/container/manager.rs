//! Container lifecycle: launch, execute, track, cleanup
//!
//! The manager is the only owner of [`ContainerHandle`]s. Every container it
//! launches stays in its registry until removed, which is what the
//! termination controller walks on interrupt.

use super::runtime::{BindMount, ContainerError, ContainerRuntime, ContainerSpec, RuntimeState};
use crate::steps::{
    cpu_quota_nanos, memory_limit_bytes, BuildStep, ARTIFACT_MOUNT, WORKSPACE_MOUNT,
};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Pending,
    Running,
    Stopped,
    Removed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub step_index: usize,
    pub artifact_dir: PathBuf,
    pub working_dir: String,
    pub status: ContainerStatus,
}

/// Result of [`ContainerManager::track`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Running,
    Exited,
    NotFound,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Running => "running",
            TrackStatus::Exited => "exited",
            TrackStatus::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    /// Already removed by us or gone from the runtime; not an error
    AlreadyGone,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
}

impl CleanupSummary {
    fn record(&mut self, id: &str, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.failed_ids.push(id.to_string());
        }
    }
}

/// Output of one command run inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub name: String,
    pub image: String,
    pub project_root: PathBuf,
    pub working_dir: String,
    pub step_index: usize,
    /// Cores; `None` or `0` omits the quota
    pub cpu_limit: Option<f64>,
    /// Megabytes; `None` or `0` omits the limit
    pub memory_limit_mb: Option<u64>,
}

impl LaunchRequest {
    pub fn for_step(step: &BuildStep) -> Self {
        Self {
            name: step.name.clone(),
            image: step.image.clone(),
            project_root: step.mounts.project_root.clone(),
            working_dir: step.container_workdir(),
            step_index: step.index,
            cpu_limit: step.hints.cpu_cores,
            memory_limit_mb: step.hints.memory_mb,
        }
    }
}

/// Reduces a step name to Docker's container-name alphabet
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "step".to_string()
    } else {
        trimmed.chars().take(48).collect()
    }
}

pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    artifact_root: PathBuf,
    stop_timeout: Duration,
    run_id: String,
    registry: Mutex<HashMap<String, ContainerHandle>>,
}

impl ContainerManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        artifact_root: impl Into<PathBuf>,
        stop_timeout: Duration,
    ) -> Self {
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            runtime,
            artifact_root: artifact_root.into(),
            stop_timeout,
            run_id,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, ContainerHandle>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, id: &str, status: ContainerStatus) {
        if let Some(handle) = self.registry().get_mut(id) {
            handle.status = status;
        }
    }

    pub fn handle(&self, id: &str) -> Option<ContainerHandle> {
        self.registry().get(id).cloned()
    }

    /// Ids of containers launched by this manager and not yet removed
    pub fn tracked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .registry()
            .values()
            .filter(|h| h.status != ContainerStatus::Removed)
            .map(|h| h.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn create_artifact_dir(&self, name: &str) -> Result<PathBuf, ContainerError> {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let dir = self
            .artifact_root
            .join(format!("{}-{}", name, &unique[..12]));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Starts a detached container for one step
    ///
    /// The project root is mounted read-only at `/workspace`, a fresh artifact
    /// directory read-write at `/artifacts`.
    pub async fn launch(&self, request: LaunchRequest) -> Result<ContainerHandle, ContainerError> {
        if request.image.trim().is_empty() {
            return Err(ContainerError::Precondition(format!(
                "step {}: image is required",
                request.step_index
            )));
        }
        if !request.project_root.is_dir() {
            return Err(ContainerError::Precondition(format!(
                "step {}: project root does not exist: {}",
                request.step_index,
                request.project_root.display()
            )));
        }

        let nano_cpus = match request.cpu_limit.filter(|c| *c != 0.0) {
            Some(cores) => Some(cpu_quota_nanos(cores).ok_or_else(|| {
                ContainerError::Precondition(format!(
                    "step {}: cpu limit out of range: {}",
                    request.step_index, cores
                ))
            })?),
            None => None,
        };
        let memory_bytes = match request.memory_limit_mb.filter(|m| *m > 0) {
            Some(mb) => Some(memory_limit_bytes(mb).ok_or_else(|| {
                ContainerError::Precondition(format!(
                    "step {}: memory limit out of range: {} MB",
                    request.step_index, mb
                ))
            })?),
            None => None,
        };

        let project_root = std::fs::canonicalize(&request.project_root)?;
        let base_name = sanitize_name(&request.name);
        let artifact_dir = self.create_artifact_dir(&base_name)?;
        let container_name = format!(
            "suitey-{}-{}-{}",
            self.run_id, request.step_index, base_name
        );

        let spec = ContainerSpec {
            name: container_name.clone(),
            image: request.image.clone(),
            working_dir: request.working_dir.clone(),
            mounts: vec![
                BindMount::read_only(&project_root, WORKSPACE_MOUNT),
                BindMount::read_write(&artifact_dir, ARTIFACT_MOUNT),
            ],
            nano_cpus,
            memory_bytes,
            labels: HashMap::from([
                ("suitey.run".to_string(), self.run_id.clone()),
                ("suitey.step".to_string(), request.step_index.to_string()),
            ]),
        };

        let id = match self.runtime.start(&spec).await {
            Ok(id) => id,
            Err(e) => {
                warn!(step = request.step_index, image = %request.image, error = %e, "Container launch failed");
                let _ = std::fs::remove_dir(&artifact_dir);
                return Err(e);
            }
        };

        let handle = ContainerHandle {
            id: id.clone(),
            name: container_name,
            step_index: request.step_index,
            artifact_dir,
            working_dir: request.working_dir,
            status: ContainerStatus::Running,
        };
        self.registry().insert(id.clone(), handle.clone());
        info!(container = %id, step = request.step_index, image = %request.image, "Container launched");
        Ok(handle)
    }

    /// Runs `command` in a running container, capturing output and timing
    pub async fn execute(&self, id: &str, command: &str) -> Result<ExecutionOutput, ContainerError> {
        if command.trim().is_empty() {
            return Err(ContainerError::Precondition(format!(
                "container {}: command is empty",
                id
            )));
        }
        let handle = self.handle(id).ok_or_else(|| {
            ContainerError::Precondition(format!("unknown container handle: {}", id))
        })?;
        if handle.status != ContainerStatus::Running {
            return Err(ContainerError::Precondition(format!(
                "container {} is {:?}, not running",
                id, handle.status
            )));
        }

        debug!(container = %id, command, "Executing command");
        let started = Instant::now();
        let result = self.runtime.exec(id, command, &handle.working_dir).await;
        let duration = started.elapsed();

        match result {
            Ok(out) => Ok(ExecutionOutput {
                exit_code: out.exit_code,
                stdout: out.stdout,
                stderr: out.stderr,
                duration,
            }),
            Err(e) => {
                if e.is_not_found() {
                    self.set_status(id, ContainerStatus::Error);
                }
                Err(e)
            }
        }
    }

    pub async fn track(&self, id: &str) -> Result<TrackStatus, ContainerError> {
        let status = match self.runtime.state(id).await? {
            RuntimeState::Running => TrackStatus::Running,
            RuntimeState::Exited => TrackStatus::Exited,
            RuntimeState::NotFound => TrackStatus::NotFound,
        };
        Ok(status)
    }

    /// Stop-then-remove. Safe to call repeatedly.
    pub async fn cleanup(&self, id: &str) -> Result<CleanupOutcome, ContainerError> {
        if matches!(
            self.handle(id).map(|h| h.status),
            Some(ContainerStatus::Removed)
        ) {
            return Ok(CleanupOutcome::AlreadyGone);
        }

        match self.runtime.stop(id, self.stop_timeout).await {
            Ok(()) => self.set_status(id, ContainerStatus::Stopped),
            Err(e) if e.is_not_found() => {
                self.set_status(id, ContainerStatus::Removed);
                debug!(container = %id, "Container already gone");
                return Ok(CleanupOutcome::AlreadyGone);
            }
            Err(e) => debug!(container = %id, error = %e, "Stop failed, forcing removal"),
        }

        self.remove_now(id).await
    }

    async fn remove_now(&self, id: &str) -> Result<CleanupOutcome, ContainerError> {
        match self.runtime.remove(id, true).await {
            Ok(()) => {
                self.set_status(id, ContainerStatus::Removed);
                debug!(container = %id, "Container removed");
                Ok(CleanupOutcome::Removed)
            }
            Err(e) if e.is_not_found() => {
                self.set_status(id, ContainerStatus::Removed);
                Ok(CleanupOutcome::AlreadyGone)
            }
            Err(e) => {
                self.set_status(id, ContainerStatus::Error);
                warn!(container = %id, error = %e, "Container removal failed");
                Err(e)
            }
        }
    }

    /// Cleans up every id, never stopping at the first failure
    pub async fn cleanup_all(&self, ids: &[String]) -> CleanupSummary {
        let outcomes = join_all(ids.iter().map(|id| self.cleanup(id))).await;
        let mut summary = CleanupSummary::default();
        for (id, outcome) in ids.iter().zip(outcomes) {
            summary.record(id, outcome.is_ok());
        }
        summary
    }

    /// Force-removes every tracked container without a graceful stop
    pub async fn force_remove_all(&self) -> CleanupSummary {
        let ids = self.tracked_ids();
        let outcomes = join_all(ids.iter().map(|id| self.remove_now(id))).await;
        let mut summary = CleanupSummary::default();
        for (id, outcome) in ids.iter().zip(outcomes) {
            summary.record(id, outcome.is_ok());
        }
        summary
    }

    pub fn artifact_root(&self) -> &Path {
        &self.artifact_root
    }
}
