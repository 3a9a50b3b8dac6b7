//! In-memory [`ContainerRuntime`] for tests and dry runs
//!
//! Commands are scripted by exact command string; anything unscripted exits 0.
//! Every call is recorded so tests can assert on ordering and overlap.

use super::runtime::{ContainerError, ContainerRuntime, ContainerSpec, ExecOutput, RuntimeState};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Scripted outcome of one command
#[derive(Debug, Clone)]
pub struct MockExec {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub delay: Duration,
}

impl MockExec {
    pub fn exit(code: i64) -> Self {
        Self {
            exit_code: code,
            stdout: String::new(),
            stderr: String::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_stdout(mut self, out: impl Into<String>) -> Self {
        self.stdout = out.into();
        self
    }

    pub fn with_stderr(mut self, err: impl Into<String>) -> Self {
        self.stderr = err.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// One completed exec, with wall-clock bounds
#[derive(Debug, Clone)]
pub struct ExecRecord {
    pub container_id: String,
    pub container_name: String,
    pub command: String,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Clone)]
struct MockContainer {
    spec: ContainerSpec,
    running: bool,
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    launched: Vec<ContainerSpec>,
    execs: Vec<ExecRecord>,
    stopped: Vec<String>,
    removed: Vec<String>,
}

#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    scripts: Mutex<HashMap<String, MockExec>>,
    missing_images: Mutex<HashSet<String>>,
    failing_removals: Mutex<HashSet<String>>,
    unavailable: Mutex<bool>,
    next_id: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outcome of `command`
    pub fn script(&self, command: impl Into<String>, exec: MockExec) -> &Self {
        self.lock_scripts().insert(command.into(), exec);
        self
    }

    /// Makes `start` fail with [`ContainerError::ImageNotFound`] for `image`
    pub fn missing_image(&self, image: impl Into<String>) -> &Self {
        self.missing_images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(image.into());
        self
    }

    /// Makes `remove` fail for containers whose name starts with `prefix`
    pub fn failing_removal(&self, prefix: impl Into<String>) -> &Self {
        self.failing_removals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(prefix.into());
        self
    }

    /// Makes every call fail as if the daemon were down
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap_or_else(|e| e.into_inner()) = unavailable;
    }

    /// Drops a container behind the manager's back
    pub fn vanish(&self, id: &str) {
        self.lock_state().containers.remove(id);
    }

    pub fn launched(&self) -> Vec<ContainerSpec> {
        self.lock_state().launched.clone()
    }

    pub fn execs(&self) -> Vec<ExecRecord> {
        self.lock_state().execs.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.lock_state().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.lock_state().removed.clone()
    }

    /// Containers that exist (running or exited) and were never removed
    pub fn live_count(&self) -> usize {
        self.lock_state().containers.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_scripts(&self) -> std::sync::MutexGuard<'_, HashMap<String, MockExec>> {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), ContainerError> {
        if *self.unavailable.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(ContainerError::DaemonUnavailable(
                "mock runtime is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        self.check_available()?;
        if self
            .missing_images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&spec.image)
        {
            return Err(ContainerError::ImageNotFound(spec.image.clone()));
        }

        let id = format!("mock-{:04}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.lock_state();
        state.launched.push(spec.clone());
        state.containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                running: true,
            },
        );
        Ok(id)
    }

    async fn exec(
        &self,
        id: &str,
        command: &str,
        _working_dir: &str,
    ) -> Result<ExecOutput, ContainerError> {
        self.check_available()?;
        let name = {
            let state = self.lock_state();
            match state.containers.get(id) {
                Some(c) if c.running => c.spec.name.clone(),
                Some(_) => return Err(ContainerError::NotRunning(id.to_string())),
                None => return Err(ContainerError::NotFound(id.to_string())),
            }
        };

        let script = self
            .lock_scripts()
            .get(command)
            .cloned()
            .unwrap_or_else(|| MockExec::exit(0));

        let started = Instant::now();
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        let finished = Instant::now();

        self.lock_state().execs.push(ExecRecord {
            container_id: id.to_string(),
            container_name: name,
            command: command.to_string(),
            started,
            finished,
        });

        Ok(ExecOutput {
            exit_code: script.exit_code,
            stdout: script.stdout,
            stderr: script.stderr,
        })
    }

    async fn state(&self, id: &str) -> Result<RuntimeState, ContainerError> {
        self.check_available()?;
        Ok(match self.lock_state().containers.get(id) {
            Some(c) if c.running => RuntimeState::Running,
            Some(_) => RuntimeState::Exited,
            None => RuntimeState::NotFound,
        })
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<(), ContainerError> {
        self.check_available()?;
        let mut state = self.lock_state();
        match state.containers.get_mut(id) {
            Some(c) => {
                c.running = false;
                state.stopped.push(id.to_string());
                Ok(())
            }
            None => Err(ContainerError::NotFound(id.to_string())),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), ContainerError> {
        self.check_available()?;
        let failing = self
            .failing_removals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut state = self.lock_state();
        let Some(container) = state.containers.get(id) else {
            return Err(ContainerError::NotFound(id.to_string()));
        };
        if failing.iter().any(|p| container.spec.name.starts_with(p.as_str())) {
            return Err(ContainerError::Runtime(format!("cannot remove {}", id)));
        }
        if container.running && !force {
            return Err(ContainerError::Runtime(format!(
                "cannot remove running container {} without force",
                id
            )));
        }
        state.containers.remove(id);
        state.removed.push(id.to_string());
        Ok(())
    }
}
