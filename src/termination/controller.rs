use super::shutdown::{self, ShutdownSignal, ShutdownTrigger};
use crate::container::{CleanupSummary, ContainerManager};
use crate::results::ResultPublisher;
use crate::util::kv::KvWriter;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationState {
    Normal,
    FirstSignal,
    ForceKill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// Graceful stop-then-remove is running in the background
    GracefulInitiated { tracked: usize },
    /// Everything tracked was force-removed before returning
    ForceRemoved(CleanupSummary),
}

impl InterruptOutcome {
    pub fn to_kv(&self) -> String {
        let mut w = KvWriter::new();
        match self {
            InterruptOutcome::GracefulInitiated { tracked } => {
                w.field("graceful_termination", "initiated")
                    .field("containers_tracked", tracked);
            }
            InterruptOutcome::ForceRemoved(summary) => {
                w.field("force_termination", "completed")
                    .field("containers_removed", summary.succeeded)
                    .field("containers_failed", summary.failed);
            }
        }
        w.finish()
    }
}

/// Two-stage interrupt handling for one run
///
/// The first interrupt flips the shared shutdown signal and starts a bounded
/// graceful cleanup in the background. Any later interrupt force-removes
/// whatever is still tracked.
pub struct TerminationController {
    manager: Arc<ContainerManager>,
    trigger: ShutdownTrigger,
    state: Mutex<TerminationState>,
    graceful_timeout: Duration,
    graceful: Mutex<Option<JoinHandle<CleanupSummary>>>,
    publisher: Option<Arc<ResultPublisher>>,
}

impl TerminationController {
    pub fn new(manager: Arc<ContainerManager>, graceful_timeout: Duration) -> Self {
        let (trigger, _) = shutdown::channel();
        Self {
            manager,
            trigger,
            state: Mutex::new(TerminationState::Normal),
            graceful_timeout,
            graceful: Mutex::new(None),
            publisher: None,
        }
    }

    /// Temp files of `publisher` are removed by [`Self::finish`]
    pub fn with_publisher(mut self, publisher: Arc<ResultPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.trigger.subscribe()
    }

    pub fn state(&self) -> TerminationState {
        *self.lock_state()
    }

    pub fn was_interrupted(&self) -> bool {
        self.state() != TerminationState::Normal
    }

    fn lock_state(&self) -> MutexGuard<'_, TerminationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_graceful(&self) -> MutexGuard<'_, Option<JoinHandle<CleanupSummary>>> {
        self.graceful.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn interrupt(&self) -> InterruptOutcome {
        let next = {
            let mut state = self.lock_state();
            *state = match *state {
                TerminationState::Normal => TerminationState::FirstSignal,
                TerminationState::FirstSignal | TerminationState::ForceKill => {
                    TerminationState::ForceKill
                }
            };
            *state
        };
        self.trigger.trigger();

        if next == TerminationState::FirstSignal {
            let tracked = self.manager.tracked_ids().len();
            info!(tracked, "Interrupt received, stopping containers gracefully");

            let manager = Arc::clone(&self.manager);
            let timeout = self.graceful_timeout;
            let task = tokio::spawn(async move {
                let ids = manager.tracked_ids();
                match tokio::time::timeout(timeout, manager.cleanup_all(&ids)).await {
                    Ok(summary) => summary,
                    Err(_) => {
                        warn!(?timeout, "Graceful stop timed out, forcing removal");
                        manager.force_remove_all().await
                    }
                }
            });
            *self.lock_graceful() = Some(task);
            return InterruptOutcome::GracefulInitiated { tracked };
        }

        warn!("Repeated interrupt, force-removing containers");
        let summary = self.manager.force_remove_all().await;
        if summary.failed > 0 {
            warn!(failed = ?summary.failed_ids, "Some containers could not be removed");
        }
        InterruptOutcome::ForceRemoved(summary)
    }

    /// Waits for the background graceful cleanup, if one was started
    pub async fn wait_graceful(&self) -> Option<CleanupSummary> {
        let task = self.lock_graceful().take()?;
        match task.await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Graceful cleanup task failed");
                None
            }
        }
    }

    /// End-of-run cleanup on every exit path: drains graceful cleanup,
    /// removes leftover containers and this run's result files
    pub async fn finish(&self) -> CleanupSummary {
        let mut summary = self.wait_graceful().await.unwrap_or_default();

        let leftover = self.manager.tracked_ids();
        if !leftover.is_empty() {
            let sweep = self.manager.cleanup_all(&leftover).await;
            summary.succeeded += sweep.succeeded;
            summary.failed += sweep.failed;
            summary.failed_ids.extend(sweep.failed_ids);
        }

        if let Some(publisher) = &self.publisher {
            publisher.cleanup();
        }
        summary
    }

    /// Converts OS interrupts into [`Self::interrupt`] calls until aborted
    pub fn spawn_signal_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Cannot listen for interrupts");
                    return;
                }
                let outcome = controller.interrupt().await;
                info!(state = ?controller.state(), outcome = %outcome.to_kv().trim_end(), "Interrupt handled");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{LaunchRequest, MockRuntime};
    use crate::steps::WORKSPACE_MOUNT;
    use tempfile::TempDir;

    struct Fixture {
        runtime: Arc<MockRuntime>,
        manager: Arc<ContainerManager>,
        project: TempDir,
        _artifacts: TempDir,
    }

    fn fixture() -> Fixture {
        let runtime = Arc::new(MockRuntime::new());
        let artifacts = TempDir::new().unwrap();
        let manager = Arc::new(ContainerManager::new(
            runtime.clone(),
            artifacts.path(),
            Duration::from_secs(1),
        ));
        Fixture {
            runtime,
            manager,
            project: TempDir::new().unwrap(),
            _artifacts: artifacts,
        }
    }

    async fn launch(f: &Fixture, index: usize) -> String {
        f.manager
            .launch(LaunchRequest {
                name: format!("step{}", index),
                image: "alpine:3".into(),
                project_root: f.project.path().to_path_buf(),
                working_dir: WORKSPACE_MOUNT.into(),
                step_index: index,
                cpu_limit: None,
                memory_limit_mb: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_first_interrupt_stops_and_removes_tracked_containers() {
        let f = fixture();
        launch(&f, 0).await;
        launch(&f, 1).await;
        let controller = TerminationController::new(f.manager.clone(), Duration::from_secs(5));
        let signal = controller.signal();

        let outcome = controller.interrupt().await;
        assert_eq!(outcome, InterruptOutcome::GracefulInitiated { tracked: 2 });
        assert!(outcome.to_kv().contains("graceful_termination=initiated"));
        assert_eq!(controller.state(), TerminationState::FirstSignal);
        assert!(signal.is_triggered());

        let summary = controller.wait_graceful().await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(f.runtime.stopped().len(), 2);
        assert_eq!(f.runtime.live_count(), 0);
        assert!(f.manager.tracked_ids().is_empty());
    }

    #[tokio::test]
    async fn test_second_interrupt_with_nothing_left_is_noop() {
        let f = fixture();
        launch(&f, 0).await;
        launch(&f, 1).await;
        let controller = TerminationController::new(f.manager.clone(), Duration::from_secs(5));

        controller.interrupt().await;
        controller.wait_graceful().await;

        let second = controller.interrupt().await;
        assert_eq!(second, InterruptOutcome::ForceRemoved(CleanupSummary::default()));
        assert_eq!(controller.state(), TerminationState::ForceKill);

        let third = controller.interrupt().await;
        assert_eq!(third, InterruptOutcome::ForceRemoved(CleanupSummary::default()));
        assert!(third.to_kv().contains("containers_removed=0"));
    }

    #[tokio::test]
    async fn test_force_kill_skips_graceful_stop() {
        let f = fixture();
        let controller = TerminationController::new(f.manager.clone(), Duration::from_secs(5));
        controller.interrupt().await;
        controller.wait_graceful().await;

        launch(&f, 3).await;
        let outcome = controller.interrupt().await;
        match outcome {
            InterruptOutcome::ForceRemoved(summary) => assert_eq!(summary.succeeded, 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(f.runtime.stopped().is_empty());
        assert_eq!(f.runtime.live_count(), 0);
    }

    #[tokio::test]
    async fn test_finish_sweeps_containers_and_result_files() {
        let f = fixture();
        launch(&f, 0).await;
        let results = TempDir::new().unwrap();
        let publisher = Arc::new(ResultPublisher::new(results.path()).unwrap());
        publisher
            .publish(&crate::results::ResultRecord::new("a", 0, Duration::ZERO))
            .unwrap();

        let controller = TerminationController::new(f.manager.clone(), Duration::from_secs(5))
            .with_publisher(publisher.clone());
        assert!(!controller.was_interrupted());

        let summary = controller.finish().await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(f.runtime.live_count(), 0);
        assert!(std::fs::read_dir(results.path()).unwrap().next().is_none());

        let again = controller.finish().await;
        assert_eq!(again, CleanupSummary::default());
    }
}
