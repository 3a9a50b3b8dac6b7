//! Parallel executor
//!
//! Groups run strictly one after another; steps inside a group run as
//! concurrent tokio tasks, each holding one pool slot for its whole lifetime.
//! Workers publish a [`ResultRecord`] and the executor applies the collected
//! records once the group has drained.

mod report;
mod state;

pub use report::{
    ExecutionReport, StepReport, EXIT_FATAL, EXIT_INTERRUPTED, EXIT_STEPS_FAILED, EXIT_SUCCESS,
};
pub use state::{InvalidTransition, StepStates, StepStatus};

use crate::container::{ContainerManager, LaunchRequest};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::resources::{AcquireMode, MemoryGate, PoolError, ResourcePool, DEFAULT_FLOOR_MB};
use crate::results::{ResultPoller, ResultPublisher, ResultRecord, TestStatus};
use crate::scheduler::ExecutionPlan;
use crate::steps::BuildStep;
use crate::termination::ShutdownSignal;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub acquire_timeout: Duration,
    pub memory_wait_timeout: Duration,
    pub poll_interval: Duration,
    /// How long to wait for a drained group's records to show up
    pub collect_timeout: Duration,
    /// Memory limit for steps without their own hint
    pub container_memory_mb: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(600),
            memory_wait_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(200),
            collect_timeout: Duration::from_secs(10),
            container_memory_mb: DEFAULT_FLOOR_MB,
        }
    }
}

/// How a worker task ended
#[derive(Debug)]
enum WorkerOutcome {
    /// A record was published; the step's final state comes from it
    Published {
        container_id: Option<String>,
        error: Option<String>,
    },
    /// Shutdown was requested before the command completed
    Cancelled(String),
    /// Nothing could be published
    Unpublished {
        container_id: Option<String>,
        error: String,
    },
}

#[derive(Clone)]
pub struct ParallelExecutor {
    pool: Arc<ResourcePool>,
    memory: Arc<MemoryGate>,
    manager: Arc<ContainerManager>,
    publisher: Arc<ResultPublisher>,
    poller: Arc<ResultPoller>,
    shutdown: ShutdownSignal,
    settings: ExecutorSettings,
    progress: Arc<dyn ProgressHandler>,
}

impl ParallelExecutor {
    pub fn new(
        pool: Arc<ResourcePool>,
        memory: Arc<MemoryGate>,
        manager: Arc<ContainerManager>,
        publisher: Arc<ResultPublisher>,
        poller: Arc<ResultPoller>,
        shutdown: ShutdownSignal,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            pool,
            memory,
            manager,
            publisher,
            poller,
            shutdown,
            settings,
            progress: Arc::new(NoOpHandler),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&self, steps: &[BuildStep], plan: &ExecutionPlan) -> ExecutionReport {
        let started = Instant::now();
        let group_of = plan.group_of();
        let mut states = StepStates::new(steps.len());
        let mut reports: Vec<StepReport> = steps
            .iter()
            .map(|s| {
                StepReport::pending(s.index, &s.name, group_of.get(&s.index).copied().unwrap_or(0))
            })
            .collect();

        self.progress.on_progress(&ProgressEvent::Started {
            steps: steps.len(),
            groups: plan.groups.len(),
        });

        for (g, group) in plan.groups.iter().enumerate() {
            let group_started = Instant::now();
            self.progress.on_progress(&ProgressEvent::GroupStarted {
                group: g,
                total: plan.groups.len(),
                steps: group.steps.clone(),
            });

            let mut workers = Vec::new();
            for &idx in &group.steps {
                let Some(step) = steps.get(idx) else {
                    continue;
                };
                let reason = step
                    .dependencies
                    .iter()
                    .find(|d| states.get(**d).map_or(true, |s| !s.is_terminal() || s.blocks_dependents()))
                    .map(|d| format!("prerequisite step {} did not succeed", d))
                    .or_else(|| {
                        self.shutdown
                            .is_triggered()
                            .then(|| "shutdown requested".to_string())
                    });
                if let Some(reason) = reason {
                    self.abort(&mut states, &mut reports[idx], reason);
                    continue;
                }

                if let Err(e) = states.transition(idx, StepStatus::Running) {
                    error!(error = %e, "Step state out of sync");
                    continue;
                }
                reports[idx].status = StepStatus::Running;
                let worker = self.clone();
                let step = step.clone();
                workers.push((idx, tokio::spawn(async move { worker.run_step(step).await })));
            }

            let (indices, handles): (Vec<usize>, Vec<_>) = workers.into_iter().unzip();
            let joined = join_all(handles).await;

            let mut awaiting: HashMap<usize, (Option<String>, Option<String>)> = HashMap::new();
            for (idx, joined) in indices.into_iter().zip(joined) {
                match joined {
                    Ok(WorkerOutcome::Published {
                        container_id,
                        error,
                    }) => {
                        awaiting.insert(idx, (container_id, error));
                    }
                    Ok(WorkerOutcome::Cancelled(reason)) => {
                        self.abort(&mut states, &mut reports[idx], reason);
                    }
                    Ok(WorkerOutcome::Unpublished {
                        container_id,
                        error,
                    }) => {
                        reports[idx].container_id = container_id;
                        self.fail(&mut states, &mut reports[idx], error);
                    }
                    Err(e) => {
                        error!(step = idx, error = %e, "Worker crashed");
                        self.fail(&mut states, &mut reports[idx], format!("worker crashed: {}", e));
                    }
                }
            }

            self.collect(&awaiting, &mut states, &mut reports).await;
            for idx in awaiting.keys() {
                if states.get(*idx) == Some(StepStatus::Running) {
                    self.fail(
                        &mut states,
                        &mut reports[*idx],
                        "no result record was collected".to_string(),
                    );
                }
            }

            self.progress.on_progress(&ProgressEvent::GroupComplete {
                group: g,
                duration: group_started.elapsed(),
            });
        }

        let report = ExecutionReport::new(
            reports,
            self.shutdown.is_triggered(),
            started.elapsed().as_secs_f64(),
        );
        self.progress.on_progress(&ProgressEvent::Completed {
            succeeded: report.succeeded,
            failed: report.failed,
            aborted: report.aborted,
            total_time: started.elapsed(),
        });
        report
    }

    /// Applies the records published by this group's workers
    async fn collect(
        &self,
        awaiting: &HashMap<usize, (Option<String>, Option<String>)>,
        states: &mut StepStates,
        reports: &mut [StepReport],
    ) {
        if awaiting.is_empty() {
            return;
        }
        let collected = match self
            .poller
            .wait_for(awaiting.len(), self.settings.collect_timeout, &self.shutdown)
            .await
        {
            Ok(collected) => collected,
            Err(e) => {
                warn!(error = %e, "Polling result directory failed");
                return;
            }
        };

        for result in collected.results {
            let record = result.record;
            let Some(idx) = record.step_index else {
                debug!(path = %result.path.display(), "Record without step index ignored");
                continue;
            };
            let Some((container_id, error)) = awaiting.get(&idx) else {
                debug!(step = idx, "Record for a step outside this group ignored");
                continue;
            };
            if container_id.is_some() && record.container_id != *container_id {
                debug!(step = idx, "Record from another container ignored");
                continue;
            }

            let status = match record.status {
                TestStatus::Passed => StepStatus::Succeeded,
                TestStatus::Failed | TestStatus::Running => StepStatus::Failed,
            };
            if let Err(e) = states.transition(idx, status) {
                warn!(error = %e, "Duplicate record ignored");
                continue;
            }
            let report = &mut reports[idx];
            report.status = status;
            report.exit_code = Some(record.exit_code);
            report.duration = Some(record.duration.as_secs_f64());
            report.container_id = record.container_id.clone();
            report.error = error.clone();

            self.progress.on_progress(&ProgressEvent::StepFinished {
                step: idx,
                name: report.name.clone(),
                exit_code: record.exit_code,
                duration: record.duration,
                success: status == StepStatus::Succeeded,
            });
        }
    }

    fn abort(&self, states: &mut StepStates, report: &mut StepReport, reason: String) {
        if let Err(e) = states.transition(report.index, StepStatus::Aborted) {
            error!(error = %e, "Step state out of sync");
            return;
        }
        report.status = StepStatus::Aborted;
        self.progress.on_progress(&ProgressEvent::StepAborted {
            step: report.index,
            name: report.name.clone(),
            reason: reason.clone(),
        });
        report.error = Some(reason);
    }

    fn fail(&self, states: &mut StepStates, report: &mut StepReport, error: String) {
        if let Err(e) = states.transition(report.index, StepStatus::Failed) {
            error!(error = %e, "Step state out of sync");
            return;
        }
        report.status = StepStatus::Failed;
        report.error = Some(error);
        self.progress.on_progress(&ProgressEvent::StepFinished {
            step: report.index,
            name: report.name.clone(),
            exit_code: -1,
            duration: Duration::ZERO,
            success: false,
        });
    }

    async fn run_step(self, step: BuildStep) -> WorkerOutcome {
        let mode = AcquireMode::Blocking {
            timeout: self.settings.acquire_timeout,
            poll_interval: self.settings.poll_interval,
        };
        // Held until this function returns, on every path
        let _permit = match self.pool.acquire_permit(1, mode, &self.shutdown).await {
            Ok(permit) => permit,
            Err(PoolError::Cancelled) => {
                return WorkerOutcome::Cancelled("shutdown requested while waiting for a slot".into())
            }
            Err(e) => {
                warn!(step = step.index, acquire_status = e.acquire_status(), error = %e, "No pool slot");
                return self.publish_failure(&step, None, e.to_string());
            }
        };

        let required_mb = step
            .hints
            .memory_mb
            .filter(|m| *m > 0)
            .unwrap_or(self.settings.container_memory_mb);
        let wait = self
            .memory
            .wait_for_memory(required_mb, self.settings.memory_wait_timeout, &self.shutdown)
            .await;
        if self.shutdown.is_triggered() {
            return WorkerOutcome::Cancelled("shutdown requested before launch".into());
        }
        if !wait.available {
            warn!(
                step = step.index,
                required_mb,
                available_mb = wait.available_mb,
                "Launching without the requested free memory"
            );
        }

        self.progress.on_progress(&ProgressEvent::StepStarted {
            step: step.index,
            name: step.name.clone(),
        });

        let mut request = LaunchRequest::for_step(&step);
        if request.memory_limit_mb.is_none() && self.settings.container_memory_mb > 0 {
            request.memory_limit_mb = Some(self.settings.container_memory_mb);
        }
        let handle = match self.manager.launch(request).await {
            Ok(handle) => handle,
            Err(e) => return self.publish_failure(&step, None, format!("launch failed: {}", e)),
        };

        let executed = tokio::select! {
            out = self.manager.execute(&handle.id, &step.command) => Some(out),
            _ = self.shutdown.triggered() => None,
        };
        if let Err(e) = self.manager.cleanup(&handle.id).await {
            warn!(step = step.index, container = %handle.id, error = %e, "Container cleanup failed");
        }

        match executed {
            None => WorkerOutcome::Cancelled("shutdown requested while running".into()),
            Some(Err(e)) => {
                self.publish_failure(&step, Some(handle.id), format!("execution failed: {}", e))
            }
            Some(Ok(out)) => {
                let mut record = ResultRecord::new(&step.name, out.exit_code, out.duration);
                record.step_index = Some(step.index);
                record.container_id = Some(handle.id.clone());
                record.stdout = out.stdout;
                record.stderr = out.stderr;
                self.publish(record, Some(handle.id), None)
            }
        }
    }

    fn publish_failure(
        &self,
        step: &BuildStep,
        container_id: Option<String>,
        error: String,
    ) -> WorkerOutcome {
        let mut record = ResultRecord::new(&step.name, -1, Duration::ZERO);
        record.step_index = Some(step.index);
        record.container_id = container_id.clone();
        record.stderr = error.clone();
        self.publish(record, container_id, Some(error))
    }

    fn publish(
        &self,
        record: ResultRecord,
        container_id: Option<String>,
        error: Option<String>,
    ) -> WorkerOutcome {
        match self.publisher.publish(&record) {
            Ok(_) => WorkerOutcome::Published {
                container_id,
                error,
            },
            Err(e) => {
                warn!(suite = %record.suite_id, error = %e, "Could not publish result");
                WorkerOutcome::Unpublished {
                    container_id,
                    error: error.unwrap_or_else(|| format!("could not publish result: {}", e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{MockExec, MockRuntime};
    use crate::resources::FixedMemory;
    use crate::scheduler;
    use crate::termination::shutdown::{self, ShutdownTrigger};
    use tempfile::TempDir;

    struct Harness {
        runtime: Arc<MockRuntime>,
        pool: Arc<ResourcePool>,
        manager: Arc<ContainerManager>,
        executor: ParallelExecutor,
        trigger: ShutdownTrigger,
        project: TempDir,
        _artifacts: TempDir,
        _results: TempDir,
    }

    fn harness(capacity: usize) -> Harness {
        let runtime = Arc::new(MockRuntime::new());
        let artifacts = TempDir::new().unwrap();
        let results = TempDir::new().unwrap();
        let pool = Arc::new(ResourcePool::with_cpu_cores(Some(capacity), capacity));
        let memory = Arc::new(MemoryGate::new(
            Arc::new(FixedMemory::new(16 * 1024, 16 * 1024)),
            Duration::from_millis(5),
        ));
        let manager = Arc::new(ContainerManager::new(
            runtime.clone(),
            artifacts.path(),
            Duration::from_secs(1),
        ));
        let publisher = Arc::new(ResultPublisher::new(results.path()).unwrap());
        let poller = Arc::new(
            ResultPoller::new(results.path(), Duration::from_millis(5))
                .for_process(std::process::id()),
        );
        let (trigger, signal) = shutdown::channel();
        let settings = ExecutorSettings {
            poll_interval: Duration::from_millis(5),
            collect_timeout: Duration::from_secs(2),
            ..ExecutorSettings::default()
        };
        let executor = ParallelExecutor::new(
            pool.clone(),
            memory,
            manager.clone(),
            publisher,
            poller,
            signal,
            settings,
        );
        Harness {
            runtime,
            pool,
            manager,
            executor,
            trigger,
            project: TempDir::new().unwrap(),
            _artifacts: artifacts,
            _results: results,
        }
    }

    fn step(h: &Harness, index: usize, command: &str) -> BuildStep {
        BuildStep::new(index, format!("step{}", index), "alpine:3")
            .with_command(command)
            .with_project_root(h.project.path())
    }

    async fn run(h: &Harness, steps: &[BuildStep]) -> ExecutionReport {
        let plan = scheduler::plan(steps).unwrap();
        h.executor.run(steps, &plan).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_independent_steps_run_concurrently() {
        let h = harness(2);
        h.runtime
            .script("work-a", MockExec::exit(0).with_delay(Duration::from_millis(300)))
            .script("work-b", MockExec::exit(0).with_delay(Duration::from_millis(300)));
        let steps = vec![step(&h, 0, "work-a"), step(&h, 1, "work-b")];

        let started = Instant::now();
        let report = run(&h, &steps).await;
        let elapsed = started.elapsed();

        assert!(report.success, "{:?}", report);
        assert!(elapsed < Duration::from_millis(550), "took {:?}", elapsed);

        let execs = h.runtime.execs();
        assert_eq!(execs.len(), 2);
        assert!(execs[0].started < execs[1].finished && execs[1].started < execs[0].finished);
    }

    #[tokio::test]
    async fn test_dependent_step_waits_for_prerequisite() {
        let h = harness(2);
        h.runtime
            .script("build", MockExec::exit(0).with_delay(Duration::from_millis(50)));
        let steps = vec![step(&h, 0, "build"), step(&h, 1, "test").depends_on(0)];

        let report = run(&h, &steps).await;
        assert!(report.success);
        assert_eq!(report.step(0).unwrap().group, 0);
        assert_eq!(report.step(1).unwrap().group, 1);

        let execs = h.runtime.execs();
        let build = execs.iter().find(|e| e.command == "build").unwrap();
        let test = execs.iter().find(|e| e.command == "test").unwrap();
        assert!(test.started >= build.finished);
    }

    #[tokio::test]
    async fn test_failed_prerequisite_aborts_dependent() {
        let h = harness(2);
        h.runtime.script("build", MockExec::exit(1).with_stderr("boom"));
        let steps = vec![step(&h, 0, "build"), step(&h, 1, "test").depends_on(0)];

        let report = run(&h, &steps).await;
        let first = report.step(0).unwrap();
        assert_eq!(first.status, StepStatus::Failed);
        assert_eq!(first.exit_code, Some(1));
        assert!(first.container_id.is_some());

        let second = report.step(1).unwrap();
        assert_eq!(second.status, StepStatus::Aborted);
        assert_eq!(second.exit_code, None);
        assert_eq!(h.runtime.launched().len(), 1);

        assert!(!report.success);
        assert_eq!(report.exit_code(), EXIT_STEPS_FAILED);
    }

    #[tokio::test]
    async fn test_abort_propagates_transitively() {
        let h = harness(1);
        h.runtime.script("a", MockExec::exit(2));
        let steps = vec![
            step(&h, 0, "a"),
            step(&h, 1, "b").depends_on(0),
            step(&h, 2, "c").depends_on(1),
            step(&h, 3, "d"),
        ];
        let report = run(&h, &steps).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.aborted, 2);
        assert_eq!(report.succeeded, 1);
    }

    #[tokio::test]
    async fn test_single_slot_serializes_group() {
        let h = harness(1);
        for c in ["x", "y", "z"] {
            h.runtime
                .script(c, MockExec::exit(0).with_delay(Duration::from_millis(20)));
        }
        let steps = vec![step(&h, 0, "x"), step(&h, 1, "y"), step(&h, 2, "z")];
        let report = run(&h, &steps).await;
        assert!(report.success);

        let mut execs = h.runtime.execs();
        execs.sort_by_key(|e| e.started);
        for pair in execs.windows(2) {
            assert!(pair[1].started >= pair[0].finished);
        }
        assert_eq!(h.pool.status().available, 1);
    }

    #[tokio::test]
    async fn test_slots_released_and_containers_removed_after_failures() {
        let h = harness(2);
        h.runtime.missing_image("ghost:1");
        h.runtime.script("bad", MockExec::exit(3));
        let mut ghost = step(&h, 0, "ok");
        ghost.image = "ghost:1".into();
        let steps = vec![ghost, step(&h, 1, "bad"), step(&h, 2, "after").depends_on(0)];

        let report = run(&h, &steps).await;
        let launch_failed = report.step(0).unwrap();
        assert_eq!(launch_failed.status, StepStatus::Failed);
        assert!(launch_failed.error.as_deref().unwrap().contains("launch failed"));
        assert_eq!(report.step(1).unwrap().exit_code, Some(3));
        assert_eq!(report.step(2).unwrap().status, StepStatus::Aborted);

        let status = h.pool.status();
        assert_eq!(status.available, status.capacity);
        assert_eq!(h.runtime.live_count(), 0);
        assert!(h.manager.tracked_ids().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_run_aborts_everything() {
        let h = harness(2);
        h.trigger.trigger();
        let steps = vec![step(&h, 0, "a"), step(&h, 1, "b").depends_on(0)];

        let report = run(&h, &steps).await;
        assert_eq!(report.aborted, 2);
        assert!(report.interrupted);
        assert_eq!(report.exit_code(), EXIT_INTERRUPTED);
        assert!(h.runtime.launched().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_execution_aborts_running_step() {
        let h = harness(1);
        h.runtime
            .script("forever", MockExec::exit(0).with_delay(Duration::from_secs(30)));
        let steps = vec![step(&h, 0, "forever"), step(&h, 1, "next").depends_on(0)];

        let started = Instant::now();
        let (report, _) = tokio::join!(run(&h, &steps), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.trigger.trigger();
        });
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report.step(0).unwrap().status, StepStatus::Aborted);
        assert_eq!(report.step(1).unwrap().status, StepStatus::Aborted);
        assert_eq!(h.runtime.live_count(), 0);
        assert_eq!(h.pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn test_step_output_reaches_report_through_records() {
        let h = harness(1);
        h.runtime
            .script("cargo test", MockExec::exit(0).with_stdout("test result: ok"));
        let steps = vec![step(&h, 0, "cargo test")];
        let report = run(&h, &steps).await;

        let only = report.step(0).unwrap();
        assert_eq!(only.status, StepStatus::Succeeded);
        assert_eq!(only.exit_code, Some(0));
        assert!(only.duration.is_some());
        assert!(only.error.is_none());
    }

    #[tokio::test]
    async fn test_step_memory_hint_becomes_container_limit() {
        let h = harness(1);
        let hinted = step(&h, 0, "a").with_hints(crate::steps::ResourceHints {
            cpu_cores: Some(0.5),
            memory_mb: Some(1024),
        });
        let steps = vec![hinted, step(&h, 1, "b")];
        run(&h, &steps).await;

        let launched = h.runtime.launched();
        let by_step = |i: usize| {
            launched
                .iter()
                .find(|s| s.labels.get("suitey.step") == Some(&i.to_string()))
                .unwrap()
                .clone()
        };
        assert_eq!(by_step(0).memory_bytes, Some(1024 * 1024 * 1024));
        assert_eq!(by_step(0).nano_cpus, Some(500_000_000));
        assert_eq!(
            by_step(1).memory_bytes,
            Some((DEFAULT_FLOOR_MB * 1024 * 1024) as i64)
        );
    }
}
