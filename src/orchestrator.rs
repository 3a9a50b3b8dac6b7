//! Wires every component together once per run
//!
//! Validation and planning happen before anything is created on disk or in
//! the container runtime, so configuration errors never leave containers
//! behind.

use crate::config::SuiteyConfig;
use crate::container::{ContainerManager, ContainerRuntime};
use crate::error::SuiteyError;
use crate::executor::{ExecutionReport, ExecutorSettings, ParallelExecutor};
use crate::progress::{LoggingHandler, ProgressHandler};
use crate::resources::{
    detect_cpu_cores, effective_concurrency, MemoryBudget, MemoryGate, MemoryProbe, ResourcePool,
    SystemMemory,
};
use crate::results::{CleanupGuard, ResultPoller, ResultPublisher};
use crate::scheduler::{self, ExecutionPlan};
use crate::steps::{self, BuildStep};
use crate::termination::TerminationController;
use crate::util::kv::KvWriter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Extra time the graceful cleanup gets on top of the container stop timeout
const GRACEFUL_MARGIN: Duration = Duration::from_secs(5);

/// Admission limits derived from CPU count, memory and configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSummary {
    pub cpu_cores: usize,
    pub cpu_limit: usize,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub memory_headroom: f64,
    pub per_container_memory_mb: u64,
    pub concurrency: usize,
}

impl ResourceSummary {
    pub fn to_kv(&self) -> String {
        let mut w = KvWriter::new();
        w.field("cpu_cores", self.cpu_cores)
            .field("cpu_limit", self.cpu_limit)
            .field("total_memory_mb", self.total_memory_mb)
            .field("available_memory_mb", self.available_memory_mb)
            .field("memory_headroom", self.memory_headroom)
            .field("per_container_memory_mb", self.per_container_memory_mb)
            .field("capacity", self.concurrency);
        w.finish()
    }
}

pub struct Orchestrator {
    config: SuiteyConfig,
    runtime: Arc<dyn ContainerRuntime>,
    memory: Arc<dyn MemoryProbe>,
    cpu_cores: usize,
    progress: Arc<dyn ProgressHandler>,
    handle_signals: bool,
}

impl Orchestrator {
    pub fn new(config: SuiteyConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime,
            memory: Arc::new(SystemMemory::new()),
            cpu_cores: detect_cpu_cores(),
            progress: Arc::new(LoggingHandler),
            handle_signals: false,
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = probe;
        self
    }

    pub fn with_cpu_cores(mut self, cores: usize) -> Self {
        self.cpu_cores = cores.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// Installs a Ctrl-C listener for the duration of [`Run::execute`]
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn config(&self) -> &SuiteyConfig {
        &self.config
    }

    /// Validates the steps and computes the execution plan
    pub fn prepare(&self, steps: &[BuildStep]) -> Result<ExecutionPlan, SuiteyError> {
        self.config.validate()?;
        steps::validate(steps)?;
        Ok(scheduler::plan(steps)?)
    }

    pub fn resources(&self) -> ResourceSummary {
        let cpu_limit = self
            .config
            .max_parallel
            .unwrap_or(self.cpu_cores)
            .min(self.cpu_cores)
            .max(1);
        let total = self.memory.total_mb();
        let available = self.memory.available_mb();
        let budget = MemoryBudget::new(
            total,
            self.config.memory_headroom,
            cpu_limit,
            self.config.min_container_memory_mb,
        );
        let per_container = budget.resolve(self.config.container_memory_mb);
        ResourceSummary {
            cpu_cores: self.cpu_cores,
            cpu_limit,
            total_memory_mb: total,
            available_memory_mb: available,
            memory_headroom: budget.headroom,
            per_container_memory_mb: per_container,
            concurrency: effective_concurrency(
                cpu_limit,
                available,
                budget.headroom,
                per_container,
            ),
        }
    }

    /// Builds the per-run components; nothing executes until [`Run::execute`]
    pub fn start(&self, steps: &[BuildStep]) -> Result<Run, SuiteyError> {
        let plan = self.prepare(steps)?;
        let resources = self.resources();
        info!(
            steps = steps.len(),
            groups = plan.groups.len(),
            capacity = resources.concurrency,
            per_container_mb = resources.per_container_memory_mb,
            "Run prepared"
        );

        std::fs::create_dir_all(&self.config.artifact_dir)?;
        let publisher = Arc::new(ResultPublisher::new(&self.config.temp_dir)?);
        let cleanup = publisher.guard();
        let poller = Arc::new(
            ResultPoller::new(&self.config.temp_dir, self.config.poll_interval())
                .for_process(std::process::id()),
        );

        let pool = Arc::new(ResourcePool::with_cpu_cores(
            Some(resources.concurrency),
            self.cpu_cores,
        ));
        let memory = Arc::new(MemoryGate::new(
            Arc::clone(&self.memory),
            self.config.poll_interval(),
        ));
        let manager = Arc::new(ContainerManager::new(
            Arc::clone(&self.runtime),
            &self.config.artifact_dir,
            self.config.stop_timeout(),
        ));
        let controller = Arc::new(
            TerminationController::new(
                Arc::clone(&manager),
                self.config.stop_timeout() + GRACEFUL_MARGIN,
            )
            .with_publisher(Arc::clone(&publisher)),
        );

        let settings = ExecutorSettings {
            acquire_timeout: self.config.acquire_timeout(),
            memory_wait_timeout: self.config.memory_wait_timeout(),
            poll_interval: self.config.poll_interval(),
            collect_timeout: self.config.poll_interval() * 50,
            container_memory_mb: resources.per_container_memory_mb,
        };
        let executor = ParallelExecutor::new(
            pool,
            memory,
            manager,
            publisher,
            poller,
            controller.signal(),
            settings,
        )
        .with_progress(Arc::clone(&self.progress));

        Ok(Run {
            steps: steps.to_vec(),
            plan,
            executor,
            controller,
            handle_signals: self.handle_signals,
            _cleanup: cleanup,
        })
    }

    /// Validates, plans and executes; cleanup runs on every path
    pub async fn run(&self, steps: &[BuildStep]) -> Result<ExecutionReport, SuiteyError> {
        Ok(self.start(steps)?.execute().await)
    }
}

/// One prepared run. Dropping it without executing still removes its temp files.
pub struct Run {
    steps: Vec<BuildStep>,
    plan: ExecutionPlan,
    executor: ParallelExecutor,
    controller: Arc<TerminationController>,
    handle_signals: bool,
    _cleanup: CleanupGuard,
}

impl Run {
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn controller(&self) -> Arc<TerminationController> {
        Arc::clone(&self.controller)
    }

    pub async fn execute(self) -> ExecutionReport {
        let listener = self
            .handle_signals
            .then(|| self.controller.spawn_signal_listener());

        let report = self.executor.run(&self.steps, &self.plan).await;

        if let Some(listener) = listener {
            listener.abort();
        }
        let cleanup = self.controller.finish().await;
        if cleanup.failed > 0 {
            warn!(failed = ?cleanup.failed_ids, "Some containers could not be removed");
        }
        report
    }
}
