//! suitey - dependency-aware build and test execution in ephemeral containers
//!
//! An external planner hands suitey a list of build steps. Each step names a
//! container image, a command, a project root and the steps it depends on.
//! suitey orders the steps into parallel groups, launches one container per
//! step within CPU and memory limits, collects every outcome through result
//! files on disk and reports back.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use suitey::{BuildStep, DockerRuntime, Orchestrator, SuiteyConfig};
//!
//! # async fn run() -> Result<(), suitey::SuiteyError> {
//! let steps = vec![
//!     BuildStep::new(0, "build", "rust:1.75")
//!         .with_command("cargo build")
//!         .with_project_root("/src/project"),
//!     BuildStep::new(1, "test", "rust:1.75")
//!         .with_command("cargo test")
//!         .with_project_root("/src/project")
//!         .depends_on(0),
//! ];
//!
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let report = Orchestrator::new(SuiteyConfig::default(), runtime)
//!     .run(&steps)
//!     .await?;
//! std::process::exit(report.exit_code());
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`steps`]: build step model and the `build_steps_*` document parser
//! - [`scheduler`]: dependency validation and parallel grouping
//! - [`resources`]: CPU slot pool and memory admission
//! - [`container`]: container runtime abstraction and lifecycle tracking
//! - [`results`]: atomic result files and the poller that reads them
//! - [`executor`]: group-by-group parallel execution
//! - [`termination`]: two-stage interrupt handling
//! - [`orchestrator`]: wires everything together for one run

pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod progress;
pub mod resources;
pub mod results;
pub mod scheduler;
pub mod steps;
pub mod termination;
pub mod util;

pub use config::{ConfigError, SuiteyConfig};
pub use container::{ContainerManager, ContainerRuntime, DockerRuntime, MockRuntime};
pub use error::SuiteyError;
pub use executor::{ExecutionReport, ParallelExecutor, StepReport, StepStatus};
pub use orchestrator::{Orchestrator, ResourceSummary, Run};
pub use progress::{LoggingHandler, NoOpHandler, ProgressEvent, ProgressHandler};
pub use resources::{MemoryGate, ResourcePool};
pub use results::{ResultPoller, ResultPublisher, ResultRecord};
pub use scheduler::{plan, ExecutionPlan, SchedulerError};
pub use steps::{parse_steps, BuildStep, StepParseError};
pub use termination::{ShutdownSignal, TerminationController};
pub use util::{init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
