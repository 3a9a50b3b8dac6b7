//! Container lifecycle management
//!
//! [`ContainerRuntime`] is the engine seam: [`DockerRuntime`] talks to a
//! local Docker (or Podman) daemon via bollard, [`MockRuntime`] keeps
//! everything in memory. [`ContainerManager`] owns the handles.

mod docker;
mod manager;
mod mock;
mod runtime;

pub use docker::DockerRuntime;
pub use manager::{
    sanitize_name, CleanupOutcome, CleanupSummary, ContainerHandle, ContainerManager,
    ContainerStatus, ExecutionOutput, LaunchRequest, TrackStatus,
};
pub use mock::{ExecRecord, MockExec, MockRuntime};
pub use runtime::{
    BindMount, ContainerError, ContainerRuntime, ContainerSpec, ExecOutput, RuntimeState,
};
