//! Run-level errors
//!
//! Every variant here aborts a run before or instead of producing an
//! [`ExecutionReport`](crate::executor::ExecutionReport). Step-level failures
//! never surface as a `SuiteyError`; they end up in the report.

use crate::config::ConfigError;
use crate::container::ContainerError;
use crate::executor::EXIT_FATAL;
use crate::results::RecordError;
use crate::scheduler::SchedulerError;
use crate::steps::StepParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SuiteyError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid build steps: {0}")]
    Steps(#[from] StepParseError),

    #[error("cannot schedule build steps: {0}")]
    Schedule(#[from] SchedulerError),

    #[error("container runtime unavailable: {0}")]
    Runtime(#[from] ContainerError),

    #[error("result directory unusable: {0}")]
    Results(#[from] RecordError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SuiteyError {
    /// Process exit code; all of these are fatal orchestration errors
    pub fn exit_code(&self) -> i32 {
        EXIT_FATAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_component_errors() {
        let err: SuiteyError = SchedulerError::SelfDependency(3).into();
        assert!(err.to_string().starts_with("cannot schedule build steps"));
        assert_eq!(err.exit_code(), 2);

        let err: SuiteyError = StepParseError::MissingField("build_steps_count".into()).into();
        assert!(err.to_string().contains("build_steps_count"));
    }
}
