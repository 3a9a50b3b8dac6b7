//! Build steps as produced by an external planner
//!
//! A [`BuildStep`] is read-only to the execution engine. Steps arrive as a
//! flat `key=value` document (see [`parser`]) and are validated before any
//! resource is acquired.

pub mod parser;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

pub use parser::{parse_steps, StepParseError};

/// Container path the project root is mounted at, read-only
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Container path the per-container artifact directory is mounted at
pub const ARTIFACT_MOUNT: &str = "/artifacts";

/// Host paths exposed to a step's container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Mounted read-only at [`WORKSPACE_MOUNT`]
    pub project_root: PathBuf,
}

/// Optional per-step overrides for the resource budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceHints {
    pub cpu_cores: Option<f64>,
    pub memory_mb: Option<u64>,
}

/// Docker `NanoCpus` for a CPU quota, or `None` if it does not fit an `i64`
pub fn cpu_quota_nanos(cores: f64) -> Option<i64> {
    let nanos = cores * 1_000_000_000.0;
    (nanos.is_finite() && nanos >= 0.0 && nanos < i64::MAX as f64).then(|| nanos as i64)
}

/// Memory limit in bytes, or `None` if it does not fit an `i64`
pub fn memory_limit_bytes(mb: u64) -> Option<i64> {
    mb.checked_mul(1024 * 1024)
        .and_then(|bytes| i64::try_from(bytes).ok())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStep {
    pub index: usize,
    pub name: String,
    pub image: String,
    pub command: String,
    pub working_directory: Option<String>,
    pub mounts: MountConfig,
    pub dependencies: BTreeSet<usize>,
    #[serde(default)]
    pub hints: ResourceHints,
}

impl BuildStep {
    pub fn new(index: usize, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            image: image.into(),
            command: String::new(),
            working_directory: None,
            mounts: MountConfig {
                project_root: PathBuf::from("."),
            },
            dependencies: BTreeSet::new(),
            hints: ResourceHints::default(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mounts.project_root = root.into();
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn depends_on(mut self, index: usize) -> Self {
        self.dependencies.insert(index);
        self
    }

    pub fn with_hints(mut self, hints: ResourceHints) -> Self {
        self.hints = hints;
        self
    }

    /// Working directory inside the container; defaults to the workspace mount
    pub fn container_workdir(&self) -> String {
        match self.working_directory.as_deref() {
            None | Some("") => WORKSPACE_MOUNT.to_string(),
            Some(dir) if dir.starts_with('/') => dir.to_string(),
            Some(dir) => format!("{}/{}", WORKSPACE_MOUNT, dir.trim_start_matches("./")),
        }
    }
}

/// Checks every step for fields the runtime cannot do without
///
/// Runs before any container is launched or any pool slot is taken.
pub fn validate(steps: &[BuildStep]) -> Result<(), StepParseError> {
    for step in steps {
        if step.image.trim().is_empty() {
            return Err(StepParseError::EmptyField {
                index: step.index,
                name: step.name.clone(),
                field: "docker_image",
            });
        }
        if step.command.trim().is_empty() {
            return Err(StepParseError::EmptyField {
                index: step.index,
                name: step.name.clone(),
                field: "build_command",
            });
        }
        if !step.mounts.project_root.is_dir() {
            return Err(StepParseError::ProjectRootMissing {
                index: step.index,
                name: step.name.clone(),
                path: step.mounts.project_root.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_container_workdir_defaults_to_workspace() {
        let step = BuildStep::new(0, "build", "rust:1.80");
        assert_eq!(step.container_workdir(), "/workspace");
    }

    #[test]
    fn test_container_workdir_relative_and_absolute() {
        let rel = BuildStep::new(0, "build", "rust").with_working_directory("./crates/core");
        assert_eq!(rel.container_workdir(), "/workspace/crates/core");

        let abs = BuildStep::new(0, "build", "rust").with_working_directory("/src");
        assert_eq!(abs.container_workdir(), "/src");
    }

    #[test]
    fn test_builder_collapses_duplicate_dependencies() {
        let step = BuildStep::new(2, "test", "rust").depends_on(0).depends_on(1).depends_on(0);
        assert_eq!(step.dependencies.into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_limit_conversions() {
        assert_eq!(cpu_quota_nanos(1.5), Some(1_500_000_000));
        assert_eq!(cpu_quota_nanos(1e10), None);
        assert_eq!(cpu_quota_nanos(f64::INFINITY), None);
        assert_eq!(cpu_quota_nanos(-1.0), None);
        assert_eq!(memory_limit_bytes(512), Some(512 * 1024 * 1024));
        assert_eq!(memory_limit_bytes(u64::MAX / 2), None);
        assert_eq!(memory_limit_bytes((i64::MAX as u64) >> 20), Some(((i64::MAX as u64) >> 20 << 20) as i64));
        assert_eq!(memory_limit_bytes(((i64::MAX as u64) >> 20) + 1), None);
    }

    #[test]
    fn test_validate_accepts_existing_root() {
        let dir = TempDir::new().unwrap();
        let steps = vec![BuildStep::new(0, "build", "rust")
            .with_command("cargo build")
            .with_project_root(dir.path())];
        assert!(validate(&steps).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_root() {
        let steps = vec![BuildStep::new(0, "build", "rust")
            .with_command("cargo build")
            .with_project_root("/definitely/not/here")];
        assert!(matches!(
            validate(&steps),
            Err(StepParseError::ProjectRootMissing { index: 0, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_blank_image_and_command() {
        let dir = TempDir::new().unwrap();
        let no_image = vec![BuildStep::new(0, "build", " ")
            .with_command("make")
            .with_project_root(dir.path())];
        assert!(matches!(
            validate(&no_image),
            Err(StepParseError::EmptyField { field: "docker_image", .. })
        ));

        let no_command = vec![BuildStep::new(0, "build", "gcc").with_project_root(dir.path())];
        assert!(matches!(
            validate(&no_command),
            Err(StepParseError::EmptyField { field: "build_command", .. })
        ));
    }
}
