//! Reader for the `build_steps_*` key=value document

use super::{cpu_quota_nanos, memory_limit_bytes, BuildStep, MountConfig, ResourceHints};
use crate::util::kv;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StepParseError {
    #[error("line {line}: expected key=value, found {content:?}")]
    Malformed { line: usize, content: String },

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid value for '{field}': {value:?}")]
    InvalidValue { field: String, value: String },

    #[error("step {index} ({name}): project root does not exist: {path}")]
    ProjectRootMissing {
        index: usize,
        name: String,
        path: PathBuf,
    },

    #[error("step {index} ({name}): {field} must not be empty")]
    EmptyField {
        index: usize,
        name: String,
        field: &'static str,
    },
}

fn required<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str, StepParseError> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| StepParseError::MissingField(key.to_string()))
}

fn optional<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    map.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, StepParseError> {
    value.trim().parse::<T>().map_err(|_| StepParseError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_dependencies(field: &str, value: &str) -> Result<BTreeSet<usize>, StepParseError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| parse_number::<usize>(field, token))
        .collect()
}

/// Parses the flat build step document into typed steps, in index order
///
/// Only structural problems are reported here. Filesystem checks happen in
/// [`super::validate`], and dependency-graph checks in the scheduler.
pub fn parse_steps(text: &str) -> Result<Vec<BuildStep>, StepParseError> {
    let map = kv::parse(text).map_err(|m| StepParseError::Malformed {
        line: m.line_number,
        content: m.content,
    })?;

    let count: usize = parse_number("build_steps_count", required(&map, "build_steps_count")?)?;
    // Each step needs several lines, so the document bounds the real count
    let mut steps = Vec::with_capacity(count.min(map.len()));

    for index in 0..count {
        let key = |suffix: &str| format!("build_steps_{}_{}", index, suffix);

        let name = required(&map, &key("step_name"))?.trim().to_string();
        let image = required(&map, &key("docker_image"))?.trim().to_string();
        let command = required(&map, &key("build_command"))?.to_string();
        let project_root = PathBuf::from(required(&map, &key("project_root"))?.trim());
        let working_directory = optional(&map, &key("working_directory")).map(str::to_string);

        let deps_key = key("dependencies");
        let dependencies = match optional(&map, &deps_key) {
            Some(raw) => parse_dependencies(&deps_key, raw)?,
            None => BTreeSet::new(),
        };

        let cpu_key = key("cpu_cores");
        let cpu_cores = optional(&map, &cpu_key)
            .map(|v| parse_number::<f64>(&cpu_key, v))
            .transpose()?;
        if cpu_cores.is_some_and(|c| cpu_quota_nanos(c).is_none()) {
            let value = map.get(&cpu_key).cloned().unwrap_or_default();
            return Err(StepParseError::InvalidValue {
                field: cpu_key,
                value,
            });
        }

        let mem_key = key("memory_mb");
        let memory_mb = optional(&map, &mem_key)
            .map(|v| parse_number::<u64>(&mem_key, v))
            .transpose()?;
        if memory_mb.is_some_and(|m| memory_limit_bytes(m).is_none()) {
            let value = map.get(&mem_key).cloned().unwrap_or_default();
            return Err(StepParseError::InvalidValue {
                field: mem_key,
                value,
            });
        }

        steps.push(BuildStep {
            index,
            name,
            image,
            command,
            working_directory,
            mounts: MountConfig { project_root },
            dependencies,
            hints: ResourceHints {
                cpu_cores,
                memory_mb,
            },
        });
    }

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    const TWO_STEPS: &str = "\
build_steps_count=2
build_steps_0_step_name=compile
build_steps_0_docker_image=rust:1.80
build_steps_0_build_command=cargo build
build_steps_0_working_directory=
build_steps_0_project_root=/tmp/project
build_steps_0_dependencies=
build_steps_1_step_name=unit tests
build_steps_1_docker_image=rust:1.80
build_steps_1_build_command=cargo test
build_steps_1_project_root=/tmp/project
build_steps_1_dependencies=0
build_steps_1_cpu_cores=1.5
build_steps_1_memory_mb=2048
";

    #[test]
    fn test_parse_two_steps() {
        let steps = parse_steps(TWO_STEPS).unwrap();
        assert_eq!(steps.len(), 2);

        assert_eq!(steps[0].name, "compile");
        assert_eq!(steps[0].working_directory, None);
        assert!(steps[0].dependencies.is_empty());

        assert_eq!(steps[1].index, 1);
        assert_eq!(steps[1].command, "cargo test");
        assert_eq!(steps[1].dependencies.iter().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(steps[1].hints.cpu_cores, Some(1.5));
        assert_eq!(steps[1].hints.memory_mb, Some(2048));
    }

    #[test]
    fn test_missing_count_is_reported() {
        let err = parse_steps("build_steps_0_step_name=x\n").unwrap_err();
        assert_eq!(err, StepParseError::MissingField("build_steps_count".into()));
    }

    #[test]
    fn test_missing_image_is_reported() {
        let text = TWO_STEPS.replace("build_steps_1_docker_image=rust:1.80\n", "");
        let err = parse_steps(&text).unwrap_err();
        assert_eq!(
            err,
            StepParseError::MissingField("build_steps_1_docker_image".into())
        );
    }

    #[test]
    fn test_bad_dependency_token() {
        let text = TWO_STEPS.replace("build_steps_1_dependencies=0", "build_steps_1_dependencies=0,x");
        assert!(matches!(
            parse_steps(&text),
            Err(StepParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_dependency_list_tolerates_spaces_and_duplicates() {
        let text = TWO_STEPS.replace("build_steps_1_dependencies=0", "build_steps_1_dependencies= 0, 0 ,");
        let steps = parse_steps(&text).unwrap();
        assert_eq!(steps[1].dependencies.len(), 1);
    }

    #[test]
    fn test_negative_cpu_rejected() {
        let text = TWO_STEPS.replace("cpu_cores=1.5", "cpu_cores=-2");
        assert!(matches!(
            parse_steps(&text),
            Err(StepParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_huge_count_reports_missing_step() {
        let err = parse_steps("build_steps_count=18446744073709551615\n").unwrap_err();
        assert_eq!(
            err,
            StepParseError::MissingField("build_steps_0_step_name".into())
        );
    }

    #[test]
    fn test_count_past_listed_steps_reports_first_gap() {
        let text = TWO_STEPS.replace("build_steps_count=2", "build_steps_count=1000000000");
        let err = parse_steps(&text).unwrap_err();
        assert_eq!(
            err,
            StepParseError::MissingField("build_steps_2_step_name".into())
        );
    }

    #[parameterized(
        count_overflow = { "build_steps_count=2", "build_steps_count=18446744073709551616", "build_steps_count" },
        negative_count = { "build_steps_count=2", "build_steps_count=-1", "build_steps_count" },
        nan_cpu = { "cpu_cores=1.5", "cpu_cores=NaN", "build_steps_1_cpu_cores" },
        infinite_cpu = { "cpu_cores=1.5", "cpu_cores=inf", "build_steps_1_cpu_cores" },
        negative_cpu = { "cpu_cores=1.5", "cpu_cores=-2", "build_steps_1_cpu_cores" },
        cpu_past_quota = { "cpu_cores=1.5", "cpu_cores=1e300", "build_steps_1_cpu_cores" },
        memory_past_bytes = { "memory_mb=2048", "memory_mb=9223372036854775807", "build_steps_1_memory_mb" },
        memory_overflow = { "memory_mb=2048", "memory_mb=18446744073709551616", "build_steps_1_memory_mb" },
        negative_memory = { "memory_mb=2048", "memory_mb=-512", "build_steps_1_memory_mb" },
        dependency_overflow = { "build_steps_1_dependencies=0", "build_steps_1_dependencies=18446744073709551616", "build_steps_1_dependencies" },
    )]
    fn test_out_of_range_numbers_rejected(from: &str, to: &str, expected_field: &str) {
        let text = TWO_STEPS.replace(from, to);
        match parse_steps(&text) {
            Err(StepParseError::InvalidValue { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected InvalidValue for {expected_field}, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_line() {
        let err = parse_steps("build_steps_count=0\ngarbage\n").unwrap_err();
        assert!(matches!(err, StepParseError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_zero_steps() {
        assert!(parse_steps("build_steps_count=0\n").unwrap().is_empty());
    }
}
