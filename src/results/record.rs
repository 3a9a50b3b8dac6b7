use crate::util::kv::{self, KvWriter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("line {line}: not a key=value pair")]
    Malformed { line: usize },

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {value:?}")]
    InvalidField { field: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Running,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Running => "running",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "passed" => Some(TestStatus::Passed),
            "failed" => Some(TestStatus::Failed),
            "running" => Some(TestStatus::Running),
            _ => None,
        }
    }

    pub fn from_exit_code(code: i64) -> Self {
        if code == 0 {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDetail {
    pub name: String,
    pub status: String,
}

/// Counts reported by a test runner, when one is known
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// The published outcome of one container execution; immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub suite_id: String,
    pub step_index: Option<usize>,
    pub container_id: Option<String>,
    pub status: TestStatus,
    pub exit_code: i64,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: Option<TestCounts>,
    pub test_details: Vec<TestDetail>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

fn field<'a>(map: &'a BTreeMap<String, String>, key: &'static str) -> Result<&'a str, RecordError> {
    map.get(key)
        .map(String::as_str)
        .ok_or(RecordError::MissingField(key))
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, RecordError> {
    value.trim().parse().map_err(|_| RecordError::InvalidField {
        field: key.to_string(),
        value: value.to_string(),
    })
}

fn optional_number<T: std::str::FromStr>(
    map: &BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, RecordError> {
    match map.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(v) => number(key, v).map(Some),
        None => Ok(None),
    }
}

impl ResultRecord {
    pub fn new(suite_id: impl Into<String>, exit_code: i64, duration: Duration) -> Self {
        Self {
            suite_id: suite_id.into(),
            step_index: None,
            container_id: None,
            status: TestStatus::from_exit_code(exit_code),
            exit_code,
            duration,
            stdout: String::new(),
            stderr: String::new(),
            finished_at: Some(Utc::now()),
            counts: None,
            test_details: Vec::new(),
        }
    }

    pub fn to_kv(&self) -> String {
        let mut w = KvWriter::new();
        w.field("suite_id", &self.suite_id)
            .optional("step_index", self.step_index)
            .optional("container_id", self.container_id.as_deref())
            .field("test_status", self.status.as_str())
            .field("exit_code", self.exit_code)
            .field("duration", format!("{:.3}", self.duration.as_secs_f64()))
            .optional("finished_at", self.finished_at.map(|t| t.to_rfc3339()));

        if let Some(c) = self.counts {
            w.field("total_tests", c.total)
                .field("passed_tests", c.passed)
                .field("failed_tests", c.failed)
                .field("skipped_tests", c.skipped);
        }
        if !self.test_details.is_empty() {
            w.field("test_details_count", self.test_details.len());
            for (i, detail) in self.test_details.iter().enumerate() {
                w.field(&format!("test_details_{}_name", i), &detail.name)
                    .field(&format!("test_details_{}_status", i), &detail.status);
            }
        }

        w.field("stdout", &self.stdout).field("stderr", &self.stderr);
        w.finish()
    }

    /// Parses a record; `fallback_suite_id` is used when the file omits it
    pub fn from_kv(text: &str, fallback_suite_id: &str) -> Result<Self, RecordError> {
        let map = kv::parse(text).map_err(|m| RecordError::Malformed {
            line: m.line_number,
        })?;

        let status_raw = field(&map, "test_status")?;
        let status = TestStatus::parse(status_raw).ok_or_else(|| RecordError::InvalidField {
            field: "test_status".to_string(),
            value: status_raw.to_string(),
        })?;
        let exit_code: i64 = number("exit_code", field(&map, "exit_code")?)?;

        let duration_raw = field(&map, "duration")?;
        let secs: f64 = number("duration", duration_raw)?;
        // Rejects negative, NaN and values past Duration::MAX
        let duration =
            Duration::try_from_secs_f64(secs).map_err(|_| RecordError::InvalidField {
                field: "duration".to_string(),
                value: duration_raw.to_string(),
            })?;

        let finished_at = match map.get("finished_at").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|_| RecordError::InvalidField {
                        field: "finished_at".to_string(),
                        value: raw.clone(),
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let counts = match optional_number::<u64>(&map, "total_tests")? {
            Some(total) => Some(TestCounts {
                total,
                passed: optional_number(&map, "passed_tests")?.unwrap_or(0),
                failed: optional_number(&map, "failed_tests")?.unwrap_or(0),
                skipped: optional_number(&map, "skipped_tests")?.unwrap_or(0),
            }),
            None => None,
        };

        let detail_count: usize = optional_number(&map, "test_details_count")?.unwrap_or(0);
        // Every detail takes two lines, so a larger count cannot be satisfied
        if detail_count > map.len() {
            return Err(RecordError::InvalidField {
                field: "test_details_count".to_string(),
                value: detail_count.to_string(),
            });
        }
        let mut test_details = Vec::with_capacity(detail_count);
        for i in 0..detail_count {
            let name = map.get(&format!("test_details_{}_name", i));
            let status = map.get(&format!("test_details_{}_status", i));
            if let (Some(name), Some(status)) = (name, status) {
                test_details.push(TestDetail {
                    name: name.clone(),
                    status: status.clone(),
                });
            }
        }

        Ok(Self {
            suite_id: map
                .get("suite_id")
                .filter(|s| !s.is_empty())
                .cloned()
                .unwrap_or_else(|| fallback_suite_id.to_string()),
            step_index: optional_number(&map, "step_index")?,
            container_id: map.get("container_id").filter(|s| !s.is_empty()).cloned(),
            status,
            exit_code,
            duration,
            stdout: map.get("stdout").cloned().unwrap_or_default(),
            stderr: map.get("stderr").cloned().unwrap_or_default(),
            finished_at,
            counts,
            test_details,
        })
    }
}
