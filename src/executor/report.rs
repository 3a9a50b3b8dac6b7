//! Final per-step accounting of a run

use super::state::StepStatus;
use crate::util::kv::KvWriter;
use serde::Serialize;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_STEPS_FAILED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub name: String,
    pub group: usize,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    /// Seconds the command ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    pub fn pending(index: usize, name: impl Into<String>, group: usize) -> Self {
        Self {
            index,
            name: name.into(),
            group,
            status: StepStatus::Pending,
            exit_code: None,
            duration: None,
            container_id: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub interrupted: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted: usize,
    /// Wall-clock seconds for the whole run
    pub duration: f64,
    pub steps: Vec<StepReport>,
}

impl ExecutionReport {
    pub fn new(steps: Vec<StepReport>, interrupted: bool, duration: f64) -> Self {
        let count = |s: StepStatus| steps.iter().filter(|r| r.status == s).count();
        let succeeded = count(StepStatus::Succeeded);
        let failed = count(StepStatus::Failed);
        let aborted = count(StepStatus::Aborted);
        Self {
            success: !interrupted && succeeded == steps.len(),
            interrupted,
            succeeded,
            failed,
            aborted,
            duration,
            steps,
        }
    }

    pub fn step(&self, index: usize) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.index == index)
    }

    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.success {
            EXIT_SUCCESS
        } else {
            EXIT_STEPS_FAILED
        }
    }

    pub fn to_kv(&self) -> String {
        let mut w = KvWriter::new();
        w.field(
            "execution_status",
            if self.success { "success" } else { "failure" },
        )
        .field("interrupted", self.interrupted)
        .field("steps_count", self.steps.len())
        .field("steps_succeeded", self.succeeded)
        .field("steps_failed", self.failed)
        .field("steps_aborted", self.aborted)
        .field("duration", format!("{:.3}", self.duration));
        for (i, step) in self.steps.iter().enumerate() {
            let key = |f: &str| format!("steps_{}_{}", i, f);
            w.field(&key("index"), step.index)
                .field(&key("name"), &step.name)
                .field(&key("status"), step.status.as_str())
                .optional(&key("exit_code"), step.exit_code)
                .optional(&key("duration"), step.duration.map(|d| format!("{:.3}", d)))
                .optional(&key("container_id"), step.container_id.as_deref())
                .optional(&key("error"), step.error.as_deref());
        }
        w.finish()
    }
}
