//! Output formatting for reports, plans and resource summaries
//!
//! JSON for machines, flat key=value for shell pipelines, and
//! human-readable text for terminals.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::executor::{ExecutionReport, StepStatus};
use crate::orchestrator::ResourceSummary;
use crate::scheduler::ExecutionPlan;
use crate::steps::BuildStep;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// Flat key=value lines
    Kv,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn json<T: Serialize>(value: &T, what: &str) -> Result<String> {
        serde_json::to_string_pretty(value)
            .with_context(|| format!("Failed to serialize {} to JSON", what))
    }

    pub fn format_report(&self, report: &ExecutionReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => Self::json(report, "execution report"),
            OutputFormat::Kv => Ok(report.to_kv()),
            OutputFormat::Human => Ok(self.format_report_human(report)),
        }
    }

    pub fn format_plan(&self, plan: &ExecutionPlan, steps: &[BuildStep]) -> Result<String> {
        match self.format {
            OutputFormat::Json => Self::json(plan, "execution plan"),
            OutputFormat::Kv => Ok(plan.to_kv()),
            OutputFormat::Human => Ok(self.format_plan_human(plan, steps)),
        }
    }

    pub fn format_resources(&self, summary: &ResourceSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => Self::json(summary, "resource summary"),
            OutputFormat::Kv => Ok(summary.to_kv()),
            OutputFormat::Human => Ok(self.format_resources_human(summary)),
        }
    }

    fn format_report_human(&self, report: &ExecutionReport) -> String {
        let mut output = String::new();

        if report.success {
            output.push_str("\u{2713} Execution Report\n");
        } else if report.interrupted {
            output.push_str("\u{26A0} Execution Report (Interrupted)\n");
        } else {
            output.push_str("\u{2717} Execution Report\n");
        }
        output.push_str(RULE);
        output.push_str("\n\n");

        let mut current_group = None;
        for step in &report.steps {
            if current_group != Some(step.group) {
                output.push_str(&format!("Group {}:\n", step.group));
                current_group = Some(step.group);
            }
            let symbol = match step.status {
                StepStatus::Succeeded => "\u{2713}",
                StepStatus::Failed => "\u{2717}",
                StepStatus::Aborted => "\u{2298}",
                StepStatus::Pending | StepStatus::Running => "?",
            };
            output.push_str(&format!(
                "  {} [{}] {} ({})",
                symbol,
                step.index,
                step.name,
                step.status.as_str()
            ));
            if let Some(code) = step.exit_code {
                output.push_str(&format!(", exit {}", code));
            }
            if let Some(secs) = step.duration {
                output.push_str(&format!(", {:.2}s", secs));
            }
            output.push('\n');
            if let Some(ref err) = step.error {
                output.push_str(&format!("      {}\n", err));
            }
        }

        output.push_str(&format!(
            "\nSucceeded: {}  Failed: {}  Aborted: {}  Time: {:.2}s\n",
            report.succeeded, report.failed, report.aborted, report.duration
        ));
        output
    }

    fn format_plan_human(&self, plan: &ExecutionPlan, steps: &[BuildStep]) -> String {
        let mut output = String::new();
        output.push_str("Execution Plan\n");
        output.push_str(RULE);
        output.push_str("\n\n");

        for (i, group) in plan.groups.iter().enumerate() {
            output.push_str(&format!("Group {}:\n", i));
            for (j, idx) in group.steps.iter().enumerate() {
                let connector = if j + 1 == group.steps.len() {
                    "\u{2514}\u{2500}"
                } else {
                    "\u{251C}\u{2500}"
                };
                let name = steps
                    .get(*idx)
                    .map(|s| s.name.as_str())
                    .unwrap_or("(unknown)");
                output.push_str(&format!("{} [{}] {}\n", connector, idx, name));
            }
        }
        output
    }

    fn format_resources_human(&self, summary: &ResourceSummary) -> String {
        let mut output = String::new();
        output.push_str("Resource Limits\n");
        output.push_str(RULE);
        output.push_str("\n\n");
        output.push_str(&format!("CPU Cores:            {}\n", summary.cpu_cores));
        output.push_str(&format!("CPU Limit:            {}\n", summary.cpu_limit));
        output.push_str(&format!(
            "Memory:               {} MB available of {} MB\n",
            summary.available_memory_mb, summary.total_memory_mb
        ));
        output.push_str(&format!(
            "Headroom:             {:.0}%\n",
            summary.memory_headroom * 100.0
        ));
        output.push_str(&format!(
            "Per Container:        {} MB\n",
            summary.per_container_memory_mb
        ));
        output.push_str(&format!("Concurrent Steps:     {}\n", summary.concurrency));
        output
    }
}
