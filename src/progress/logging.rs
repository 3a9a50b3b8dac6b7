//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { steps, groups } => {
                info!(steps, groups, "Starting execution");
            }
            ProgressEvent::GroupStarted {
                group,
                total,
                steps,
            } => {
                info!(
                    group,
                    progress = format!("{}/{}", group + 1, total),
                    steps = ?steps,
                    "Starting group"
                );
            }
            ProgressEvent::StepStarted { step, name } => {
                debug!(step, name = %name, "Step started");
            }
            ProgressEvent::StepFinished {
                step,
                name,
                exit_code,
                duration,
                success,
            } => {
                if *success {
                    info!(
                        step,
                        name = %name,
                        duration_ms = duration.as_millis(),
                        "Step succeeded"
                    );
                } else {
                    warn!(
                        step,
                        name = %name,
                        exit_code,
                        duration_ms = duration.as_millis(),
                        "Step failed"
                    );
                }
            }
            ProgressEvent::StepAborted { step, name, reason } => {
                warn!(step, name = %name, reason = %reason, "Step aborted");
            }
            ProgressEvent::GroupComplete { group, duration } => {
                debug!(group, duration_ms = duration.as_millis(), "Group complete");
            }
            ProgressEvent::Completed {
                succeeded,
                failed,
                aborted,
                total_time,
            } => {
                if *failed + *aborted > 0 {
                    warn!(
                        succeeded,
                        failed,
                        aborted,
                        total_time_ms = total_time.as_millis(),
                        "Execution finished with failures"
                    );
                } else {
                    info!(
                        succeeded,
                        total_time_ms = total_time.as_millis(),
                        "Execution complete"
                    );
                }
            }
        }
    }
}
