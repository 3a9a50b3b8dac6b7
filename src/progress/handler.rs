//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while a run executes
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Plan computed, nothing launched yet
    Started { steps: usize, groups: usize },

    /// An execution group began
    GroupStarted {
        group: usize,
        total: usize,
        steps: Vec<usize>,
    },

    /// A pool slot was acquired and the container is being launched
    StepStarted { step: usize, name: String },

    /// The step's command ran to completion
    StepFinished {
        step: usize,
        name: String,
        exit_code: i64,
        duration: Duration,
        success: bool,
    },

    /// The step reached a terminal state without running its command
    StepAborted {
        step: usize,
        name: String,
        reason: String,
    },

    /// Every step in the group is terminal
    GroupComplete { group: usize, duration: Duration },

    /// The run finished
    Completed {
        succeeded: usize,
        failed: usize,
        aborted: usize,
        total_time: Duration,
    },
}

/// Trait for handling progress events during execution
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
