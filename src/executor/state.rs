use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step {step}: invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    pub step: usize,
    pub from: &'static str,
    pub to: &'static str,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Aborted
        )
    }

    /// Failed or aborted; dependents of such a step are aborted
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::Aborted)
    }

    fn allowed_transitions(&self) -> &'static [StepStatus] {
        match self {
            StepStatus::Pending => &[StepStatus::Running, StepStatus::Aborted],
            StepStatus::Running => &[
                StepStatus::Succeeded,
                StepStatus::Failed,
                StepStatus::Aborted,
            ],
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Aborted => &[],
        }
    }

    pub fn can_transition(&self, to: StepStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

/// Statuses of every step in a run, with validated transitions
#[derive(Debug, Clone)]
pub struct StepStates {
    states: Vec<StepStatus>,
}

impl StepStates {
    pub fn new(count: usize) -> Self {
        Self {
            states: vec![StepStatus::Pending; count],
        }
    }

    pub fn get(&self, step: usize) -> Option<StepStatus> {
        self.states.get(step).copied()
    }

    pub fn transition(&mut self, step: usize, to: StepStatus) -> Result<(), InvalidTransition> {
        let from = self.get(step).ok_or(InvalidTransition {
            step,
            from: "unknown",
            to: to.as_str(),
        })?;
        if !from.can_transition(to) {
            return Err(InvalidTransition {
                step,
                from: from.as_str(),
                to: to.as_str(),
            });
        }
        self.states[step] = to;
        Ok(())
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.states.iter().filter(|s| **s == status).count()
    }

    pub fn all_terminal(&self) -> bool {
        self.states.iter().all(StepStatus::is_terminal)
    }
}
