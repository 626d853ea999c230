// steplog-core/src/task/status.rs
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::SteplogError;

/// Lifecycle state of a task or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
    Terminated,
    Skipped,
    PendingApproval,
    Approved,
    Denied,
}

impl StepStatus {
    /// Terminal statuses accept no further change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Error | StepStatus::Terminated | StepStatus::Skipped | StepStatus::Denied
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Error => "error",
            StepStatus::Terminated => "terminated",
            StepStatus::Skipped => "skipped",
            StepStatus::PendingApproval => "pending-approval",
            StepStatus::Approved => "approved",
            StepStatus::Denied => "denied",
        }
    }

    /// Validates moving from `self` to `next` for the unit called `name`.
    pub fn transition(self, name: &str, next: StepStatus) -> Result<StepStatus, SteplogError> {
        if self.is_terminal() && self != next {
            return Err(SteplogError::InvalidTransition {
                step: name.to_string(),
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        Ok(next)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
