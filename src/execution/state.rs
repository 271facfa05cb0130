use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one in-flight execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Admitted and interpreting actions; counts against capacity
    Running,
    /// Suspended (or about to suspend) at a safe point
    Paused,
    /// Abort signalled; ends in `Failed` at the next safe point
    Aborting,
    /// All actions finished
    Completed,
    /// An action failed, panicked, or the execution was aborted
    Failed,
}

impl ExecutionState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if this state occupies an admission slot
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Legal transitions
    ///
    /// A pause that lands after the last safe point does not hold the
    /// execution back, so `Paused` may also settle directly.
    pub fn can_transition_to(&self, target: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, target),
            (Running, Paused | Aborting | Completed | Failed)
                | (Paused, Running | Aborting | Completed | Failed)
                | (Aborting, Failed)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Aborting => write!(f, "aborting"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "aborting" => Ok(Self::Aborting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid execution state: {s}")),
        }
    }
}
