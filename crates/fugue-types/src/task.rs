//! Task-level enums

use serde::{Deserialize, Serialize};

/// Access direction of a task parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Read only
    In,
    /// Written without being read
    Out,
    /// Read and then written
    InOut,
}

impl Direction {
    /// The task reads the current value
    pub fn reads(&self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    /// The task produces a new value
    pub fn writes(&self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// What the runtime does when a task fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Resubmit the task up to the configured retry count, then fail
    #[default]
    Retry,
    /// Cancel every task depending on the failed one and continue
    CancelSuccessors,
    /// Treat the failure as a completion so successors still run
    Ignore,
    /// Cancel successors and report the failure as fatal
    Fail,
}
