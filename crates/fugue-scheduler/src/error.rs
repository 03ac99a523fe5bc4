//! Error types for the scheduler

use fugue_types::{ActionId, WorkerId};
use thiserror::Error;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The action cannot launch given the current timeline state
    #[error("invalid scheduling of {0}")]
    InvalidScheduling(ActionId),

    /// No worker can host any implementation of the action
    #[error("{0} is blocked: no worker can host any of its implementations")]
    BlockedAction(ActionId),

    /// The action has no worker assigned
    #[error("{0} is not assigned to any worker")]
    UnassignedAction(ActionId),

    /// Action not found
    #[error("{0} not found")]
    ActionNotFound(ActionId),

    /// Worker not found
    #[error("{0} not found")]
    WorkerNotFound(WorkerId),

    /// Maximum retries exceeded
    #[error("{0} exceeded maximum retry count")]
    MaxRetriesExceeded(ActionId),
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::InvalidScheduling(ActionId::new(42));
        assert_eq!(err.to_string(), "invalid scheduling of action#42");

        let err = SchedulerError::WorkerNotFound(WorkerId::new(3));
        assert!(err.to_string().contains("worker#3"));

        let err = SchedulerError::BlockedAction(ActionId::new(1));
        assert!(err.to_string().contains("blocked"));
    }
}
