//! Runtime error types

use fugue_data::DataError;
use fugue_executor::ExecutionError;
use fugue_scheduler::SchedulerError;
use fugue_types::{TaskId, WorkerId};
use thiserror::Error;

/// Runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Data tracker error
    #[error("data error: {0}")]
    Data(#[from] DataError),

    /// Scheduler error
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Executor error
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// A task failed for good
    #[error("{task_id} ({signature}) failed: {cause}")]
    TaskFailed {
        /// Failed task
        task_id: TaskId,
        /// Signature of the last implementation tried
        signature: String,
        /// Underlying error
        cause: String,
    },

    /// A task was cancelled before completing
    #[error("{0} was cancelled")]
    TaskCancelled(TaskId),

    /// Task was never submitted
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    /// Worker is not known to the runtime
    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),

    /// Task description is unusable
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Logging could not be installed
    #[error("logging error: {0}")]
    Logging(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::TaskFailed {
            task_id: TaskId::new(3),
            signature: "sum(int,int)".into(),
            cause: "job execution failed: overflow".into(),
        };
        assert_eq!(err.to_string(), "task#3 (sum(int,int)) failed: job execution failed: overflow");

        let err: RuntimeError = SchedulerError::WorkerNotFound(WorkerId::new(2)).into();
        assert_eq!(err.to_string(), "scheduler error: worker#2 not found");

        assert_eq!(RuntimeError::TaskCancelled(TaskId::new(1)).to_string(), "task#1 was cancelled");
    }
}
