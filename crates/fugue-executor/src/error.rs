//! Error types for task execution

use fugue_types::ResourceKind;
use std::path::PathBuf;
use thiserror::Error;

/// Execution errors
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// An OUT file was not created by the task
    #[error("file '{}' not generated by task {signature}", path.display())]
    MissingOutput {
        /// Expected location of the file
        path: PathBuf,
        /// Method signature of the implementation
        signature: String,
    },

    /// External process finished with a non-zero exit code
    #[error("{program} exited with code {code}")]
    ExternalExecution {
        /// Executable or launcher
        program: String,
        /// Exit code reported by the process
        code: i32,
    },

    /// Implementation cannot be resolved to anything runnable
    #[error("cannot resolve {signature}: {reason}")]
    MethodResolution {
        /// Method signature of the implementation
        signature: String,
        /// What is missing
        reason: String,
    },

    /// Task body failed
    #[error("job execution failed: {0}")]
    JobExecution(String),

    /// Not enough free units to bind
    #[error("cannot bind {requested} {kind} units for job {job}: {available} available")]
    ResourceBinding {
        /// Job requesting the units
        job: u64,
        /// Resource kind
        kind: ResourceKind,
        /// Units requested
        requested: u32,
        /// Units free
        available: u32,
    },

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for ExecutionError {
    fn from(e: anyhow::Error) -> Self {
        ExecutionError::JobExecution(format!("{:#}", e))
    }
}

impl From<fugue_data::DataError> for ExecutionError {
    fn from(e: fugue_data::DataError) -> Self {
        ExecutionError::JobExecution(e.to_string())
    }
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;
