//! # fugue-core
//!
//! Runtime context of the Fugue task-based runtime.
//!
//! A [`Runtime`] owns one data registry, one task scheduler and the executor
//! pools of its workers. Submitted tasks register their data accesses, wait
//! for the tasks producing their inputs and run on the worker chosen by the
//! scheduler; their failures are handled according to their declared policy.
//!
//! Features:
//! - Process-scoped runtime with explicit start and shutdown
//! - Data dependencies derived from the last writer of every datum
//! - Retry, cancel-successors, ignore and fail policies
//! - Worker removal with rescue of data only held by the leaving worker
//! - JSON configuration and tracing bootstrap

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod dispatch;
mod error;
pub mod logging;
mod record;
mod runtime;
mod task;

pub use config::{
    ExecutorSection, LoggingConfig, OptimizerSection, RuntimeConfig, SchedulerSection,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::init_tracing;
pub use runtime::{Runtime, LOCAL_HOST};
pub use task::{TaskDescription, TaskHandle, TaskParam, TaskState};
