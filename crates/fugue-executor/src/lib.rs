//! # fugue-executor
//!
//! Execution layer of the Fugue runtime.
//!
//! A job is one attempt at running a task with the implementation chosen by
//! the scheduler. Executor threads take jobs from a blocking queue, bind
//! computing units on the worker node, run the implementation inside a
//! sandbox directory and write the produced values back to the data registry.
//!
//! Features:
//! - Monitor-style request queue with urgent requeue and broadcast wake-up
//! - Pool of named executor threads stopped through a sentinel request
//! - Per-job sandboxes with original-name binding of file parameters
//! - Invoker dispatch over native, binary, MPI, OpenMP and persistent-object kinds
//! - Local worker node with per-kind unit binding and execution profiles

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod executor;
mod invocation;
mod invoker;
mod pool;
mod queue;
mod sandbox;
mod worker_node;

pub use error::{ExecutionError, ExecutionResult};
pub use executor::{Executor, JobReport};
pub use invocation::{FileParam, Invocation, InvocationParam, ObjectParam, ParamValue};
pub use invoker::{
    AssignedResources, Invoker, NativeCall, NativeFn, PersistentExecutor, ENV_HOSTNAMES,
    ENV_NUM_NODES, ENV_NUM_PROCS, ENV_NUM_THREADS, ENV_OMP_NUM_THREADS, ENV_TASK_ID,
};
pub use pool::{ExecutorPool, JobListener};
pub use queue::RequestQueue;
pub use sandbox::{check_job_files, create_empty_outputs, is_major_version, TaskSandbox};
pub use worker_node::{CommandDescriptor, CommandOutcome, LocalWorkerNode, WorkerNode};
