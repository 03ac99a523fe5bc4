//! Implementation dispatch
//!
//! One `match` over [`ImplementationKind`] selects how a job body runs:
//! registered native functions are called in-process, binaries and MPI/OpenMP
//! jobs are launched through the [`WorkerNode`], and persistent-object methods
//! go through a [`PersistentExecutor`] callback.

use crate::error::{ExecutionError, ExecutionResult};
use crate::invocation::{Invocation, InvocationParam};
use crate::worker_node::{CommandDescriptor, WorkerNode};
use fugue_data::DataValue;
use fugue_types::{Implementation, ImplementationKind, MpiConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Number of hosts taking part in the job
pub const ENV_NUM_NODES: &str = "FUGUE_NUM_NODES";
/// Comma separated host list, each host repeated once per computing unit
pub const ENV_HOSTNAMES: &str = "FUGUE_HOSTNAMES";
/// Processes started for the job
pub const ENV_NUM_PROCS: &str = "FUGUE_NUM_PROCS";
/// Threads available to each process
pub const ENV_NUM_THREADS: &str = "FUGUE_NUM_THREADS";
/// OpenMP thread count
pub const ENV_OMP_NUM_THREADS: &str = "OMP_NUM_THREADS";
/// Task being executed
pub const ENV_TASK_ID: &str = "FUGUE_TASK_ID";

/// Computing units bound to a job
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssignedResources {
    /// CPU unit ids
    pub cpus: Vec<u32>,
    /// GPU unit ids
    pub gpus: Vec<u32>,
    /// FPGA unit ids
    pub fpgas: Vec<u32>,
}

impl AssignedResources {
    /// CPU computing units
    pub fn computing_units(&self) -> u32 {
        self.cpus.len() as u32
    }
}

/// Arguments of an in-process call
pub struct NativeCall<'a> {
    /// Declared parameters, in order
    pub params: &'a mut [InvocationParam],
    /// Object the method is invoked on
    pub target: Option<&'a mut InvocationParam>,
    /// Sandbox the call runs in
    pub sandbox: &'a Path,
    /// Units bound to the job
    pub resources: &'a AssignedResources,
}

impl NativeCall<'_> {
    /// Object value of parameter `index`
    pub fn value(&self, index: usize) -> Option<&DataValue> {
        self.params.get(index).and_then(|p| p.object_value())
    }

    /// Path of file parameter `index`
    pub fn path(&self, index: usize) -> Option<&Path> {
        self.params.get(index).and_then(|p| p.as_file()).map(|f| f.path())
    }

    /// Verbatim value of scalar parameter `index`
    pub fn scalar(&self, index: usize) -> Option<&str> {
        match self.params.get(index).map(|p| &p.value) {
            Some(crate::invocation::ParamValue::Scalar(s)) => Some(s),
            _ => None,
        }
    }

    /// Replace the value of object parameter `index`
    pub fn set_value(&mut self, index: usize, value: DataValue) -> bool {
        self.params
            .get_mut(index)
            .map_or(false, |p| p.set_object_value(value))
    }
}

/// Registered in-process implementation
pub type NativeFn = dyn Fn(&mut NativeCall<'_>) -> anyhow::Result<Option<DataValue>> + Send + Sync;

/// Runs methods on objects held by a persistent object store
pub trait PersistentExecutor: Send + Sync {
    /// Execute `method` on `target`. Returns the method's return value.
    fn execute_remote(
        &self,
        method: &str,
        target: Option<&DataValue>,
        params: &[InvocationParam],
    ) -> anyhow::Result<Option<DataValue>>;
}

/// Dispatches a job to the strategy matching its implementation kind
pub struct Invoker {
    node: Arc<dyn WorkerNode>,
    natives: RwLock<HashMap<String, Arc<NativeFn>>>,
    persistent: RwLock<Option<Arc<dyn PersistentExecutor>>>,
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.natives.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("Invoker")
            .field("host", &self.node.host_name())
            .field("natives", &names)
            .field("persistent", &self.persistent.read().is_some())
            .finish()
    }
}

impl Invoker {
    /// Create an invoker launching external processes on `node`
    pub fn new(node: Arc<dyn WorkerNode>) -> Self {
        Self {
            node,
            natives: RwLock::new(HashMap::new()),
            persistent: RwLock::new(None),
        }
    }

    /// Register an in-process function under `name`
    pub fn register_native<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&mut NativeCall<'_>) -> anyhow::Result<Option<DataValue>> + Send + Sync + 'static,
    {
        self.natives.write().insert(name.into(), Arc::new(function));
    }

    /// Install the persistent object callback
    pub fn set_persistent_executor(&self, executor: Arc<dyn PersistentExecutor>) {
        *self.persistent.write() = Some(executor);
    }

    /// Check the implementation can run at all. Done before any resource is
    /// bound to the job.
    pub fn resolve(&self, implementation: &Implementation) -> ExecutionResult<()> {
        let missing = |reason: String| ExecutionError::MethodResolution {
            signature: implementation.signature.clone(),
            reason,
        };
        match &implementation.kind {
            ImplementationKind::Native(c) => {
                if !self.natives.read().contains_key(&c.function) {
                    return Err(missing(format!("no native function registered as '{}'", c.function)));
                }
            }
            ImplementationKind::Binary(c) => {
                if c.binary.trim().is_empty() {
                    return Err(missing("empty binary path".into()));
                }
            }
            ImplementationKind::OpenMp(c) => {
                if c.binary.trim().is_empty() {
                    return Err(missing("empty binary path".into()));
                }
            }
            ImplementationKind::Mpi(c) => {
                if c.binary.trim().is_empty() || c.runner.trim().is_empty() {
                    return Err(missing("empty MPI binary or runner".into()));
                }
            }
            ImplementationKind::PersistentObject(_) => {
                if self.persistent.read().is_none() {
                    return Err(missing("no persistent object executor installed".into()));
                }
            }
        }
        Ok(())
    }

    /// Run the body of `invocation`. The return value, if any, is stored in
    /// the first result parameter.
    pub fn invoke(
        &self,
        invocation: &mut Invocation,
        sandbox: &Path,
        resources: &AssignedResources,
    ) -> ExecutionResult<()> {
        self.resolve(&invocation.implementation)?;
        let kind = invocation.implementation.kind.clone();
        tracing::debug!(
            "Invoking {} job {} ({})",
            kind.name(),
            invocation.job_id,
            invocation.implementation.signature
        );
        let returned = match &kind {
            ImplementationKind::Native(c) => self.invoke_native(&c.function, invocation, sandbox, resources)?,
            ImplementationKind::Binary(c) => {
                let command = self.command(invocation, &c.binary, Vec::new(), sandbox, resources, 1);
                self.run_external(command, c.fail_by_exit_value)?
            }
            ImplementationKind::OpenMp(c) => {
                let command = self.command(invocation, &c.binary, Vec::new(), sandbox, resources, 1);
                self.run_external(command, c.fail_by_exit_value)?
            }
            ImplementationKind::Mpi(c) => {
                let command = self.mpi_command(invocation, c, sandbox, resources);
                self.run_external(command, c.fail_by_exit_value)?
            }
            ImplementationKind::PersistentObject(c) => {
                let executor = self.persistent.read().clone().ok_or_else(|| ExecutionError::MethodResolution {
                    signature: invocation.implementation.signature.clone(),
                    reason: "no persistent object executor installed".into(),
                })?;
                let target = invocation.target.as_ref().and_then(|t| t.object_value());
                executor.execute_remote(&c.method, target, &invocation.params)?
            }
        };

        if let Some(value) = returned {
            match invocation.result_mut() {
                Some(result) => {
                    if !result.set_object_value(value) {
                        tracing::debug!("Return value of job {} dropped: result is not an object", invocation.job_id);
                    }
                }
                None => tracing::debug!("Job {} returned a value but declares no result", invocation.job_id),
            }
        }
        Ok(())
    }

    fn invoke_native(
        &self,
        function: &str,
        invocation: &mut Invocation,
        sandbox: &Path,
        resources: &AssignedResources,
    ) -> ExecutionResult<Option<DataValue>> {
        let f = self.natives.read().get(function).cloned().ok_or_else(|| ExecutionError::MethodResolution {
            signature: invocation.implementation.signature.clone(),
            reason: format!("no native function registered as '{}'", function),
        })?;
        let mut call = NativeCall {
            params: &mut invocation.params,
            target: invocation.target.as_mut(),
            sandbox,
            resources,
        };
        Ok(f(&mut call)?)
    }

    fn hostnames(&self, invocation: &Invocation) -> Vec<String> {
        let mut hosts = invocation.slave_hosts.clone();
        hosts.push(self.node.host_name().to_string());
        hosts
    }

    fn command(
        &self,
        invocation: &Invocation,
        program: &str,
        mut args: Vec<String>,
        sandbox: &Path,
        resources: &AssignedResources,
        processes: u32,
    ) -> CommandDescriptor {
        let hosts = self.hostnames(invocation);
        let units = resources.computing_units().max(1);
        let threads = (units / processes.max(1)).max(1);
        args.extend(invocation.params.iter().filter_map(|p| p.command_arg()));
        CommandDescriptor {
            program: program.to_string(),
            args,
            working_dir: Some(sandbox.to_path_buf()),
            env: vec![
                (ENV_TASK_ID.to_string(), invocation.task_id.get().to_string()),
                (ENV_NUM_NODES.to_string(), hosts.len().to_string()),
                (ENV_HOSTNAMES.to_string(), hosts_string(&hosts, units)),
                (ENV_NUM_PROCS.to_string(), processes.to_string()),
                (ENV_NUM_THREADS.to_string(), threads.to_string()),
                (ENV_OMP_NUM_THREADS.to_string(), threads.to_string()),
            ],
        }
    }

    fn mpi_command(
        &self,
        invocation: &Invocation,
        config: &MpiConfig,
        sandbox: &Path,
        resources: &AssignedResources,
    ) -> CommandDescriptor {
        let nodes = self.hostnames(invocation).len() as u32;
        let processes = config.processes_per_node.max(1) * nodes;
        let args = vec!["-np".to_string(), processes.to_string(), config.binary.clone()];
        self.command(invocation, &config.runner, args, sandbox, resources, processes)
    }

    fn run_external(&self, command: CommandDescriptor, fail_by_exit_value: bool) -> ExecutionResult<Option<DataValue>> {
        let outcome = self.node.execute(&command)?;
        if outcome.exit_code != 0 {
            if fail_by_exit_value {
                tracing::error!(
                    "{} exited with {}: {}",
                    command.program,
                    outcome.exit_code,
                    outcome.stderr.trim()
                );
                return Err(ExecutionError::ExternalExecution {
                    program: command.program,
                    code: outcome.exit_code,
                });
            }
            tracing::debug!("{} exited with {}, ignored", command.program, outcome.exit_code);
        }
        Ok(Some(DataValue::new(outcome.exit_code.to_string().into_bytes())))
    }
}

/// `a,a,b,b` for hosts `[a, b]` with two units each
fn hosts_string(hosts: &[String], units: u32) -> String {
    hosts
        .iter()
        .flat_map(|h| std::iter::repeat(h.as_str()).take(units as usize))
        .collect::<Vec<_>>()
        .join(",")
}
