//! Runs one job from resource binding to sandbox cleanup

use crate::error::{ExecutionError, ExecutionResult};
use crate::invocation::{Invocation, InvocationParam, ParamValue};
use crate::invoker::{AssignedResources, Invoker};
use crate::sandbox::{check_job_files, create_empty_outputs, TaskSandbox};
use crate::worker_node::WorkerNode;
use fugue_data::DataRegistry;
use fugue_metrics::{EventSink, EventSpan, NullSink, TraceEvent};
use fugue_types::{OnFailure, ResourceKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Summary of a successful job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobReport {
    /// Job identifier
    pub job_id: u64,
    /// Wall time of the implementation body, in milliseconds
    pub elapsed_ms: u64,
}

/// Executes jobs on a worker node
pub struct Executor {
    working_dir: PathBuf,
    node: Arc<dyn WorkerNode>,
    invoker: Invoker,
    registry: Arc<DataRegistry>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("working_dir", &self.working_dir)
            .field("invoker", &self.invoker)
            .finish()
    }
}

impl Executor {
    /// Create an executor running jobs under `working_dir`
    pub fn new(working_dir: impl Into<PathBuf>, node: Arc<dyn WorkerNode>, registry: Arc<DataRegistry>) -> Self {
        Self {
            working_dir: working_dir.into(),
            invoker: Invoker::new(Arc::clone(&node)),
            node,
            registry,
            sink: Arc::new(NullSink),
        }
    }

    /// Emit trace markers to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Invoker used to register native functions and callbacks
    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Node the jobs run on
    pub fn node(&self) -> &Arc<dyn WorkerNode> {
        &self.node
    }

    /// Base directory of the sandboxes
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Run `invocation` to completion. On success, final values have been
    /// stored in the data registry and the node profile updated.
    pub fn execute(&self, invocation: &mut Invocation) -> ExecutionResult<JobReport> {
        let _span = EventSpan::enter(&self.sink, TraceEvent::TaskExecution);
        let job = invocation.job_id;
        tracing::debug!("Job {} starting ({})", job, invocation.implementation.signature);

        self.invoker.resolve(&invocation.implementation)?;
        let resources = self.bind_resources(invocation)?;

        let result = self.run_in_sandbox(invocation, &resources);

        for kind in ResourceKind::ALL {
            self.node.release(job, kind);
        }

        match &result {
            Ok(report) => {
                self.node.record_execution(&invocation.implementation, report.elapsed_ms);
                tracing::debug!("Job {} finished in {} ms", job, report.elapsed_ms);
            }
            Err(e) => tracing::error!("Job {} of {} failed: {}", job, invocation.task_id, e),
        }
        result
    }

    fn bind_resources(&self, invocation: &Invocation) -> ExecutionResult<AssignedResources> {
        let job = invocation.job_id;
        let req = invocation.implementation.requirements;
        let mut assigned = AssignedResources::default();
        for kind in ResourceKind::ALL {
            match self.node.bind(job, req.units(kind), kind) {
                Ok(ids) => match kind {
                    ResourceKind::Cpu => assigned.cpus = ids,
                    ResourceKind::Gpu => assigned.gpus = ids,
                    ResourceKind::Fpga => assigned.fpgas = ids,
                },
                Err(e) => {
                    for bound in ResourceKind::ALL {
                        self.node.release(job, bound);
                    }
                    return Err(e);
                }
            }
        }
        Ok(assigned)
    }

    fn run_in_sandbox(&self, invocation: &mut Invocation, resources: &AssignedResources) -> ExecutionResult<JobReport> {
        let sandbox = TaskSandbox::create(&self.working_dir, invocation, &self.sink)?;
        let result = self.run_bound(invocation, &sandbox, resources);
        sandbox.clean();
        result
    }

    fn run_bound(
        &self,
        invocation: &mut Invocation,
        sandbox: &TaskSandbox,
        resources: &AssignedResources,
    ) -> ExecutionResult<JobReport> {
        if let Err(e) = sandbox.bind_original_files(invocation) {
            if let Err(unbind) = sandbox.unbind_original_files(invocation, true) {
                tracing::warn!("Another error unbinding files of job {}: {}", invocation.job_id, unbind);
            }
            return Err(e);
        }

        let start = Instant::now();
        let invoked = self.invoker.invoke(invocation, sandbox.path(), resources);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if let Err(e) = invoked {
            if invocation.on_failure != OnFailure::Retry {
                create_empty_outputs(invocation);
            }
            if let Err(unbind) = sandbox.unbind_original_files(invocation, true) {
                tracing::warn!("Another error unbinding files of job {}: {}", invocation.job_id, unbind);
            }
            return Err(e);
        }

        sandbox.unbind_original_files(invocation, false)?;
        check_job_files(invocation)?;
        self.store_final_values(invocation)?;

        Ok(JobReport {
            job_id: invocation.job_id,
            elapsed_ms,
        })
    }

    /// Write back every object parameter flagged as final value
    fn store_final_values(&self, invocation: &Invocation) -> ExecutionResult<()> {
        let _span = EventSpan::enter(&self.sink, TraceEvent::StoreFinalValues);
        let mut result = Ok(());
        for param in invocation.all_params() {
            param.for_each_leaf(&mut |leaf| {
                if result.is_ok() {
                    result = self.store_value(invocation.job_id, leaf);
                }
            });
        }
        result
    }

    fn store_value(&self, job: u64, param: &InvocationParam) -> ExecutionResult<()> {
        if !param.write_final_value {
            return Ok(());
        }
        let object = match &param.value {
            ParamValue::Object(o) => o,
            _ => return Ok(()),
        };
        let (instance, value) = match (&object.instance, &object.value) {
            (Some(i), Some(v)) => (i, v),
            (Some(i), None) => {
                return Err(ExecutionError::JobExecution(format!(
                    "job {} produced no value for {} ({})",
                    job, param.name, i
                )))
            }
            _ => return Ok(()),
        };
        if object.became_persistent() {
            tracing::info!(
                "Parameter {} of job {} became persistent object {}",
                param.name,
                job,
                value.persistent_id().unwrap_or_default()
            );
        }
        self.registry.store_value(instance, value.clone())?;
        Ok(())
    }
}
