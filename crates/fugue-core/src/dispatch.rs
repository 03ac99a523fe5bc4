//! Launch, completion and failure handling of task jobs

use crate::error::{RuntimeError, RuntimeResult};
use crate::record::{Slot, TaskRecord};
use crate::runtime::Shared;
use crate::task::TaskState;
use fugue_data::{DataAccessId, DataError, DataInstance, DataLocation, HostDirectory, Protocol};
use fugue_executor::{ExecutionResult, Invocation, InvocationParam, JobListener, JobReport};
use fugue_metrics::{EventSpan, TraceEvent};
use fugue_scheduler::{Action, ActionOrchestrator, FailureOutcome, Launch, LocalityOracle};
use fugue_types::{Direction, Implementation, OnFailure};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Weak;

/// Callbacks from the scheduler and the executor pools into the runtime
pub(crate) struct Hooks(pub(crate) Weak<Shared>);

impl ActionOrchestrator for Hooks {
    fn launch(&self, launch: Launch) {
        if let Some(shared) = self.0.upgrade() {
            shared.launch(launch);
        }
    }
}

impl JobListener for Hooks {
    fn job_finished(&self, invocation: Invocation, result: ExecutionResult<JobReport>) {
        if let Some(shared) = self.0.upgrade() {
            shared.job_finished(invocation, result);
        }
    }
}

impl LocalityOracle for Hooks {
    fn parameter_locality(&self, action: &Action, worker: &str) -> (u32, u32) {
        self.0
            .upgrade()
            .and_then(|shared| {
                let record = shared.task(action.task()?)?;
                Some(shared.locality(&record, worker))
            })
            .unwrap_or((0, 0))
    }
}

impl Shared {
    /// Parameters read by the task that are already on `worker`, and those
    /// that would have to be transferred
    fn locality(&self, record: &TaskRecord, worker: &str) -> (u32, u32) {
        let mut present = 0;
        let mut missing = 0;
        for read in record.accesses().filter_map(DataAccessId::read_instance) {
            match self.registry.logical_data(read.renaming()) {
                Some(ld) if ld.already_available(worker) => present += 1,
                _ => missing += 1,
            }
        }
        (present, missing)
    }

    fn policy(&self, record: &TaskRecord) -> OnFailure {
        self.scheduler
            .graph()
            .get(record.action)
            .map_or(OnFailure::default(), |a| a.on_failure())
    }

    // ==================== Launch ====================

    pub(crate) fn launch(&self, launch: Launch) {
        let _span = EventSpan::enter(&self.sink, TraceEvent::TaskDispatch);
        let Some(record) = launch.task.and_then(|t| self.task(t)) else {
            tracing::warn!("{} launched without a known task", launch.action);
            return;
        };
        if self.closing.load(Ordering::Acquire) {
            tracing::debug!("Dropping launch of {}: runtime is shutting down", record.id);
            record.finish(TaskState::Cancelled);
            return;
        }
        if !record.start_attempt(&launch.worker_name) {
            return;
        }

        let job_id = self.next_job.fetch_add(1, Ordering::Relaxed);
        let invocation = match self.build_invocation(&record, job_id, launch.implementation) {
            Ok(invocation) => invocation,
            Err(e) => {
                self.task_failed(&record, e.to_string());
                return;
            }
        };

        let executors = self.executors.read();
        let Some(worker) = executors.get(&launch.worker_name) else {
            drop(executors);
            let cause = format!("{} has no executors", launch.worker_name);
            self.task_failed(&record, cause);
            return;
        };
        tracing::debug!(
            "Job {} runs {} on {} (attempt {})",
            job_id,
            record.id,
            launch.worker_name,
            record.attempts()
        );
        self.metrics.metrics().counter("jobs_submitted", 1);
        worker.pool.submit(invocation);
    }

    fn build_invocation(
        &self,
        record: &TaskRecord,
        job_id: u64,
        implementation: Implementation,
    ) -> RuntimeResult<Invocation> {
        let mut params = Vec::with_capacity(record.slots.len());
        for (i, slot) in record.slots.iter().enumerate() {
            let name = format!("param{}", i);
            params.push(match slot {
                Slot::Object(access) => self.object_param(name, access)?,
                Slot::File {
                    access,
                    original_name,
                } => self.file_param(name, access, original_name)?,
                Slot::Scalar(value) => InvocationParam::scalar(name, value.clone()),
            });
        }

        let mut invocation = Invocation::new(job_id, record.id, implementation)
            .with_params(params)
            .with_on_failure(self.policy(record));
        if let Some(access) = &record.target {
            invocation = invocation.with_target(self.object_param("target".into(), access)?);
        }
        if let Some(access) = &record.result {
            invocation = invocation.with_results(vec![self.object_param("result".into(), access)?]);
        }
        Ok(invocation)
    }

    fn object_param(&self, name: String, access: &DataAccessId) -> RuntimeResult<InvocationParam> {
        let value = match access.read_instance() {
            Some(read) => Some(self.registry.value_of(read)?),
            None => None,
        };
        Ok(InvocationParam::object(
            name,
            access.direction(),
            access.written_instance().cloned(),
            value,
        ))
    }

    fn file_param(
        &self,
        name: String,
        access: &DataAccessId,
        original_name: &str,
    ) -> RuntimeResult<InvocationParam> {
        let read = match access.read_instance() {
            Some(instance) => Some(self.file_path(instance)?),
            None => None,
        };
        let renamed = match (access.written_instance(), read) {
            (Some(written), read) => {
                let target = self.data_dir.join(written.renaming());
                if let Some(source) = read {
                    std::fs::copy(&source, &target)?;
                }
                target
            }
            (None, Some(source)) => source,
            (None, None) => {
                return Err(RuntimeError::InvalidTask(format!("{} accesses nothing", name)));
            }
        };
        Ok(InvocationParam::file(name, access.direction(), original_name, renamed))
    }

    /// Local path of a file version
    pub(crate) fn file_path(&self, instance: &DataInstance) -> RuntimeResult<PathBuf> {
        let ld = self
            .registry
            .logical_data(instance.renaming())
            .ok_or_else(|| DataError::UnknownLogicalData(instance.renaming().to_string()))?;
        ld.locations()
            .into_iter()
            .find(|loc| loc.protocol() == Protocol::File)
            .map(|loc| PathBuf::from(loc.path()))
            .ok_or_else(|| DataError::CannotLoad(instance.renaming().to_string()).into())
    }

    // ==================== Completion ====================

    pub(crate) fn job_finished(&self, invocation: Invocation, result: ExecutionResult<JobReport>) {
        let Some(record) = self.task(invocation.task_id) else {
            tracing::warn!("Job {} finished for unknown {}", invocation.job_id, invocation.task_id);
            return;
        };
        match result {
            Ok(report) => self.task_completed(&record, report),
            Err(e) => {
                self.metrics.metrics().counter("jobs_failed", 1);
                self.task_failed(&record, e.to_string());
            }
        }
    }

    fn task_completed(&self, record: &TaskRecord, report: JobReport) {
        self.register_written_files(record);
        self.complete_accesses(record);
        self.metrics.metrics().histogram("task_duration_ms", report.elapsed_ms);
        self.metrics.metrics().counter("tasks_completed", 1);
        record.finish(TaskState::Completed);
        tracing::debug!("{} completed in {} ms", record.id, report.elapsed_ms);

        match self.scheduler.action_completed(record.action, report.elapsed_ms) {
            Ok(launched) if !launched.is_empty() => {
                tracing::debug!("{} released {:?}", record.id, launched)
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Scheduler rejected completion of {}: {}", record.id, e),
        }
    }

    /// Apply the failure policy of the task
    pub(crate) fn task_failed(&self, record: &TaskRecord, cause: String) {
        tracing::error!("{} ({}) failed: {}", record.id, record.signature, cause);
        if self.policy(record) == OnFailure::Ignore {
            // Successors may launch from within the scheduler call below.
            self.register_written_files(record);
        }
        record.back_to_pending();

        match self.scheduler.action_failed(record.action) {
            Ok(FailureOutcome::Retried) => {
                tracing::info!("{} resubmitted after {} attempts", record.id, record.attempts());
            }
            Ok(FailureOutcome::Ignored(launched)) => {
                self.complete_accesses(record);
                self.metrics.metrics().counter("tasks_failed", 1);
                record.finish(TaskState::Failed(cause));
                tracing::warn!("Failure of {} ignored, released {:?}", record.id, launched);
            }
            Ok(FailureOutcome::Cancelled(cancelled)) | Ok(FailureOutcome::Failed(cancelled)) => {
                self.metrics.metrics().counter("tasks_failed", 1);
                // Successors release their reads before the versions they read are cancelled.
                for action in cancelled.iter().rev() {
                    let task = self.scheduler.graph().get(*action).and_then(|a| a.task());
                    if let Some(successor) = task.and_then(|t| self.task(t)) {
                        self.abort(&successor, TaskState::Cancelled);
                    }
                }
                self.abort(record, TaskState::Failed(cause));
            }
            Err(e) => {
                tracing::error!("Scheduler rejected failure of {}: {}", record.id, e);
                self.abort(record, TaskState::Failed(format!("{}; {}", cause, e)));
            }
        }
    }

    /// End a task without its results: produced versions are cancelled
    pub(crate) fn abort(&self, record: &TaskRecord, state: TaskState) {
        if !record.finish(state) {
            return;
        }
        for access in record.accesses() {
            if let Err(e) = self.registry.cancel_access(access) {
                tracing::warn!("Could not cancel access of {} to {}: {}", record.id, access.data_id(), e);
            }
        }
        tracing::info!("{} aborted", record.id);
    }

    fn complete_accesses(&self, record: &TaskRecord) {
        for access in record.accesses() {
            if let Err(e) = self.registry.access_completed(access) {
                tracing::warn!("Could not complete access of {} to {}: {}", record.id, access.data_id(), e);
            }
        }
    }

    /// Register the files written by the task on the worker that ran it
    fn register_written_files(&self, record: &TaskRecord) {
        let host = record.worker().unwrap_or_else(|| self.hosts.local_host().to_string());
        for slot in &record.slots {
            let Slot::File { access, .. } = slot else {
                continue;
            };
            if access.direction() == Direction::In {
                continue;
            }
            let Some(written) = access.written_instance() else {
                continue;
            };
            let path = self.data_dir.join(written.renaming());
            let Ok(meta) = std::fs::metadata(&path) else {
                tracing::debug!("{} left no file for {}", record.id, written);
                continue;
            };
            if let Some(ld) = self.registry.logical_data(written.renaming()) {
                ld.set_size(meta.len());
                ld.add_location(DataLocation::private(
                    host.clone(),
                    Protocol::File,
                    path.display().to_string(),
                ));
            }
        }
    }
}
