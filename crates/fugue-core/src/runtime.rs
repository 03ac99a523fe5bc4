//! Process-scoped runtime context

use crate::config::RuntimeConfig;
use crate::dispatch::Hooks;
use crate::error::{RuntimeError, RuntimeResult};
use crate::record::{AccessBatch, Slot, TaskRecord};
use crate::task::{TaskDescription, TaskHandle, TaskParam, TaskState};
use dashmap::DashMap;
use fugue_data::{
    DataLocation, DataRegistry, DataValue, HostDirectory, InMemoryHostDirectory, Protocol,
    StorageBackend,
};
use fugue_executor::{
    Executor, ExecutorPool, LocalWorkerNode, NativeCall, NativeFn, PersistentExecutor,
};
use fugue_metrics::{EventSink, MetricsCollector, MetricsSnapshot};
use fugue_scheduler::{ActionSpec, ScheduleOptimizer, SchedulerError, TaskScheduler};
use fugue_types::{DataId, Direction, ResourceDescription, TaskId, WorkerId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Host name of the worker created with the runtime
pub const LOCAL_HOST: &str = "master";

/// Executors serving one worker
pub(crate) struct WorkerExecutors {
    pub(crate) executor: Arc<Executor>,
    pub(crate) pool: ExecutorPool,
}

/// State shared between the runtime, its scheduler and its executor threads
pub(crate) struct Shared {
    pub(crate) config: RuntimeConfig,
    pub(crate) data_dir: PathBuf,
    pub(crate) hosts: Arc<InMemoryHostDirectory>,
    pub(crate) registry: Arc<DataRegistry>,
    pub(crate) scheduler: Arc<TaskScheduler>,
    pub(crate) metrics: MetricsCollector,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) hooks: Arc<Hooks>,
    pub(crate) executors: RwLock<HashMap<String, WorkerExecutors>>,
    natives: RwLock<Vec<(String, Arc<NativeFn>)>>,
    persistent: RwLock<Option<Arc<dyn PersistentExecutor>>>,
    tasks: DashMap<TaskId, Arc<TaskRecord>>,
    last_writer: DashMap<DataId, TaskId>,
    next_task: AtomicU64,
    pub(crate) next_job: AtomicU64,
    pub(crate) closing: AtomicBool,
}

impl Shared {
    pub(crate) fn task(&self, id: TaskId) -> Option<Arc<TaskRecord>> {
        self.tasks.get(&id).map(|r| Arc::clone(r.value()))
    }
}

/// One runtime instance: data tracker, scheduler and worker executors.
///
/// Tasks are submitted with [`Runtime::submit_task`]; their data accesses
/// are registered immediately and the task runs as soon as the tasks
/// producing its inputs have finished and a worker has room for it.
pub struct Runtime {
    shared: Arc<Shared>,
    optimizer: Mutex<Option<ScheduleOptimizer>>,
}

impl Runtime {
    /// Create a runtime with a local worker offering the configured resources
    pub fn new(config: RuntimeConfig, storage: Arc<dyn StorageBackend>) -> RuntimeResult<Self> {
        let data_dir = config.executor.working_dir.join("data");
        std::fs::create_dir_all(&data_dir)?;

        let metrics = MetricsCollector::new();
        let sink = metrics.sink();
        let hosts = Arc::new(InMemoryHostDirectory::new(LOCAL_HOST));
        let registry = Arc::new(DataRegistry::new(hosts.clone(), storage, Arc::clone(&sink)));
        let local_resources = config.executor.resources();

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let hooks = Arc::new(Hooks(weak.clone()));
            let scheduler = TaskScheduler::new(config.scheduler.to_scheduler_config(), hooks.clone())
                .with_locality(hooks.clone())
                .with_sink(Arc::clone(&sink));
            Shared {
                config,
                data_dir,
                hosts,
                registry,
                scheduler: Arc::new(scheduler),
                metrics,
                sink,
                hooks,
                executors: RwLock::new(HashMap::new()),
                natives: RwLock::new(Vec::new()),
                persistent: RwLock::new(None),
                tasks: DashMap::new(),
                last_writer: DashMap::new(),
                next_task: AtomicU64::new(1),
                next_job: AtomicU64::new(1),
                closing: AtomicBool::new(false),
            }
        });

        let runtime = Self {
            shared,
            optimizer: Mutex::new(None),
        };
        runtime.add_worker(LOCAL_HOST, local_resources)?;
        tracing::info!(
            "Runtime started in {} with {}",
            runtime.shared.config.executor.working_dir.display(),
            local_resources
        );
        Ok(runtime)
    }

    /// Configuration the runtime was created with
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Data registry
    pub fn registry(&self) -> &Arc<DataRegistry> {
        &self.shared.registry
    }

    /// Task scheduler
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.shared.scheduler
    }

    /// Current counters and task duration histograms
    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_metrics(self.shared.metrics.metrics())
    }

    // ==================== Implementations ====================

    /// Make a native function callable by every worker, present and future
    pub fn register_native<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&mut NativeCall<'_>) -> anyhow::Result<Option<DataValue>> + Send + Sync + 'static,
    {
        let name = name.into();
        let function: Arc<NativeFn> = Arc::new(function);
        let mut natives = self.shared.natives.write();
        for workers in self.shared.executors.read().values() {
            install_native(&workers.executor, &name, &function);
        }
        natives.push((name, function));
    }

    /// Callback running persistent-object methods on every worker
    pub fn set_persistent_executor(&self, executor: Arc<dyn PersistentExecutor>) {
        for workers in self.shared.executors.read().values() {
            workers.executor.invoker().set_persistent_executor(Arc::clone(&executor));
        }
        *self.shared.persistent.write() = Some(executor);
    }

    // ==================== Workers ====================

    /// Start executors for a new worker and offer its resources to the scheduler
    pub fn add_worker(&self, name: impl Into<String>, resources: ResourceDescription) -> RuntimeResult<WorkerId> {
        let name = name.into();
        if self.shared.executors.read().contains_key(&name) {
            return Err(RuntimeError::Config(format!("worker {} already exists", name)));
        }
        // Held until the executors are published so no native is missed.
        let natives = self.shared.natives.read();
        let node = Arc::new(LocalWorkerNode::new(name.clone(), resources));
        let executor = Executor::new(
            self.shared.config.executor.working_dir.join(&name),
            node,
            Arc::clone(&self.shared.registry),
        )
        .with_sink(Arc::clone(&self.shared.sink));
        for (native, function) in natives.iter() {
            install_native(&executor, native, function);
        }
        if let Some(persistent) = self.shared.persistent.read().as_ref() {
            executor.invoker().set_persistent_executor(Arc::clone(persistent));
        }
        let executor = Arc::new(executor);
        let pool = ExecutorPool::start(
            &format!("{}-executor", name),
            self.shared.config.executor.threads.max(1),
            Arc::clone(&executor),
            self.shared.hooks.clone(),
        )?;
        self.shared
            .executors
            .write()
            .insert(name.clone(), WorkerExecutors { executor, pool });
        drop(natives);
        Ok(self.shared.scheduler.add_worker(name, resources))
    }

    /// Remove a worker.
    ///
    /// Pending tasks are moved to other workers and the jobs already queued
    /// on it run to completion. Data whose only copy lived on the worker is
    /// rescued to the local host; the names of the rescued data are returned.
    pub fn remove_worker(&self, id: WorkerId) -> RuntimeResult<Vec<String>> {
        let name = self
            .shared
            .scheduler
            .worker(id)
            .map_err(|_| RuntimeError::UnknownWorker(id))?
            .name()
            .to_string();
        if name == LOCAL_HOST {
            return Err(RuntimeError::Config("the local worker cannot be removed".into()));
        }
        let running = self.shared.scheduler.remove_worker(id)?;
        let executors = self.shared.executors.write().remove(&name);
        if let Some(executors) = executors {
            if !running.is_empty() {
                tracing::info!("Waiting for {} jobs running on {}", running.len(), name);
            }
            executors.pool.shutdown();
        }

        let mounts = self.shared.hosts.remove_host(&name);
        let mut rescued = Vec::new();
        for (ld, from) in self.shared.registry.remove_host(&name, &mounts) {
            let saved = match from.protocol() {
                Protocol::File => {
                    let source = PathBuf::from(from.path());
                    let target = self.shared.data_dir.join(ld.name());
                    if source != target {
                        if let Err(e) = std::fs::copy(&source, &target) {
                            tracing::error!("Could not rescue {} from {}: {}", ld.name(), name, e);
                            continue;
                        }
                    }
                    DataLocation::private(LOCAL_HOST, Protocol::File, target.display().to_string())
                }
                _ if ld.is_in_memory() => DataLocation::object(LOCAL_HOST, ld.name()),
                _ => {
                    tracing::error!("{} lost with {}", ld.name(), name);
                    continue;
                }
            };
            ld.saved_to(saved);
            rescued.push(ld.name().to_string());
        }
        tracing::info!("Removed {}, rescued {} data", name, rescued.len());
        Ok(rescued)
    }

    // ==================== Data ====================

    /// Track a value produced by the caller
    pub fn register_data(&self, value: DataValue) -> DataId {
        self.shared.registry.register_value(value)
    }

    /// Track an existing file on the local host
    pub fn register_file(&self, path: impl AsRef<Path>) -> DataId {
        let path = path.as_ref().display().to_string();
        let local = self.shared.hosts.local_host().to_string();
        self.shared
            .registry
            .register_file(DataLocation::private(local, Protocol::File, path))
    }

    /// Current value of a datum, waiting for the task producing it
    pub fn get_value(&self, data: DataId) -> RuntimeResult<DataValue> {
        self.wait_for_writer(data)?;
        let instance = self.shared.registry.current_instance(data)?;
        Ok(self.shared.registry.value_of(&instance)?)
    }

    /// Local path of the current version of a file datum, waiting for the
    /// task producing it
    pub fn file_path(&self, data: DataId) -> RuntimeResult<PathBuf> {
        self.wait_for_writer(data)?;
        let instance = self.shared.registry.current_instance(data)?;
        self.shared.file_path(&instance)
    }

    /// Stop tracking a datum; its versions are reclaimed once no task uses them
    pub fn delete_data(&self, data: DataId) -> RuntimeResult<()> {
        self.shared.registry.mark_to_delete(data)?;
        self.shared.last_writer.remove(&data);
        Ok(())
    }

    fn wait_for_writer(&self, data: DataId) -> RuntimeResult<()> {
        let writer = self.shared.last_writer.get(&data).map(|w| *w.value());
        match writer {
            Some(task) => self.wait_for_task(task),
            None => Ok(()),
        }
    }

    // ==================== Tasks ====================

    /// Register the data accesses of a task and hand it to the scheduler
    pub fn submit_task(&self, task: TaskDescription) -> RuntimeResult<TaskHandle> {
        if task.implementations.is_empty() {
            return Err(RuntimeError::InvalidTask(format!("{} has no implementation", task.core)));
        }
        let registry = &self.shared.registry;
        let id = TaskId::new(self.shared.next_task.fetch_add(1, Ordering::Relaxed));
        let mut predecessors = BTreeSet::new();
        let mut written = Vec::new();
        let mut batch = AccessBatch::new(registry);

        let mut access = |data: DataId, direction: Direction, batch: &mut AccessBatch<'_>| {
            if direction.reads() {
                if let Some(writer) = self.shared.last_writer.get(&data) {
                    predecessors.insert(*writer.value());
                }
            }
            if direction.writes() {
                written.push(data);
            }
            registry.register_access(data, direction).map(|a| batch.push(a))
        };

        let mut slots = Vec::with_capacity(task.params.len());
        for param in &task.params {
            slots.push(match param {
                TaskParam::Object { data, direction } => Slot::Object(access(*data, *direction, &mut batch)?),
                TaskParam::File {
                    data,
                    direction,
                    original_name,
                } => Slot::File {
                    access: access(*data, *direction, &mut batch)?,
                    original_name: original_name.clone(),
                },
                TaskParam::Scalar(value) => Slot::Scalar(value.clone()),
            });
        }
        let target = match task.target {
            Some(data) => Some(access(data, Direction::InOut, &mut batch)?),
            None => None,
        };
        let result = if task.has_result {
            let (data, output) = registry.register_output()?;
            written.push(data);
            Some((data, batch.push(output)))
        } else {
            None
        };
        batch.commit();

        let spec = ActionSpec::new(task.core, task.implementations.clone())
            .with_priority(i32::from(task.priority))
            .with_on_failure(task.on_failure)
            .with_task(id);
        let action = self.shared.scheduler.new_action(spec);
        let record = Arc::new(TaskRecord::new(
            id,
            action.id(),
            task.signature(),
            slots,
            target,
            result.as_ref().map(|(_, access)| access.clone()),
        ));
        self.shared.tasks.insert(id, Arc::clone(&record));
        for data in written {
            self.shared.last_writer.insert(data, id);
        }

        let scheduler = &self.shared.scheduler;
        let placed = predecessors
            .iter()
            .filter_map(|t| self.shared.task(*t))
            .try_for_each(|writer| scheduler.add_data_dependency(writer.action, action.id()))
            .and_then(|_| scheduler.schedule(action.id()));
        tracing::debug!("{} submitted as {} after {:?}", id, action.id(), predecessors);

        match placed {
            Ok(worker) => tracing::debug!("{} placed on {}", id, worker),
            Err(SchedulerError::BlockedAction(_)) => {
                tracing::warn!("{} waits for a worker able to run {}", id, record.signature)
            }
            Err(e) => {
                self.shared.abort(&record, TaskState::Failed(e.to_string()));
                return Err(e.into());
            }
        }

        Ok(TaskHandle {
            task: id,
            result: result.map(|(data, _)| data),
        })
    }

    /// Block until a task reaches a final state
    pub fn wait_for_task(&self, id: TaskId) -> RuntimeResult<()> {
        let record = self.shared.task(id).ok_or(RuntimeError::UnknownTask(id))?;
        match record.wait() {
            TaskState::Failed(cause) => Err(RuntimeError::TaskFailed {
                task_id: id,
                signature: record.signature.clone(),
                cause,
            }),
            TaskState::Cancelled => Err(RuntimeError::TaskCancelled(id)),
            _ => Ok(()),
        }
    }

    /// Lifecycle state of a task
    pub fn task_state(&self, id: TaskId) -> RuntimeResult<TaskState> {
        self.shared
            .task(id)
            .map(|r| r.state())
            .ok_or(RuntimeError::UnknownTask(id))
    }

    // ==================== Lifecycle ====================

    /// Spawn the background schedule optimizer on the current tokio runtime.
    /// Returns false if the optimizer is disabled in the configuration.
    pub fn start_optimizer(&self) -> RuntimeResult<bool> {
        if !self.shared.config.optimizer.enabled {
            return Ok(false);
        }
        tokio::runtime::Handle::try_current()
            .map_err(|e| RuntimeError::Config(format!("the optimizer needs a tokio runtime: {}", e)))?;
        let mut slot = self.optimizer.lock();
        if slot.is_none() {
            *slot = Some(ScheduleOptimizer::start(
                Arc::clone(&self.shared.scheduler),
                self.shared.config.optimizer.to_optimizer_config(),
            ));
        }
        Ok(true)
    }

    /// Stop the optimizer and wait for it. Returns the rounds it ran.
    pub async fn stop_optimizer(&self) -> Option<u64> {
        let optimizer = self.optimizer.lock().take();
        match optimizer {
            Some(optimizer) => Some(optimizer.shutdown().await),
            None => None,
        }
    }

    /// Let queued jobs finish, stop every executor and drop all tracked data.
    ///
    /// Tasks that never ran are cancelled. Call [`Runtime::stop_optimizer`]
    /// first to wait for the optimizer; otherwise it is only told to stop.
    pub fn shutdown(&self) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.optimizer.lock().take().is_some() {
            tracing::warn!("Optimizer dropped without waiting for it");
        }
        let executors: Vec<WorkerExecutors> = self.shared.executors.write().drain().map(|(_, w)| w).collect();
        for workers in executors {
            workers.pool.shutdown();
        }
        for record in self.shared.tasks.iter() {
            if record.finish(TaskState::Cancelled) {
                tracing::debug!("{} cancelled by shutdown", record.id);
            }
        }
        self.shared.registry.clear();
        tracing::info!("Runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn install_native(executor: &Executor, name: &str, function: &Arc<NativeFn>) {
    let function = Arc::clone(function);
    executor
        .invoker()
        .register_native(name, move |call: &mut NativeCall<'_>| function(call));
}
