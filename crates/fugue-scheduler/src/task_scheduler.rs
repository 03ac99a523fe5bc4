//! Task scheduler: places actions on workers and drives their lifecycle

use crate::action::{Action, ActionGraph, ActionSpec, ActionStatus, SchedulingInfo};
use crate::error::{SchedulerError, SchedulerResult};
use crate::resource_scheduler::ResourceScheduler;
use crate::score::{LocalityOracle, NoLocality, Score};
use fugue_metrics::{EventSink, NullSink};
use fugue_types::{ActionId, Implementation, OnFailure, ResourceDescription, TaskId, WorkerId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Request to run an action
#[derive(Clone, Debug)]
pub struct Launch {
    /// Action to run
    pub action: ActionId,
    /// Task the action executes
    pub task: Option<TaskId>,
    /// Worker chosen
    pub worker: WorkerId,
    /// Host name of the worker
    pub worker_name: String,
    /// Implementation chosen
    pub implementation: Implementation,
}

/// Receiver of launch requests
pub trait ActionOrchestrator: Send + Sync {
    /// Run the action; its end must be reported back to the scheduler
    fn launch(&self, launch: Launch);
}

/// Scheduler tunables
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Penalty (ms) per parameter that must be transferred
    pub data_transfer_delay: u64,
    /// Retries granted to actions with the retry policy
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            data_transfer_delay: 200,
            max_retries: 3,
        }
    }
}

/// What a failure led to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The action was placed again
    Retried,
    /// The action failed and these successors were cancelled
    Cancelled(Vec<ActionId>),
    /// The action failed and these successors were launched anyway
    Ignored(Vec<ActionId>),
    /// The action failed for good; these successors were cancelled
    Failed(Vec<ActionId>),
}

/// Places actions on workers and tracks their lifecycle
pub struct TaskScheduler {
    graph: Arc<ActionGraph>,
    workers: RwLock<BTreeMap<WorkerId, Arc<ResourceScheduler>>>,
    blocked: Mutex<Vec<ActionId>>,
    next_action: AtomicU64,
    next_worker: AtomicU32,
    orchestrator: Arc<dyn ActionOrchestrator>,
    locality: Arc<dyn LocalityOracle>,
    pub(crate) sink: Arc<dyn EventSink>,
    config: SchedulerConfig,
    epoch: Instant,
}

impl TaskScheduler {
    /// Create a scheduler without workers
    pub fn new(config: SchedulerConfig, orchestrator: Arc<dyn ActionOrchestrator>) -> Self {
        Self {
            graph: Arc::new(ActionGraph::new()),
            workers: RwLock::new(BTreeMap::new()),
            blocked: Mutex::new(Vec::new()),
            next_action: AtomicU64::new(1),
            next_worker: AtomicU32::new(1),
            orchestrator,
            locality: Arc::new(NoLocality),
            sink: Arc::new(NullSink),
            config,
            epoch: Instant::now(),
        }
    }

    /// Use `locality` for the resource score
    pub fn with_locality(mut self, locality: Arc<dyn LocalityOracle>) -> Self {
        self.locality = locality;
        self
    }

    /// Emit trace markers to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Milliseconds since the scheduler was created
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Arena of live actions
    pub fn graph(&self) -> &Arc<ActionGraph> {
        &self.graph
    }

    /// Tunables
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn action(&self, id: ActionId) -> SchedulerResult<Arc<Action>> {
        self.graph.get(id).ok_or(SchedulerError::ActionNotFound(id))
    }

    // ==================== Workers ====================

    /// Register a worker offering `total`
    pub fn add_worker(&self, name: impl Into<String>, total: ResourceDescription) -> WorkerId {
        let id = WorkerId::new(self.next_worker.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        tracing::info!("Adding {} ({}) with {}", id, name, total);
        let rs = Arc::new(ResourceScheduler::new(id, name, total, Arc::clone(&self.graph)));
        self.workers.write().insert(id, rs);

        let blocked = std::mem::take(&mut *self.blocked.lock());
        for action in blocked {
            if let Err(e) = self.schedule(action) {
                tracing::debug!("{} still unschedulable: {}", action, e);
            }
        }
        id
    }

    /// Remove a worker.
    ///
    /// Pending actions are placed elsewhere. Returns the actions that were
    /// running on it.
    pub fn remove_worker(&self, id: WorkerId) -> SchedulerResult<Vec<ActionId>> {
        let rs = self
            .workers
            .write()
            .remove(&id)
            .ok_or(SchedulerError::WorkerNotFound(id))?;
        tracing::info!("Removing {} ({})", id, rs.name());

        let mut lost = Vec::new();
        let mut freed = Vec::new();
        for action in self.graph.get_all(&rs.drain_hosted()) {
            freed.extend(rs.unschedule_action(&action));
            let status = {
                let mut state = action.state();
                if state.status == ActionStatus::Scheduled {
                    state.status = ActionStatus::Registered;
                    state.worker = None;
                }
                state.status
            };
            match status {
                ActionStatus::Running => lost.push(action.id()),
                ActionStatus::Registered => {
                    if let Err(e) = self.schedule(action.id()) {
                        tracing::warn!("Could not move {} off {}: {}", action.id(), id, e);
                    }
                }
                _ => {}
            }
        }
        self.launch_freed(freed);
        Ok(lost)
    }

    /// Look up a worker
    pub fn worker(&self, id: WorkerId) -> SchedulerResult<Arc<ResourceScheduler>> {
        self.workers
            .read()
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::WorkerNotFound(id))
    }

    /// Every worker, by id
    pub fn workers(&self) -> Vec<Arc<ResourceScheduler>> {
        self.workers.read().values().cloned().collect()
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.workers.read().len()
    }

    // ==================== Actions ====================

    /// Register a new action
    pub fn new_action(&self, spec: ActionSpec) -> Arc<Action> {
        let id = ActionId::new(self.next_action.fetch_add(1, Ordering::Relaxed));
        let action = Arc::new(Action::new(id, spec));
        self.graph.insert(Arc::clone(&action));
        action
    }

    /// Make `succ` wait for `pred`; nothing to do if `pred` already finished
    pub fn add_data_dependency(&self, pred: ActionId, succ: ActionId) -> SchedulerResult<()> {
        let p = self.action(pred)?;
        let s = self.action(succ)?;
        {
            let mut state = p.state();
            if state.status.is_finished() {
                return Ok(());
            }
            state.data_succs.insert(succ);
        }
        s.state().data_preds.insert(pred);
        Ok(())
    }

    /// Score of running `action` with `implementation` on `rs`
    pub fn score(
        &self,
        action: &Action,
        rs: &ResourceScheduler,
        implementation: &Implementation,
    ) -> Score {
        let (present, missing) = self.locality.parameter_locality(action, rs.name());
        let waiting = rs
            .earliest_start(&implementation.requirements)
            .max(self.data_ready(action));
        Score {
            priority: action.priority(),
            group_priority: action.group_priority(),
            resource: Score::resource_score(present, missing, self.config.data_transfer_delay),
            waiting,
            implementation: waiting + rs.profile_avg(action.core(), implementation.id),
        }
    }

    /// Latest expected end among the scheduled data predecessors of `action`
    pub(crate) fn data_ready(&self, action: &Action) -> u64 {
        self.graph
            .get_all(&action.data_predecessors())
            .iter()
            .filter_map(|pred| pred.with_info(|i| i.scheduled.then_some(i.expected_end)))
            .max()
            .unwrap_or(0)
    }

    /// Place an action on its best worker and launch it if possible
    pub fn schedule(&self, id: ActionId) -> SchedulerResult<WorkerId> {
        let action = self.action(id)?;
        let mut best: Option<(Score, Arc<ResourceScheduler>, Implementation)> = None;
        for rs in self.workers() {
            for implementation in action.compatible_implementations(&rs.total()) {
                let score = self.score(&action, &rs, implementation);
                let better = best.as_ref().map_or(true, |(b, _, _)| score.is_better(b));
                if better {
                    best = Some((score, Arc::clone(&rs), implementation.clone()));
                }
            }
        }

        let Some((score, rs, implementation)) = best else {
            let mut blocked = self.blocked.lock();
            if !blocked.contains(&id) {
                blocked.push(id);
            }
            tracing::warn!("{} is blocked: no worker can host it", id);
            return Err(SchedulerError::BlockedAction(id));
        };
        tracing::debug!("{} goes to {} with {:?}", id, rs.name(), score);
        rs.schedule_action(&action, implementation)?;
        self.launch_or_log(id);
        Ok(rs.worker())
    }

    /// Place an action on a given worker without launching it
    pub fn schedule_on(
        &self,
        id: ActionId,
        worker: WorkerId,
        implementation: Implementation,
    ) -> SchedulerResult<()> {
        let action = self.action(id)?;
        self.worker(worker)?.schedule_action(&action, implementation)
    }

    /// Launch `id` if nothing holds it back.
    ///
    /// Returns false when the action must still wait. Fails with
    /// [`SchedulerError::InvalidScheduling`] when the worker turns out not to
    /// have the resources the timeline promised.
    pub fn try_to_launch(&self, id: ActionId) -> SchedulerResult<bool> {
        let action = self.action(id)?;
        let launch = {
            let mut state = action.state();
            if state.status != ActionStatus::Scheduled || !state.data_preds.is_empty() {
                return Ok(false);
            }
            let ready =
                action.with_info(|i| i.scheduled && i.predecessors.is_empty() && !i.on_optimization);
            if !ready {
                return Ok(false);
            }
            let worker = state.worker.ok_or(SchedulerError::UnassignedAction(id))?;
            let implementation = state
                .implementation
                .clone()
                .ok_or(SchedulerError::UnassignedAction(id))?;
            let rs = self.worker(worker)?;
            if !rs.reserve(&implementation.requirements) {
                return Err(SchedulerError::InvalidScheduling(id));
            }
            state.status = ActionStatus::Running;
            state.launched_at = Some(self.now_ms());
            Launch {
                action: id,
                task: action.task(),
                worker,
                worker_name: rs.name().to_string(),
                implementation,
            }
        };
        tracing::debug!("Launching {} on {}", id, launch.worker_name);
        self.orchestrator.launch(launch);
        Ok(true)
    }

    fn launch_or_log(&self, id: ActionId) -> bool {
        match self.try_to_launch(id) {
            Ok(launched) => launched,
            Err(e) => {
                tracing::warn!("{} not launched: {}", id, e);
                false
            }
        }
    }

    /// Launch the actions an unscheduling left without resource predecessors
    pub(crate) fn launch_freed(&self, freed: Vec<Arc<Action>>) -> Vec<ActionId> {
        self.launch_all(freed.iter().map(|a| a.id()).collect())
    }

    /// Leave the final state: release resources and timeline links.
    ///
    /// Returns the actions that may now launch.
    fn finish(&self, action: &Arc<Action>, status: ActionStatus) -> Vec<ActionId> {
        let (was_running, worker, implementation) = {
            let mut state = action.state();
            let was_running = state.status == ActionStatus::Running;
            state.status = status;
            (was_running, state.worker, state.implementation.clone())
        };
        let mut candidates = Vec::new();
        if let Some(rs) = worker.and_then(|w| self.worker(w).ok()) {
            if was_running {
                if let Some(implementation) = &implementation {
                    rs.release(&implementation.requirements);
                }
            }
            candidates.extend(rs.unschedule_action(action).iter().map(|a| a.id()));
            candidates.extend(rs.hosted_actions());
        }
        candidates
    }

    fn release_data_successors(&self, action: &Action) -> Vec<ActionId> {
        let succs = action.data_successors();
        for succ in self.graph.get_all(&succs) {
            succ.state().data_preds.remove(&action.id());
        }
        succs
    }

    fn launch_all(&self, candidates: Vec<ActionId>) -> Vec<ActionId> {
        let mut seen = BTreeSet::new();
        candidates
            .into_iter()
            .filter(|id| seen.insert(*id))
            .filter(|id| self.launch_or_log(*id))
            .collect()
    }

    /// Report a successful run. Returns the actions launched as a consequence.
    pub fn action_completed(&self, id: ActionId, elapsed_ms: u64) -> SchedulerResult<Vec<ActionId>> {
        let action = self.action(id)?;
        if let (Some(worker), Some(implementation)) = (action.worker(), action.implementation()) {
            if let Ok(rs) = self.worker(worker) {
                rs.update_profile(action.core(), implementation.id, elapsed_ms);
            }
        }
        let mut candidates = self.finish(&action, ActionStatus::Completed);
        candidates.extend(self.release_data_successors(&action));
        let launched = self.launch_all(candidates);
        tracing::debug!("{} completed in {}ms, launched {:?}", id, elapsed_ms, launched);
        Ok(launched)
    }

    /// Report a failed run and apply the action's failure policy
    pub fn action_failed(&self, id: ActionId) -> SchedulerResult<FailureOutcome> {
        let action = self.action(id)?;
        let policy = action.on_failure();
        tracing::warn!("{} failed, policy {:?}", id, policy);

        if policy == OnFailure::Retry {
            let retries = {
                let mut state = action.state();
                state.retries += 1;
                state.retries
            };
            if retries <= self.config.max_retries {
                let candidates = self.finish(&action, ActionStatus::Registered);
                self.launch_all(candidates);
                self.schedule(id)?;
                return Ok(FailureOutcome::Retried);
            }
            tracing::error!("{}", SchedulerError::MaxRetriesExceeded(id));
        }

        let candidates = self.finish(&action, ActionStatus::Failed);
        match policy {
            OnFailure::Ignore => {
                let mut candidates = candidates;
                candidates.extend(self.release_data_successors(&action));
                Ok(FailureOutcome::Ignored(self.launch_all(candidates)))
            }
            OnFailure::CancelSuccessors => {
                let cancelled = self.cancel_successors(&action);
                self.launch_all(candidates);
                Ok(FailureOutcome::Cancelled(cancelled))
            }
            OnFailure::Retry | OnFailure::Fail => {
                let cancelled = self.cancel_successors(&action);
                self.launch_all(candidates);
                Ok(FailureOutcome::Failed(cancelled))
            }
        }
    }

    fn cancel_successors(&self, action: &Action) -> Vec<ActionId> {
        let mut cancelled = Vec::new();
        let mut queue: VecDeque<ActionId> = action.data_successors().into();
        let mut seen = BTreeSet::new();
        let mut candidates = Vec::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(succ) = self.graph.get(id) else {
                continue;
            };
            if succ.status().is_finished() {
                continue;
            }
            candidates.extend(self.finish(&succ, ActionStatus::Cancelled));
            self.blocked.lock().retain(|b| *b != id);
            cancelled.push(id);
            queue.extend(succ.data_successors());
        }
        candidates.retain(|c| !seen.contains(c));
        self.launch_all(candidates);
        cancelled
    }

    /// Cancel an action and, transitively, its data successors
    pub fn cancel_action(&self, id: ActionId) -> SchedulerResult<Vec<ActionId>> {
        let action = self.action(id)?;
        if action.status().is_finished() {
            return Ok(Vec::new());
        }
        let candidates = self.finish(&action, ActionStatus::Cancelled);
        self.blocked.lock().retain(|b| *b != id);
        let mut cancelled = vec![id];
        cancelled.extend(self.cancel_successors(&action));
        self.launch_all(candidates);
        tracing::info!("Cancelled {:?}", cancelled);
        Ok(cancelled)
    }

    /// Lifecycle status of an action
    pub fn status(&self, id: ActionId) -> SchedulerResult<ActionStatus> {
        Ok(self.action(id)?.status())
    }

    /// Worker an action is assigned to
    pub fn worker_of(&self, id: ActionId) -> SchedulerResult<Option<WorkerId>> {
        Ok(self.action(id)?.worker())
    }

    /// Snapshot of an action's scheduling info
    pub fn info(&self, id: ActionId) -> SchedulerResult<SchedulingInfo> {
        Ok(self.action(id)?.info())
    }

    /// Actions waiting for a compatible worker
    pub fn blocked_actions(&self) -> Vec<ActionId> {
        self.blocked.lock().clone()
    }

    /// Drop a finished action from the arena
    pub fn forget(&self, id: ActionId) -> bool {
        match self.graph.get(id) {
            Some(a) if a.status().is_finished() => self.graph.remove(id).is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugue_types::{CoreId, ImplementationId, ImplementationKind, NativeConfig, Profile};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Launch>>);

    impl ActionOrchestrator for Recorder {
        fn launch(&self, launch: Launch) {
            self.0.lock().push(launch);
        }
    }

    impl Recorder {
        fn launched(&self) -> Vec<ActionId> {
            self.0.lock().iter().map(|l| l.action).collect()
        }
    }

    fn implementation(cpus: u32) -> Implementation {
        Implementation::new(
            ImplementationId::new(1),
            CoreId::new(1),
            "f()",
            ResourceDescription::cpus(cpus),
            ImplementationKind::Native(NativeConfig {
                function: "f".into(),
                working_dir: None,
            }),
        )
    }

    fn setup() -> (Arc<Recorder>, TaskScheduler) {
        let recorder = Arc::new(Recorder::default());
        let ts = TaskScheduler::new(SchedulerConfig::default(), recorder.clone());
        (recorder, ts)
    }

    fn spec(cpus: u32) -> ActionSpec {
        ActionSpec::new(CoreId::new(1), vec![implementation(cpus)])
    }

    #[test]
    fn test_schedule_launches_free_action() {
        let (recorder, ts) = setup();
        let w = ts.add_worker("w1", ResourceDescription::cpus(4));
        let a = ts.new_action(spec(2));
        assert_eq!(ts.schedule(a.id()).unwrap(), w);
        assert_eq!(recorder.launched(), vec![a.id()]);
        assert_eq!(a.status(), ActionStatus::Running);
        assert_eq!(ts.worker(w).unwrap().available(), ResourceDescription::cpus(2));
    }

    #[test]
    fn test_data_dependency_holds_launch() {
        let (recorder, ts) = setup();
        ts.add_worker("w1", ResourceDescription::cpus(4));
        let a = ts.new_action(spec(1));
        let b = ts.new_action(spec(1));
        ts.add_data_dependency(a.id(), b.id()).unwrap();
        ts.schedule(a.id()).unwrap();
        ts.schedule(b.id()).unwrap();
        assert_eq!(recorder.launched(), vec![a.id()]);

        let launched = ts.action_completed(a.id(), 10).unwrap();
        assert_eq!(launched, vec![b.id()]);
        assert_eq!(ts.status(a.id()).unwrap(), ActionStatus::Completed);
    }

    #[test]
    fn test_resource_successor_launches_after_completion() {
        let (recorder, ts) = setup();
        ts.add_worker("w1", ResourceDescription::cpus(4));
        let a = ts.new_action(spec(4));
        let b = ts.new_action(spec(4));
        ts.schedule(a.id()).unwrap();
        ts.schedule(b.id()).unwrap();
        assert_eq!(recorder.launched(), vec![a.id()]);
        assert_eq!(ts.info(b.id()).unwrap().predecessors(), &[a.id()]);

        ts.action_completed(a.id(), 30).unwrap();
        assert_eq!(recorder.launched(), vec![a.id(), b.id()]);
    }

    #[test]
    fn test_launch_freed_starts_unblocked_successor() {
        let (recorder, ts) = setup();
        let w = ts.add_worker("w1", ResourceDescription::cpus(1));
        let a = ts.new_action(spec(1));
        let b = ts.new_action(spec(1));
        ts.schedule_on(a.id(), w, implementation(1)).unwrap();
        ts.schedule_on(b.id(), w, implementation(1)).unwrap();
        assert_eq!(ts.info(b.id()).unwrap().predecessors(), &[a.id()]);

        let freed = ts.worker(w).unwrap().unschedule_action(&a);
        assert_eq!(ts.launch_freed(freed), vec![b.id()]);
        assert_eq!(recorder.launched(), vec![b.id()]);
    }

    #[test]
    fn test_data_ready_is_latest_scheduled_predecessor_end() {
        let (_, ts) = setup();
        let w = ts.add_worker("w1", ResourceDescription::cpus(2));
        ts.worker(w)
            .unwrap()
            .set_profile(CoreId::new(1), ImplementationId::new(1), Profile::with_average(100));
        let a = ts.new_action(spec(2));
        let b = ts.new_action(spec(2));
        let c = ts.new_action(spec(1));
        ts.add_data_dependency(a.id(), c.id()).unwrap();
        ts.add_data_dependency(b.id(), c.id()).unwrap();
        assert_eq!(ts.data_ready(&c), 0);

        ts.schedule_on(a.id(), w, implementation(2)).unwrap();
        ts.schedule_on(b.id(), w, implementation(2)).unwrap();
        assert_eq!(ts.data_ready(&c), 200);
    }

    #[test]
    fn test_best_worker_by_score() {
        let (_, ts) = setup();
        let busy = ts.add_worker("busy", ResourceDescription::cpus(2));
        let idle = ts.add_worker("idle", ResourceDescription::cpus(2));
        ts.worker(busy)
            .unwrap()
            .set_profile(CoreId::new(1), ImplementationId::new(1), Profile::with_average(100));
        let first = ts.new_action(spec(2));
        ts.schedule_on(first.id(), busy, implementation(2)).unwrap();

        let second = ts.new_action(spec(2));
        assert_eq!(ts.schedule(second.id()).unwrap(), idle);
    }

    #[test]
    fn test_blocked_action_waits_for_worker() {
        let (recorder, ts) = setup();
        ts.add_worker("small", ResourceDescription::cpus(1));
        let a = ts.new_action(spec(8));
        assert!(matches!(
            ts.schedule(a.id()),
            Err(SchedulerError::BlockedAction(_))
        ));
        assert_eq!(ts.blocked_actions(), vec![a.id()]);

        ts.add_worker("big", ResourceDescription::cpus(8));
        assert!(ts.blocked_actions().is_empty());
        assert_eq!(recorder.launched(), vec![a.id()]);
    }

    #[test]
    fn test_retry_then_fail() {
        let recorder = Arc::new(Recorder::default());
        let config = SchedulerConfig {
            max_retries: 1,
            ..SchedulerConfig::default()
        };
        let ts = TaskScheduler::new(config, recorder.clone());
        ts.add_worker("w1", ResourceDescription::cpus(4));
        let a = ts.new_action(spec(1));
        let b = ts.new_action(spec(1));
        ts.add_data_dependency(a.id(), b.id()).unwrap();
        ts.schedule(a.id()).unwrap();
        ts.schedule(b.id()).unwrap();

        assert_eq!(ts.action_failed(a.id()).unwrap(), FailureOutcome::Retried);
        assert_eq!(recorder.launched(), vec![a.id(), a.id()]);
        assert_eq!(
            ts.action_failed(a.id()).unwrap(),
            FailureOutcome::Failed(vec![b.id()])
        );
        assert_eq!(ts.status(b.id()).unwrap(), ActionStatus::Cancelled);
        assert_eq!(ts.worker(WorkerId::new(1)).unwrap().available(), ResourceDescription::cpus(4));
    }

    #[test]
    fn test_ignore_policy_releases_successors() {
        let (recorder, ts) = setup();
        ts.add_worker("w1", ResourceDescription::cpus(4));
        let a = ts.new_action(spec(1).with_on_failure(OnFailure::Ignore));
        let b = ts.new_action(spec(1));
        ts.add_data_dependency(a.id(), b.id()).unwrap();
        ts.schedule(a.id()).unwrap();
        ts.schedule(b.id()).unwrap();

        assert_eq!(
            ts.action_failed(a.id()).unwrap(),
            FailureOutcome::Ignored(vec![b.id()])
        );
        assert_eq!(recorder.launched(), vec![a.id(), b.id()]);
    }

    #[test]
    fn test_cancel_is_transitive() {
        let (_, ts) = setup();
        ts.add_worker("w1", ResourceDescription::cpus(4));
        let a = ts.new_action(spec(1));
        let b = ts.new_action(spec(1));
        let c = ts.new_action(spec(1));
        ts.add_data_dependency(a.id(), b.id()).unwrap();
        ts.add_data_dependency(b.id(), c.id()).unwrap();
        for x in [&a, &b, &c] {
            ts.schedule(x.id()).unwrap();
        }

        let cancelled = ts.cancel_action(a.id()).unwrap();
        assert_eq!(cancelled, vec![a.id(), b.id(), c.id()]);
        assert!(ts.forget(c.id()));
        assert!(ts.cancel_action(b.id()).unwrap().is_empty());
    }

    #[test]
    fn test_remove_worker_moves_pending() {
        let (_, ts) = setup();
        let w1 = ts.add_worker("w1", ResourceDescription::cpus(1));
        let a = ts.new_action(spec(1));
        let b = ts.new_action(spec(1));
        ts.schedule_on(a.id(), w1, implementation(1)).unwrap();
        ts.try_to_launch(a.id()).unwrap();
        ts.schedule_on(b.id(), w1, implementation(1)).unwrap();

        let w2 = ts.add_worker("w2", ResourceDescription::cpus(1));
        let lost = ts.remove_worker(w1).unwrap();
        assert_eq!(lost, vec![a.id()]);
        assert_eq!(ts.worker_of(b.id()).unwrap(), Some(w2));
        assert!(matches!(ts.remove_worker(w1), Err(SchedulerError::WorkerNotFound(_))));
    }
}
