//! Actions and their scheduling metadata
//!
//! Actions live in an [`ActionGraph`] arena and refer to each other by
//! [`ActionId`]. Two kinds of edges connect them:
//! - data edges (`data_preds`/`data_succs`), fixed when the task graph is built
//! - resource edges (`SchedulingInfo::predecessors`/`successors`), created by the
//!   gap timeline of the worker the action is scheduled on
//!
//! Resource edges are protected by a re-entrant lock per action. Code that
//! touches several actions at once acquires them through [`lock_group`], which
//! never blocks while holding a partial set.

use dashmap::DashMap;
use fugue_types::{
    ActionId, CoreId, Implementation, OnFailure, ResourceDescription, TaskId, WorkerId,
};
use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use rand::Rng;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of an action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionStatus {
    /// Created, not yet placed on a worker
    Registered,
    /// Placed on a worker timeline, waiting to launch
    Scheduled,
    /// Handed to the orchestrator
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Aborted before completion
    Cancelled,
}

impl ActionStatus {
    /// Whether the action reached a final state
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Cancelled
        )
    }
}

/// Everything needed to create an action
#[derive(Clone, Debug)]
pub struct ActionSpec {
    /// Core element invoked
    pub core: CoreId,
    /// Candidate implementations
    pub implementations: Vec<Implementation>,
    /// Higher runs first
    pub priority: i32,
    /// Lower runs first among equal priorities
    pub group_priority: i64,
    /// Policy applied when the action fails
    pub on_failure: OnFailure,
    /// Task this action executes, if any
    pub task: Option<TaskId>,
}

impl ActionSpec {
    /// Description with default priorities and the default failure policy
    pub fn new(core: CoreId, implementations: Vec<Implementation>) -> Self {
        Self {
            core,
            implementations,
            priority: 0,
            group_priority: 0,
            on_failure: OnFailure::default(),
            task: None,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the group priority
    pub fn with_group_priority(mut self, group_priority: i64) -> Self {
        self.group_priority = group_priority;
        self
    }

    /// Set the failure policy
    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// Attach the task executed by the action
    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }
}

/// Timeline placement of an action
#[derive(Clone, Debug, Default)]
pub struct SchedulingInfo {
    pub(crate) scheduled: bool,
    pub(crate) expected_start: u64,
    pub(crate) expected_end: u64,
    pub(crate) predecessors: Vec<ActionId>,
    pub(crate) successors: Vec<ActionId>,
    pub(crate) on_optimization: bool,
}

impl SchedulingInfo {
    /// Whether the action occupies a timeline
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Expected start time (ms)
    pub fn expected_start(&self) -> u64 {
        self.expected_start
    }

    /// Expected end time (ms)
    pub fn expected_end(&self) -> u64 {
        self.expected_end
    }

    /// Resource predecessors
    pub fn predecessors(&self) -> &[ActionId] {
        &self.predecessors
    }

    /// Resource successors
    pub fn successors(&self) -> &[ActionId] {
        &self.successors
    }

    /// Whether a local optimization currently owns the action
    pub fn is_on_optimization(&self) -> bool {
        self.on_optimization
    }

    pub(crate) fn add_predecessor(&mut self, id: ActionId) {
        if !self.predecessors.contains(&id) {
            self.predecessors.push(id);
        }
    }

    pub(crate) fn add_successor(&mut self, id: ActionId) {
        if !self.successors.contains(&id) {
            self.successors.push(id);
        }
    }
}

#[derive(Debug)]
pub(crate) struct ActionState {
    pub(crate) status: ActionStatus,
    pub(crate) worker: Option<WorkerId>,
    pub(crate) implementation: Option<Implementation>,
    pub(crate) data_preds: BTreeSet<ActionId>,
    pub(crate) data_succs: BTreeSet<ActionId>,
    pub(crate) launched_at: Option<u64>,
    pub(crate) retries: u32,
}

/// A schedulable unit of work
#[derive(Debug)]
pub struct Action {
    id: ActionId,
    spec: ActionSpec,
    state: Mutex<ActionState>,
    sched: ReentrantMutex<RefCell<SchedulingInfo>>,
}

impl Action {
    /// Create an unscheduled action
    pub fn new(id: ActionId, spec: ActionSpec) -> Self {
        Self {
            id,
            spec,
            state: Mutex::new(ActionState {
                status: ActionStatus::Registered,
                worker: None,
                implementation: None,
                data_preds: BTreeSet::new(),
                data_succs: BTreeSet::new(),
                launched_at: None,
                retries: 0,
            }),
            sched: ReentrantMutex::new(RefCell::new(SchedulingInfo::default())),
        }
    }

    /// Action identifier
    pub fn id(&self) -> ActionId {
        self.id
    }

    /// Core element invoked
    pub fn core(&self) -> CoreId {
        self.spec.core
    }

    /// Priority (higher first)
    pub fn priority(&self) -> i32 {
        self.spec.priority
    }

    /// Group priority (lower first)
    pub fn group_priority(&self) -> i64 {
        self.spec.group_priority
    }

    /// Failure policy
    pub fn on_failure(&self) -> OnFailure {
        self.spec.on_failure
    }

    /// Task executed by the action
    pub fn task(&self) -> Option<TaskId> {
        self.spec.task
    }

    /// Candidate implementations
    pub fn implementations(&self) -> &[Implementation] {
        &self.spec.implementations
    }

    /// Implementations whose requirements fit in `total`
    pub fn compatible_implementations(&self, total: &ResourceDescription) -> Vec<&Implementation> {
        self.spec
            .implementations
            .iter()
            .filter(|i| total.can_host_dynamic(&i.requirements))
            .collect()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ActionState> {
        self.state.lock()
    }

    /// Current lifecycle status
    pub fn status(&self) -> ActionStatus {
        self.state.lock().status
    }

    /// Worker the action is assigned to
    pub fn worker(&self) -> Option<WorkerId> {
        self.state.lock().worker
    }

    /// Implementation chosen for the action
    pub fn implementation(&self) -> Option<Implementation> {
        self.state.lock().implementation.clone()
    }

    /// Unfinished data predecessors
    pub fn data_predecessors(&self) -> Vec<ActionId> {
        self.state.lock().data_preds.iter().copied().collect()
    }

    /// Data successors
    pub fn data_successors(&self) -> Vec<ActionId> {
        self.state.lock().data_succs.iter().copied().collect()
    }

    /// Whether some data predecessor has not finished
    pub fn has_data_predecessors(&self) -> bool {
        !self.state.lock().data_preds.is_empty()
    }

    /// Launch timestamp (ms)
    pub fn launched_at(&self) -> Option<u64> {
        self.state.lock().launched_at
    }

    /// Failed attempts so far
    pub fn retries(&self) -> u32 {
        self.state.lock().retries
    }

    /// Run `f` with exclusive access to the scheduling info.
    ///
    /// Re-entrant with respect to [`lock_group`]; must not be nested for the
    /// same action.
    pub fn with_info<R>(&self, f: impl FnOnce(&mut SchedulingInfo) -> R) -> R {
        let guard = self.sched.lock();
        let mut info = guard.borrow_mut();
        f(&mut info)
    }

    /// Snapshot of the scheduling info
    pub fn info(&self) -> SchedulingInfo {
        self.with_info(|i| i.clone())
    }
}

/// Locks held on a set of actions; released on drop
pub(crate) struct LockedGroup<'a> {
    _guards: Vec<ReentrantMutexGuard<'a, RefCell<SchedulingInfo>>>,
}

const LOCK_ATTEMPT: Duration = Duration::from_millis(1);

/// Lock every action of `groups`, in order, all or nothing.
///
/// Each lock is tried for 1ms; on contention every lock taken so far is
/// released and the whole set is retried after a jittered backoff.
pub(crate) fn lock_group<'a>(groups: &[&'a [Arc<Action>]]) -> LockedGroup<'a> {
    let mut seen = BTreeSet::new();
    let ordered: Vec<&'a Action> = groups
        .iter()
        .flat_map(|g| g.iter())
        .filter(|a| seen.insert(a.id))
        .map(|a| a.as_ref())
        .collect();

    let mut attempt = 0u32;
    loop {
        let mut guards = Vec::with_capacity(ordered.len());
        for action in &ordered {
            match action.sched.try_lock_for(LOCK_ATTEMPT) {
                Some(guard) => guards.push(guard),
                None => break,
            }
        }
        if guards.len() == ordered.len() {
            return LockedGroup { _guards: guards };
        }
        drop(guards);
        attempt += 1;
        let backoff = rand::thread_rng().gen_range(0..=attempt.min(8));
        tracing::trace!("Lock contention on {} actions, retry #{}", ordered.len(), attempt);
        std::thread::sleep(Duration::from_millis(backoff as u64));
    }
}

/// Arena of every live action
#[derive(Debug, Default)]
pub struct ActionGraph {
    actions: DashMap<ActionId, Arc<Action>>,
}

impl ActionGraph {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action
    pub fn insert(&self, action: Arc<Action>) {
        self.actions.insert(action.id(), action);
    }

    /// Look up an action
    pub fn get(&self, id: ActionId) -> Option<Arc<Action>> {
        self.actions.get(&id).map(|a| Arc::clone(a.value()))
    }

    /// Look up several actions, skipping unknown ids
    pub fn get_all(&self, ids: &[ActionId]) -> Vec<Arc<Action>> {
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    /// Remove an action
    pub fn remove(&self, id: ActionId) -> Option<Arc<Action>> {
        self.actions.remove(&id).map(|(_, a)| a)
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when there are no actions
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugue_types::{ImplementationId, ImplementationKind, NativeConfig};

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

    fn action(id: u64) -> Arc<Action> {
        Arc::new(Action::new(
            ActionId::new(id),
            ActionSpec::new(CoreId::new(1), vec![implementation(2)]),
        ))
    }

    #[test]
    fn test_with_info_is_reentrant_under_group_lock() {
        let a = action(1);
        let b = action(2);
        let group = [Arc::clone(&a), Arc::clone(&b)];
        let _locks = lock_group(&[&group]);

        a.with_info(|i| i.add_successor(b.id()));
        b.with_info(|i| i.add_predecessor(a.id()));
        assert_eq!(a.info().successors(), &[b.id()]);
        assert_eq!(b.info().predecessors(), &[a.id()]);
    }

    #[test]
    fn test_lock_group_waits_for_other_thread() {
        let a = action(1);
        let holder = Arc::clone(&a);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || {
            let group = [holder];
            let _locks = lock_group(&[&group]);
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        });

        locked_rx.recv().unwrap();
        let group = [Arc::clone(&a)];
        let _locks = lock_group(&[&group]);
        handle.join().unwrap();
    }

    #[test]
    fn test_compatible_implementations() {
        let a = action(1);
        assert_eq!(a.compatible_implementations(&ResourceDescription::cpus(4)).len(), 1);
        assert!(a.compatible_implementations(&ResourceDescription::cpus(1)).is_empty());
    }

    #[test]
    fn test_spec_builder() {
        let spec = ActionSpec::new(CoreId::new(2), Vec::new())
            .with_priority(5)
            .with_group_priority(-1)
            .with_on_failure(OnFailure::Ignore)
            .with_task(TaskId::new(9));
        let a = Action::new(ActionId::new(3), spec);
        assert_eq!(a.priority(), 5);
        assert_eq!(a.group_priority(), -1);
        assert_eq!(a.on_failure(), OnFailure::Ignore);
        assert_eq!(a.task(), Some(TaskId::new(9)));
        assert_eq!(a.status(), ActionStatus::Registered);
    }
}
