//! Per-worker resource scheduler
//!
//! Each worker owns a gap [`Timeline`]. Scheduling an action takes its
//! requirements out of the gaps closest to its expected start; every action
//! whose released resources are consumed this way becomes a resource
//! predecessor of the new one. The action then releases the same resources
//! at its expected end, which becomes a new gap.
//!
//! Lock order: the timeline lock is taken before any action lock, never after.

use crate::action::{lock_group, Action, ActionGraph, ActionStatus};
use crate::error::{SchedulerError, SchedulerResult};
use crate::gap::{Gap, Timeline};
use fugue_types::{
    ActionId, CoreId, Implementation, ImplementationId, Profile, ResourceDescription, WorkerId,
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub(crate) struct TimelineState {
    pub(crate) timeline: Timeline,
    /// Actions parked while a local optimization owns the timeline
    pub(crate) barrier: Option<Vec<ActionId>>,
}

/// Resource scheduler of one worker
pub struct ResourceScheduler {
    worker: WorkerId,
    name: String,
    total: ResourceDescription,
    graph: Arc<ActionGraph>,
    state: Mutex<TimelineState>,
    profiles: RwLock<HashMap<(CoreId, ImplementationId), Profile>>,
    available: Mutex<ResourceDescription>,
    hosted: Mutex<BTreeSet<ActionId>>,
}

impl ResourceScheduler {
    /// Create the scheduler of a worker offering `total`
    pub fn new(
        worker: WorkerId,
        name: impl Into<String>,
        total: ResourceDescription,
        graph: Arc<ActionGraph>,
    ) -> Self {
        Self {
            worker,
            name: name.into(),
            total,
            graph,
            state: Mutex::new(TimelineState {
                timeline: Timeline::new(0, total),
                barrier: None,
            }),
            profiles: RwLock::new(HashMap::new()),
            available: Mutex::new(total),
            hosted: Mutex::new(BTreeSet::new()),
        }
    }

    /// Worker identifier
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Worker host name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resources the worker offers
    pub fn total(&self) -> ResourceDescription {
        self.total
    }

    pub(crate) fn graph(&self) -> &Arc<ActionGraph> {
        &self.graph
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, TimelineState> {
        self.state.lock()
    }

    // ==================== Resource accounting ====================

    /// Take resources for a real launch; false if they are not free
    pub fn reserve(&self, requirements: &ResourceDescription) -> bool {
        let mut available = self.available.lock();
        if !available.can_host_dynamic(requirements) {
            return false;
        }
        available.reduce_dynamic(requirements);
        true
    }

    /// Give back resources of a finished launch
    pub fn release(&self, requirements: &ResourceDescription) {
        self.available.lock().increase_dynamic(requirements);
    }

    /// Resources not used by running actions
    pub fn available(&self) -> ResourceDescription {
        *self.available.lock()
    }

    // ==================== Profiles ====================

    /// Average runtime of an implementation here, 0 if it never ran
    pub fn profile_avg(&self, core: CoreId, implementation: ImplementationId) -> u64 {
        self.profiles
            .read()
            .get(&(core, implementation))
            .map(|p| p.average_execution_time())
            .unwrap_or(0)
    }

    /// Profile of an implementation here
    pub fn profile(&self, core: CoreId, implementation: ImplementationId) -> Option<Profile> {
        self.profiles.read().get(&(core, implementation)).copied()
    }

    /// Replace the profile of an implementation
    pub fn set_profile(&self, core: CoreId, implementation: ImplementationId, profile: Profile) {
        self.profiles.write().insert((core, implementation), profile);
    }

    /// Account a measured execution
    pub fn update_profile(&self, core: CoreId, implementation: ImplementationId, elapsed_ms: u64) {
        self.profiles
            .write()
            .entry((core, implementation))
            .or_default()
            .accumulate(elapsed_ms);
    }

    // ==================== Hosted actions ====================

    /// Actions assigned to this worker
    pub fn hosted_actions(&self) -> Vec<ActionId> {
        self.hosted.lock().iter().copied().collect()
    }

    /// Whether `id` is assigned to this worker
    pub fn hosts(&self, id: ActionId) -> bool {
        self.hosted.lock().contains(&id)
    }

    // ==================== Timeline queries ====================

    /// Copy of the current timeline
    pub fn timeline(&self) -> Timeline {
        self.state.lock().timeline.clone()
    }

    /// Start of the latest gap; the donation indicator
    pub fn last_gap_start(&self) -> u64 {
        self.state.lock().timeline.last_gap_start()
    }

    /// Earliest time `requirements` fit on the timeline
    pub fn earliest_start(&self, requirements: &ResourceDescription) -> u64 {
        let state = self.state.lock();
        state
            .timeline
            .earliest_fit(requirements)
            .unwrap_or_else(|| state.timeline.last_gap_start())
    }

    /// Whether a local optimization currently owns the timeline
    pub fn is_optimizing(&self) -> bool {
        self.state.lock().barrier.is_some()
    }

    // ==================== Scheduling ====================

    /// Place `action` on this worker running `implementation`.
    ///
    /// While a local optimization is in progress the action is parked and
    /// placed once the optimization installs its timeline.
    pub fn schedule_action(
        &self,
        action: &Arc<Action>,
        implementation: Implementation,
    ) -> SchedulerResult<()> {
        {
            let mut state = action.state();
            state.worker = Some(self.worker);
            state.implementation = Some(implementation);
            state.status = ActionStatus::Scheduled;
        }
        self.hosted.lock().insert(action.id());

        let mut state = self.state.lock();
        if let Some(parked) = state.barrier.as_mut() {
            tracing::debug!("{} parked on {} during optimization", action.id(), self.name);
            parked.push(action.id());
            return Ok(());
        }
        self.schedule_using_gaps(&mut state, action)
    }

    /// Timeline placement proper; the caller holds the timeline lock
    pub(crate) fn schedule_using_gaps(
        &self,
        state: &mut TimelineState,
        action: &Arc<Action>,
    ) -> SchedulerResult<()> {
        let implementation = action
            .implementation()
            .ok_or(SchedulerError::UnassignedAction(action.id()))?;
        let requirements = implementation.requirements;
        let duration = self.profile_avg(action.core(), implementation.id);

        let mut expected_start = 0;
        for pred in self.graph.get_all(&action.data_predecessors()) {
            let (scheduled, end) = pred.with_info(|i| (i.scheduled, i.expected_end));
            if scheduled {
                expected_start = expected_start.max(end);
            }
        }

        // resources released by data successors would close a cycle
        let descendants = self.data_descendants(action);
        let (origins, missing) = state.timeline.reserve_where(expected_start, &requirements, |o| {
            o.map_or(true, |id| !descendants.contains(&id))
        });
        let mut released = requirements;
        if !missing.is_dynamic_useless() {
            tracing::warn!(
                "{} on {}: timeline could not cover {}",
                action.id(),
                self.name,
                missing
            );
            released.reduce_dynamic(&missing);
        }
        let mut seen = BTreeSet::new();
        let pred_ids: Vec<ActionId> = origins
            .into_iter()
            .flatten()
            .filter(|id| *id != action.id() && seen.insert(*id))
            .collect();
        let preds = self.graph.get_all(&pred_ids);

        let expected_end = {
            let me = [Arc::clone(action)];
            let _locks = lock_group(&[&preds, &me]);
            let mut start = expected_start;
            let mut linked = Vec::new();
            for pred in &preds {
                let end = pred.with_info(|i| {
                    if !i.scheduled {
                        return None;
                    }
                    i.add_successor(action.id());
                    Some(i.expected_end)
                });
                if let Some(end) = end {
                    start = start.max(end);
                    linked.push(pred.id());
                }
            }
            action.with_info(|i| {
                for id in linked {
                    i.add_predecessor(id);
                }
                i.scheduled = true;
                i.expected_start = start;
                i.expected_end = start + duration;
                tracing::debug!(
                    "{} scheduled on {} at <{}, {}> after {:?}",
                    action.id(),
                    self.name,
                    i.expected_start,
                    i.expected_end,
                    i.predecessors
                );
                i.expected_end
            })
        };

        state
            .timeline
            .add_gap(Gap::new(expected_end, Some(action.id()), released));
        Ok(())
    }

    fn data_descendants(&self, action: &Action) -> BTreeSet<ActionId> {
        let mut seen = BTreeSet::new();
        let mut stack = action.data_successors();
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                if let Some(succ) = self.graph.get(id) {
                    stack.extend(succ.data_successors());
                }
            }
        }
        seen
    }

    /// Remove `action` from the timeline links.
    ///
    /// Successors inherit the predecessors of the removed action. Returns
    /// the successors left without any resource predecessor.
    pub fn unschedule_action(&self, action: &Arc<Action>) -> Vec<Arc<Action>> {
        self.hosted.lock().remove(&action.id());

        let freed = loop {
            let (pred_ids, succ_ids) = action.with_info(|i| (i.predecessors.clone(), i.successors.clone()));
            let preds = self.graph.get_all(&pred_ids);
            let succs = self.graph.get_all(&succ_ids);
            let me = [Arc::clone(action)];
            let _locks = lock_group(&[&preds, &me, &succs]);

            let stable = action.with_info(|i| i.predecessors == pred_ids && i.successors == succ_ids);
            if !stable {
                continue;
            }

            for pred in &preds {
                pred.with_info(|i| i.successors.retain(|s| *s != action.id()));
            }
            let live_preds: Vec<&Arc<Action>> = preds
                .iter()
                .filter(|p| p.with_info(|i| i.scheduled))
                .collect();

            let mut freed = Vec::new();
            for succ in &succs {
                let empty = succ.with_info(|i| {
                    i.predecessors.retain(|p| *p != action.id());
                    for pred in &live_preds {
                        i.add_predecessor(pred.id());
                    }
                    i.predecessors.is_empty()
                });
                for pred in &live_preds {
                    pred.with_info(|i| i.add_successor(succ.id()));
                }
                if empty {
                    freed.push(Arc::clone(succ));
                }
            }

            action.with_info(|i| {
                i.predecessors.clear();
                i.successors.clear();
                i.scheduled = false;
            });
            break freed;
        };

        tracing::debug!(
            "{} unscheduled from {}, {} successors freed",
            action.id(),
            self.name,
            freed.len()
        );
        freed
    }

    /// Forget every action hosted here; returns them
    pub fn drain_hosted(&self) -> Vec<ActionId> {
        std::mem::take(&mut *self.hosted.lock()).into_iter().collect()
    }
}

impl std::fmt::Debug for ResourceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceScheduler")
            .field("worker", &self.worker)
            .field("name", &self.name)
            .field("total", &self.total)
            .finish()
    }
}
