//! Local optimization of one worker's timeline
//!
//! The optimization rebuilds a worker's timeline from scratch by simulating
//! its hosted actions from `now` on:
//! - running actions hold their resources until their expected end
//! - actions whose unfinished data predecessors are hosted on the same worker
//!   wait for the simulated end of those predecessors
//! - actions waiting only on other workers become selectable once the
//!   latest of those predecessors is expected to end
//! - selectable actions start in selection order as soon as they fit; when the
//!   best one does not fit, another core's head that ends before the best
//!   one could start is back-filled into the idle interval
//!
//! While the simulation runs, a barrier parks any action scheduled on the
//! worker; parked actions are placed once the new timeline is installed.

use crate::action::{lock_group, Action, ActionStatus};
use crate::comparators::{self, ActionKey};
use crate::gap::{Gap, Timeline};
use crate::priority_set::PriorityActionSet;
use crate::resource_scheduler::ResourceScheduler;
use fugue_types::{ActionId, CoreId, ResourceDescription};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;

/// Kind of a simulated event; ends sort before starts at the same time
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    /// An action releases its resources
    End,
    /// An action becomes selectable
    Start,
}

/// A simulated event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchedulingEvent {
    /// Simulated time (ms)
    pub time: u64,
    /// What happens
    pub kind: EventKind,
    /// Action concerned
    pub action: ActionId,
}

/// Result of a local optimization
#[derive(Clone, Debug, Default)]
pub struct OptimizationOutcome {
    /// Pending actions, most costly first
    pub donation_candidates: Vec<ActionKey>,
    /// Actions left without resource predecessors
    pub launchable: Vec<ActionId>,
    /// Start of the latest gap of the new timeline
    pub indicator: u64,
}

#[derive(Clone)]
struct SimAction {
    key: ActionKey,
    core: CoreId,
    requirements: ResourceDescription,
    duration: u64,
}

struct Blocked {
    sim: SimAction,
    pending: usize,
    external_ready: u64,
}

struct Plan {
    start: u64,
    end: u64,
    predecessors: Vec<ActionId>,
}

struct Simulation {
    timeline: Timeline,
    events: BinaryHeap<Reverse<SchedulingEvent>>,
    selectable: PriorityActionSet<SimAction>,
    waiting: HashMap<ActionId, SimAction>,
    plans: BTreeMap<ActionId, Plan>,
}

fn by_selection(a: &SimAction, b: &SimAction) -> std::cmp::Ordering {
    comparators::selection(&a.key, &b.key)
}

impl Simulation {
    fn new(now: u64, total: ResourceDescription) -> Self {
        Self {
            timeline: Timeline::new(now, total),
            events: BinaryHeap::new(),
            selectable: PriorityActionSet::new(by_selection),
            waiting: HashMap::new(),
            plans: BTreeMap::new(),
        }
    }

    fn occupy(&mut self, sim: &SimAction, start: u64, end: u64) -> Vec<ActionId> {
        let (origins, _) = self.timeline.reserve(start, &sim.requirements);
        let mut seen = BTreeSet::new();
        let predecessors = origins
            .into_iter()
            .flatten()
            .filter(|id| *id != sim.key.id && seen.insert(*id))
            .collect();
        self.timeline
            .add_gap(Gap::new(end, Some(sim.key.id), sim.requirements));
        self.events.push(Reverse(SchedulingEvent {
            time: end,
            kind: EventKind::End,
            action: sim.key.id,
        }));
        predecessors
    }

    fn start(&mut self, sim: SimAction, time: u64) {
        let end = time + sim.duration;
        let predecessors = self.occupy(&sim, time, end);
        self.plans.insert(
            sim.key.id,
            Plan {
                start: time,
                end,
                predecessors,
            },
        );
    }

    fn make_ready(&mut self, sim: SimAction, at: u64) {
        self.events.push(Reverse(SchedulingEvent {
            time: at,
            kind: EventKind::Start,
            action: sim.key.id,
        }));
        self.waiting.insert(sim.key.id, sim);
    }

    /// Start whatever fits at `time`
    fn fill(&mut self, time: u64) {
        loop {
            let Some(wanted) = self.selectable.peek().map(|top| top.requirements) else {
                break;
            };
            let free = self.timeline.free_at(time);
            if free.can_host_dynamic(&wanted) {
                if let Some(sim) = self.selectable.poll() {
                    self.start(sim, time);
                }
                continue;
            }

            let limit = self.timeline.earliest_fit(&wanted).unwrap_or(time);
            let filler = self
                .selectable
                .peek_all()
                .into_iter()
                .skip(1)
                .find(|c| free.can_host_dynamic(&c.requirements) && time + c.duration <= limit)
                .map(|c| c.core);
            match filler.and_then(|core| self.selectable.remove_first(core)) {
                Some(sim) => self.start(sim, time),
                None => break,
            }
        }
    }
}

impl ResourceScheduler {
    /// Rebuild this worker's timeline by simulating its actions from `now`
    pub fn local_optimization(&self, now: u64) -> OptimizationOutcome {
        {
            let mut state = self.lock_state();
            if state.barrier.is_some() {
                return OptimizationOutcome::default();
            }
            state.barrier = Some(Vec::new());
        }

        let hosted = self.graph().get_all(&self.hosted_actions());
        let hosted_ids: BTreeSet<ActionId> = hosted.iter().map(|a| a.id()).collect();
        let mut sim = Simulation::new(now, self.total());

        let mut running = Vec::new();
        let mut pending: Vec<(Arc<Action>, SimAction, Vec<ActionId>, Vec<ActionId>)> = Vec::new();
        for action in &hosted {
            let (status, implementation, launched_at, data_preds) = {
                let state = action.state();
                (
                    state.status,
                    state.implementation.clone(),
                    state.launched_at,
                    state.data_preds.iter().copied().collect::<Vec<_>>(),
                )
            };
            let Some(implementation) = implementation else {
                continue;
            };
            let duration = self.profile_avg(action.core(), implementation.id);
            let (scheduled, expected_start) = action.with_info(|i| (i.scheduled, i.expected_start));
            let sim_action = SimAction {
                key: ActionKey {
                    id: action.id(),
                    priority: action.priority(),
                    expected_start,
                    expected_end: expected_start + duration,
                },
                core: action.core(),
                requirements: implementation.requirements,
                duration,
            };
            match status {
                ActionStatus::Running => {
                    let end = launched_at.map(|l| l + duration).unwrap_or(now).max(now);
                    running.push((sim_action, end));
                }
                ActionStatus::Scheduled if scheduled => {
                    action.with_info(|i| i.on_optimization = true);
                    let (internal, external): (Vec<ActionId>, Vec<ActionId>) = data_preds
                        .into_iter()
                        .partition(|p| hosted_ids.contains(p));
                    pending.push((Arc::clone(action), sim_action, internal, external));
                }
                _ => {}
            }
        }
        pending.sort_by(|a, b| comparators::scan(&a.1.key, &b.1.key));

        for (sim_action, end) in &running {
            sim.occupy(sim_action, now, *end);
            sim.plans.insert(
                sim_action.key.id,
                Plan {
                    start: now.min(*end),
                    end: *end,
                    predecessors: Vec::new(),
                },
            );
        }

        let mut leftovers = Vec::new();
        let mut dependents: HashMap<ActionId, Vec<ActionId>> = HashMap::new();
        let mut blocked: HashMap<ActionId, Blocked> = HashMap::new();
        for (action, sim_action, internal, external) in pending {
            let mut external_ready = now;
            let mut unplaced = false;
            for pred in self.graph().get_all(&external) {
                let (scheduled, end) = pred.with_info(|i| (i.scheduled, i.expected_end));
                if scheduled {
                    external_ready = external_ready.max(end);
                } else if !pred.status().is_finished() {
                    unplaced = true;
                }
            }
            if unplaced {
                leftovers.push(action);
                continue;
            }
            if !internal.is_empty() {
                for pred in &internal {
                    dependents.entry(*pred).or_default().push(sim_action.key.id);
                }
                blocked.insert(
                    sim_action.key.id,
                    Blocked {
                        sim: sim_action,
                        pending: internal.len(),
                        external_ready,
                    },
                );
            } else if external_ready > now {
                sim.make_ready(sim_action, external_ready);
            } else {
                sim.selectable.offer(sim_action.core, sim_action);
            }
        }

        sim.fill(now);
        while let Some(Reverse(event)) = sim.events.pop() {
            match event.kind {
                EventKind::End => {
                    for dep in dependents.remove(&event.action).unwrap_or_default() {
                        let Some(entry) = blocked.get_mut(&dep) else {
                            continue;
                        };
                        entry.pending -= 1;
                        if entry.pending == 0 {
                            if let Some(b) = blocked.remove(&dep) {
                                let at = b.external_ready.max(event.time);
                                sim.make_ready(b.sim, at);
                            }
                        }
                    }
                }
                EventKind::Start => {
                    if let Some(s) = sim.waiting.remove(&event.action) {
                        sim.selectable.offer(s.core, s);
                    }
                }
            }
            sim.fill(event.time);
        }

        let unplanned: BTreeSet<ActionId> = blocked
            .into_keys()
            .chain(sim.selectable.drain().into_iter().map(|s| s.key.id))
            .collect();
        leftovers.extend(hosted.iter().filter(|a| unplanned.contains(&a.id())).cloned());

        self.install(now, hosted, sim, leftovers)
    }

    fn install(
        &self,
        now: u64,
        hosted: Vec<Arc<Action>>,
        sim: Simulation,
        leftovers: Vec<Arc<Action>>,
    ) -> OptimizationOutcome {
        let Simulation {
            timeline, plans, ..
        } = sim;
        let leftover_ids: BTreeSet<ActionId> = leftovers.iter().map(|a| a.id()).collect();
        let mut outcome = OptimizationOutcome::default();
        // statuses are read before taking the scheduling locks
        let running: BTreeSet<ActionId> = hosted
            .iter()
            .filter(|a| a.status() == ActionStatus::Running)
            .map(|a| a.id())
            .collect();

        {
            let _locks = lock_group(&[&hosted]);
            let installed: BTreeSet<ActionId> = hosted
                .iter()
                .filter(|a| plans.contains_key(&a.id()) && a.with_info(|i| i.scheduled))
                .map(|a| a.id())
                .collect();

            for action in &hosted {
                let id = action.id();
                action.with_info(|i| {
                    i.on_optimization = false;
                    if !i.scheduled {
                        return;
                    }
                    i.successors.clear();
                    i.predecessors.clear();
                    if leftover_ids.contains(&id) {
                        i.scheduled = false;
                        return;
                    }
                    if let Some(plan) = plans.get(&id) {
                        i.expected_start = plan.start;
                        i.expected_end = plan.end;
                        i.predecessors = plan
                            .predecessors
                            .iter()
                            .copied()
                            .filter(|p| installed.contains(p))
                            .collect();
                    }
                });
                if !running.contains(&id) && installed.contains(&id) {
                    let info = action.info();
                    outcome.donation_candidates.push(ActionKey {
                        id,
                        priority: action.priority(),
                        expected_start: info.expected_start,
                        expected_end: info.expected_end,
                    });
                }
            }

            let by_id: HashMap<ActionId, &Arc<Action>> =
                hosted.iter().map(|a| (a.id(), a)).collect();
            for action in &hosted {
                let preds = action.with_info(|i| i.predecessors.clone());
                for pred in preds {
                    if let Some(p) = by_id.get(&pred) {
                        p.with_info(|i| i.add_successor(action.id()));
                    }
                }
            }
        }

        let mut state = self.lock_state();
        state.timeline = timeline;
        let parked = state.barrier.take().unwrap_or_default();
        for action in leftovers
            .iter()
            .cloned()
            .chain(self.graph().get_all(&parked))
        {
            if !self.hosts(action.id()) || action.status() != ActionStatus::Scheduled {
                continue;
            }
            if let Err(e) = self.schedule_using_gaps(&mut state, &action) {
                tracing::warn!("Could not place {} after optimization: {}", action.id(), e);
            }
        }
        outcome.indicator = state.timeline.last_gap_start();
        drop(state);

        let mut launchable: Vec<ActionKey> = hosted
            .iter()
            .filter(|a| a.status() == ActionStatus::Scheduled)
            .chain(self.graph().get_all(&parked).iter())
            .filter_map(|a| {
                a.with_info(|i| {
                    (i.scheduled && i.predecessors.is_empty()).then(|| ActionKey {
                        id: a.id(),
                        priority: a.priority(),
                        expected_start: i.expected_start,
                        expected_end: i.expected_end,
                    })
                })
            })
            .collect();
        launchable.sort_by(comparators::ready);
        launchable.dedup_by_key(|k| k.id);
        outcome.launchable = launchable.into_iter().map(|k| k.id).collect();
        outcome.donation_candidates.sort_by(comparators::donation);

        tracing::debug!(
            "Local optimization of {} at {}: {} actions, {} leftovers, {} parked, indicator {}",
            self.name(),
            now,
            hosted.len(),
            leftovers.len(),
            parked.len(),
            outcome.indicator
        );
        outcome
    }
}
