//! Global optimization: local optimization of every worker followed by
//! donation of pending actions from the most loaded worker to idler ones.

use crate::action::{Action, ActionStatus};
use crate::comparators;
use crate::error::SchedulerError;
use crate::local_optimization::OptimizationOutcome;
use crate::resource_scheduler::ResourceScheduler;
use crate::task_scheduler::TaskScheduler;
use fugue_metrics::{EventSpan, TraceEvent};
use fugue_types::{ActionId, Implementation, WorkerId};
use std::collections::VecDeque;
use std::sync::Arc;

/// Upper bound of donations in one round
const MAX_DONATIONS: usize = 64;

/// Summary of a global optimization round
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptimizationReport {
    /// Actions moved, with origin and destination
    pub donations: Vec<(ActionId, WorkerId, WorkerId)>,
    /// Actions launched during the round
    pub launched: Vec<ActionId>,
}

struct WorkerRound {
    rs: Arc<ResourceScheduler>,
    outcome: OptimizationOutcome,
}

impl TaskScheduler {
    /// Optimize every worker's timeline, then donate until nothing moves
    pub fn optimize_once(&self) -> OptimizationReport {
        let now = self.now_ms();
        let mut report = OptimizationReport::default();

        let mut rounds: Vec<WorkerRound> = {
            let _span = EventSpan::enter(&self.sink, TraceEvent::LocalOptimization);
            self.workers()
                .into_iter()
                .map(|rs| {
                    let outcome = rs.local_optimization(now);
                    WorkerRound { rs, outcome }
                })
                .collect()
        };

        self.realign_all(&mut report);
        for round in &mut rounds {
            round.outcome.indicator = round.rs.last_gap_start();
        }
        for round in &rounds {
            for id in &round.outcome.launchable {
                if let Ok(true) = self.try_to_launch(*id) {
                    report.launched.push(*id);
                }
            }
        }

        while report.donations.len() < MAX_DONATIONS && rounds.len() > 1 {
            let Some(donor) = donor_index(&rounds) else {
                break;
            };
            let mut receivers: Vec<(u64, WorkerId, usize)> = rounds
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != donor)
                .map(|(i, r)| (r.outcome.indicator, r.rs.worker(), i))
                .collect();
            receivers.sort_by(|a, b| comparators::reception(&(a.0, a.1), &(b.0, b.1)));

            let Some((moved, receiver)) = self.donate(&rounds[donor], &rounds, &receivers, &mut report)
            else {
                break;
            };
            rounds[donor].outcome.donation_candidates.retain(|k| k.id != moved);
            rounds[donor].outcome.indicator = rounds[donor].rs.last_gap_start();
            rounds[receiver].outcome.indicator = rounds[receiver].rs.last_gap_start();
        }

        tracing::debug!(
            "Optimization at {}: {} donations, {} launched",
            now,
            report.donations.len(),
            report.launched.len()
        );
        report
    }

    /// Move the first donor action that ends strictly earlier on some receiver
    fn donate(
        &self,
        donor: &WorkerRound,
        rounds: &[WorkerRound],
        receivers: &[(u64, WorkerId, usize)],
        report: &mut OptimizationReport,
    ) -> Option<(ActionId, usize)> {
        for candidate in &donor.outcome.donation_candidates {
            let Some(action) = self.graph().get(candidate.id) else {
                continue;
            };
            if action.status() != ActionStatus::Scheduled || !donor.rs.hosts(action.id()) {
                continue;
            }
            let Some(original) = action.implementation() else {
                continue;
            };
            let current_end = action.info().expected_end();
            let data_ready = self.data_ready(&action);

            for (_, _, idx) in receivers {
                let receiver = &rounds[*idx].rs;
                let Some((implementation, end)) = best_implementation(&action, receiver, data_ready)
                else {
                    continue;
                };
                if end >= current_end {
                    continue;
                }

                let _span = EventSpan::enter(&self.sink, TraceEvent::Donation);
                let mut freed = donor.rs.unschedule_action(&action);
                let landed = match receiver.schedule_action(&action, implementation) {
                    Ok(()) => action.with_info(|i| !i.scheduled || i.expected_end < current_end),
                    Err(e) => {
                        tracing::warn!("Donation of {} failed: {}", action.id(), e);
                        false
                    }
                };
                if !landed {
                    freed.extend(receiver.unschedule_action(&action));
                    if let Err(e) = donor.rs.schedule_action(&action, original.clone()) {
                        tracing::warn!("Could not return {} to {}: {}", action.id(), donor.rs.name(), e);
                    }
                    self.realign_successors(&action, report);
                    report.launched.extend(self.launch_freed(freed));
                    continue;
                }
                tracing::info!(
                    "Donated {} from {} to {} (end {} -> {})",
                    action.id(),
                    donor.rs.name(),
                    receiver.name(),
                    current_end,
                    action.info().expected_end()
                );
                report
                    .donations
                    .push((action.id(), donor.rs.worker(), receiver.worker()));
                self.realign_successors(&action, report);
                report.launched.extend(self.launch_freed(freed));
                self.launch_donated(&action, receiver, report);
                return Some((action.id(), *idx));
            }
        }
        None
    }

    /// Place `action` again on its worker when it would start before its
    /// data is ready. Returns whether it moved.
    fn realign(&self, action: &Arc<Action>, report: &mut OptimizationReport) -> bool {
        if action.status() != ActionStatus::Scheduled {
            return false;
        }
        let (scheduled, start) = action.with_info(|i| (i.scheduled, i.expected_start));
        if !scheduled || start >= self.data_ready(action) {
            return false;
        }
        let (Some(worker), Some(implementation)) = (action.worker(), action.implementation()) else {
            return false;
        };
        let Ok(rs) = self.worker(worker) else {
            return false;
        };
        let freed = rs.unschedule_action(action);
        if let Err(e) = rs.schedule_action(action, implementation) {
            tracing::warn!("Could not realign {} on {}: {}", action.id(), rs.name(), e);
        }
        tracing::debug!(
            "Realigned {} on {} to start at {}",
            action.id(),
            rs.name(),
            action.info().expected_start()
        );
        report.launched.extend(self.launch_freed(freed));
        true
    }

    /// Realign the data successors of `moved`, transitively
    fn realign_successors(&self, moved: &Action, report: &mut OptimizationReport) {
        let mut queue: VecDeque<ActionId> = moved.data_successors().into();
        while let Some(id) = queue.pop_front() {
            let Some(succ) = self.graph().get(id) else {
                continue;
            };
            if self.realign(&succ, report) {
                queue.extend(succ.data_successors());
            }
        }
    }

    /// Realign every hosted action after the workers rebuilt their
    /// timelines one after another
    fn realign_all(&self, report: &mut OptimizationReport) {
        let mut hosted: Vec<ActionId> = self
            .workers()
            .iter()
            .flat_map(|rs| rs.hosted_actions())
            .collect();
        hosted.sort();
        for action in self.graph().get_all(&hosted) {
            if self.realign(&action, report) {
                self.realign_successors(&action, report);
            }
        }
    }

    fn launch_donated(
        &self,
        action: &Arc<Action>,
        receiver: &Arc<ResourceScheduler>,
        report: &mut OptimizationReport,
    ) {
        match self.try_to_launch(action.id()) {
            Ok(true) => report.launched.push(action.id()),
            Ok(false) => {}
            Err(SchedulerError::InvalidScheduling(id)) => {
                tracing::warn!("Invalid scheduling of donated {}, trying its predecessors' workers", id);
                if let Some(worker) = self.reschedule_near_predecessors(action, receiver, report) {
                    if let Some(entry) = report.donations.last_mut() {
                        entry.2 = worker;
                    }
                    self.realign_successors(action, report);
                    if let Ok(true) = self.try_to_launch(id) {
                        report.launched.push(id);
                    }
                }
            }
            Err(e) => tracing::warn!("Donated {} not launched: {}", action.id(), e),
        }
    }

    /// Place `action` on the worker of one of its constraining predecessors
    fn reschedule_near_predecessors(
        &self,
        action: &Arc<Action>,
        current: &Arc<ResourceScheduler>,
        report: &mut OptimizationReport,
    ) -> Option<WorkerId> {
        let mut constraining = action.data_predecessors();
        constraining.extend(action.info().predecessors().iter().copied());
        let data_ready = self.data_ready(action);
        for pred in self.graph().get_all(&constraining) {
            let Some(worker) = pred.worker() else {
                continue;
            };
            if worker == current.worker() {
                continue;
            }
            let Ok(rs) = self.worker(worker) else {
                continue;
            };
            let Some((implementation, _)) = best_implementation(action, &rs, data_ready) else {
                continue;
            };
            if current.hosts(action.id()) {
                let freed = current.unschedule_action(action);
                report.launched.extend(self.launch_freed(freed));
            }
            if rs.schedule_action(action, implementation).is_ok() {
                return Some(worker);
            }
        }
        None
    }
}

/// Worker whose last gap starts latest; the later worker wins ties
fn donor_index(rounds: &[WorkerRound]) -> Option<usize> {
    let mut donor: Option<usize> = None;
    for (i, round) in rounds.iter().enumerate() {
        if round.outcome.donation_candidates.is_empty() {
            continue;
        }
        let better = donor.map_or(true, |d| round.outcome.indicator >= rounds[d].outcome.indicator);
        if better {
            donor = Some(i);
        }
    }
    donor
}

/// Compatible implementation ending earliest on `rs` once its data is
/// ready at `data_ready`, with that end
fn best_implementation(
    action: &Action,
    rs: &ResourceScheduler,
    data_ready: u64,
) -> Option<(Implementation, u64)> {
    action
        .compatible_implementations(&rs.total())
        .into_iter()
        .map(|i| {
            let start = rs.earliest_start(&i.requirements).max(data_ready);
            let end = start + rs.profile_avg(action.core(), i.id);
            (i.clone(), end)
        })
        .min_by_key(|(_, end)| *end)
}
