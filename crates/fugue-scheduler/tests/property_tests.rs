//! Property tests for gap conservation and scheduling causality

use fugue_scheduler::{
    ActionOrchestrator, ActionSpec, ActionStatus, Launch, SchedulerConfig, TaskScheduler,
};
use fugue_types::{
    ActionId, CoreId, Implementation, ImplementationId, ImplementationKind, NativeConfig, Profile,
    ResourceDescription,
};
use proptest::prelude::*;
use std::sync::Arc;

struct Discard;

impl ActionOrchestrator for Discard {
    fn launch(&self, _launch: Launch) {}
}

fn implementation(core: u32, cpus: u32) -> Implementation {
    Implementation::new(
        ImplementationId::new(1),
        CoreId::new(core),
        "f()",
        ResourceDescription::cpus(cpus),
        ImplementationKind::Native(NativeConfig {
            function: "f".into(),
            working_dir: None,
        }),
    )
}

// ============================================================================
// Generators
// ============================================================================

#[derive(Clone, Debug)]
enum TimelineOp {
    Schedule { core: u32, cpus: u32 },
    Unschedule(usize),
}

fn arb_timeline_op() -> impl Strategy<Value = TimelineOp> {
    prop_oneof![
        3 => (1u32..4, 1u32..=4).prop_map(|(core, cpus)| TimelineOp::Schedule { core, cpus }),
        1 => any::<usize>().prop_map(TimelineOp::Unschedule),
    ]
}

#[derive(Clone, Debug)]
struct Node {
    core: u32,
    cpus: u32,
    preds: Vec<usize>,
}

fn arb_graph() -> impl Strategy<Value = Vec<Node>> {
    prop::collection::vec(
        (1u32..4, 1u32..=4, prop::collection::vec(any::<usize>(), 0..3)),
        1..16,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (core, cpus, preds))| Node {
                core,
                cpus,
                preds: if i == 0 {
                    Vec::new()
                } else {
                    preds.into_iter().map(|p| p % i).collect()
                },
            })
            .collect()
    })
}

// ============================================================================
// Gap Conservation
// ============================================================================

proptest! {
    #[test]
    fn prop_gaps_sum_to_worker_total(
        averages in prop::collection::vec(0u64..500, 3),
        ops in prop::collection::vec(arb_timeline_op(), 1..40),
    ) {
        let total = ResourceDescription::cpus(4);
        let ts = TaskScheduler::new(SchedulerConfig::default(), Arc::new(Discard));
        let w = ts.add_worker("w", total);
        let rs = ts.worker(w).unwrap();
        for (core, avg) in averages.iter().enumerate() {
            rs.set_profile(CoreId::new(core as u32 + 1), ImplementationId::new(1), Profile::with_average(*avg));
        }

        let mut scheduled: Vec<ActionId> = Vec::new();
        for op in ops {
            match op {
                TimelineOp::Schedule { core, cpus } => {
                    let imp = implementation(core, cpus);
                    let action = ts.new_action(ActionSpec::new(CoreId::new(core), vec![imp.clone()]));
                    ts.schedule_on(action.id(), w, imp).unwrap();
                    scheduled.push(action.id());
                }
                TimelineOp::Unschedule(idx) => {
                    if scheduled.is_empty() {
                        continue;
                    }
                    let id = scheduled.remove(idx % scheduled.len());
                    let action = ts.graph().get(id).unwrap();
                    rs.unschedule_action(&action);
                }
            }

            let timeline = rs.timeline();
            prop_assert_eq!(timeline.total(), total);
            prop_assert!(timeline.gaps().windows(2).all(|g| g[0].initial_time() <= g[1].initial_time()));
            prop_assert!(timeline.gaps().iter().all(|g| !g.resources().is_dynamic_useless()));
        }
    }
}

// ============================================================================
// Scheduling Causality
// ============================================================================

fn check_causality(ts: &TaskScheduler, graph: &[Node], ids: &[ActionId]) -> Result<(), TestCaseError> {
    for (i, node) in graph.iter().enumerate() {
        let succ = ts.info(ids[i]).unwrap();
        if !succ.is_scheduled() || ts.status(ids[i]).unwrap() != ActionStatus::Scheduled {
            continue;
        }
        for p in &node.preds {
            let pred = ts.info(ids[*p]).unwrap();
            if !pred.is_scheduled() {
                continue;
            }
            prop_assert!(
                succ.expected_start() >= pred.expected_end(),
                "{} starts at {} before {} ends at {}",
                ids[i], succ.expected_start(), ids[*p], pred.expected_end()
            );
        }
        for r in succ.predecessors() {
            let pred = ts.info(*r).unwrap();
            prop_assert!(succ.expected_start() >= pred.expected_end());
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_successors_start_after_predecessors_end(
        graph in arb_graph(),
        averages in prop::collection::vec(prop::collection::vec(1u64..1_000, 3), 1..4),
        rounds in 0usize..4,
    ) {
        let ts = TaskScheduler::new(SchedulerConfig::default(), Arc::new(Discard));
        for (i, worker_averages) in averages.iter().enumerate() {
            let w = ts.add_worker(format!("w{}", i), ResourceDescription::cpus(4));
            let rs = ts.worker(w).unwrap();
            for (core, avg) in worker_averages.iter().enumerate() {
                rs.set_profile(CoreId::new(core as u32 + 1), ImplementationId::new(1), Profile::with_average(*avg));
            }
        }

        let mut ids = Vec::new();
        for node in &graph {
            let imp = implementation(node.core, node.cpus);
            let action = ts.new_action(ActionSpec::new(CoreId::new(node.core), vec![imp]));
            for p in &node.preds {
                ts.add_data_dependency(ids[*p], action.id()).unwrap();
            }
            ts.schedule(action.id()).unwrap();
            ids.push(action.id());
        }
        for id in &ids {
            prop_assert!(ts.info(*id).unwrap().is_scheduled() || ts.status(*id).unwrap() == ActionStatus::Running);
        }
        check_causality(&ts, &graph, &ids)?;

        for _ in 0..rounds {
            let report = ts.optimize_once();
            check_causality(&ts, &graph, &ids)?;
            for (id, _, to) in &report.donations {
                prop_assert_eq!(ts.worker_of(*id).unwrap(), Some(*to));
            }
        }
    }
}
