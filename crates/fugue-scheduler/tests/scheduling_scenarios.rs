//! Scheduling scenarios exercised through the public API
//!
//! Tests cover:
//! - Serialization of actions on a fully booked worker
//! - Donation from a loaded worker to an idle one
//! - Launch ordering across data and resource dependencies
//! - Trace markers emitted by the optimizer

use fugue_metrics::{EventPhase, EventSink, TraceEvent};
use fugue_scheduler::{
    ActionOrchestrator, ActionSpec, ActionStatus, Launch, SchedulerConfig, TaskScheduler,
};
use fugue_types::{
    ActionId, CoreId, Implementation, ImplementationId, ImplementationKind, NativeConfig, Profile,
    ResourceDescription, WorkerId,
};
use std::sync::{Arc, Mutex};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct Recorder(Mutex<Vec<Launch>>);

impl ActionOrchestrator for Recorder {
    fn launch(&self, launch: Launch) {
        self.0.lock().unwrap().push(launch);
    }
}

impl Recorder {
    fn launched(&self) -> Vec<(ActionId, WorkerId)> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|l| (l.action, l.worker))
            .collect()
    }
}

#[derive(Default)]
struct Markers(Mutex<Vec<(TraceEvent, EventPhase)>>);

impl EventSink for Markers {
    fn emit(&self, event: TraceEvent, phase: EventPhase) {
        self.0.lock().unwrap().push((event, phase));
    }
}

fn implementation(cpus: u32) -> Implementation {
    Implementation::new(
        ImplementationId::new(1),
        CoreId::new(1),
        "compute(int)",
        ResourceDescription::cpus(cpus),
        ImplementationKind::Native(NativeConfig {
            function: "compute".into(),
            working_dir: None,
        }),
    )
}

fn spec(cpus: u32) -> ActionSpec {
    ActionSpec::new(CoreId::new(1), vec![implementation(cpus)])
}

fn with_average(ts: &TaskScheduler, worker: WorkerId, average: u64) {
    ts.worker(worker).unwrap().set_profile(
        CoreId::new(1),
        ImplementationId::new(1),
        Profile::with_average(average),
    );
}

// ============================================================================
// Gap Timeline
// ============================================================================

#[test]
fn full_worker_second_action_starts_after_first() {
    let ts = TaskScheduler::new(SchedulerConfig::default(), Arc::new(Recorder::default()));
    let w = ts.add_worker("node1", ResourceDescription::cpus(4));
    with_average(&ts, w, 100);

    let first = ts.new_action(spec(4));
    ts.schedule_on(first.id(), w, implementation(4)).unwrap();
    let timeline = ts.worker(w).unwrap().timeline();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.gaps()[0].initial_time(), 100);
    assert_eq!(timeline.gaps()[0].resources(), &ResourceDescription::cpus(4));
    assert_eq!(timeline.gaps()[0].origin(), Some(first.id()));

    let second = ts.new_action(spec(4));
    ts.schedule_on(second.id(), w, implementation(4)).unwrap();
    let info = ts.info(second.id()).unwrap();
    assert_eq!(info.expected_start(), 100);
    assert_eq!(info.expected_end(), 200);
    assert_eq!(info.predecessors(), &[first.id()]);
}

#[test]
fn partial_requirements_share_a_worker() {
    let ts = TaskScheduler::new(SchedulerConfig::default(), Arc::new(Recorder::default()));
    let w = ts.add_worker("node1", ResourceDescription::cpus(4));
    with_average(&ts, w, 100);

    let ids: Vec<ActionId> = (0..3)
        .map(|_| {
            let a = ts.new_action(spec(2));
            ts.schedule_on(a.id(), w, implementation(2)).unwrap();
            a.id()
        })
        .collect();

    assert_eq!(ts.info(ids[0]).unwrap().expected_start(), 0);
    assert_eq!(ts.info(ids[1]).unwrap().expected_start(), 0);
    assert_eq!(ts.info(ids[2]).unwrap().expected_start(), 100);
    assert_eq!(ts.worker(w).unwrap().timeline().total(), ResourceDescription::cpus(4));
}

// ============================================================================
// Donation
// ============================================================================

#[test]
fn donation_moves_late_action_to_idle_worker() {
    let recorder = Arc::new(Recorder::default());
    let markers = Arc::new(Markers::default());
    let ts = TaskScheduler::new(SchedulerConfig::default(), recorder.clone()).with_sink(markers.clone());
    let donor = ts.add_worker("donor", ResourceDescription::cpus(1));
    let receiver = ts.add_worker("receiver", ResourceDescription::cpus(1));
    with_average(&ts, donor, 500);
    with_average(&ts, receiver, 500);

    let first = ts.new_action(spec(1));
    let late = ts.new_action(spec(1));
    ts.schedule_on(first.id(), donor, implementation(1)).unwrap();
    ts.schedule_on(late.id(), donor, implementation(1)).unwrap();
    assert_eq!(ts.info(late.id()).unwrap().expected_end(), 1000);

    let report = ts.optimize_once();

    assert_eq!(report.donations, vec![(late.id(), donor, receiver)]);
    assert_eq!(ts.worker_of(late.id()).unwrap(), Some(receiver));
    assert_eq!(ts.info(late.id()).unwrap().expected_start(), 0);
    assert_eq!(ts.worker_of(first.id()).unwrap(), Some(donor));

    let launched = recorder.launched();
    assert!(launched.contains(&(first.id(), donor)));
    assert!(launched.contains(&(late.id(), receiver)));

    let events = markers.0.lock().unwrap();
    assert!(events.contains(&(TraceEvent::Donation, EventPhase::End)));
    assert!(events.contains(&(TraceEvent::LocalOptimization, EventPhase::Begin)));
}

#[test]
fn no_donation_when_receiver_is_not_faster() {
    let ts = TaskScheduler::new(SchedulerConfig::default(), Arc::new(Recorder::default()));
    let donor = ts.add_worker("donor", ResourceDescription::cpus(1));
    let slow = ts.add_worker("slow", ResourceDescription::cpus(1));
    with_average(&ts, donor, 100);
    with_average(&ts, slow, 10_000);

    let first = ts.new_action(spec(1));
    let second = ts.new_action(spec(1));
    ts.schedule_on(first.id(), donor, implementation(1)).unwrap();
    ts.schedule_on(second.id(), donor, implementation(1)).unwrap();

    let report = ts.optimize_once();
    assert!(report.donations.is_empty());
    assert_eq!(ts.worker_of(second.id()).unwrap(), Some(donor));
}

#[test]
fn donation_skips_incompatible_receivers() {
    let ts = TaskScheduler::new(SchedulerConfig::default(), Arc::new(Recorder::default()));
    let donor = ts.add_worker("donor", ResourceDescription::cpus(4));
    let tiny = ts.add_worker("tiny", ResourceDescription::cpus(1));
    with_average(&ts, donor, 500);
    with_average(&ts, tiny, 1);

    let first = ts.new_action(spec(4));
    let second = ts.new_action(spec(4));
    ts.schedule_on(first.id(), donor, implementation(4)).unwrap();
    ts.schedule_on(second.id(), donor, implementation(4)).unwrap();

    assert!(ts.optimize_once().donations.is_empty());
}

#[test]
fn donation_keeps_chain_causality_on_slower_receivers() {
    let recorder = Arc::new(Recorder::default());
    let ts = TaskScheduler::new(SchedulerConfig::default(), recorder.clone());
    let donor = ts.add_worker("donor", ResourceDescription::cpus(1));
    let r1 = ts.add_worker("r1", ResourceDescription::cpus(1));
    let r2 = ts.add_worker("r2", ResourceDescription::cpus(1));
    with_average(&ts, donor, 500);
    with_average(&ts, r1, 900);
    with_average(&ts, r2, 900);

    let a = ts.new_action(spec(1));
    let b = ts.new_action(spec(1));
    let c = ts.new_action(spec(1));
    ts.add_data_dependency(a.id(), b.id()).unwrap();
    ts.add_data_dependency(b.id(), c.id()).unwrap();
    for x in [&a, &b, &c] {
        ts.schedule_on(x.id(), donor, implementation(1)).unwrap();
    }

    for _ in 0..3 {
        let report = ts.optimize_once();
        assert!(report.donations.is_empty(), "{:?}", report.donations);
        let (ia, ib, ic) = (ts.info(a.id()).unwrap(), ts.info(b.id()).unwrap(), ts.info(c.id()).unwrap());
        assert!(ib.expected_start() >= ia.expected_end());
        assert!(ic.expected_start() >= ib.expected_end());
    }
    assert_eq!(ts.worker_of(b.id()).unwrap(), Some(donor));
    assert_eq!(ts.worker_of(c.id()).unwrap(), Some(donor));
    assert_eq!(recorder.launched(), vec![(a.id(), donor)]);
}

#[test]
fn donated_action_waits_for_its_data() {
    let ts = TaskScheduler::new(SchedulerConfig::default(), Arc::new(Recorder::default()));
    let donor = ts.add_worker("donor", ResourceDescription::cpus(1));
    let idle = ts.add_worker("idle", ResourceDescription::cpus(1));
    with_average(&ts, donor, 500);
    with_average(&ts, idle, 100);

    let a = ts.new_action(spec(1));
    let b = ts.new_action(spec(1));
    let c = ts.new_action(spec(1));
    ts.add_data_dependency(a.id(), c.id()).unwrap();
    for x in [&a, &b, &c] {
        ts.schedule_on(x.id(), donor, implementation(1)).unwrap();
    }
    assert_eq!(ts.info(c.id()).unwrap().expected_end(), 1500);

    let report = ts.optimize_once();

    assert!(report.donations.iter().any(|(id, _, to)| *id == c.id() && *to == idle));
    let (ia, ic) = (ts.info(a.id()).unwrap(), ts.info(c.id()).unwrap());
    assert!(ic.expected_start() >= ia.expected_end());
    assert!(ic.expected_end() < 1500);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn chain_runs_in_dependency_order() {
    let recorder = Arc::new(Recorder::default());
    let ts = TaskScheduler::new(SchedulerConfig::default(), recorder.clone());
    let w = ts.add_worker("node1", ResourceDescription::cpus(2));
    with_average(&ts, w, 100);

    let a = ts.new_action(spec(1));
    let b = ts.new_action(spec(1));
    let c = ts.new_action(spec(1));
    ts.add_data_dependency(a.id(), b.id()).unwrap();
    ts.add_data_dependency(a.id(), c.id()).unwrap();
    for x in [&a, &b, &c] {
        ts.schedule(x.id()).unwrap();
    }
    assert_eq!(recorder.launched().len(), 1);

    let launched = ts.action_completed(a.id(), 20).unwrap();
    assert_eq!(launched.len(), 2);
    assert_eq!(b.status(), ActionStatus::Running);
    assert_eq!(c.status(), ActionStatus::Running);

    ts.action_completed(b.id(), 20).unwrap();
    ts.action_completed(c.id(), 20).unwrap();
    let rs = ts.worker(w).unwrap();
    assert_eq!(rs.available(), ResourceDescription::cpus(2));
    assert_eq!(rs.profile(CoreId::new(1), ImplementationId::new(1)).unwrap().execution_count(), 3);
    assert!(rs.hosted_actions().is_empty());
}
