//! Job execution through the executor and its thread pool
//!
//! Tests cover:
//! - Native jobs reading and writing tracked data
//! - Sandboxed file parameters
//! - Failure handling and resource release
//! - Pool dispatch and shutdown

use fugue_data::{DataRegistry, DataValue, InMemoryHostDirectory, MemoryStorage};
use fugue_executor::{
    ExecutionError, ExecutionResult, Executor, ExecutorPool, Invocation, InvocationParam,
    JobListener, JobReport, LocalWorkerNode, NativeCall, WorkerNode,
};
use fugue_metrics::{EventPhase, EventSink, NullSink, TraceEvent};
use fugue_types::{
    CoreId, Direction, Implementation, ImplementationId, ImplementationKind, NativeConfig,
    OnFailure, ResourceDescription, ResourceKind, TaskId,
};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct Markers(Mutex<Vec<(TraceEvent, EventPhase)>>);

impl EventSink for Markers {
    fn emit(&self, event: TraceEvent, phase: EventPhase) {
        self.0.lock().unwrap().push((event, phase));
    }
}

fn registry() -> Arc<DataRegistry> {
    Arc::new(DataRegistry::new(
        Arc::new(InMemoryHostDirectory::new("master")),
        Arc::new(MemoryStorage::new()),
        Arc::new(NullSink),
    ))
}

fn native(function: &str, cpus: u32) -> Implementation {
    Implementation::new(
        ImplementationId::new(0),
        CoreId::new(1),
        format!("{}(...)", function),
        ResourceDescription::cpus(cpus),
        ImplementationKind::Native(NativeConfig {
            function: function.into(),
            working_dir: None,
        }),
    )
}

fn executor(dir: &Path, registry: Arc<DataRegistry>) -> (Executor, Arc<LocalWorkerNode>) {
    let node = Arc::new(LocalWorkerNode::new("master", ResourceDescription::cpus(4)));
    let executor = Executor::new(dir, node.clone(), registry);
    executor.invoker().register_native("concat", |call: &mut NativeCall<'_>| {
        let mut out = call.value(0).map(|v| v.bytes().to_vec()).unwrap_or_default();
        out.extend_from_slice(call.scalar(1).unwrap_or("").as_bytes());
        Ok(Some(DataValue::new(out)))
    });
    executor.invoker().register_native("upper_file", |call: &mut NativeCall<'_>| {
        let src = call.path(0).ok_or_else(|| anyhow::anyhow!("no input"))?;
        let dst = call.path(1).ok_or_else(|| anyhow::anyhow!("no output"))?;
        let text = fs::read_to_string(src)?;
        let mut f = fs::File::create(dst)?;
        f.write_all(text.to_uppercase().as_bytes())?;
        Ok(None)
    });
    executor.invoker().register_native("forget_output", |_call: &mut NativeCall<'_>| Ok(None));
    executor
        .invoker()
        .register_native("crash", |_call: &mut NativeCall<'_>| anyhow::bail!("segmentation fault"));
    (executor, node)
}

// ============================================================================
// Native jobs
// ============================================================================

#[test]
fn native_result_is_stored_in_registry() {
    let dir = tempfile::tempdir().unwrap();
    let reg = registry();
    let (executor, node) = executor(dir.path(), Arc::clone(&reg));

    let input = reg.register_value(DataValue::from("ab"));
    let output = reg.register_value(DataValue::from(""));
    let read = reg.register_read(input).unwrap();
    let write = reg.register_write(output).unwrap();
    let read_instance = read.read_instance().unwrap().clone();
    let written = write.written_instance().unwrap().clone();

    let mut inv = Invocation::new(1, TaskId::new(1), native("concat", 2))
        .with_params(vec![
            InvocationParam::object("s", Direction::In, Some(read_instance.clone()), Some(reg.value_of(&read_instance).unwrap())),
            InvocationParam::scalar("suffix", "cd"),
        ])
        .with_results(vec![InvocationParam::object("ret", Direction::Out, Some(written.clone()), None)]);

    let report = executor.execute(&mut inv).unwrap();
    assert_eq!(report.job_id, 1);
    assert_eq!(reg.value_of(&written).unwrap().bytes().as_ref(), b"abcd");
    assert_eq!(node.free_units(ResourceKind::Cpu), 4);
    assert_eq!(node.profile(&inv.implementation).unwrap().execution_count(), 1);
    assert!(!dir.path().join("sandbox/job_1").exists());
}

#[test]
fn files_are_bound_under_original_names() {
    let dir = tempfile::tempdir().unwrap();
    let markers = Arc::new(Markers::default());
    let (executor, _) = executor(dir.path(), registry());
    let executor = executor.with_sink(markers.clone());

    let input = dir.path().join("d1v1");
    let output = dir.path().join("d2v1");
    fs::write(&input, "hello").unwrap();
    let mut inv = Invocation::new(2, TaskId::new(2), native("upper_file", 1)).with_params(vec![
        InvocationParam::file("src", Direction::In, "input.txt", &input),
        InvocationParam::file("dst", Direction::Out, "output.txt", &output),
    ]);

    executor.execute(&mut inv).unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "HELLO");
    assert_eq!(fs::read_to_string(&input).unwrap(), "hello");

    let events = markers.0.lock().unwrap();
    for event in [
        TraceEvent::SandboxCreate,
        TraceEvent::BindOriginalFiles,
        TraceEvent::UnbindOriginalFiles,
        TraceEvent::StoreFinalValues,
        TraceEvent::SandboxRemove,
    ] {
        assert!(events.contains(&(event, EventPhase::End)), "missing {}", event);
    }
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn missing_output_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, node) = executor(dir.path(), registry());
    let output = dir.path().join("d3v1");
    let mut inv = Invocation::new(3, TaskId::new(3), native("forget_output", 3))
        .with_params(vec![InvocationParam::file("dst", Direction::Out, "out.dat", &output)]);

    let err = executor.execute(&mut inv).unwrap_err();
    assert!(matches!(err, ExecutionError::MissingOutput { .. }));
    assert!(!output.exists());
    assert_eq!(node.free_units(ResourceKind::Cpu), 4);
}

#[test]
fn failed_job_with_ignore_leaves_empty_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, _) = executor(dir.path(), registry());
    let output = dir.path().join("d4v1");
    let mut inv = Invocation::new(4, TaskId::new(4), native("crash", 1))
        .with_params(vec![InvocationParam::file("dst", Direction::Out, "out.dat", &output)])
        .with_on_failure(OnFailure::Ignore);

    let err = executor.execute(&mut inv).unwrap_err();
    assert!(matches!(err, ExecutionError::JobExecution(ref m) if m.contains("segmentation fault")));
    assert_eq!(fs::read(&output).unwrap().len(), 0);
}

#[test]
fn unresolvable_method_binds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, node) = executor(dir.path(), registry());
    let mut inv = Invocation::new(5, TaskId::new(5), native("not_registered", 2));
    let err = executor.execute(&mut inv).unwrap_err();
    assert!(matches!(err, ExecutionError::MethodResolution { .. }));
    assert!(!dir.path().join("sandbox/job_5").exists());
    assert_eq!(node.free_units(ResourceKind::Cpu), 4);
}

#[test]
fn oversized_job_cannot_bind() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, node) = executor(dir.path(), registry());
    let mut inv = Invocation::new(6, TaskId::new(6), native("concat", 8));
    assert!(matches!(
        executor.execute(&mut inv),
        Err(ExecutionError::ResourceBinding { requested: 8, .. })
    ));
    assert_eq!(node.free_units(ResourceKind::Cpu), 4);
}

#[test]
fn failed_file_binding_keeps_input_and_releases_resources() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, node) = executor(dir.path(), registry());
    let input = dir.path().join("d7v1");
    fs::write(&input, "abc").unwrap();
    let mut inv = Invocation::new(7, TaskId::new(7), native("upper_file", 2))
        .with_params(vec![InvocationParam::file("src", Direction::In, "no_such_dir/in.txt", &input)]);

    let err = executor.execute(&mut inv).unwrap_err();
    assert!(matches!(err, ExecutionError::Io(_)));
    assert_eq!(fs::read_to_string(&input).unwrap(), "abc");
    assert!(!dir.path().join("sandbox/job_7").exists());
    assert_eq!(node.free_units(ResourceKind::Cpu), 4);
}

// ============================================================================
// Pool
// ============================================================================

#[derive(Default)]
struct Collector(Mutex<Vec<(u64, bool)>>);

impl JobListener for Collector {
    fn job_finished(&self, invocation: Invocation, result: ExecutionResult<JobReport>) {
        self.0.lock().unwrap().push((invocation.job_id, result.is_ok()));
    }
}

#[test]
fn pool_runs_every_job_before_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, _) = executor(dir.path(), registry());
    let collector = Arc::new(Collector::default());
    let pool = ExecutorPool::start("executor", 3, Arc::new(executor), collector.clone()).unwrap();
    assert_eq!(pool.size(), 3);

    for job in 0..10u64 {
        let name = if job == 7 { "crash" } else { "concat" };
        pool.submit(
            Invocation::new(job, TaskId::new(job), native(name, 1))
                .with_params(vec![InvocationParam::scalar("a", "x"), InvocationParam::scalar("b", "y")]),
        );
    }
    pool.shutdown();

    let mut done = collector.0.lock().unwrap().clone();
    done.sort();
    assert_eq!(done.len(), 10);
    assert!(done.iter().all(|(job, ok)| *ok == (*job != 7)));
}

#[test]
fn urgent_jobs_jump_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, _) = executor(dir.path(), registry());
    executor.invoker().register_native("slow", |_call: &mut NativeCall<'_>| {
        std::thread::sleep(Duration::from_millis(50));
        Ok(None)
    });
    let collector = Arc::new(Collector::default());
    let pool = ExecutorPool::start("urgent", 1, Arc::new(executor), collector.clone()).unwrap();

    pool.submit(Invocation::new(0, TaskId::new(0), native("slow", 1)));
    std::thread::sleep(Duration::from_millis(10));
    pool.submit(Invocation::new(1, TaskId::new(1), native("slow", 1)));
    pool.submit_urgent(Invocation::new(2, TaskId::new(2), native("slow", 1)));
    pool.shutdown();

    let order: Vec<u64> = collector.0.lock().unwrap().iter().map(|(j, _)| *j).collect();
    assert_eq!(order, vec![0, 2, 1]);
}
