//! Worker node collaborator: unit binding, command execution and profiles

use crate::error::{ExecutionError, ExecutionResult};
use fugue_types::{CoreId, Implementation, ImplementationId, Profile, ResourceDescription, ResourceKind};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// External process to run on the node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Executable
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Directory the process starts in
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl CommandDescriptor {
    /// Value of an environment variable set on the command
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// What a finished external process reported
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit code (-1 when killed by a signal)
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Node that hosts job executions
pub trait WorkerNode: Send + Sync {
    /// Host name reported to multi-node jobs
    fn host_name(&self) -> &str;

    /// Reserve `units` computing units of `kind` for `job`
    fn bind(&self, job: u64, units: u32, kind: ResourceKind) -> ExecutionResult<Vec<u32>>;

    /// Return the units of `kind` bound to `job`
    fn release(&self, job: u64, kind: ResourceKind);

    /// Run an external command to completion
    fn execute(&self, command: &CommandDescriptor) -> ExecutionResult<CommandOutcome>;

    /// Historical execution profile of an implementation
    fn profile(&self, implementation: &Implementation) -> Option<Profile>;

    /// Record a measured execution
    fn record_execution(&self, implementation: &Implementation, elapsed_ms: u64);
}

/// Computing units of one kind
#[derive(Debug, Default)]
struct UnitBinder {
    free: BTreeSet<u32>,
    assigned: HashMap<u64, Vec<u32>>,
}

impl UnitBinder {
    fn new(total: u32) -> Self {
        Self {
            free: (0..total).collect(),
            assigned: HashMap::new(),
        }
    }

    fn bind(&mut self, job: u64, units: u32, kind: ResourceKind) -> ExecutionResult<Vec<u32>> {
        if units as usize > self.free.len() {
            return Err(ExecutionError::ResourceBinding {
                job,
                kind,
                requested: units,
                available: self.free.len() as u32,
            });
        }
        let ids: Vec<u32> = self.free.iter().take(units as usize).copied().collect();
        for id in &ids {
            self.free.remove(id);
        }
        self.assigned.entry(job).or_default().extend(ids.iter().copied());
        Ok(ids)
    }

    fn release(&mut self, job: u64) -> usize {
        match self.assigned.remove(&job) {
            Some(ids) => {
                let n = ids.len();
                self.free.extend(ids);
                n
            }
            None => 0,
        }
    }
}

/// Worker node running jobs on the local machine
pub struct LocalWorkerNode {
    host: String,
    binders: Mutex<HashMap<ResourceKind, UnitBinder>>,
    profiles: RwLock<HashMap<(CoreId, ImplementationId), Profile>>,
}

impl LocalWorkerNode {
    /// Create a node exposing the units in `resources`
    pub fn new(host: impl Into<String>, resources: ResourceDescription) -> Self {
        let binders = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, UnitBinder::new(resources.units(*kind))))
            .collect();
        Self {
            host: host.into(),
            binders: Mutex::new(binders),
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Free units of `kind`
    pub fn free_units(&self, kind: ResourceKind) -> usize {
        self.binders.lock().get(&kind).map_or(0, |b| b.free.len())
    }

    /// Preload a profile, e.g. from a previous run
    pub fn set_profile(&self, implementation: &Implementation, profile: Profile) {
        self.profiles
            .write()
            .insert((implementation.core_id, implementation.id), profile);
    }
}

impl WorkerNode for LocalWorkerNode {
    fn host_name(&self) -> &str {
        &self.host
    }

    fn bind(&self, job: u64, units: u32, kind: ResourceKind) -> ExecutionResult<Vec<u32>> {
        if units == 0 {
            return Ok(Vec::new());
        }
        let mut binders = self.binders.lock();
        let binder = binders.entry(kind).or_default();
        let ids = binder.bind(job, units, kind)?;
        tracing::debug!("Job {} bound {} units {:?}", job, kind, ids);
        Ok(ids)
    }

    fn release(&self, job: u64, kind: ResourceKind) {
        if let Some(binder) = self.binders.lock().get_mut(&kind) {
            let n = binder.release(job);
            if n > 0 {
                tracing::debug!("Job {} released {} {} units", job, n, kind);
            }
        }
    }

    fn execute(&self, command: &CommandDescriptor) -> ExecutionResult<CommandOutcome> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        tracing::debug!("Executing {} {:?}", command.program, command.args);
        let output = cmd.output()?;
        Ok(CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn profile(&self, implementation: &Implementation) -> Option<Profile> {
        self.profiles
            .read()
            .get(&(implementation.core_id, implementation.id))
            .copied()
    }

    fn record_execution(&self, implementation: &Implementation, elapsed_ms: u64) {
        self.profiles
            .write()
            .entry((implementation.core_id, implementation.id))
            .or_default()
            .accumulate(elapsed_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugue_types::{ImplementationKind, NativeConfig};

    #[test]
    fn test_bind_and_release_units() {
        let node = LocalWorkerNode::new("localhost", ResourceDescription::new(4, 1, 0, 0));
        assert_eq!(node.bind(1, 3, ResourceKind::Cpu).unwrap(), vec![0, 1, 2]);
        assert!(matches!(
            node.bind(2, 2, ResourceKind::Cpu),
            Err(ExecutionError::ResourceBinding { available: 1, .. })
        ));
        assert_eq!(node.bind(2, 1, ResourceKind::Cpu).unwrap(), vec![3]);
        assert!(node.bind(3, 1, ResourceKind::Fpga).is_err());
        assert!(node.bind(3, 0, ResourceKind::Fpga).unwrap().is_empty());

        node.release(1, ResourceKind::Cpu);
        assert_eq!(node.free_units(ResourceKind::Cpu), 3);
        node.release(1, ResourceKind::Cpu);
        assert_eq!(node.free_units(ResourceKind::Cpu), 3);
    }

    #[test]
    fn test_profiles() {
        let node = LocalWorkerNode::new("localhost", ResourceDescription::cpus(1));
        let imp = Implementation::new(
            ImplementationId::new(0),
            CoreId::new(2),
            "g()",
            ResourceDescription::cpus(1),
            ImplementationKind::Native(NativeConfig {
                function: "g".into(),
                working_dir: None,
            }),
        );
        assert!(node.profile(&imp).is_none());
        node.record_execution(&imp, 40);
        node.record_execution(&imp, 60);
        let profile = node.profile(&imp).unwrap();
        assert_eq!(profile.execution_count(), 2);
        assert_eq!(profile.average_execution_time(), 50);
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_reports_exit_code() {
        let node = LocalWorkerNode::new("localhost", ResourceDescription::cpus(1));
        let outcome = node
            .execute(&CommandDescriptor {
                program: "sh".into(),
                args: vec!["-c".into(), "echo $GREETING; exit 3".into()],
                working_dir: None,
                env: vec![("GREETING".into(), "hello".into())],
            })
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stdout.trim(), "hello");
    }
}
