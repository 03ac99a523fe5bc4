//! Implementation variants of a core element

use crate::{CoreId, ImplementationId, ResourceDescription};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_true() -> bool {
    true
}

fn default_mpi_runner() -> String {
    "mpirun".to_string()
}

fn default_processes_per_node() -> u32 {
    1
}

/// In-process call to a registered native function
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeConfig {
    /// Name the function was registered under
    pub function: String,
    /// Run inside this directory instead of a per-job sandbox
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// External executable launched once per task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryConfig {
    /// Path or name of the executable
    pub binary: String,
    /// Run inside this directory instead of a per-job sandbox
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// A non-zero exit code fails the task
    #[serde(default = "default_true")]
    pub fail_by_exit_value: bool,
    /// The executable always creates its OUT files
    #[serde(default = "default_true")]
    pub output_guaranteed: bool,
}

/// MPI job launched through an MPI runner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpiConfig {
    /// Path or name of the MPI executable
    pub binary: String,
    /// Launcher command (mpirun, srun, ...)
    #[serde(default = "default_mpi_runner")]
    pub runner: String,
    /// Processes started on each assigned node
    #[serde(default = "default_processes_per_node")]
    pub processes_per_node: u32,
    /// Run inside this directory instead of a per-job sandbox
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// A non-zero exit code fails the task
    #[serde(default = "default_true")]
    pub fail_by_exit_value: bool,
    /// The job always creates its OUT files
    #[serde(default = "default_true")]
    pub output_guaranteed: bool,
}

/// OpenMP executable, one process using every bound CPU as a thread
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenMpConfig {
    /// Path or name of the executable
    pub binary: String,
    /// Run inside this directory instead of a per-job sandbox
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// A non-zero exit code fails the task
    #[serde(default = "default_true")]
    pub fail_by_exit_value: bool,
    /// The executable always creates its OUT files
    #[serde(default = "default_true")]
    pub output_guaranteed: bool,
}

/// Method executed remotely on a persistent object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentConfig {
    /// Method invoked on the target object
    pub method: String,
}

/// Typed configuration of every supported implementation kind
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImplementationKind {
    /// In-process call
    Native(NativeConfig),
    /// External executable
    Binary(BinaryConfig),
    /// MPI job
    Mpi(MpiConfig),
    /// OpenMP executable
    OpenMp(OpenMpConfig),
    /// Persistent-object method
    PersistentObject(PersistentConfig),
}

impl ImplementationKind {
    /// Short name used in logs and trace events
    pub fn name(&self) -> &'static str {
        match self {
            ImplementationKind::Native(_) => "native",
            ImplementationKind::Binary(_) => "binary",
            ImplementationKind::Mpi(_) => "mpi",
            ImplementationKind::OpenMp(_) => "openmp",
            ImplementationKind::PersistentObject(_) => "persistent",
        }
    }
}

/// One concrete runnable variant of a core element
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Identifier within the core element
    pub id: ImplementationId,
    /// Core element this implementation belongs to
    pub core_id: CoreId,
    /// Method signature reported in errors
    pub signature: String,
    /// Static resource requirements
    pub requirements: ResourceDescription,
    /// Kind-specific configuration
    pub kind: ImplementationKind,
}

impl Implementation {
    /// Create a new implementation
    pub fn new(
        id: ImplementationId,
        core_id: CoreId,
        signature: impl Into<String>,
        requirements: ResourceDescription,
        kind: ImplementationKind,
    ) -> Self {
        Self {
            id,
            core_id,
            signature: signature.into(),
            requirements,
            kind,
        }
    }

    /// Working directory that overrides the per-job sandbox, if any
    pub fn specific_working_dir(&self) -> Option<&Path> {
        match &self.kind {
            ImplementationKind::Native(c) => c.working_dir.as_deref(),
            ImplementationKind::Binary(c) => c.working_dir.as_deref(),
            ImplementationKind::Mpi(c) => c.working_dir.as_deref(),
            ImplementationKind::OpenMp(c) => c.working_dir.as_deref(),
            ImplementationKind::PersistentObject(_) => None,
        }
    }

    /// Whether a missing OUT file after execution must fail the task
    pub fn guarantees_output(&self) -> bool {
        match &self.kind {
            ImplementationKind::Binary(c) => c.output_guaranteed,
            ImplementationKind::Mpi(c) => c.output_guaranteed,
            ImplementationKind::OpenMp(c) => c.output_guaranteed,
            ImplementationKind::Native(_) | ImplementationKind::PersistentObject(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_deserialize() {
        let json = r#"{"type": "mpi", "binary": "/opt/app/solver"}"#;
        let kind: ImplementationKind = serde_json::from_str(json).unwrap();
        match kind {
            ImplementationKind::Mpi(c) => {
                assert_eq!(c.runner, "mpirun");
                assert_eq!(c.processes_per_node, 1);
                assert!(c.output_guaranteed);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_specific_working_dir() {
        let imp = Implementation::new(
            ImplementationId::new(0),
            CoreId::new(1),
            "app.solve(IN)",
            ResourceDescription::cpus(2),
            ImplementationKind::Binary(BinaryConfig {
                binary: "solve".into(),
                working_dir: Some(PathBuf::from("/scratch")),
                fail_by_exit_value: true,
                output_guaranteed: false,
            }),
        );
        assert_eq!(imp.specific_working_dir(), Some(Path::new("/scratch")));
        assert!(!imp.guarantees_output());
        assert_eq!(imp.kind.name(), "binary");
    }
}
