//! Resource descriptions
//!
//! A `ResourceDescription` is used both as the total capacity of a worker and
//! as the requirement of an implementation. The "dynamic" operations are the
//! arithmetic the scheduler performs on gaps while reserving resources.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of computing unit a worker can bind to a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// General purpose processor core
    Cpu,
    /// Graphics accelerator
    Gpu,
    /// Reconfigurable accelerator
    Fpga,
}

impl ResourceKind {
    /// All resource kinds, in binding order
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Cpu, ResourceKind::Gpu, ResourceKind::Fpga];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cpu => write!(f, "CPU"),
            ResourceKind::Gpu => write!(f, "GPU"),
            ResourceKind::Fpga => write!(f, "FPGA"),
        }
    }
}

/// Amount of computing units and memory
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescription {
    /// CPU computing units
    #[serde(default)]
    pub cpus: u32,
    /// GPU computing units
    #[serde(default)]
    pub gpus: u32,
    /// FPGA computing units
    #[serde(default)]
    pub fpgas: u32,
    /// Memory in megabytes
    #[serde(default)]
    pub memory_mb: u64,
}

impl ResourceDescription {
    /// Description with no resources at all
    pub const EMPTY: ResourceDescription = ResourceDescription {
        cpus: 0,
        gpus: 0,
        fpgas: 0,
        memory_mb: 0,
    };

    /// Create a description with only CPU units
    pub const fn cpus(cpus: u32) -> Self {
        Self {
            cpus,
            gpus: 0,
            fpgas: 0,
            memory_mb: 0,
        }
    }

    /// Create a description with every field set
    pub const fn new(cpus: u32, gpus: u32, fpgas: u32, memory_mb: u64) -> Self {
        Self {
            cpus,
            gpus,
            fpgas,
            memory_mb,
        }
    }

    /// Number of units of the given kind
    pub fn units(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Cpu => self.cpus,
            ResourceKind::Gpu => self.gpus,
            ResourceKind::Fpga => self.fpgas,
        }
    }

    /// Subtract `other`, saturating at zero
    pub fn reduce_dynamic(&mut self, other: &ResourceDescription) {
        self.cpus = self.cpus.saturating_sub(other.cpus);
        self.gpus = self.gpus.saturating_sub(other.gpus);
        self.fpgas = self.fpgas.saturating_sub(other.fpgas);
        self.memory_mb = self.memory_mb.saturating_sub(other.memory_mb);
    }

    /// Add `other`
    pub fn increase_dynamic(&mut self, other: &ResourceDescription) {
        self.cpus += other.cpus;
        self.gpus += other.gpus;
        self.fpgas += other.fpgas;
        self.memory_mb += other.memory_mb;
    }

    /// Remove from both descriptions the amount they have in common.
    ///
    /// Returns the removed amount. After the call at least one of the two
    /// descriptions is zero on every field.
    pub fn reduce_common_dynamics(
        gap: &mut ResourceDescription,
        constraints: &mut ResourceDescription,
    ) -> ResourceDescription {
        let common = ResourceDescription {
            cpus: gap.cpus.min(constraints.cpus),
            gpus: gap.gpus.min(constraints.gpus),
            fpgas: gap.fpgas.min(constraints.fpgas),
            memory_mb: gap.memory_mb.min(constraints.memory_mb),
        };
        gap.reduce_dynamic(&common);
        constraints.reduce_dynamic(&common);
        common
    }

    /// True when nothing is left to reserve or release
    pub fn is_dynamic_useless(&self) -> bool {
        self.cpus == 0 && self.gpus == 0 && self.fpgas == 0 && self.memory_mb == 0
    }

    /// True when every field of `requirements` fits in this description
    pub fn can_host_dynamic(&self, requirements: &ResourceDescription) -> bool {
        self.cpus >= requirements.cpus
            && self.gpus >= requirements.gpus
            && self.fpgas >= requirements.fpgas
            && self.memory_mb >= requirements.memory_mb
    }
}

impl fmt::Display for ResourceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[cpus={} gpus={} fpgas={} mem={}MB]",
            self.cpus, self.gpus, self.fpgas, self.memory_mb
        )
    }
}
