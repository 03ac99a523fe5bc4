//! # fugue-types
//!
//! Shared vocabulary types for the Fugue task runtime.
//!
//! This crate provides:
//! - Strongly typed identifiers (actions, tasks, data, workers, cores, implementations)
//! - Resource descriptions with dynamic reduce/increase arithmetic
//! - Implementation variants as a tagged enum of typed configurations
//! - Historical execution profiles
//! - Parameter directions and on-failure policies

#![warn(missing_docs)]
#![warn(clippy::all)]

mod ids;
mod implementation;
mod profile;
mod resources;
mod task;

pub use ids::{ActionId, CoreId, DataId, ImplementationId, TaskId, WorkerId};
pub use implementation::{
    BinaryConfig, Implementation, ImplementationKind, MpiConfig, NativeConfig, OpenMpConfig,
    PersistentConfig,
};
pub use profile::Profile;
pub use resources::{ResourceDescription, ResourceKind};
pub use task::{Direction, OnFailure};
