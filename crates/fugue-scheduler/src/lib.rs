//! # fugue-scheduler
//!
//! Gap-timeline resource scheduler for the Fugue runtime.
//!
//! Every worker keeps a timeline of gaps: intervals during which part of its
//! resources are free. Scheduling an action consumes gaps and links the
//! action after the actions that release them; a periodic optimizer rebuilds
//! each timeline and moves pending work from loaded workers to idle ones.
//!
//! Features:
//! - Action arena with data and resource edges and all-or-nothing group locking
//! - Per-worker gap timelines with resource predecessor tracking
//! - Lexicographic scoring of worker/implementation candidates
//! - Local optimization by event simulation with back-filling
//! - Donation of pending actions between workers
//! - Background optimizer with a shutdown handshake

#![warn(missing_docs)]
#![warn(clippy::all)]

mod action;
pub mod comparators;
mod donation;
mod error;
mod gap;
mod local_optimization;
mod optimizer;
mod priority_set;
mod resource_scheduler;
mod score;
mod task_scheduler;

pub use action::{Action, ActionGraph, ActionSpec, ActionStatus, SchedulingInfo};
pub use comparators::ActionKey;
pub use donation::OptimizationReport;
pub use error::{SchedulerError, SchedulerResult};
pub use gap::{Gap, Timeline, OPEN_END};
pub use local_optimization::{EventKind, OptimizationOutcome, SchedulingEvent};
pub use optimizer::{OptimizerConfig, ScheduleOptimizer};
pub use priority_set::PriorityActionSet;
pub use resource_scheduler::ResourceScheduler;
pub use score::{LocalityOracle, NoLocality, Score};
pub use task_scheduler::{ActionOrchestrator, FailureOutcome, Launch, SchedulerConfig, TaskScheduler};
