//! # fugue-data
//!
//! Data version and consistency tracker for the Fugue runtime.
//!
//! Every write to a datum creates a new version. Versions are reference
//! counted by the tasks reading and writing them and are reclaimed only once
//! they are superseded (or deleted) and no access is pending.
//!
//! Features:
//! - Data versions with reader/writer counts and a chain of valid versions
//! - Cancellation with fallback to the previous valid version
//! - Logical data records shared between aliases, with physical locations
//! - In-flight copy tracking
//! - Pluggable storage backends and host bookkeeping
//! - A process-scoped registry tying it all together

#![warn(missing_docs)]
#![warn(clippy::all)]

mod access;
mod copy;
mod error;
mod hosts;
mod info;
mod location;
mod logical;
mod registry;
mod storage;
mod value;
mod version;

pub use access::DataAccessId;
pub use copy::{CopyBarrier, DataCopy};
pub use error::{DataError, DataResult};
pub use hosts::{HostDirectory, InMemoryHostDirectory};
pub use info::DataInfo;
pub use location::{DataLocation, LocationKind, Protocol};
pub use logical::{DeletionMode, LogicalData};
pub use registry::DataRegistry;
pub use storage::{FsStorage, LocationHandle, MemoryStorage, StorageBackend};
pub use value::DataValue;
pub use version::{DataInstance, DataVersion, ReadersDrained, VersionId};
