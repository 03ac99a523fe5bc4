//! Data access identifiers

use crate::DataInstance;
use fugue_types::{DataId, Direction};

/// The instances a task reads and/or produces for one parameter
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataAccessId {
    /// Reads an existing version
    Read(DataInstance),
    /// Produces a new version
    Write(DataInstance),
    /// Reads a version and produces its successor
    ReadWrite {
        /// Version read
        read: DataInstance,
        /// Version produced
        written: DataInstance,
    },
}

impl DataAccessId {
    /// Datum accessed
    pub fn data_id(&self) -> DataId {
        match self {
            DataAccessId::Read(i) | DataAccessId::Write(i) => i.data_id(),
            DataAccessId::ReadWrite { read, .. } => read.data_id(),
        }
    }

    /// Direction of the access
    pub fn direction(&self) -> Direction {
        match self {
            DataAccessId::Read(_) => Direction::In,
            DataAccessId::Write(_) => Direction::Out,
            DataAccessId::ReadWrite { .. } => Direction::InOut,
        }
    }

    /// Instance read, if any
    pub fn read_instance(&self) -> Option<&DataInstance> {
        match self {
            DataAccessId::Read(i) => Some(i),
            DataAccessId::ReadWrite { read, .. } => Some(read),
            DataAccessId::Write(_) => None,
        }
    }

    /// Instance produced, if any
    pub fn written_instance(&self) -> Option<&DataInstance> {
        match self {
            DataAccessId::Write(i) => Some(i),
            DataAccessId::ReadWrite { written, .. } => Some(written),
            DataAccessId::Read(_) => None,
        }
    }
}
