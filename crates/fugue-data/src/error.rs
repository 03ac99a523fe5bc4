//! Error types for the data tracker

use fugue_types::DataId;
use thiserror::Error;

/// Data tracker errors
#[derive(Debug, Error)]
pub enum DataError {
    /// Two logical data supposed to hold the same value have diverged
    #[error("cannot link {left} and {right}: {reason}")]
    LinkConflict {
        /// Name of the first logical data
        left: String,
        /// Name of the second logical data
        right: String,
        /// Which identity differs
        reason: &'static str,
    },

    /// No registered location yields a valid value
    #[error("cannot load {0}: no location holds a valid value")]
    CannotLoad(String),

    /// Data id was never registered or has been deleted
    #[error("unknown data {0}")]
    UnknownData(DataId),

    /// Version does not exist for the datum
    #[error("unknown version {version} of data {data}")]
    UnknownVersion {
        /// Datum
        data: DataId,
        /// Requested version
        version: u32,
    },

    /// No logical data registered under this name
    #[error("unknown logical data {0}")]
    UnknownLogicalData(String),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Local filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for data tracker operations
pub type DataResult<T> = Result<T, DataError>;
