//! Data instances and versions
//!
//! A [`DataVersion`] carries the reference counts of one version of a datum.
//! Counters are advisory: callers serialize access through the owning
//! [`DataInfo`](crate::DataInfo), which also maintains the chain of valid
//! versions.

use fugue_types::DataId;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Version number of a datum, starting at 1
pub type VersionId = u32;

/// One (data, version) pair and the name addressing its storage object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataInstance {
    data_id: DataId,
    version_id: VersionId,
    renaming: String,
}

impl DataInstance {
    /// Create the instance for a version
    pub fn new(data_id: DataId, version_id: VersionId) -> Self {
        Self {
            data_id,
            version_id,
            renaming: format!("d{}v{}", data_id.get(), version_id),
        }
    }

    /// Datum this instance belongs to
    pub fn data_id(&self) -> DataId {
        self.data_id
    }

    /// Version number
    pub fn version_id(&self) -> VersionId {
        self.version_id
    }

    /// Name of the physical storage object
    pub fn renaming(&self) -> &str {
        &self.renaming
    }
}

impl fmt::Display for DataInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.renaming)
    }
}

/// One-shot wake-up for a thread waiting until a version has no readers
#[derive(Debug, Default)]
pub struct ReadersDrained {
    released: Mutex<bool>,
    cv: Condvar,
}

impl ReadersDrained {
    /// Create an unreleased waiter
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wake every thread blocked on this waiter
    pub fn release(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.cv.notify_all();
    }

    /// Whether the waiter was released
    pub fn is_released(&self) -> bool {
        *self.released.lock()
    }

    /// Block until released
    pub fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.cv.wait(&mut released);
        }
    }

    /// Block until released or until the timeout elapses; returns whether it was released
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut released = self.released.lock();
        if !*released {
            self.cv.wait_for(&mut released, timeout);
        }
        *released
    }
}

/// Reference counts and validity of one version of a datum
#[derive(Debug)]
pub struct DataVersion {
    instance: DataInstance,
    readers: u32,
    writers: u32,
    to_delete: bool,
    used: bool,
    canceled: bool,
    valid: bool,
    reclaimed: bool,
    linked: bool,
    prev_valid: Option<VersionId>,
    next_valid: Option<VersionId>,
    waiters: Vec<Arc<ReadersDrained>>,
}

impl DataVersion {
    /// Create a valid version with no pending accesses
    pub fn new(instance: DataInstance) -> Self {
        Self {
            instance,
            readers: 0,
            writers: 0,
            to_delete: false,
            used: false,
            canceled: false,
            valid: true,
            reclaimed: false,
            linked: false,
            prev_valid: None,
            next_valid: None,
            waiters: Vec::new(),
        }
    }

    /// Instance addressed by this version
    pub fn instance(&self) -> &DataInstance {
        &self.instance
    }

    /// Pending reads
    pub fn readers(&self) -> u32 {
        self.readers
    }

    /// Pending writes
    pub fn writers(&self) -> u32 {
        self.writers
    }

    /// Whether the version may still be read
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether deletion was requested
    pub fn is_to_delete(&self) -> bool {
        self.to_delete
    }

    /// Whether the producing access was aborted
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Whether any access was ever registered
    pub fn has_been_used(&self) -> bool {
        self.used
    }

    /// Previous valid version of the same datum
    pub fn prev_valid(&self) -> Option<VersionId> {
        self.prev_valid
    }

    /// Next valid version of the same datum
    pub fn next_valid(&self) -> Option<VersionId> {
        self.next_valid
    }

    /// Register a pending read
    pub fn will_be_read(&mut self) {
        self.readers += 1;
        self.used = true;
    }

    /// Register a pending write
    pub fn will_be_written(&mut self) {
        self.writers += 1;
        self.used = true;
    }

    /// A pending read finished. Returns true when the version became deletable.
    pub fn has_been_read(&mut self) -> bool {
        debug_assert!(self.readers > 0, "{} read completed twice", self.instance);
        self.readers = self.readers.saturating_sub(1);
        if self.readers == 0 {
            self.release_waiters();
        }
        self.check_deletion()
    }

    /// A pending write finished. Returns true when the version became deletable.
    pub fn has_been_written(&mut self) -> bool {
        debug_assert!(self.writers > 0, "{} write completed twice", self.instance);
        self.writers = self.writers.saturating_sub(1);
        self.check_deletion()
    }

    /// Request deletion. Returns true when the version is deletable right now.
    pub fn mark_to_delete(&mut self) -> bool {
        self.to_delete = true;
        self.check_deletion()
    }

    /// The producing access was aborted: invalidate regardless of counts
    pub fn version_cancelled(&mut self) {
        self.canceled = true;
        self.invalidate();
        self.release_waiters();
    }

    /// Mark the version invalid. Returns whether the state changed.
    pub fn invalidate(&mut self) -> bool {
        let changed = self.valid;
        self.valid = false;
        changed
    }

    /// Register a waiter released once the reader count drops to zero.
    ///
    /// Rejected (returns false) when there are no readers: the caller must
    /// re-check the state instead of blocking. Callers hold the owning
    /// `DataInfo` lock so readers cannot drop to zero between their check
    /// and this registration.
    pub fn add_semaphore(&mut self, waiter: Arc<ReadersDrained>) -> bool {
        if self.readers == 0 {
            return false;
        }
        self.waiters.push(waiter);
        true
    }

    fn check_deletion(&mut self) -> bool {
        if self.to_delete && self.readers == 0 && self.writers == 0 && !self.reclaimed {
            self.reclaimed = true;
            self.invalidate();
            return true;
        }
        false
    }

    fn release_waiters(&mut self) {
        for waiter in self.waiters.drain(..) {
            waiter.release();
        }
    }

    pub(crate) fn is_linked(&self) -> bool {
        self.linked
    }

    pub(crate) fn link(&mut self, prev: Option<VersionId>) {
        self.linked = true;
        self.prev_valid = prev;
        self.next_valid = None;
    }

    pub(crate) fn unlink(&mut self) -> (Option<VersionId>, Option<VersionId>) {
        self.linked = false;
        (self.prev_valid.take(), self.next_valid.take())
    }

    pub(crate) fn set_prev_valid(&mut self, prev: Option<VersionId>) {
        self.prev_valid = prev;
    }

    pub(crate) fn set_next_valid(&mut self, next: Option<VersionId>) {
        self.next_valid = next;
    }
}
