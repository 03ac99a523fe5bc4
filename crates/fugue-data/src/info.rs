//! Version chain of one datum

use crate::{DataError, DataInstance, DataResult, DataVersion, ReadersDrained, VersionId};
use fugue_types::DataId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Every live version of one datum plus the chain of valid ones.
///
/// A version superseded by a write is only marked to delete once that write
/// completes, so cancelling the writer can fall back to it.
#[derive(Debug)]
pub struct DataInfo {
    data_id: DataId,
    versions: BTreeMap<VersionId, DataVersion>,
    current: VersionId,
    next_version: VersionId,
    last_valid: Option<VersionId>,
    superseded: HashMap<VersionId, VersionId>,
    deleted: bool,
}

impl DataInfo {
    /// Create a datum whose first version holds the registered value
    pub fn new(data_id: DataId) -> Self {
        let mut info = Self {
            data_id,
            versions: BTreeMap::new(),
            current: 1,
            next_version: 2,
            last_valid: None,
            superseded: HashMap::new(),
            deleted: false,
        };
        info.push_version(1);
        info
    }

    /// Datum identifier
    pub fn data_id(&self) -> DataId {
        self.data_id
    }

    /// Current version number
    pub fn current_version_id(&self) -> VersionId {
        self.current
    }

    /// Instance of the current version
    pub fn current_instance(&self) -> DataInstance {
        DataInstance::new(self.data_id, self.current)
    }

    /// Whether deletion of the whole datum was requested
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Look up a version
    pub fn version(&self, version: VersionId) -> Option<&DataVersion> {
        self.versions.get(&version)
    }

    /// Number of versions not yet reclaimed
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    fn version_mut(&mut self, version: VersionId) -> DataResult<&mut DataVersion> {
        let data = self.data_id;
        self.versions
            .get_mut(&version)
            .ok_or(DataError::UnknownVersion { data, version })
    }

    fn push_version(&mut self, version: VersionId) {
        let mut v = DataVersion::new(DataInstance::new(self.data_id, version));
        v.link(self.last_valid);
        if let Some(tail) = self.last_valid.and_then(|t| self.versions.get_mut(&t)) {
            tail.set_next_valid(Some(version));
        }
        self.last_valid = Some(version);
        self.versions.insert(version, v);
    }

    /// Splice a version out of the valid chain if it was invalidated
    fn sync_chain(&mut self, version: VersionId) {
        let (prev, next) = match self.versions.get_mut(&version) {
            Some(v) if !v.is_valid() && v.is_linked() => v.unlink(),
            _ => return,
        };
        if let Some(p) = prev.and_then(|p| self.versions.get_mut(&p)) {
            p.set_next_valid(next);
        }
        match next.and_then(|n| self.versions.get_mut(&n)) {
            Some(n) => n.set_prev_valid(prev),
            None => self.last_valid = prev,
        }
    }

    /// Register a read of the current version
    pub fn will_be_read(&mut self) -> DataInstance {
        let current = self.current;
        if let Some(v) = self.versions.get_mut(&current) {
            v.will_be_read();
        }
        self.current_instance()
    }

    /// Register a write producing a new current version
    pub fn will_be_written(&mut self) -> DataInstance {
        let previous = self.current;
        let version = self.next_version;
        self.next_version += 1;
        self.push_version(version);
        if let Some(v) = self.versions.get_mut(&version) {
            v.will_be_written();
        }
        self.superseded.insert(version, previous);
        self.current = version;
        self.current_instance()
    }

    /// Register a read of the current version followed by a write of a new one
    pub fn will_be_read_written(&mut self) -> (DataInstance, DataInstance) {
        let read = self.will_be_read();
        let written = self.will_be_written();
        (read, written)
    }

    /// A read finished; returns the instances that became deletable
    pub fn has_been_read(&mut self, version: VersionId) -> DataResult<Vec<DataInstance>> {
        let deletable = self.version_mut(version)?.has_been_read();
        self.sync_chain(version);
        Ok(self.collect(version, deletable))
    }

    /// A write finished; the version it superseded is marked to delete
    pub fn has_been_written(&mut self, version: VersionId) -> DataResult<Vec<DataInstance>> {
        let deletable = self.version_mut(version)?.has_been_written();
        self.sync_chain(version);
        let mut reclaimed = self.collect(version, deletable);
        if let Some(previous) = self.superseded.remove(&version) {
            reclaimed.extend(self.mark_version_to_delete(previous));
        }
        Ok(reclaimed)
    }

    /// Request deletion of one version
    pub fn mark_version_to_delete(&mut self, version: VersionId) -> Vec<DataInstance> {
        let deletable = match self.versions.get_mut(&version) {
            Some(v) => v.mark_to_delete(),
            None => return Vec::new(),
        };
        self.sync_chain(version);
        self.collect(version, deletable)
    }

    /// Request deletion of every version; the datum accepts no new accesses
    pub fn mark_to_delete(&mut self) -> Vec<DataInstance> {
        self.deleted = true;
        self.superseded.clear();
        let ids: Vec<VersionId> = self.versions.keys().copied().collect();
        ids.into_iter()
            .flat_map(|id| self.mark_version_to_delete(id))
            .collect()
    }

    /// The access producing `version` was aborted.
    ///
    /// The version is invalidated, the current version falls back to the
    /// nearest valid predecessor, and the cancelled instance is returned for
    /// reclamation.
    pub fn cancel_version(&mut self, version: VersionId) -> DataResult<Vec<DataInstance>> {
        let v = self.version_mut(version)?;
        v.version_cancelled();
        let instance = v.instance().clone();
        self.sync_chain(version);
        self.superseded.remove(&version);

        if self.current == version {
            if let Some(prev) = self.previous_valid_predecessor(version) {
                self.current = prev;
            }
        }
        // successors that expected this version as their predecessor now
        // supersede the fallback instead
        let fallback = self.previous_valid_predecessor(version);
        for prev in self.superseded.values_mut() {
            if *prev == version {
                if let Some(f) = fallback {
                    *prev = f;
                }
            }
        }
        self.versions.remove(&version);
        Ok(vec![instance])
    }

    /// Nearest valid version older than `version`, skipping invalid ones
    pub fn previous_valid_predecessor(&self, version: VersionId) -> Option<VersionId> {
        if let Some(v) = self.versions.get(&version) {
            if v.is_valid() && v.is_linked() {
                return v.prev_valid();
            }
        }
        self.versions
            .range(..version)
            .rev()
            .find(|(_, v)| v.is_valid())
            .map(|(id, _)| *id)
    }

    /// Valid versions from oldest to newest, following the chain links
    pub fn valid_chain(&self) -> Vec<VersionId> {
        let mut chain = Vec::new();
        let mut cursor = self.last_valid;
        while let Some(id) = cursor {
            chain.push(id);
            cursor = self.versions.get(&id).and_then(|v| v.prev_valid());
        }
        chain.reverse();
        chain
    }

    /// Register a waiter released when `version` has no readers.
    ///
    /// Returns `None` when there are no readers, in which case the caller
    /// proceeds without blocking.
    pub fn wait_for_readers(&mut self, version: VersionId) -> DataResult<Option<Arc<ReadersDrained>>> {
        let waiter = ReadersDrained::new();
        let registered = self.version_mut(version)?.add_semaphore(Arc::clone(&waiter));
        Ok(registered.then_some(waiter))
    }

    /// Forget a reclaimed version
    pub fn remove_version(&mut self, version: VersionId) {
        self.sync_chain(version);
        self.versions.remove(&version);
    }

    /// True once every version has been reclaimed after a delete
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    fn collect(&self, version: VersionId, deletable: bool) -> Vec<DataInstance> {
        if deletable {
            vec![DataInstance::new(self.data_id, version)]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> DataInfo {
        DataInfo::new(DataId::new(7))
    }

    #[test]
    fn test_write_creates_new_current_version() {
        let mut info = info();
        let written = info.will_be_written();
        assert_eq!(written.version_id(), 2);
        assert_eq!(info.current_version_id(), 2);
        assert_eq!(info.valid_chain(), vec![1, 2]);
    }

    #[test]
    fn test_superseded_version_reclaimed_after_write() {
        let mut info = info();
        let read = info.will_be_read();
        let written = info.will_be_written();

        // v1 still has a reader, so it survives the write completion
        let reclaimed = info.has_been_written(written.version_id()).unwrap();
        assert!(reclaimed.is_empty());
        assert!(info.version(1).unwrap().is_to_delete());

        let reclaimed = info.has_been_read(read.version_id()).unwrap();
        assert_eq!(reclaimed, vec![read]);
        assert_eq!(info.valid_chain(), vec![2]);
    }

    #[test]
    fn test_cancel_falls_back_to_previous() {
        let mut info = info();
        info.will_be_written();
        let v3 = info.will_be_written();

        let cancelled = info.cancel_version(v3.version_id()).unwrap();
        assert_eq!(cancelled, vec![v3]);
        assert_eq!(info.current_version_id(), 2);
        assert_eq!(info.valid_chain(), vec![1, 2]);
    }

    #[test]
    fn test_cancel_middle_relinks_successor_supersession() {
        let mut info = info();
        let v2 = info.will_be_written();
        let v3 = info.will_be_written();

        info.cancel_version(v2.version_id()).unwrap();
        assert_eq!(info.previous_valid_predecessor(3), Some(1));

        // completing v3 now retires v1 instead of the cancelled v2
        let reclaimed = info.has_been_written(v3.version_id()).unwrap();
        assert_eq!(reclaimed, vec![DataInstance::new(DataId::new(7), 1)]);
        assert_eq!(info.valid_chain(), vec![3]);
    }

    #[test]
    fn test_mark_to_delete_all() {
        let mut info = info();
        let read = info.will_be_read();
        let reclaimed = info.mark_to_delete();
        assert!(reclaimed.is_empty());
        assert!(info.is_deleted());

        let reclaimed = info.has_been_read(read.version_id()).unwrap();
        assert_eq!(reclaimed.len(), 1);
        info.remove_version(read.version_id());
        assert!(info.is_empty());
    }

    #[test]
    fn test_unknown_version() {
        let mut info = info();
        assert!(matches!(
            info.has_been_read(9),
            Err(DataError::UnknownVersion { version: 9, .. })
        ));
    }

    #[test]
    fn test_wait_for_readers() {
        let mut info = info();
        assert!(info.wait_for_readers(1).unwrap().is_none());

        info.will_be_read();
        let waiter = info.wait_for_readers(1).unwrap().unwrap();
        info.has_been_read(1).unwrap();
        assert!(waiter.is_released());
    }
}
