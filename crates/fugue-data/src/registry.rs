//! Process-scoped data registry

use crate::{
    DataAccessId, DataError, DataInfo, DataInstance, DataLocation, DataResult, DataValue,
    DeletionMode, HostDirectory, LogicalData, ReadersDrained, StorageBackend,
};
use dashmap::DashMap;
use fugue_metrics::EventSink;
use fugue_types::{DataId, Direction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Owns every datum's version chain and every logical data record.
///
/// Replaces process-wide static maps: each runtime instance creates its own
/// registry and drops it (or calls [`DataRegistry::clear`]) on shutdown.
pub struct DataRegistry {
    next_id: AtomicU64,
    infos: DashMap<DataId, DataInfo>,
    logical: DashMap<String, Arc<LogicalData>>,
    hosts: Arc<dyn HostDirectory>,
    storage: Arc<dyn StorageBackend>,
    sink: Arc<dyn EventSink>,
}

impl DataRegistry {
    /// Create an empty registry
    pub fn new(
        hosts: Arc<dyn HostDirectory>,
        storage: Arc<dyn StorageBackend>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            infos: DashMap::new(),
            logical: DashMap::new(),
            hosts,
            storage,
            sink,
        }
    }

    /// Host bookkeeping collaborator
    pub fn hosts(&self) -> &Arc<dyn HostDirectory> {
        &self.hosts
    }

    /// Storage backend
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    fn allocate(&self) -> (DataId, DataInstance) {
        let id = DataId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = DataInfo::new(id);
        let instance = info.current_instance();
        self.infos.insert(id, info);
        (id, instance)
    }

    fn new_logical(&self, instance: &DataInstance) -> Arc<LogicalData> {
        let ld = Arc::new(LogicalData::new(instance.renaming(), Arc::clone(&self.hosts)));
        self.logical
            .insert(instance.renaming().to_string(), Arc::clone(&ld));
        ld
    }

    /// Register a value produced by the main process
    pub fn register_value(&self, value: DataValue) -> DataId {
        let (id, instance) = self.allocate();
        let ld = self.new_logical(&instance);
        ld.set_size(value.len() as u64);
        ld.set_value(value);
        ld.set_accessed_by_main(true);
        ld.add_location(DataLocation::object(self.hosts.local_host(), instance.renaming()));
        tracing::debug!("Registered value {} as {}", id, instance);
        id
    }

    /// Register a datum whose first version already lives at `location`
    pub fn register_file(&self, location: DataLocation) -> DataId {
        let (id, instance) = self.allocate();
        let ld = self.new_logical(&instance);
        tracing::debug!("Registered {} at {}", instance, location);
        ld.add_location(location);
        id
    }

    /// Register a datum whose value will be produced by a task. The returned
    /// write access names the version holding that value.
    pub fn register_output(&self) -> DataResult<(DataId, DataAccessId)> {
        let (id, instance) = self.allocate();
        self.new_logical(&instance);
        let access = self.register_write(id)?;
        tracing::debug!("Registered output {} of a pending task", id);
        Ok((id, access))
    }

    fn with_info<R>(
        &self,
        id: DataId,
        f: impl FnOnce(&mut DataInfo) -> DataResult<R>,
    ) -> DataResult<R> {
        let mut entry = self.infos.get_mut(&id).ok_or(DataError::UnknownData(id))?;
        f(entry.value_mut())
    }

    fn with_live_info<R>(
        &self,
        id: DataId,
        f: impl FnOnce(&mut DataInfo) -> R,
    ) -> DataResult<R> {
        self.with_info(id, |info| {
            if info.is_deleted() {
                return Err(DataError::UnknownData(id));
            }
            Ok(f(info))
        })
    }

    /// Register an access in the given direction
    pub fn register_access(&self, id: DataId, direction: Direction) -> DataResult<DataAccessId> {
        match direction {
            Direction::In => self.register_read(id),
            Direction::Out => self.register_write(id),
            Direction::InOut => self.register_read_write(id),
        }
    }

    /// Register a read of the current version
    pub fn register_read(&self, id: DataId) -> DataResult<DataAccessId> {
        let read = self.with_live_info(id, DataInfo::will_be_read)?;
        Ok(DataAccessId::Read(read))
    }

    /// Register a write producing a new version
    pub fn register_write(&self, id: DataId) -> DataResult<DataAccessId> {
        let written = self.with_live_info(id, DataInfo::will_be_written)?;
        self.new_logical(&written);
        Ok(DataAccessId::Write(written))
    }

    /// Register a read of the current version and a write of its successor
    pub fn register_read_write(&self, id: DataId) -> DataResult<DataAccessId> {
        let (read, written) = self.with_live_info(id, DataInfo::will_be_read_written)?;
        self.new_logical(&written);
        Ok(DataAccessId::ReadWrite { read, written })
    }

    /// The task holding `access` finished successfully
    pub fn access_completed(&self, access: &DataAccessId) -> DataResult<()> {
        let id = access.data_id();
        let drained = self.with_info(id, |info| {
            if let Some(read) = access.read_instance() {
                let reclaimed = info.has_been_read(read.version_id())?;
                self.reclaim(info, reclaimed);
            }
            if let Some(written) = access.written_instance() {
                let reclaimed = info.has_been_written(written.version_id())?;
                self.reclaim(info, reclaimed);
            }
            Ok(info.is_deleted() && info.is_empty())
        })?;
        self.forget_if_drained(id, drained);
        Ok(())
    }

    /// The task holding `access` was aborted: the read is released and the
    /// produced version is cancelled.
    pub fn cancel_access(&self, access: &DataAccessId) -> DataResult<()> {
        let id = access.data_id();
        let drained = self.with_info(id, |info| {
            if let Some(written) = access.written_instance() {
                let cancelled = info.cancel_version(written.version_id())?;
                self.reclaim(info, cancelled);
            }
            if let Some(read) = access.read_instance() {
                let reclaimed = info.has_been_read(read.version_id())?;
                self.reclaim(info, reclaimed);
            }
            Ok(info.is_deleted() && info.is_empty())
        })?;
        self.forget_if_drained(id, drained);
        Ok(())
    }

    /// Delete a datum; versions are reclaimed as their accesses drain
    pub fn mark_to_delete(&self, id: DataId) -> DataResult<()> {
        let drained = self.with_info(id, |info| {
            let reclaimed = info.mark_to_delete();
            self.reclaim(info, reclaimed);
            Ok(info.is_empty())
        })?;
        tracing::info!("Data {} marked for deletion", id);
        self.forget_if_drained(id, drained);
        Ok(())
    }

    fn reclaim(&self, info: &mut DataInfo, instances: Vec<DataInstance>) {
        for instance in instances {
            if let Some((_, ld)) = self.logical.remove(instance.renaming()) {
                ld.remove_known_alias(instance.renaming(), DeletionMode::Async);
            }
            info.remove_version(instance.version_id());
            tracing::debug!("Reclaimed {}", instance);
        }
    }

    fn forget_if_drained(&self, id: DataId, drained: bool) {
        if drained {
            self.infos.remove(&id);
            tracing::debug!("Forgot data {}", id);
        }
    }

    /// Instance of the current version of a datum
    pub fn current_instance(&self, id: DataId) -> DataResult<DataInstance> {
        self.infos
            .get(&id)
            .map(|info| info.current_instance())
            .ok_or(DataError::UnknownData(id))
    }

    /// Run `f` against the version chain of a datum
    pub fn inspect<R>(&self, id: DataId, f: impl FnOnce(&DataInfo) -> R) -> DataResult<R> {
        self.infos
            .get(&id)
            .map(|info| f(info.value()))
            .ok_or(DataError::UnknownData(id))
    }

    /// Whether a datum is still tracked
    pub fn contains(&self, id: DataId) -> bool {
        self.infos.contains_key(&id)
    }

    /// Number of tracked data
    pub fn data_count(&self) -> usize {
        self.infos.len()
    }

    /// Logical data registered under a name
    pub fn logical_data(&self, name: &str) -> Option<Arc<LogicalData>> {
        self.logical.get(name).map(|ld| Arc::clone(ld.value()))
    }

    /// Logical data of the current version of a datum
    pub fn current_logical_data(&self, id: DataId) -> DataResult<Arc<LogicalData>> {
        let instance = self.current_instance(id)?;
        self.logical_data(instance.renaming())
            .ok_or_else(|| DataError::UnknownLogicalData(instance.renaming().to_string()))
    }

    fn logical_of(&self, instance: &DataInstance) -> DataResult<Arc<LogicalData>> {
        self.logical_data(instance.renaming())
            .ok_or_else(|| DataError::UnknownLogicalData(instance.renaming().to_string()))
    }

    /// A task produced the value of `instance` on the local host
    pub fn store_value(&self, instance: &DataInstance, value: DataValue) -> DataResult<()> {
        let ld = self.logical_of(instance)?;
        ld.set_size(value.len() as u64);
        ld.set_value(value);
        ld.add_location(DataLocation::object(self.hosts.local_host(), instance.renaming()));
        Ok(())
    }

    /// Value of `instance`, loading it from storage when not in memory
    pub fn value_of(&self, instance: &DataInstance) -> DataResult<DataValue> {
        let ld = self.logical_of(instance)?;
        match ld.value() {
            Some(value) => Ok(value),
            None => ld.load_from_storage(self.storage.as_ref(), &self.sink),
        }
    }

    /// Merge two logical data discovered to hold the same value. Every
    /// registered alias ends up pointing at the merged record.
    pub fn link(&self, a: &str, b: &str) -> DataResult<()> {
        let left = self
            .logical_data(a)
            .ok_or_else(|| DataError::UnknownLogicalData(a.to_string()))?;
        let right = self
            .logical_data(b)
            .ok_or_else(|| DataError::UnknownLogicalData(b.to_string()))?;
        LogicalData::link(&left, &right)?;
        for alias in left.aliases() {
            if let Some(other) = self.logical_data(&alias) {
                if !other.is_alias(&left) {
                    other.repoint(&left);
                }
            }
        }
        Ok(())
    }

    /// A worker left. Returns the logical data whose only copy lived there
    /// together with the location to rescue it from.
    pub fn remove_host(
        &self,
        host: &str,
        shared_mounts: &HashMap<String, String>,
    ) -> Vec<(Arc<LogicalData>, DataLocation)> {
        let all: Vec<Arc<LogicalData>> = self.logical.iter().map(|e| Arc::clone(e.value())).collect();
        let rescues: Vec<_> = all
            .into_iter()
            .filter_map(|ld| {
                ld.remove_host_and_check_location_to_save(host, shared_mounts)
                    .map(|loc| (ld, loc))
            })
            .collect();
        tracing::info!("Host {} removed, {} data to rescue", host, rescues.len());
        rescues
    }

    /// Block-free registration of a waiter for the readers of `instance`
    pub fn wait_for_readers(&self, instance: &DataInstance) -> DataResult<Option<Arc<ReadersDrained>>> {
        self.with_info(instance.data_id(), |info| {
            info.wait_for_readers(instance.version_id())
        })
    }

    /// Drop every datum and record
    pub fn clear(&self) {
        self.infos.clear();
        self.logical.clear();
    }
}
